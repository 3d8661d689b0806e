use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app_error::AppResult;

// ============================================================================
// Port Types - Provider-agnostic query results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: Option<String>,
    pub status: Option<String>,
    /// Price of the first subscription item
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    /// `metadata.user_id`, written by the checkout flow when available
    pub metadata_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCheckoutSession {
    pub id: String,
    pub customer_id: Option<String>,
    pub client_reference_id: Option<String>,
    pub subscription_id: Option<String>,
}

// ============================================================================
// Port Trait
// ============================================================================

/// Read-only queries against the payment provider.
///
/// Missing objects are `Ok(None)`; transport and provider failures are
/// `AppError::UpstreamUnavailable`.
#[async_trait]
pub trait PaymentProviderQuery: Send + Sync {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<ProviderSubscription>>;

    async fn retrieve_customer(&self, customer_id: &str) -> AppResult<Option<ProviderCustomer>>;

    async fn list_subscriptions_by_customer(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<ProviderSubscription>>;

    async fn list_checkout_sessions(
        &self,
        customer_id: &str,
    ) -> AppResult<Vec<ProviderCheckoutSession>>;

    /// Price ids of a checkout session's line items, in order.
    async fn list_checkout_line_item_prices(&self, session_id: &str) -> AppResult<Vec<String>>;
}
