use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::subscription_tier::SubscriptionTier;

/// Billing columns of a user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserBillingRecord {
    pub id: Uuid,
    pub email: String,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub subscription_status: SubscriptionTier,
    /// Read by feature gating; may lie in the future while status is `free`
    /// (cancelled but entitled until period end).
    pub pro_access_until: Option<DateTime<Utc>>,
    pub tokens: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserBillingRecord {
    pub fn has_pro_access(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status.is_paid()
            || self.pro_access_until.is_some_and(|until| until > now)
    }
}

/// Partial update of the subscription columns.
///
/// `None` leaves a column untouched. `subscription_id: Some(None)` clears the link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingStateUpdate {
    pub status: Option<SubscriptionTier>,
    pub subscription_id: Option<Option<String>>,
    pub pro_access_until: Option<DateTime<Utc>>,
}

impl BillingStateUpdate {
    pub fn apply_to(&self, record: &mut UserBillingRecord) {
        if let Some(status) = self.status {
            record.subscription_status = status;
        }
        if let Some(subscription_id) = &self.subscription_id {
            record.provider_subscription_id = subscription_id.clone();
        }
        if let Some(until) = self.pro_access_until {
            record.pro_access_until = Some(until);
        }
    }
}
