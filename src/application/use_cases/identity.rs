use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use crate::application::ports::payment_provider::PaymentProviderQuery;
use crate::domain::entities::user_billing::{BillingStateUpdate, UserBillingRecord};

// ============================================================================
// Repository Trait
// ============================================================================

/// Record store holding the billing columns of each user.
#[async_trait]
pub trait UserBillingRepo: Send + Sync {
    async fn get_by_id(&self, user_id: Uuid) -> AppResult<Option<UserBillingRecord>>;

    async fn get_by_customer_id(&self, customer_id: &str)
    -> AppResult<Option<UserBillingRecord>>;

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserBillingRecord>>;

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> AppResult<()>;

    async fn update_billing_state(
        &self,
        user_id: Uuid,
        update: &BillingStateUpdate,
    ) -> AppResult<UserBillingRecord>;

    /// Atomic server-side `tokens = max(0, tokens + delta)`; returns the new balance.
    async fn increment_tokens(&self, user_id: Uuid, delta: i64) -> AppResult<i64>;

    async fn set_tokens(&self, user_id: Uuid, tokens: i64) -> AppResult<()>;
}

// ============================================================================
// Use Cases
// ============================================================================

/// Resolves provider customer ids to internal users.
#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserBillingRepo>,
    provider: Arc<dyn PaymentProviderQuery>,
    repair_enabled: bool,
}

impl IdentityResolver {
    pub fn new(
        users: Arc<dyn UserBillingRepo>,
        provider: Arc<dyn PaymentProviderQuery>,
        repair_enabled: bool,
    ) -> Self {
        Self {
            users,
            provider,
            repair_enabled,
        }
    }

    /// Customer id link first, then email with a write-through backfill of
    /// the link, then (if enabled) the repair scan.
    ///
    /// `known_email` is the email embedded in the event; when it matches a
    /// user the provider customer lookup is skipped.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        customer_id: &str,
        known_email: Option<&str>,
    ) -> AppResult<UserBillingRecord> {
        if let Some(user) = self.users.get_by_customer_id(customer_id).await? {
            return Ok(user);
        }

        if let Some(email) = known_email {
            if let Some(user) = self.users.get_by_email(email).await? {
                return self.link_customer(user, customer_id).await;
            }
        }

        let email = self
            .provider
            .retrieve_customer(customer_id)
            .await?
            .filter(|c| !c.deleted)
            .and_then(|c| c.email);

        match email {
            Some(email) if known_email.is_some_and(|known| known.eq_ignore_ascii_case(&email)) => {
                tracing::debug!(customer_id, "Provider email already checked, no user matches");
            }
            Some(email) => {
                if let Some(user) = self.users.get_by_email(&email).await? {
                    return self.link_customer(user, customer_id).await;
                }
                tracing::debug!(customer_id, "No user matches the provider customer email");
            }
            None => tracing::debug!(customer_id, "Provider customer has no email"),
        }

        if self.repair_enabled {
            if let Some(user) = self.repair(customer_id).await? {
                return Ok(user);
            }
        }

        Err(AppError::UserNotFound(customer_id.to_string()))
    }

    /// Checkout sessions name the user directly; persist the customer link
    /// while we have both ids.
    #[instrument(skip(self))]
    pub async fn resolve_for_checkout(
        &self,
        user_id: Option<Uuid>,
        customer_id: Option<&str>,
        customer_email: Option<&str>,
    ) -> AppResult<UserBillingRecord> {
        if let Some(user_id) = user_id {
            if let Some(user) = self.users.get_by_id(user_id).await? {
                return match customer_id {
                    Some(customer_id) => self.link_customer(user, customer_id).await,
                    None => Ok(user),
                };
            }
            tracing::warn!(%user_id, "Checkout references an unknown user, trying customer id");
        }

        match customer_id {
            Some(customer_id) => self.resolve(customer_id, customer_email).await,
            None => Err(AppError::UserNotFound(
                user_id.map(|id| id.to_string()).unwrap_or_default(),
            )),
        }
    }

    /// Bounded backfill for users whose customer link was never stored:
    /// checks the customer's checkout sessions (`client_reference_id`) and
    /// subscriptions (`metadata.user_id`), first page only.
    #[instrument(skip(self))]
    pub async fn repair(&self, customer_id: &str) -> AppResult<Option<UserBillingRecord>> {
        let mut candidates: Vec<String> = self
            .provider
            .list_checkout_sessions(customer_id)
            .await?
            .into_iter()
            .filter_map(|s| s.client_reference_id)
            .collect();

        candidates.extend(
            self.provider
                .list_subscriptions_by_customer(customer_id)
                .await?
                .into_iter()
                .filter_map(|s| s.metadata_user_id),
        );

        for raw in candidates {
            let Ok(user_id) = Uuid::parse_str(&raw) else {
                continue;
            };
            if let Some(user) = self.users.get_by_id(user_id).await? {
                tracing::info!(%user_id, customer_id, "Repaired missing customer link");
                return self.link_customer(user, customer_id).await.map(Some);
            }
        }

        Ok(None)
    }

    /// Store `customer_id` on the user unless it already has a different one.
    async fn link_customer(
        &self,
        mut user: UserBillingRecord,
        customer_id: &str,
    ) -> AppResult<UserBillingRecord> {
        match user.provider_customer_id.as_deref() {
            Some(existing) if existing == customer_id => {}
            Some(existing) => {
                tracing::warn!(
                    user_id = %user.id,
                    existing,
                    customer_id,
                    "User already linked to another customer, keeping existing link"
                );
            }
            None => {
                self.users.set_customer_id(user.id, customer_id).await?;
                tracing::info!(user_id = %user.id, customer_id, "Backfilled customer link");
                user.provider_customer_id = Some(customer_id.to_string());
            }
        }
        Ok(user)
    }
}
