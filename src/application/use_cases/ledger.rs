use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use crate::use_cases::identity::UserBillingRepo;

/// Token balance adjustments with a zero floor.
#[derive(Clone)]
pub struct TokenLedger {
    users: Arc<dyn UserBillingRepo>,
}

impl TokenLedger {
    pub fn new(users: Arc<dyn UserBillingRepo>) -> Self {
        Self { users }
    }

    /// Returns the new balance. Tries the store's atomic increment first; if
    /// that primitive fails, falls back to read, clamp, write.
    ///
    /// The fallback is not safe under concurrent writers for the same user.
    #[instrument(skip(self))]
    pub async fn adjust(&self, user_id: Uuid, delta: i64) -> AppResult<i64> {
        match self.users.increment_tokens(user_id, delta).await {
            Ok(balance) => Ok(balance),
            Err(AppError::NotFound) => Err(AppError::NotFound),
            Err(e) => {
                tracing::warn!(
                    %user_id,
                    delta,
                    error = %e,
                    "Atomic token increment failed, using read-modify-write fallback"
                );
                self.adjust_fallback(user_id, delta).await
            }
        }
    }

    async fn adjust_fallback(&self, user_id: Uuid, delta: i64) -> AppResult<i64> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let balance = user.tokens.saturating_add(delta).max(0);
        self.users.set_tokens(user_id, balance).await?;
        Ok(balance)
    }
}
