use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::identity::UserBillingRepo,
    domain::entities::user_billing::{BillingStateUpdate, UserBillingRecord},
};

fn row_to_record(row: sqlx::postgres::PgRow) -> UserBillingRecord {
    UserBillingRecord {
        id: row.get("id"),
        email: row.get("email"),
        provider_customer_id: row.get("provider_customer_id"),
        provider_subscription_id: row.get("provider_subscription_id"),
        subscription_status: row.get("subscription_status"),
        pro_access_until: row.get("pro_access_until"),
        tokens: row.get("tokens"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, email, provider_customer_id, provider_subscription_id,
    subscription_status, pro_access_until, tokens, created_at, updated_at
"#;

impl PostgresPersistence {
    async fn fetch_user_where(
        &self,
        clause: &str,
        value: &str,
    ) -> AppResult<Option<UserBillingRecord>> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLS} FROM users WHERE {clause}"))
            .bind(value)
            .fetch_optional(self.pool())
            .await
            .map_err(AppError::from)?;
        Ok(row.map(row_to_record))
    }
}

#[async_trait]
impl UserBillingRepo for PostgresPersistence {
    async fn get_by_id(&self, user_id: Uuid) -> AppResult<Option<UserBillingRecord>> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(self.pool())
            .await
            .map_err(AppError::from)?;
        Ok(row.map(row_to_record))
    }

    async fn get_by_customer_id(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<UserBillingRecord>> {
        self.fetch_user_where("provider_customer_id = $1", customer_id)
            .await
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserBillingRecord>> {
        self.fetch_user_where("lower(email) = lower($1)", email).await
    }

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET provider_customer_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn update_billing_state(
        &self,
        user_id: Uuid,
        update: &BillingStateUpdate,
    ) -> AppResult<UserBillingRecord> {
        // $3 says whether to touch provider_subscription_id at all; $4 may be NULL.
        let (set_subscription, subscription_id) = match &update.subscription_id {
            Some(id) => (true, id.clone()),
            None => (false, None),
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET subscription_status = COALESCE($2, subscription_status),
                provider_subscription_id = CASE WHEN $3 THEN $4 ELSE provider_subscription_id END,
                pro_access_until = COALESCE($5, pro_access_until),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SELECT_COLS}
            "#
        ))
        .bind(user_id)
        .bind(update.status)
        .bind(set_subscription)
        .bind(subscription_id)
        .bind(update.pro_access_until)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;

        row.map(row_to_record).ok_or(AppError::NotFound)
    }

    async fn increment_tokens(&self, user_id: Uuid, delta: i64) -> AppResult<i64> {
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET tokens = GREATEST(0, tokens + $2), updated_at = NOW()
            WHERE id = $1
            RETURNING tokens
            "#,
        )
        .bind(user_id)
        .bind(delta)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;

        balance.ok_or(AppError::NotFound)
    }

    async fn set_tokens(&self, user_id: Uuid, tokens: i64) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET tokens = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(tokens.max(0))
            .execute(self.pool())
            .await
            .map_err(AppError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}
