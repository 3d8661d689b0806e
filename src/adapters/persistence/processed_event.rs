use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::billing_webhook::ProcessedEventRepo,
};

#[async_trait]
impl ProcessedEventRepo for PostgresPersistence {
    async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<bool> {
        // The conflict branch only fires for an unfinished claim past its lease.
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhook_events (event_id, event_type, status, claimed_at)
            VALUES ($1, $2, 'processing', $3)
            ON CONFLICT (event_id) DO UPDATE
            SET claimed_at = EXCLUDED.claimed_at
            WHERE processed_webhook_events.status = 'processing'
              AND processed_webhook_events.claimed_at < $4
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(now)
        .bind(stale_before)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_processed(&self, event_id: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE processed_webhook_events
            SET status = 'processed', processed_at = NOW()
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn release(&self, event_id: &str) -> AppResult<()> {
        sqlx::query(
            "DELETE FROM processed_webhook_events WHERE event_id = $1 AND status = 'processing'",
        )
        .bind(event_id)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(())
    }
}
