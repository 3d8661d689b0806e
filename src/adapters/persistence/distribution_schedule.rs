use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::distribution::DistributionScheduleRepo,
    domain::entities::distribution_schedule::{
        DistributionProgress, DistributionSchedule, NewDistributionSchedule,
    },
};

fn row_to_schedule(row: sqlx::postgres::PgRow) -> DistributionSchedule {
    DistributionSchedule {
        id: row.get("id"),
        user_id: row.get("user_id"),
        provider_subscription_id: row.get("provider_subscription_id"),
        total_months: row.get("total_months"),
        months_distributed: row.get("months_distributed"),
        tokens_per_month: row.get("tokens_per_month"),
        next_distribution_date: row.get("next_distribution_date"),
        last_distribution_date: row.get("last_distribution_date"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, user_id, provider_subscription_id, total_months, months_distributed,
    tokens_per_month, next_distribution_date, last_distribution_date, created_at, updated_at
"#;

#[async_trait]
impl DistributionScheduleRepo for PostgresPersistence {
    async fn upsert(
        &self,
        schedule: &NewDistributionSchedule,
    ) -> AppResult<DistributionSchedule> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO token_distribution_schedules
                (id, user_id, provider_subscription_id, total_months, months_distributed,
                 tokens_per_month, next_distribution_date, last_distribution_date)
            VALUES ($1, $2, $3, $4, 1, $5, $6, $7)
            ON CONFLICT (user_id, provider_subscription_id) DO UPDATE SET
                total_months = EXCLUDED.total_months,
                months_distributed = 1,
                tokens_per_month = EXCLUDED.tokens_per_month,
                next_distribution_date = EXCLUDED.next_distribution_date,
                last_distribution_date = EXCLUDED.last_distribution_date,
                updated_at = NOW()
            RETURNING {SELECT_COLS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(schedule.user_id)
        .bind(&schedule.provider_subscription_id)
        .bind(schedule.total_months)
        .bind(schedule.tokens_per_month)
        .bind(schedule.next_distribution_date)
        .bind(schedule.first_distribution_date)
        .fetch_one(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(row_to_schedule(row))
    }

    async fn advance(
        &self,
        user_id: Uuid,
        provider_subscription_id: &str,
        expected: &DistributionProgress,
        next: &DistributionProgress,
    ) -> AppResult<bool> {
        // Matching on both columns also rejects a row reset by a renewal.
        let result = sqlx::query(
            r#"
            UPDATE token_distribution_schedules
            SET months_distributed = $5,
                last_distribution_date = $6,
                next_distribution_date = $7,
                updated_at = NOW()
            WHERE user_id = $1 AND provider_subscription_id = $2
              AND months_distributed = $3 AND next_distribution_date = $4
            "#,
        )
        .bind(user_id)
        .bind(provider_subscription_id)
        .bind(expected.months_distributed)
        .bind(expected.next_distribution_date)
        .bind(next.months_distributed)
        .bind(next.last_distribution_date)
        .bind(next.next_distribution_date)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, user_id: Uuid, provider_subscription_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM token_distribution_schedules WHERE user_id = $1 AND provider_subscription_id = $2",
        )
        .bind(user_id)
        .bind(provider_subscription_id)
        .execute(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<DistributionSchedule>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLS} FROM token_distribution_schedules
            WHERE next_distribution_date <= $1 AND months_distributed < total_months
            ORDER BY next_distribution_date
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;

        Ok(rows.into_iter().map(row_to_schedule).collect())
    }
}
