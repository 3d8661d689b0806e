use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use crate::domain::entities::distribution_schedule::{
    ANNUAL_DISTRIBUTION_MONTHS, DistributionProgress, DistributionSchedule,
    NewDistributionSchedule,
};
use crate::use_cases::ledger::TokenLedger;

const DUE_BATCH_LIMIT: i64 = 500;

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait DistributionScheduleRepo: Send + Sync {
    /// Insert or reset the row for `(user_id, provider_subscription_id)` with
    /// month 1 already recorded as distributed.
    async fn upsert(&self, schedule: &NewDistributionSchedule)
    -> AppResult<DistributionSchedule>;

    /// Compare-and-set on the progress columns. Returns `false` when the row
    /// no longer holds `expected` (advanced elsewhere, reset, or deleted).
    async fn advance(
        &self,
        user_id: Uuid,
        provider_subscription_id: &str,
        expected: &DistributionProgress,
        next: &DistributionProgress,
    ) -> AppResult<bool>;

    /// Returns whether a row was removed.
    async fn delete(&self, user_id: Uuid, provider_subscription_id: &str) -> AppResult<bool>;

    async fn list_due(&self, now: DateTime<Utc>, limit: i64)
    -> AppResult<Vec<DistributionSchedule>>;
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistributionRunSummary {
    pub granted: u32,
    /// Rows another worker advanced or reset between listing and advancing.
    pub skipped: u32,
    pub failed: u32,
}

/// Owns the monthly token drip for annual subscriptions.
///
/// Progress is always written before tokens are granted, so a retry after a
/// failed write cannot grant the same month twice.
#[derive(Clone)]
pub struct DistributionScheduler {
    repo: Arc<dyn DistributionScheduleRepo>,
    ledger: TokenLedger,
}

impl DistributionScheduler {
    pub fn new(repo: Arc<dyn DistributionScheduleRepo>, ledger: TokenLedger) -> Self {
        Self { repo, ledger }
    }

    /// Reset the schedule for a new subscription year and grant month 1 now.
    ///
    /// A failed grant leaves the row reset; re-running this is the recovery.
    #[instrument(skip(self))]
    pub async fn create_or_renew(
        &self,
        user_id: Uuid,
        provider_subscription_id: &str,
        tokens_per_month: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DistributionSchedule> {
        let schedule = self
            .repo
            .upsert(&NewDistributionSchedule {
                user_id,
                provider_subscription_id: provider_subscription_id.to_string(),
                total_months: ANNUAL_DISTRIBUTION_MONTHS,
                tokens_per_month,
                first_distribution_date: now,
                next_distribution_date: add_month(now)?,
            })
            .await?;

        self.ledger.adjust(user_id, tokens_per_month).await?;

        tracing::info!(
            %user_id,
            subscription_id = provider_subscription_id,
            tokens_per_month,
            "Distribution schedule reset, month 1 granted"
        );

        Ok(schedule)
    }

    /// Idempotent; a missing row is not an error.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, provider_subscription_id: &str) -> AppResult<()> {
        let removed = self.repo.delete(user_id, provider_subscription_id).await?;
        if removed {
            tracing::info!(%user_id, subscription_id = provider_subscription_id, "Distribution schedule deleted");
        }
        Ok(())
    }

    /// Grant one month to every due schedule. One failing schedule does not
    /// stop the batch. Safe to run from several workers at once.
    #[instrument(skip(self))]
    pub async fn distribute_due(&self, now: DateTime<Utc>) -> AppResult<DistributionRunSummary> {
        let due = self.repo.list_due(now, DUE_BATCH_LIMIT).await?;
        let mut summary = DistributionRunSummary::default();

        for schedule in due {
            if !schedule.is_due(now) {
                continue;
            }
            match self.distribute_one(&schedule, now).await {
                Ok(true) => summary.granted += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        user_id = %schedule.user_id,
                        subscription_id = %schedule.provider_subscription_id,
                        error = %e,
                        "Monthly token distribution failed"
                    );
                }
            }
        }

        if summary != DistributionRunSummary::default() {
            tracing::info!(
                granted = summary.granted,
                skipped = summary.skipped,
                failed = summary.failed,
                "Distribution run finished"
            );
        }

        Ok(summary)
    }

    /// Claims the month by advancing the row, then grants. Returns `false`
    /// when the claim was lost.
    async fn distribute_one(
        &self,
        schedule: &DistributionSchedule,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let expected = schedule.progress();
        let next = DistributionProgress {
            months_distributed: expected.months_distributed + 1,
            last_distribution_date: Some(now),
            next_distribution_date: add_month(expected.next_distribution_date)?,
        };

        let claimed = self
            .repo
            .advance(
                schedule.user_id,
                &schedule.provider_subscription_id,
                &expected,
                &next,
            )
            .await?;
        if !claimed {
            tracing::debug!(
                user_id = %schedule.user_id,
                subscription_id = %schedule.provider_subscription_id,
                "Schedule changed since listing, skipping"
            );
            return Ok(false);
        }

        if let Err(e) = self
            .ledger
            .adjust(schedule.user_id, schedule.tokens_per_month)
            .await
        {
            // Hand the month back so the next run retries it.
            let reverted = self
                .repo
                .advance(
                    schedule.user_id,
                    &schedule.provider_subscription_id,
                    &next,
                    &expected,
                )
                .await;
            if !matches!(reverted, Ok(true)) {
                tracing::error!(
                    user_id = %schedule.user_id,
                    subscription_id = %schedule.provider_subscription_id,
                    month = next.months_distributed,
                    "Could not revert schedule after failed grant, month needs manual credit"
                );
            }
            return Err(e);
        }

        Ok(true)
    }
}

fn add_month(at: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
    at.checked_add_months(Months::new(1))
        .ok_or_else(|| AppError::Internal(format!("date overflow adding a month to {at}")))
}
