use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Number of monthly grants attached to one annual subscription.
pub const ANNUAL_DISTRIBUTION_MONTHS: i32 = 14;

/// Monthly token drip for an annual subscription.
///
/// One row per `(user_id, provider_subscription_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionSchedule {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_subscription_id: String,
    pub total_months: i32,
    pub months_distributed: i32,
    pub tokens_per_month: i64,
    pub next_distribution_date: DateTime<Utc>,
    pub last_distribution_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DistributionSchedule {
    pub fn is_complete(&self) -> bool {
        self.months_distributed >= self.total_months
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_complete() && self.next_distribution_date <= now
    }

    pub fn progress(&self) -> DistributionProgress {
        DistributionProgress {
            months_distributed: self.months_distributed,
            last_distribution_date: self.last_distribution_date,
            next_distribution_date: self.next_distribution_date,
        }
    }
}

/// Progress columns of a schedule, compared and swapped as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionProgress {
    pub months_distributed: i32,
    pub last_distribution_date: Option<DateTime<Utc>>,
    pub next_distribution_date: DateTime<Utc>,
}

/// Values written by an upsert. Month 1 is recorded as distributed at
/// `first_distribution_date` in the same write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDistributionSchedule {
    pub user_id: Uuid,
    pub provider_subscription_id: String,
    pub total_months: i32,
    pub tokens_per_month: i64,
    pub first_distribution_date: DateTime<Utc>,
    pub next_distribution_date: DateTime<Utc>,
}
