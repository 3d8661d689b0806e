//! In-memory mock implementations for billing repository traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::{
        billing_webhook::ProcessedEventRepo, distribution::DistributionScheduleRepo,
        identity::UserBillingRepo,
    },
    domain::entities::{
        distribution_schedule::{
            DistributionProgress, DistributionSchedule, NewDistributionSchedule,
        },
        user_billing::{BillingStateUpdate, UserBillingRecord},
    },
};

// ============================================================================
// InMemoryUserBillingRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryUserBillingRepo {
    pub users: Mutex<HashMap<Uuid, UserBillingRecord>>,
    /// Makes `increment_tokens` fail like an unavailable server-side primitive.
    pub atomic_unavailable: AtomicBool,
    pub fallback_writes: AtomicUsize,
}

impl InMemoryUserBillingRepo {
    pub fn insert(&self, user: UserBillingRecord) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn get(&self, user_id: Uuid) -> Option<UserBillingRecord> {
        self.users.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl UserBillingRepo for InMemoryUserBillingRepo {
    async fn get_by_id(&self, user_id: Uuid) -> AppResult<Option<UserBillingRecord>> {
        Ok(self.get(user_id))
    }

    async fn get_by_customer_id(
        &self,
        customer_id: &str,
    ) -> AppResult<Option<UserBillingRecord>> {
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| u.provider_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserBillingRecord>> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn set_customer_id(&self, user_id: Uuid, customer_id: &str) -> AppResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(AppError::NotFound)?;
        user.provider_customer_id = Some(customer_id.to_string());
        Ok(())
    }

    async fn update_billing_state(
        &self,
        user_id: Uuid,
        update: &BillingStateUpdate,
    ) -> AppResult<UserBillingRecord> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(AppError::NotFound)?;
        update.apply_to(user);
        Ok(user.clone())
    }

    async fn increment_tokens(&self, user_id: Uuid, delta: i64) -> AppResult<i64> {
        if self.atomic_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Database("increment function unavailable".into()));
        }
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(AppError::NotFound)?;
        user.tokens = user.tokens.saturating_add(delta).max(0);
        Ok(user.tokens)
    }

    async fn set_tokens(&self, user_id: Uuid, tokens: i64) -> AppResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&user_id).ok_or(AppError::NotFound)?;
        user.tokens = tokens;
        self.fallback_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// InMemoryDistributionScheduleRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryDistributionScheduleRepo {
    pub schedules: Mutex<HashMap<(Uuid, String), DistributionSchedule>>,
    /// The next `upsert` or `advance` fails like a dropped connection.
    pub fail_next_write: AtomicBool,
}

impl InMemoryDistributionScheduleRepo {
    pub fn get_row(&self, user_id: Uuid, subscription_id: &str) -> Option<DistributionSchedule> {
        self.schedules
            .lock()
            .unwrap()
            .get(&(user_id, subscription_id.to_string()))
            .cloned()
    }

    pub fn insert_row(&self, schedule: DistributionSchedule) {
        self.schedules.lock().unwrap().insert(
            (schedule.user_id, schedule.provider_subscription_id.clone()),
            schedule,
        );
    }

    pub fn len(&self) -> usize {
        self.schedules.lock().unwrap().len()
    }

    fn take_write_failure(&self) -> AppResult<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(AppError::Database("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributionScheduleRepo for InMemoryDistributionScheduleRepo {
    async fn upsert(
        &self,
        schedule: &NewDistributionSchedule,
    ) -> AppResult<DistributionSchedule> {
        self.take_write_failure()?;
        let mut schedules = self.schedules.lock().unwrap();
        let key = (schedule.user_id, schedule.provider_subscription_id.clone());
        let id = schedules.get(&key).map(|s| s.id).unwrap_or_else(Uuid::new_v4);

        let row = DistributionSchedule {
            id,
            user_id: schedule.user_id,
            provider_subscription_id: schedule.provider_subscription_id.clone(),
            total_months: schedule.total_months,
            months_distributed: 1,
            tokens_per_month: schedule.tokens_per_month,
            next_distribution_date: schedule.next_distribution_date,
            last_distribution_date: Some(schedule.first_distribution_date),
            created_at: None,
            updated_at: None,
        };
        schedules.insert(key, row.clone());
        Ok(row)
    }

    async fn advance(
        &self,
        user_id: Uuid,
        provider_subscription_id: &str,
        expected: &DistributionProgress,
        next: &DistributionProgress,
    ) -> AppResult<bool> {
        self.take_write_failure()?;
        let mut schedules = self.schedules.lock().unwrap();
        let Some(row) = schedules.get_mut(&(user_id, provider_subscription_id.to_string())) else {
            return Ok(false);
        };
        if row.months_distributed != expected.months_distributed
            || row.next_distribution_date != expected.next_distribution_date
        {
            return Ok(false);
        }
        row.months_distributed = next.months_distributed;
        row.last_distribution_date = next.last_distribution_date;
        row.next_distribution_date = next.next_distribution_date;
        Ok(true)
    }

    async fn delete(&self, user_id: Uuid, provider_subscription_id: &str) -> AppResult<bool> {
        let mut schedules = self.schedules.lock().unwrap();
        Ok(schedules
            .remove(&(user_id, provider_subscription_id.to_string()))
            .is_some())
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> AppResult<Vec<DistributionSchedule>> {
        let schedules = self.schedules.lock().unwrap();
        let mut due: Vec<DistributionSchedule> =
            schedules.values().filter(|s| s.is_due(now)).cloned().collect();
        due.sort_by_key(|s| s.next_distribution_date);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }
}

// ============================================================================
// InMemoryProcessedEventRepo
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct EventClaim {
    pub claimed_at: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Default)]
pub struct InMemoryProcessedEventRepo {
    pub events: Mutex<HashMap<String, EventClaim>>,
}

impl InMemoryProcessedEventRepo {
    pub fn contains(&self, event_id: &str) -> bool {
        self.events.lock().unwrap().contains_key(event_id)
    }

    pub fn is_processed(&self, event_id: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .get(event_id)
            .is_some_and(|claim| claim.processed)
    }
}

#[async_trait]
impl ProcessedEventRepo for InMemoryProcessedEventRepo {
    async fn claim(
        &self,
        event_id: &str,
        _event_type: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut events = self.events.lock().unwrap();
        match events.get_mut(event_id) {
            Some(claim) if claim.processed || claim.claimed_at >= stale_before => Ok(false),
            Some(claim) => {
                claim.claimed_at = now;
                Ok(true)
            }
            None => {
                events.insert(
                    event_id.to_string(),
                    EventClaim {
                        claimed_at: now,
                        processed: false,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn mark_processed(&self, event_id: &str) -> AppResult<()> {
        if let Some(claim) = self.events.lock().unwrap().get_mut(event_id) {
            claim.processed = true;
        }
        Ok(())
    }

    async fn release(&self, event_id: &str) -> AppResult<()> {
        let mut events = self.events.lock().unwrap();
        if events.get(event_id).is_some_and(|claim| !claim.processed) {
            events.remove(event_id);
        }
        Ok(())
    }
}
