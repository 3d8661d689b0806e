use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use crate::application::ports::payment_provider::PaymentProviderQuery;
use crate::domain::entities::billing_event::{BillingEvent, BillingEventKind};
use crate::domain::entities::plan::{PlanDescriptor, PriceCatalog};
use crate::domain::entities::subscription_tier::SubscriptionTier;
use crate::domain::entities::user_billing::{BillingStateUpdate, UserBillingRecord};
use crate::use_cases::distribution::DistributionScheduler;
use crate::use_cases::identity::{IdentityResolver, UserBillingRepo};
use crate::use_cases::ledger::TokenLedger;

/// Provider subscription statuses that must not (re)activate a paid tier.
const INACTIVE_SUBSCRIPTION_STATUSES: &[&str] =
    &["canceled", "incomplete", "incomplete_expired", "unpaid"];

// ============================================================================
// Repository Trait
// ============================================================================

/// How long a delivery owns an event before a redelivery may take it over.
pub const EVENT_CLAIM_LEASE_SECS: i64 = 300;

/// Provider event ids that are being or have been applied.
#[async_trait]
pub trait ProcessedEventRepo: Send + Sync {
    /// Claim `event_id` at `now`. Returns `false` when the event is already
    /// processed, or claimed by a delivery at or after `stale_before`.
    /// An unfinished claim older than that is taken over.
    async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Settle a claim; later deliveries are duplicates regardless of age.
    async fn mark_processed(&self, event_id: &str) -> AppResult<()>;

    /// Drop an unfinished claim so a redelivery can retry immediately.
    async fn release(&self, event_id: &str) -> AppResult<()>;
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    UnhandledKind,
    UnknownPrice,
    UserNotFound,
    NoSubscription,
    InactiveSubscription,
}

/// What applying one event did to the stored billing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ApplyOutcome {
    TokensGranted {
        user_id: Uuid,
        tokens: i64,
        balance: i64,
    },
    SubscriptionActivated {
        user_id: Uuid,
        tier: SubscriptionTier,
        pro_access_until: Option<DateTime<Utc>>,
        tokens_granted: i64,
    },
    SubscriptionLinked {
        user_id: Uuid,
        tier: SubscriptionTier,
    },
    SubscriptionCancelled {
        user_id: Uuid,
        pro_access_until: Option<DateTime<Utc>>,
    },
    /// Deletion of a subscription the user has already replaced.
    StaleSubscriptionCleaned {
        user_id: Uuid,
        subscription_id: String,
    },
    SubscriptionRenewed {
        user_id: Uuid,
        tier: SubscriptionTier,
        pro_access_until: Option<DateTime<Utc>>,
        tokens_granted: i64,
    },
    AccessRefreshed {
        user_id: Uuid,
        pro_access_until: Option<DateTime<Utc>>,
    },
    Ignored {
        reason: IgnoreReason,
    },
}

impl ApplyOutcome {
    fn ignored(reason: IgnoreReason) -> Self {
        ApplyOutcome::Ignored { reason }
    }
}

// ============================================================================
// Use Cases
// ============================================================================

/// Applies normalized billing events to user billing state.
#[derive(Clone)]
pub struct BillingReconciler {
    identity: IdentityResolver,
    ledger: TokenLedger,
    scheduler: DistributionScheduler,
    users: Arc<dyn UserBillingRepo>,
    provider: Arc<dyn PaymentProviderQuery>,
    catalog: Arc<PriceCatalog>,
    processed_events: Arc<dyn ProcessedEventRepo>,
}

impl BillingReconciler {
    pub fn new(
        identity: IdentityResolver,
        ledger: TokenLedger,
        scheduler: DistributionScheduler,
        users: Arc<dyn UserBillingRepo>,
        provider: Arc<dyn PaymentProviderQuery>,
        catalog: Arc<PriceCatalog>,
        processed_events: Arc<dyn ProcessedEventRepo>,
    ) -> Self {
        Self {
            identity,
            ledger,
            scheduler,
            users,
            provider,
            catalog,
            processed_events,
        }
    }

    pub fn scheduler(&self) -> &DistributionScheduler {
        &self.scheduler
    }

    /// Returns `false` for a redelivery of an event that is processed or
    /// still owned by a live delivery.
    pub async fn claim_event(&self, event: &BillingEvent) -> AppResult<bool> {
        self.claim_event_at(event, Utc::now()).await
    }

    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn claim_event_at(
        &self,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let stale_before = now - Duration::seconds(EVENT_CLAIM_LEASE_SECS);
        self.processed_events
            .claim(&event.event_id, &event.provider_type, now, stale_before)
            .await
    }

    #[instrument(skip(self))]
    pub async fn complete_event(&self, event_id: &str) -> AppResult<()> {
        self.processed_events.mark_processed(event_id).await
    }

    #[instrument(skip(self))]
    pub async fn release_event(&self, event_id: &str) -> AppResult<()> {
        self.processed_events.release(event_id).await
    }

    pub async fn apply_event(&self, event: &BillingEvent) -> AppResult<ApplyOutcome> {
        self.apply_event_at(event, Utc::now()).await
    }

    /// Apply one event as of `now`. Unresolvable users are logged and
    /// reported as ignored; every other error is returned to the caller.
    #[instrument(
        skip(self, event),
        fields(event_id = %event.event_id, kind = %event.kind)
    )]
    pub async fn apply_event_at(
        &self,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> AppResult<ApplyOutcome> {
        let result = match event.kind {
            BillingEventKind::CheckoutCompleted => self.apply_checkout(event, now).await,
            BillingEventKind::SubscriptionCreated | BillingEventKind::SubscriptionUpdated => {
                self.apply_subscription_change(event).await
            }
            BillingEventKind::SubscriptionDeleted => self.apply_subscription_deleted(event).await,
            BillingEventKind::InvoicePaymentSucceeded => self.apply_invoice_paid(event, now).await,
            BillingEventKind::Unhandled => {
                tracing::info!(event_type = %event.provider_type, "Ignoring unhandled event type");
                Ok(ApplyOutcome::ignored(IgnoreReason::UnhandledKind))
            }
        };

        match result {
            Err(AppError::UserNotFound(reference)) => {
                tracing::error!(
                    event_type = %event.provider_type,
                    customer_id = event.customer_id.as_deref().unwrap_or(""),
                    reference = %reference,
                    "Billing event for unknown user dropped"
                );
                Ok(ApplyOutcome::ignored(IgnoreReason::UserNotFound))
            }
            other => other,
        }
    }

    async fn apply_checkout(
        &self,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> AppResult<ApplyOutcome> {
        let mut details = self.subscription_details(event).await?;
        if details.price_id.is_none() {
            details.price_id = self.checkout_line_item_price(event).await?;
        }
        if details.price_id.is_none() {
            tracing::error!(
                session_id = event.checkout_session_id.as_deref().unwrap_or(""),
                customer_id = event.customer_id.as_deref().unwrap_or(""),
                "Checkout has no resolvable price, purchase not credited; \
                 set metadata.price_id when creating the session"
            );
            return Ok(ApplyOutcome::ignored(IgnoreReason::UnknownPrice));
        }
        let Some(plan) = self.plan_for(details.price_id.as_deref()) else {
            return Ok(ApplyOutcome::ignored(IgnoreReason::UnknownPrice));
        };

        let user = self
            .identity
            .resolve_for_checkout(
                event.user_id,
                event.customer_id.as_deref(),
                event.customer_email.as_deref(),
            )
            .await?;

        let (tier, period) = match (plan, plan.tier(), plan.period()) {
            (PlanDescriptor::TokenPack { tokens }, _, _) => {
                let balance = self.ledger.adjust(user.id, tokens).await?;
                tracing::info!(user_id = %user.id, tokens, balance, "Token pack credited");
                return Ok(ApplyOutcome::TokensGranted {
                    user_id: user.id,
                    tokens,
                    balance,
                });
            }
            (_, Some(tier), Some(period)) => (tier, period),
            _ => return Ok(ApplyOutcome::ignored(IgnoreReason::UnknownPrice)),
        };

        let Some(subscription_id) = event.subscription_id.clone() else {
            tracing::warn!(user_id = %user.id, "Subscription checkout without subscription id");
            return Ok(ApplyOutcome::ignored(IgnoreReason::NoSubscription));
        };

        let pro_access_until = details.period_end.or_else(|| {
            tracing::warn!(
                subscription_id = %subscription_id,
                "No period end available, deriving access from plan period"
            );
            period.add_to(now)
        });

        self.users
            .update_billing_state(
                user.id,
                &BillingStateUpdate {
                    status: Some(tier),
                    subscription_id: Some(Some(subscription_id.clone())),
                    pro_access_until,
                },
            )
            .await
            .inspect_err(|e| log_step_failure(&user, "activate_subscription", e))?;

        let tokens_granted = self
            .grant_period(&user, plan, &subscription_id, now)
            .await?;

        tracing::info!(
            user_id = %user.id,
            subscription_id = %subscription_id,
            tier = %tier,
            tokens_granted,
            "Subscription activated from checkout"
        );

        Ok(ApplyOutcome::SubscriptionActivated {
            user_id: user.id,
            tier,
            pro_access_until,
            tokens_granted,
        })
    }

    /// Created/updated only link the subscription; grants come from
    /// checkout and paid invoices.
    async fn apply_subscription_change(&self, event: &BillingEvent) -> AppResult<ApplyOutcome> {
        let status = event.subscription_status.as_deref().unwrap_or_default();
        if INACTIVE_SUBSCRIPTION_STATUSES.contains(&status) {
            tracing::info!(status, "Subscription not active, leaving state unchanged");
            return Ok(ApplyOutcome::ignored(IgnoreReason::InactiveSubscription));
        }

        let (Some(customer_id), Some(subscription_id)) =
            (event.customer_id.as_deref(), event.subscription_id.clone())
        else {
            return Err(AppError::MalformedPayload(
                "subscription event without customer or id".into(),
            ));
        };

        let details = self.subscription_details(event).await?;
        let Some(tier) = self
            .plan_for(details.price_id.as_deref())
            .and_then(|plan| plan.tier())
        else {
            return Ok(ApplyOutcome::ignored(IgnoreReason::UnknownPrice));
        };

        let user = self.identity.resolve(customer_id, None).await?;

        self.users
            .update_billing_state(
                user.id,
                &BillingStateUpdate {
                    status: Some(tier),
                    subscription_id: Some(Some(subscription_id)),
                    pro_access_until: None,
                },
            )
            .await?;

        tracing::info!(user_id = %user.id, tier = %tier, "Subscription linked");
        Ok(ApplyOutcome::SubscriptionLinked {
            user_id: user.id,
            tier,
        })
    }

    async fn apply_subscription_deleted(&self, event: &BillingEvent) -> AppResult<ApplyOutcome> {
        let (Some(customer_id), Some(subscription_id)) =
            (event.customer_id.as_deref(), event.subscription_id.as_deref())
        else {
            return Err(AppError::MalformedPayload(
                "subscription event without customer or id".into(),
            ));
        };

        let user = self.identity.resolve(customer_id, None).await?;

        let current = user.provider_subscription_id.as_deref();
        if let Some(current) = current.filter(|current| *current != subscription_id) {
            self.scheduler.delete(user.id, subscription_id).await?;
            tracing::info!(
                user_id = %user.id,
                subscription_id,
                current,
                "Deleted subscription is not the current one, tier kept"
            );
            return Ok(ApplyOutcome::StaleSubscriptionCleaned {
                user_id: user.id,
                subscription_id: subscription_id.to_string(),
            });
        }

        let pro_access_until = self.access_after_cancellation(event, subscription_id).await?;
        if pro_access_until.is_none() {
            tracing::warn!(
                user_id = %user.id,
                subscription_id,
                "Could not derive access end for cancellation, leaving it unchanged"
            );
        }

        self.scheduler
            .delete(user.id, subscription_id)
            .await
            .inspect_err(|e| log_step_failure(&user, "delete_schedule", e))?;

        self.users
            .update_billing_state(
                user.id,
                &BillingStateUpdate {
                    status: Some(SubscriptionTier::Free),
                    subscription_id: Some(None),
                    pro_access_until,
                },
            )
            .await
            .inspect_err(|e| log_step_failure(&user, "downgrade", e))?;

        tracing::info!(user_id = %user.id, subscription_id, ?pro_access_until, "Subscription cancelled");
        Ok(ApplyOutcome::SubscriptionCancelled {
            user_id: user.id,
            pro_access_until,
        })
    }

    async fn apply_invoice_paid(
        &self,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> AppResult<ApplyOutcome> {
        let Some(subscription_id) = event.subscription_id.as_deref() else {
            tracing::debug!("Invoice without subscription, nothing to renew");
            return Ok(ApplyOutcome::ignored(IgnoreReason::NoSubscription));
        };
        let Some(customer_id) = event.customer_id.as_deref() else {
            return Err(AppError::MalformedPayload("invoice without customer".into()));
        };

        let details = self.subscription_details(event).await?;
        let Some(plan) = self
            .plan_for(details.price_id.as_deref())
            .filter(|plan| plan.is_subscription())
        else {
            return Ok(ApplyOutcome::ignored(IgnoreReason::UnknownPrice));
        };
        let Some(tier) = plan.tier() else {
            return Ok(ApplyOutcome::ignored(IgnoreReason::UnknownPrice));
        };

        let user = self
            .identity
            .resolve(customer_id, event.customer_email.as_deref())
            .await?;
        let pro_access_until = details.period_end;

        if pro_access_until.is_some() {
            self.users
                .update_billing_state(
                    user.id,
                    &BillingStateUpdate {
                        pro_access_until,
                        ..Default::default()
                    },
                )
                .await
                .inspect_err(|e| log_step_failure(&user, "refresh_access", e))?;
        }

        if event.is_initial_invoice() {
            tracing::info!(user_id = %user.id, subscription_id, "Initial invoice, grant already made at checkout");
            return Ok(ApplyOutcome::AccessRefreshed {
                user_id: user.id,
                pro_access_until,
            });
        }

        let tokens_granted = self.grant_period(&user, plan, subscription_id, now).await?;

        tracing::info!(
            user_id = %user.id,
            subscription_id,
            tokens_granted,
            "Subscription renewed"
        );
        Ok(ApplyOutcome::SubscriptionRenewed {
            user_id: user.id,
            tier,
            pro_access_until,
            tokens_granted,
        })
    }

    /// Monthly plans credit the ledger; annual plans reset the drip schedule.
    async fn grant_period(
        &self,
        user: &UserBillingRecord,
        plan: PlanDescriptor,
        subscription_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<i64> {
        match plan {
            PlanDescriptor::ProMonthly { tokens_per_period } => {
                self.ledger
                    .adjust(user.id, tokens_per_period)
                    .await
                    .inspect_err(|e| log_step_failure(user, "grant_tokens", e))?;
                Ok(tokens_per_period)
            }
            PlanDescriptor::ProAnnual { tokens_per_month } => {
                self.scheduler
                    .create_or_renew(user.id, subscription_id, tokens_per_month, now)
                    .await
                    .inspect_err(|e| log_step_failure(user, "create_schedule", e))?;
                Ok(tokens_per_month)
            }
            PlanDescriptor::TokenPack { .. } => Ok(0),
        }
    }

    /// `canceled_at + plan period`, else the period end, else whatever a live
    /// fetch of the subscription says.
    async fn access_after_cancellation(
        &self,
        event: &BillingEvent,
        subscription_id: &str,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let period = self
            .plan_for(event.price_id.as_deref())
            .and_then(|plan| plan.period());

        let from_cancel = event
            .canceled_at
            .zip(period)
            .and_then(|(canceled_at, period)| period.add_to(canceled_at));
        if from_cancel.is_some() {
            return Ok(from_cancel);
        }
        if event.period_end.is_some() {
            return Ok(event.period_end);
        }

        let Some(subscription) = self.provider.retrieve_subscription(subscription_id).await? else {
            return Ok(None);
        };
        let period = self
            .plan_for(subscription.price_id.as_deref())
            .and_then(|plan| plan.period());
        let canceled_at = event.canceled_at.or(subscription.canceled_at);

        Ok(match (canceled_at, period) {
            (Some(canceled_at), Some(period)) => period.add_to(canceled_at),
            _ => subscription.current_period_end,
        })
    }

    /// Price and period end from the event, filled from a live subscription
    /// fetch when either is missing.
    async fn subscription_details(&self, event: &BillingEvent) -> AppResult<SubscriptionDetails> {
        let mut details = SubscriptionDetails {
            price_id: event.price_id.clone(),
            period_end: event.period_end,
        };

        if details.price_id.is_some() && details.period_end.is_some() {
            return Ok(details);
        }
        let Some(subscription_id) = event.subscription_id.as_deref() else {
            return Ok(details);
        };

        if let Some(subscription) = self.provider.retrieve_subscription(subscription_id).await? {
            details.price_id = details.price_id.or(subscription.price_id);
            details.period_end = details.period_end.or(subscription.current_period_end);
        }
        Ok(details)
    }

    /// Checkout webhooks do not embed line items; ask the provider.
    async fn checkout_line_item_price(&self, event: &BillingEvent) -> AppResult<Option<String>> {
        let Some(session_id) = event.checkout_session_id.as_deref() else {
            return Ok(None);
        };
        let prices = self
            .provider
            .list_checkout_line_item_prices(session_id)
            .await?;
        Ok(prices.into_iter().next())
    }

    fn plan_for(&self, price_id: Option<&str>) -> Option<PlanDescriptor> {
        let Some(price_id) = price_id else {
            tracing::warn!("Billing event carries no price id");
            return None;
        };
        let plan = self.catalog.lookup(price_id);
        if plan.is_none() {
            tracing::warn!(price_id, "Price id not in catalog");
        }
        plan
    }
}

struct SubscriptionDetails {
    price_id: Option<String>,
    period_end: Option<DateTime<Utc>>,
}

fn log_step_failure(user: &UserBillingRecord, step: &str, error: &AppError) {
    tracing::error!(
        user_id = %user.id,
        step,
        error = %error,
        "Billing step failed, earlier steps are not rolled back"
    );
}
