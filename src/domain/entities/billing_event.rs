use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Provider-neutral kind of an inbound billing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventKind {
    CheckoutCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    #[default]
    Unhandled,
}

impl BillingEventKind {
    /// Map a provider event type string. Anything unknown is `Unhandled`.
    pub fn from_provider_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => BillingEventKind::CheckoutCompleted,
            "customer.subscription.created" => BillingEventKind::SubscriptionCreated,
            "customer.subscription.updated" => BillingEventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => BillingEventKind::SubscriptionDeleted,
            // invoice.paid fires for the same invoice; mapping both would double-grant
            "invoice.payment_succeeded" => BillingEventKind::InvoicePaymentSucceeded,
            _ => BillingEventKind::Unhandled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventKind::CheckoutCompleted => "checkout_completed",
            BillingEventKind::SubscriptionCreated => "subscription_created",
            BillingEventKind::SubscriptionUpdated => "subscription_updated",
            BillingEventKind::SubscriptionDeleted => "subscription_deleted",
            BillingEventKind::InvoicePaymentSucceeded => "invoice_payment_succeeded",
            BillingEventKind::Unhandled => "unhandled",
        }
    }
}

impl std::fmt::Display for BillingEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider `billing_reason` for the first invoice of a new subscription.
pub const BILLING_REASON_SUBSCRIPTION_CREATE: &str = "subscription_create";

/// Normalized billing event. Ephemeral, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BillingEvent {
    pub event_id: String,
    pub kind: BillingEventKind,
    /// Raw provider type, kept for logging unhandled kinds.
    pub provider_type: String,
    pub customer_id: Option<String>,
    /// Email the provider embedded in the payload; saves a customer lookup.
    pub customer_email: Option<String>,
    /// Only present on checkout completion; used to fetch line items when
    /// the session carries no price metadata.
    pub checkout_session_id: Option<String>,
    pub subscription_id: Option<String>,
    pub price_id: Option<String>,
    /// Only present on checkout completion.
    pub user_id: Option<Uuid>,
    pub period_end: Option<DateTime<Utc>>,
    /// Only present on subscription deletion.
    pub canceled_at: Option<DateTime<Utc>>,
    pub subscription_status: Option<String>,
    pub billing_reason: Option<String>,
}

impl BillingEvent {
    pub fn unhandled(event_id: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            kind: BillingEventKind::Unhandled,
            provider_type: provider_type.into(),
            ..Default::default()
        }
    }

    /// First invoice of a subscription; its grant belongs to checkout completion.
    pub fn is_initial_invoice(&self) -> bool {
        self.billing_reason.as_deref() == Some(BILLING_REASON_SUBSCRIPTION_CREATE)
    }
}
