//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::{
    application::ports::payment_provider::{ProviderCustomer, ProviderSubscription},
    domain::entities::{
        billing_event::{BillingEvent, BillingEventKind},
        plan::{PlanDescriptor, PriceCatalog},
        subscription_tier::SubscriptionTier,
        user_billing::UserBillingRecord,
    },
};

pub const TEST_MONTHLY_PRICE: &str = "price_monthly";
pub const TEST_ANNUAL_PRICE: &str = "price_annual";
pub const TEST_PACK_PRICE: &str = "price_pack";

/// Midnight UTC on the given date.
pub fn test_datetime(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// Create a free user with no provider links.
pub fn create_test_user(overrides: impl FnOnce(&mut UserBillingRecord)) -> UserBillingRecord {
    let id = Uuid::new_v4();
    let mut user = UserBillingRecord {
        id,
        email: format!("user-{}@example.com", id.simple()),
        provider_customer_id: None,
        provider_subscription_id: None,
        subscription_status: SubscriptionTier::Free,
        pro_access_until: None,
        tokens: 0,
        created_at: Some(test_datetime(2024, 1, 1)),
        updated_at: None,
    };
    overrides(&mut user);
    user
}

/// Create a normalized event for customer `cus_1`.
pub fn create_test_event(
    kind: BillingEventKind,
    overrides: impl FnOnce(&mut BillingEvent),
) -> BillingEvent {
    let provider_type = match kind {
        BillingEventKind::CheckoutCompleted => "checkout.session.completed",
        BillingEventKind::SubscriptionCreated => "customer.subscription.created",
        BillingEventKind::SubscriptionUpdated => "customer.subscription.updated",
        BillingEventKind::SubscriptionDeleted => "customer.subscription.deleted",
        BillingEventKind::InvoicePaymentSucceeded => "invoice.payment_succeeded",
        BillingEventKind::Unhandled => "customer.created",
    };
    let mut event = BillingEvent {
        event_id: format!("evt_{}", Uuid::new_v4().simple()),
        kind,
        provider_type: provider_type.to_string(),
        customer_id: Some("cus_1".to_string()),
        ..Default::default()
    };
    overrides(&mut event);
    event
}

/// Create an active monthly subscription for customer `cus_1`.
pub fn create_test_subscription(
    overrides: impl FnOnce(&mut ProviderSubscription),
) -> ProviderSubscription {
    let mut subscription = ProviderSubscription {
        id: "sub_1".to_string(),
        customer_id: Some("cus_1".to_string()),
        status: Some("active".to_string()),
        price_id: Some(TEST_MONTHLY_PRICE.to_string()),
        current_period_end: Some(test_datetime(2024, 4, 1)),
        canceled_at: None,
        metadata_user_id: None,
    };
    overrides(&mut subscription);
    subscription
}

pub fn create_test_customer(id: &str, email: Option<&str>) -> ProviderCustomer {
    ProviderCustomer {
        id: id.to_string(),
        email: email.map(str::to_string),
        deleted: false,
    }
}

/// Monthly and annual plans at 300 tokens, plus a 500-token pack.
pub fn test_catalog() -> PriceCatalog {
    PriceCatalog::new()
        .with_price(
            TEST_MONTHLY_PRICE,
            PlanDescriptor::ProMonthly {
                tokens_per_period: 300,
            },
        )
        .with_price(
            TEST_ANNUAL_PRICE,
            PlanDescriptor::ProAnnual {
                tokens_per_month: 300,
            },
        )
        .with_price(TEST_PACK_PRICE, PlanDescriptor::TokenPack { tokens: 500 })
}
