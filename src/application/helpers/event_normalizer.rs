//! Maps provider webhook payloads onto [`BillingEvent`].
//!
//! Pure transform: no I/O. Field lookups try every known name so that
//! provider API version drift does not break parsing.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use crate::application::ports::payment_provider::ProviderSubscription;
use crate::domain::entities::billing_event::{BillingEvent, BillingEventKind};

/// Normalize a full event envelope `{ id, type, data: { object } }`.
pub fn normalize_envelope(envelope: &JsonValue) -> AppResult<BillingEvent> {
    let event_id = non_empty_str(&envelope["id"])
        .ok_or_else(|| malformed("event envelope has no id"))?;
    let event_type = non_empty_str(&envelope["type"])
        .ok_or_else(|| malformed("event envelope has no type"))?;
    let object = &envelope["data"]["object"];
    if !object.is_object() {
        return Err(malformed("event envelope has no data.object"));
    }

    normalize(event_id, event_type, object)
}

/// Normalize a payload object given its declared provider event type.
pub fn normalize(event_id: &str, event_type: &str, object: &JsonValue) -> AppResult<BillingEvent> {
    let kind = BillingEventKind::from_provider_type(event_type);
    let mut event = match kind {
        BillingEventKind::Unhandled => return Ok(BillingEvent::unhandled(event_id, event_type)),
        BillingEventKind::CheckoutCompleted => normalize_checkout(object)?,
        BillingEventKind::SubscriptionCreated
        | BillingEventKind::SubscriptionUpdated
        | BillingEventKind::SubscriptionDeleted => normalize_subscription(kind, object)?,
        BillingEventKind::InvoicePaymentSucceeded => normalize_invoice(object)?,
    };

    event.event_id = event_id.to_string();
    event.kind = kind;
    event.provider_type = event_type.to_string();
    Ok(event)
}

/// Read a subscription object, as embedded in events or returned by the
/// provider's retrieve/list endpoints.
pub fn subscription_from_object(object: &JsonValue) -> Option<ProviderSubscription> {
    let id = id_field(&object["id"])?;
    let first_item = &object["items"]["data"][0];

    Some(ProviderSubscription {
        id,
        customer_id: id_field(&object["customer"]),
        status: non_empty_str(&object["status"]).map(str::to_string),
        price_id: id_field(&first_item["price"]).or_else(|| id_field(&object["plan"])),
        current_period_end: timestamp(&object["current_period_end"])
            .or_else(|| timestamp(&first_item["current_period_end"])),
        canceled_at: timestamp(&object["canceled_at"]),
        metadata_user_id: non_empty_str(&object["metadata"]["user_id"]).map(str::to_string),
    })
}

// ============================================================================
// Per-kind normalization
// ============================================================================

fn normalize_checkout(session: &JsonValue) -> AppResult<BillingEvent> {
    let customer_id = id_field(&session["customer"]);
    let user_id = non_empty_str(&session["client_reference_id"])
        .or_else(|| non_empty_str(&session["metadata"]["user_id"]))
        .and_then(|raw| match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(raw, "Ignoring checkout user reference that is not a UUID");
                None
            }
        });

    if customer_id.is_none() && user_id.is_none() {
        return Err(malformed(
            "checkout session has neither customer nor client_reference_id",
        ));
    }

    Ok(BillingEvent {
        customer_id,
        checkout_session_id: id_field(&session["id"]),
        customer_email: non_empty_str(&session["customer_details"]["email"])
            .or_else(|| non_empty_str(&session["customer_email"]))
            .map(str::to_string),
        subscription_id: id_field(&session["subscription"]),
        price_id: non_empty_str(&session["metadata"]["price_id"])
            .map(str::to_string)
            .or_else(|| id_field(&session["line_items"]["data"][0]["price"])),
        user_id,
        ..Default::default()
    })
}

fn normalize_subscription(kind: BillingEventKind, object: &JsonValue) -> AppResult<BillingEvent> {
    let subscription = subscription_from_object(object)
        .ok_or_else(|| malformed("subscription object has no id"))?;
    let customer_id = subscription
        .customer_id
        .ok_or_else(|| malformed("subscription object has no customer"))?;

    Ok(BillingEvent {
        customer_id: Some(customer_id),
        subscription_id: Some(subscription.id),
        price_id: subscription.price_id,
        period_end: subscription.current_period_end,
        canceled_at: match kind {
            BillingEventKind::SubscriptionDeleted => subscription.canceled_at,
            _ => None,
        },
        subscription_status: subscription.status,
        ..Default::default()
    })
}

fn normalize_invoice(invoice: &JsonValue) -> AppResult<BillingEvent> {
    let customer_id =
        id_field(&invoice["customer"]).ok_or_else(|| malformed("invoice has no customer"))?;
    let first_line = &invoice["lines"]["data"][0];

    Ok(BillingEvent {
        customer_id: Some(customer_id),
        customer_email: non_empty_str(&invoice["customer_email"]).map(str::to_string),
        subscription_id: id_field(&invoice["subscription"])
            .or_else(|| id_field(&invoice["parent"]["subscription_details"]["subscription"]))
            .or_else(|| id_field(&first_line["subscription"])),
        price_id: id_field(&first_line["price"])
            .or_else(|| id_field(&first_line["pricing"]["price_details"]["price"])),
        // Invoice-level period_end trails the line period for subscription invoices.
        period_end: timestamp(&first_line["period"]["end"])
            .or_else(|| timestamp(&invoice["period_end"])),
        billing_reason: non_empty_str(&invoice["billing_reason"]).map(str::to_string),
        ..Default::default()
    })
}

// ============================================================================
// Field helpers
// ============================================================================

fn malformed(msg: &str) -> AppError {
    AppError::MalformedPayload(msg.to_string())
}

fn non_empty_str(value: &JsonValue) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

/// An id given either as a string or as an expanded object with an `id`.
fn id_field(value: &JsonValue) -> Option<String> {
    non_empty_str(value)
        .or_else(|| non_empty_str(&value["id"]))
        .map(str::to_string)
}

fn timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    value.as_i64().and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}
