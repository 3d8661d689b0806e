//! Payment provider webhook endpoint.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use tracing::{error, info, warn};

use crate::adapters::http::app_state::AppState;
use crate::app_error::{AppError, AppResult};
use crate::application::helpers::event_normalizer::normalize_envelope;
use crate::domain::entities::billing_event::BillingEvent;
use crate::use_cases::billing_webhook::{ApplyOutcome, BillingReconciler};
use crate::infra::webhook_signature::verify_webhook_signature;

const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(handle_webhook))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Determines if a webhook processing error should trigger a provider retry.
///
/// Returns `true` if the error is transient, meaning we should return 5xx so
/// the provider redelivers the event.
///
/// Returns `false` if retrying cannot help, meaning we should log and
/// acknowledge (or reject the payload outright).
fn is_retryable_error(error: &AppError) -> bool {
    match error {
        // Transient errors - retry may succeed
        AppError::Database(_) => true,
        AppError::Internal(_) => true,
        AppError::UpstreamUnavailable(_) => true,

        // Won't change with retry
        AppError::MalformedPayload(_) => false,
        AppError::InvalidSignature => false,
        AppError::UserNotFound(_) => false,
        AppError::InvalidInput(_) => false,
        AppError::NotFound => false,
    }
}

/// Returns 500 so the provider retries the webhook.
fn webhook_retryable_error(error: &AppError, event: &BillingEvent, context: &str) -> Response {
    error!(
        error = %error,
        event_type = %event.provider_type,
        event_id = %event.event_id,
        context,
        retryable = true,
        "Webhook processing failed, returning 500 for provider retry"
    );
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn acknowledged(body: serde_json::Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/billing/webhook
///
/// Order matters: the signature is checked against the raw bytes before the
/// body is parsed.
async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    verify_webhook_signature(
        &body,
        signature,
        app_state.config.stripe_webhook_secret.expose_secret(),
        Utc::now().timestamp(),
    )?;

    let envelope: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::MalformedPayload(format!("invalid JSON: {e}")))?;

    let event = normalize_envelope(&envelope)?;
    let reconciler = &app_state.reconciler;

    match reconciler.claim_event(&event).await {
        Ok(true) => {}
        Ok(false) => {
            info!(event_id = %event.event_id, event_type = %event.provider_type, "Duplicate webhook delivery, skipping");
            return Ok(acknowledged(
                serde_json::json!({ "received": true, "duplicate": true }),
            ));
        }
        Err(e) => return Ok(webhook_retryable_error(&e, &event, "claim_event")),
    }

    let result = reconciler.apply_event(&event).await;
    settle_outcome(reconciler, &event, result).await
}

/// Turns an apply result into the response and settles the event claim.
///
/// Only an acknowledged event is marked processed; every other path drops the
/// claim so a redelivery can apply it.
async fn settle_outcome(
    reconciler: &BillingReconciler,
    event: &BillingEvent,
    result: AppResult<ApplyOutcome>,
) -> AppResult<Response> {
    match result {
        Ok(outcome) => {
            info!(
                event_id = %event.event_id,
                event_type = %event.provider_type,
                ?outcome,
                "Webhook applied"
            );
            mark_processed(reconciler, event).await;
            Ok(acknowledged(
                serde_json::json!({ "received": true, "outcome": outcome }),
            ))
        }
        Err(e) if is_retryable_error(&e) => {
            release_claim(reconciler, event).await;
            Ok(webhook_retryable_error(&e, event, "apply_event"))
        }
        Err(e @ AppError::MalformedPayload(_)) => {
            release_claim(reconciler, event).await;
            Err(e)
        }
        Err(e) => {
            error!(
                error = %e,
                event_type = %event.provider_type,
                event_id = %event.event_id,
                retryable = false,
                "Webhook processing failed, acknowledging to stop redelivery"
            );
            mark_processed(reconciler, event).await;
            Ok(acknowledged(serde_json::json!({ "received": true })))
        }
    }
}

/// An unmarked claim expires after the lease, so the event may be re-applied.
async fn mark_processed(reconciler: &BillingReconciler, event: &BillingEvent) {
    if let Err(e) = reconciler.complete_event(&event.event_id).await {
        error!(
            event_id = %event.event_id,
            error = %e,
            "Failed to mark event processed, a redelivery after the claim lease may re-apply it"
        );
    }
}

async fn release_claim(reconciler: &BillingReconciler, event: &BillingEvent) {
    if let Err(e) = reconciler.release_event(&event.event_id).await {
        warn!(
            event_id = %event.event_id,
            error = %e,
            "Failed to release event claim, redelivery waits for the claim lease"
        );
    }
}
