//! Stripe-style webhook signatures: `t=<unix>,v1=<hex hmac-sha256(secret, "t.body")>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::app_error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (either direction) of the signed timestamp.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

fn signing_mac(secret: &str, timestamp: &str, body: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

pub fn sign_webhook_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let signature = hex::encode(
        signing_mac(secret, &timestamp.to_string(), body)
            .finalize()
            .into_bytes(),
    );
    format!("t={},v1={}", timestamp, signature)
}

/// Verify the signature header against the raw request bytes. Any `v1`
/// entry may match; comparison is constant time.
pub fn verify_webhook_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
    now: i64,
) -> AppResult<()> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::InvalidSignature)?;
    let ts: i64 = timestamp.parse().map_err(|_| AppError::InvalidSignature)?;

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|raw| signing_mac(secret, timestamp, body).verify_slice(&raw).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(AppError::InvalidSignature);
    }

    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(timestamp = ts, now, "Webhook signature timestamp outside tolerance");
        return Err(AppError::InvalidSignature);
    }

    Ok(())
}
