use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::SignatureVerificationError;
use crate::models::api::ErrorResponse;
use crate::models::transaction::TransactionStatus;
use crate::models::webhook::WalletWebhookEvent;
use crate::services::otp::mask_phone;
use crate::services::replies;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Transaction status callback from the custody gateway. The payload is
/// trusted only after its HMAC signature verifies; rejected payloads mutate
/// nothing and get no reply message.
pub async fn receive_wallet_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if verify_signature(&state.config.webhook_signing_secret, &body, signature).is_err() {
        tracing::warn!("Rejected wallet webhook with bad signature");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "invalid signature".to_string(),
            }),
        ));
    }

    let event: WalletWebhookEvent = serde_json::from_str(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("invalid payload: {}", e),
            }),
        )
    })?;

    let status = match event.event.as_str() {
        "transaction.success" => TransactionStatus::Succeeded,
        "transaction.failed" => TransactionStatus::Failed,
        other => {
            tracing::debug!("Ignoring wallet webhook event type '{}'", other);
            return Ok(Json(json!({ "status": "ignored" })));
        }
    };

    // Idempotent by external id: a replayed delivery is a no-op
    let Some(record) = state.tx_log.apply_status(&event.data.id, status) else {
        return Ok(Json(json!({ "status": "ok", "applied": false })));
    };

    tracing::info!(
        "Transaction {} moved to {:?} (reference {})",
        record.external_id,
        record.status,
        record.reference
    );

    let notify_phone = event
        .data
        .customer_phone
        .clone()
        .unwrap_or_else(|| record.phone.clone());
    let notice = match status {
        TransactionStatus::Succeeded => replies::transaction_confirmed(&record),
        _ => replies::transaction_failed_notice(&record, event.data.failure_reason.as_deref()),
    };

    // Delivery failure doesn't fail the webhook; the provider would retry
    // and re-trigger a duplicate notification otherwise
    if let Err(e) = state.messaging.send_text(&notify_phone, &notice).await {
        tracing::error!(
            "Failed to notify {} of transaction update: {}",
            mask_phone(&notify_phone),
            e
        );
    }

    Ok(Json(json!({ "status": "ok", "applied": true })))
}

/// Constant-time HMAC-SHA256 check over the raw payload.
pub fn verify_signature(
    secret: &str,
    payload: &str,
    signature_hex: &str,
) -> Result<(), SignatureVerificationError> {
    let expected = hex::decode(signature_hex).map_err(|_| SignatureVerificationError)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureVerificationError)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| SignatureVerificationError)
}

/// Hex HMAC-SHA256 of a payload; what a well-behaved sender puts in the
/// signature header.
pub fn compute_signature(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let signature = compute_signature("secret", "{\"event\":\"x\"}");
        assert!(verify_signature("secret", "{\"event\":\"x\"}", &signature).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signature = compute_signature("secret", "{\"event\":\"x\"}");
        assert!(verify_signature("secret", "{\"event\":\"y\"}", &signature).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signature = compute_signature("secret", "payload");
        assert!(verify_signature("other", "payload", &signature).is_err());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        assert!(verify_signature("secret", "payload", "not-hex").is_err());
        assert!(verify_signature("secret", "payload", "").is_err());
    }
}
