//! Anomaly detector webhook. The raw body must be signed with the shared secret.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::error::LedgerError;
use crate::use_cases::{AnomalyVerdict, FlagOutcome};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Anomaly-Signature";

/// Verify the hex HMAC-SHA256 of `body` in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> Result<(), WebhookAuthError> {
    let expected_signature =
        hex::decode(signature_header.trim()).map_err(|_| WebhookAuthError::InvalidSignatureFormat)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookAuthError::InvalidSecret)?;
    mac.update(body);

    mac.verify_slice(&expected_signature)
        .map_err(|_| WebhookAuthError::SignatureMismatch)
}

/// Hex HMAC-SHA256 of `body`, as the detector computes it.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, WebhookAuthError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookAuthError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub async fn receive_verdict(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AnomalyIntakeError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookAuthError::MissingSignature)?;
    verify_signature(&state.webhook_secret, &body, signature)?;

    let verdict: AnomalyVerdict = serde_json::from_slice(&body)
        .map_err(|e| LedgerError::Validation(format!("invalid verdict payload: {}", e)))?;

    let response = match state.flag_intake.receive(verdict).await? {
        FlagOutcome::Flagged(tx) => (
            StatusCode::OK,
            Json(json!({ "outcome": "flagged", "transaction": tx })),
        )
            .into_response(),
        FlagOutcome::Ignored { status } => (
            StatusCode::ACCEPTED,
            Json(json!({ "outcome": "ignored", "status": status })),
        )
            .into_response(),
        FlagOutcome::NotAnomalous => (
            StatusCode::ACCEPTED,
            Json(json!({ "outcome": "not_anomalous" })),
        )
            .into_response(),
    };

    Ok(response)
}

#[derive(Debug)]
pub enum WebhookAuthError {
    MissingSignature,
    InvalidSignatureFormat,
    InvalidSecret,
    SignatureMismatch,
}

impl IntoResponse for WebhookAuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebhookAuthError::MissingSignature => {
                (StatusCode::UNAUTHORIZED, "Missing X-Anomaly-Signature header")
            }
            WebhookAuthError::InvalidSignatureFormat => {
                (StatusCode::UNAUTHORIZED, "Invalid signature format")
            }
            WebhookAuthError::InvalidSecret => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid webhook secret configuration",
            ),
            WebhookAuthError::SignatureMismatch => {
                (StatusCode::UNAUTHORIZED, "Signature verification failed")
            }
        };

        tracing::warn!("Anomaly webhook authentication failed: {:?}", self);
        (status, message).into_response()
    }
}

#[derive(Debug)]
pub enum AnomalyIntakeError {
    Auth(WebhookAuthError),
    Ledger(LedgerError),
}

impl From<WebhookAuthError> for AnomalyIntakeError {
    fn from(err: WebhookAuthError) -> Self {
        AnomalyIntakeError::Auth(err)
    }
}

impl From<LedgerError> for AnomalyIntakeError {
    fn from(err: LedgerError) -> Self {
        AnomalyIntakeError::Ledger(err)
    }
}

impl IntoResponse for AnomalyIntakeError {
    fn into_response(self) -> Response {
        match self {
            AnomalyIntakeError::Auth(err) => err.into_response(),
            AnomalyIntakeError::Ledger(err) => err.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = br#"{"transaction_id":"x"}"#;
        let signature = sign_body("secret", body).unwrap();

        assert!(verify_signature("secret", body, &signature).is_ok());
        assert!(matches!(
            verify_signature("other", body, &signature),
            Err(WebhookAuthError::SignatureMismatch)
        ));
        assert!(matches!(
            verify_signature("secret", body, "not-hex"),
            Err(WebhookAuthError::InvalidSignatureFormat)
        ));
    }
}
