use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::FromRequest,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Raw body of a webhook whose `X-Webhook-Signature` (hex HMAC-SHA256 of the body,
/// keyed by the webhook secret) checked out.
pub struct VerifiedWebhook {
    pub body: Bytes,
}

/// Hex HMAC-SHA256 of `body`, as senders put it in the signature header.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> Result<(), AuthError> {
    let expected = hex::decode(signature_header.trim()).map_err(|_| AuthError::InvalidSignatureFormat)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSecret)?;
    mac.update(body);

    // Constant-time comparison
    mac.verify_slice(&expected)
        .map_err(|_| AuthError::SignatureMismatch)
}

#[async_trait]
impl FromRequest<AppState, Body> for VerifiedWebhook {
    type Rejection = AuthError;

    async fn from_request(req: Request<Body>, state: &AppState) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(AuthError::MissingSignature)?;

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| AuthError::BodyReadError)?;

        verify_signature(&state.webhook_secret, &body, &signature)?;
        Ok(VerifiedWebhook { body })
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingSignature,
    InvalidSignatureFormat,
    InvalidSecret,
    SignatureMismatch,
    BodyReadError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingSignature => {
                (StatusCode::UNAUTHORIZED, "Missing X-Webhook-Signature header")
            }
            AuthError::InvalidSignatureFormat => {
                (StatusCode::BAD_REQUEST, "Signature must be hex-encoded")
            }
            AuthError::InvalidSecret => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Webhook secret is not usable")
            }
            AuthError::SignatureMismatch => (StatusCode::UNAUTHORIZED, "Invalid signature"),
            AuthError::BodyReadError => (StatusCode::BAD_REQUEST, "Failed to read request body"),
        };

        tracing::warn!(status = status.as_u16(), reason = message, "webhook rejected");
        (
            status,
            Json(json!({ "error": message, "status": status.as_u16() })),
        )
            .into_response()
    }
}
