pub mod auth;
pub mod domains;
pub mod orders;
pub mod wallet;
pub mod webhook;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::AppState;

/// Health of the external services as seen by the gateway.
/// Answers 503 while any service is offline.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.gateway.tracker().summary();
    let status = if summary.offline_services.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(summary))
}
