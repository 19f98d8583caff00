use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::payments::ReconcileError;
use crate::ports::RepositoryError;
use crate::saga::OrchestratorError;
use crate::services::checkout::CheckoutError;
use crate::services::nameservers::NameserverError;

/// Failure taxonomy shared by the gateway, the saga and the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network timeout or 5xx; retried by the gateway.
    Transient,
    /// Service marked offline; failed fast without an attempt.
    CircuitOpen,
    /// The other side said no (domain taken, insufficient funds). Never retried.
    BusinessRejection,
    /// An optional step failed and the saga carried on.
    PartialSuccess,
    /// A mandatory step failed; the saga halted in a named failure state.
    Fatal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Conflict(what) => AppError::Conflict(what),
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::Corrupt(msg) => AppError::Internal(msg),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err.kind() {
            ErrorKind::BusinessRejection => AppError::Rejected(err.to_string()),
            _ => AppError::Unavailable(err.to_string()),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::InvalidDomain(msg) => AppError::Validation(msg),
            CheckoutError::Unavailable(domain) => {
                AppError::Rejected(format!("{} is not available", domain))
            }
            CheckoutError::Gateway(e) => e.into(),
            CheckoutError::Repository(e) => e.into(),
        }
    }
}

impl From<NameserverError> for AppError {
    fn from(err: NameserverError) -> Self {
        match err {
            NameserverError::Invalid(msg) => AppError::Validation(msg),
            NameserverError::DomainNotFound(_) => AppError::NotFound(err.to_string()),
            NameserverError::Refused(_) => AppError::Rejected(err.to_string()),
            NameserverError::Gateway(e) => e.into(),
            NameserverError::Repository(e) => e.into(),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::OrderNotFound(id) => AppError::NotFound(format!("order {}", id)),
            ReconcileError::InvalidAmount(msg) => AppError::Validation(msg),
            ReconcileError::InsufficientFunds { .. } | ReconcileError::NotPayable(_) => {
                AppError::Rejected(err.to_string())
            }
            ReconcileError::Repository(e) => e.into(),
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::OrderNotFound(id) => AppError::NotFound(format!("order {}", id)),
            OrchestratorError::NotStartable { .. } => AppError::Conflict(err.to_string()),
            OrchestratorError::Repository(e) => e.into(),
        }
    }
}
