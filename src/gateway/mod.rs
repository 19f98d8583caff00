//! Resilient gateway for calls to unreliable third parties.
//!
//! Every external call the saga, the reconciler and checkout make goes through
//! [`ResilientGateway::execute`]. The gateway picks the policy for the service, fails fast
//! while the service's circuit is open, retries transient failures with backoff, and
//! reports the outcome to the shared [`ServiceHealthTracker`]. It never panics or throws
//! past its boundary: callers get a [`GatewayError`] that says what happened.

pub mod health;
pub mod policy;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::providers::ProviderError;

pub use health::{
    spawn_health_persister, CircuitState, HealthStatus, HealthSummary, ServiceHealth,
    ServiceHealthTracker,
};
pub use policy::{BackoffStrategy, RetryPolicy};

/// Service names used to select policies and key health state.
pub mod services {
    pub const REGISTRAR: &str = "registrar";
    pub const DNS: &str = "dns";
    pub const PAYMENTS: &str = "payments";
}

#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// No attempt was made; the caller should use its fallback.
    #[error("{service} is temporarily unavailable (circuit open until {until})")]
    CircuitOpen {
        service: String,
        until: DateTime<Utc>,
    },

    #[error("{service} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        service: String,
        attempts: u32,
        last_error: ProviderError,
    },

    #[error("{service} rejected the request: {reason}")]
    Rejected { service: String, reason: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            GatewayError::RetriesExhausted { .. } => ErrorKind::Transient,
            GatewayError::Rejected { .. } => ErrorKind::BusinessRejection,
        }
    }

    pub fn service(&self) -> &str {
        match self {
            GatewayError::CircuitOpen { service, .. }
            | GatewayError::RetriesExhausted { service, .. }
            | GatewayError::Rejected { service, .. } => service,
        }
    }
}

pub struct ResilientGateway {
    tracker: Arc<ServiceHealthTracker>,
    policies: HashMap<String, RetryPolicy>,
    default_policy: RetryPolicy,
}

impl ResilientGateway {
    pub fn new(tracker: Arc<ServiceHealthTracker>) -> Self {
        Self {
            tracker,
            policies: HashMap::new(),
            default_policy: RetryPolicy::default(),
        }
    }

    /// Gateway with the stock policies for the registrar, DNS and payment services.
    pub fn with_default_policies(tracker: Arc<ServiceHealthTracker>) -> Self {
        Self::new(tracker)
            .with_policy(services::REGISTRAR, RetryPolicy::registrar())
            .with_policy(services::DNS, RetryPolicy::dns())
            .with_policy(services::PAYMENTS, RetryPolicy::payments())
    }

    pub fn with_policy(mut self, service: &str, policy: RetryPolicy) -> Self {
        self.policies.insert(service.to_string(), policy);
        self
    }

    pub fn with_fallback_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn policy(&self, service: &str) -> &RetryPolicy {
        self.policies.get(service).unwrap_or(&self.default_policy)
    }

    pub fn tracker(&self) -> &Arc<ServiceHealthTracker> {
        &self.tracker
    }

    /// Runs `attempt` under the service's policy. The operation must be safe to repeat;
    /// the gateway does not deduplicate side effects.
    pub async fn execute<T, F, Fut>(&self, service: &str, mut attempt: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if let CircuitState::Open { until } = self.tracker.check_circuit(service) {
            debug!(service = %service, until = %until, "circuit open, failing fast");
            return Err(GatewayError::CircuitOpen {
                service: service.to_string(),
                until,
            });
        }

        let policy = self.policy(service);
        let total_attempts = policy.max_retries + 1;
        let mut last_error = ProviderError::Transient("no attempt made".to_string());

        for n in 0..total_attempts {
            if n > 0 {
                let delay = policy.backoff_delay(n);
                warn!(
                    service = %service,
                    attempt = n,
                    of = total_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "call failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let started = Instant::now();
            let result = match tokio::time::timeout(policy.timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Transient(format!(
                    "timed out after {}ms",
                    policy.timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => {
                    self.tracker
                        .record_success(service, started.elapsed(), policy);
                    return Ok(value);
                }
                Err(ProviderError::Rejected(reason)) => {
                    return Err(GatewayError::Rejected {
                        service: service.to_string(),
                        reason,
                    });
                }
                Err(e) => last_error = e,
            }
        }

        self.tracker
            .record_failure(service, &last_error.to_string(), policy);

        Err(GatewayError::RetriesExhausted {
            service: service.to_string(),
            attempts: total_attempts,
            last_error,
        })
    }
}
