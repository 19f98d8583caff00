//! Registration saga and its hand-off from payment reconciliation.

pub mod locks;
pub mod orchestrator;
pub mod outcome;
pub mod pricing;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::OrderStatus;
use crate::ports::RepositoryError;

pub use locks::KeyedLocks;
pub use orchestrator::{RegistrationOrchestrator, DEFAULT_FALLBACK_NAMESERVERS};
pub use outcome::{RegistrationOutcome, RegistrationReport};
pub use pricing::PricingPolicy;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("order {order_id} cannot start registration from status {status}")]
    NotStartable { order_id: Uuid, status: OrderStatus },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// How a confirmed payment hands the order to the saga.
#[async_trait]
pub trait RegistrationTrigger: Send + Sync {
    async fn trigger(&self, order_id: Uuid);
}

/// Runs the saga in place; the caller waits for the outcome.
#[async_trait]
impl RegistrationTrigger for RegistrationOrchestrator {
    async fn trigger(&self, order_id: Uuid) {
        log_result(order_id, self.start(order_id).await);
    }
}

/// Runs every saga on its own tokio task.
#[derive(Clone)]
pub struct BackgroundRegistrations {
    orchestrator: Arc<RegistrationOrchestrator>,
}

impl BackgroundRegistrations {
    pub fn new(orchestrator: Arc<RegistrationOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl RegistrationTrigger for BackgroundRegistrations {
    async fn trigger(&self, order_id: Uuid) {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            log_result(order_id, orchestrator.start(order_id).await);
        });
    }
}

fn log_result(order_id: Uuid, result: Result<RegistrationOutcome, OrchestratorError>) {
    match result {
        Ok(RegistrationOutcome::Success(_)) => {
            tracing::info!(order_id = %order_id, "registration finished");
        }
        Ok(RegistrationOutcome::PartialSuccess { degraded, .. }) => {
            tracing::info!(order_id = %order_id, degraded = ?degraded, "registration finished with degraded steps");
        }
        Ok(RegistrationOutcome::Failure { step, .. }) => {
            tracing::warn!(order_id = %order_id, step = %step, "registration failed");
        }
        Err(e) => {
            tracing::error!(order_id = %order_id, error = %e, "registration could not run");
        }
    }
}
