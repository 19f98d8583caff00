use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Step;
use crate::error::ErrorKind;

/// Everything the saga produced, with a flag for every optional side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReport {
    pub order_id: Uuid,
    pub domain_name: String,
    pub zone_id: String,
    pub domain_id: String,
    /// Nameservers the domain resolves through now.
    pub nameservers: Vec<String>,
    pub a_record_added: bool,
    pub https_enabled: bool,
    pub nameserver_update_success: bool,
    pub steps_completed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    Success(RegistrationReport),
    PartialSuccess {
        report: RegistrationReport,
        degraded: Vec<Step>,
    },
    /// A mandatory step failed, or a step's result could not be stored. The order sits in
    /// the step's failure state or in `FailedAtPersistence`.
    Failure {
        step: Step,
        /// `Fatal` or `BusinessRejection`.
        kind: ErrorKind,
        /// What the gateway reported for the last call.
        cause: ErrorKind,
        steps_completed: Vec<String>,
        message: String,
    },
}

impl RegistrationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RegistrationOutcome::Failure { .. })
    }

    pub fn report(&self) -> Option<&RegistrationReport> {
        match self {
            RegistrationOutcome::Success(report)
            | RegistrationOutcome::PartialSuccess { report, .. } => Some(report),
            RegistrationOutcome::Failure { .. } => None,
        }
    }

    pub fn steps_completed(&self) -> &[String] {
        match self {
            RegistrationOutcome::Success(report)
            | RegistrationOutcome::PartialSuccess { report, .. } => &report.steps_completed,
            RegistrationOutcome::Failure {
                steps_completed, ..
            } => steps_completed,
        }
    }

    /// Classification of the run; `None` when every step took effect.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RegistrationOutcome::Success(_) => None,
            RegistrationOutcome::PartialSuccess { .. } => Some(ErrorKind::PartialSuccess),
            RegistrationOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Optional steps that did not take effect.
    pub fn degraded(&self) -> &[Step] {
        match self {
            RegistrationOutcome::PartialSuccess { degraded, .. } => degraded,
            _ => &[],
        }
    }
}
