//! Shared health state for external services.
//!
//! One [`ServiceHealthTracker`] is created at startup and handed to the gateway and the
//! health endpoint. All mutation goes through a single mutex keyed by service name, so
//! concurrent calls to the same service see a consistent failure count and circuit window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::policy::RetryPolicy;
use crate::ports::HealthRepository;

const LATENCY_HISTORY: usize = 100;
const FAILURE_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failing,
    Offline,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failing => "failing",
            HealthStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Point-in-time view of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub failure_count: u32,
    pub status: HealthStatus,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub avg_latency_ms: Option<u64>,
    pub recent_failures: Vec<FailureRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: DateTime<Utc> },
}

#[derive(Debug)]
struct HealthEntry {
    failure_count: u32,
    status: HealthStatus,
    circuit_open_until: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    latencies: VecDeque<Duration>,
    failures: VecDeque<FailureRecord>,
}

impl HealthEntry {
    fn new() -> Self {
        Self {
            failure_count: 0,
            status: HealthStatus::Healthy,
            circuit_open_until: None,
            last_success: None,
            last_failure: None,
            latencies: VecDeque::with_capacity(LATENCY_HISTORY),
            failures: VecDeque::with_capacity(FAILURE_HISTORY),
        }
    }

    fn avg_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    fn view(&self, service_name: &str) -> ServiceHealth {
        ServiceHealth {
            service_name: service_name.to_string(),
            failure_count: self.failure_count,
            status: self.status,
            circuit_open_until: self.circuit_open_until,
            last_success: self.last_success,
            last_failure: self.last_failure,
            avg_latency_ms: self.avg_latency().map(|d| d.as_millis() as u64),
            recent_failures: self.failures.iter().cloned().collect(),
        }
    }
}

/// Overall picture served by the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub overall: String,
    pub services: Vec<ServiceHealth>,
    pub degraded_services: Vec<String>,
    pub offline_services: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ServiceHealthTracker {
    entries: Mutex<HashMap<String, HealthEntry>>,
}

impl ServiceHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, HealthEntry>> {
        // Entries stay consistent even if a holder panicked; every update is a few field writes.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reports whether calls may go through. An expired window closes the circuit and
    /// restarts the service from a clean failure count in the degraded state.
    pub fn check_circuit(&self, service: &str) -> CircuitState {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(service) else {
            return CircuitState::Closed;
        };
        match entry.circuit_open_until {
            Some(until) if Utc::now() < until => CircuitState::Open { until },
            Some(_) => {
                entry.circuit_open_until = None;
                entry.failure_count = 0;
                entry.status = HealthStatus::Degraded;
                info!(service = %service, "circuit breaker reset");
                CircuitState::Closed
            }
            None => CircuitState::Closed,
        }
    }

    /// Successful call: the failure streak shrinks by one rather than being cleared.
    pub fn record_success(&self, service: &str, latency: Duration, policy: &RetryPolicy) {
        let mut entries = self.entries();
        let entry = entries
            .entry(service.to_string())
            .or_insert_with(HealthEntry::new);

        entry.last_success = Some(Utc::now());
        entry.failure_count = entry.failure_count.saturating_sub(1);
        if entry.latencies.len() == LATENCY_HISTORY {
            entry.latencies.pop_front();
        }
        entry.latencies.push_back(latency);

        let avg = entry.avg_latency().unwrap_or(latency);
        if entry.failure_count == 0 && avg < policy.timeout / 2 {
            entry.status = HealthStatus::Healthy;
        } else if entry.failure_count < policy.failing_threshold() {
            entry.status = HealthStatus::Degraded;
        }
    }

    /// Failed call (all attempts used). Opens the circuit once the threshold is reached.
    pub fn record_failure(&self, service: &str, message: &str, policy: &RetryPolicy) {
        let mut entries = self.entries();
        let entry = entries
            .entry(service.to_string())
            .or_insert_with(HealthEntry::new);

        let now = Utc::now();
        entry.last_failure = Some(now);
        entry.failure_count += 1;
        if entry.failures.len() == FAILURE_HISTORY {
            entry.failures.pop_front();
        }
        entry.failures.push_back(FailureRecord {
            at: now,
            message: message.to_string(),
        });

        if entry.failure_count >= policy.circuit_breaker_threshold {
            let reset = chrono::Duration::from_std(policy.circuit_reset)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
            let until = now + reset;
            entry.status = HealthStatus::Offline;
            entry.circuit_open_until = Some(until);
            warn!(
                service = %service,
                failures = entry.failure_count,
                until = %until,
                "circuit breaker tripped"
            );
        } else if entry.failure_count >= policy.failing_threshold() {
            entry.status = HealthStatus::Failing;
        } else {
            entry.status = HealthStatus::Degraded;
        }
    }

    pub fn get(&self, service: &str) -> Option<ServiceHealth> {
        self.entries().get(service).map(|e| e.view(service))
    }

    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        let mut services: Vec<ServiceHealth> = self
            .entries()
            .iter()
            .map(|(name, entry)| entry.view(name))
            .collect();
        services.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        services
    }

    pub fn summary(&self) -> HealthSummary {
        let services = self.snapshot();
        let degraded_services: Vec<String> = services
            .iter()
            .filter(|s| s.status == HealthStatus::Degraded)
            .map(|s| s.service_name.clone())
            .collect();
        let offline_services: Vec<String> = services
            .iter()
            .filter(|s| matches!(s.status, HealthStatus::Failing | HealthStatus::Offline))
            .map(|s| s.service_name.clone())
            .collect();

        let overall = if !offline_services.is_empty() {
            "critical"
        } else if !degraded_services.is_empty() {
            "degraded"
        } else {
            "healthy"
        };

        HealthSummary {
            overall: overall.to_string(),
            services,
            degraded_services,
            offline_services,
        }
    }
}

/// Copies the tracker into the health table on a fixed interval.
pub fn spawn_health_persister(
    tracker: Arc<ServiceHealthTracker>,
    repository: Arc<dyn HealthRepository>,
    every: Duration,
) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "service health persister started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            for health in tracker.snapshot() {
                if let Err(e) = repository.save_health(&health).await {
                    error!(service = %health.service_name, "failed to persist service health: {}", e);
                }
            }
        }
    })
}
