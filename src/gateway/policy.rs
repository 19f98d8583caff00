//! Per-service retry and circuit-breaker policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential { factor: f64 },
    Linear { factor: f64 },
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
    /// Unit the backoff factor is applied to.
    pub base_delay: Duration,
    /// Consecutive failed calls before the circuit opens.
    pub circuit_breaker_threshold: u32,
    pub circuit_reset: Duration,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::Exponential { factor: 1.5 },
            base_delay: Duration::from_secs(1),
            circuit_breaker_threshold: 5,
            circuit_reset: Duration::from_secs(300),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn registrar() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::Exponential { factor: 2.0 },
            circuit_breaker_threshold: 5,
            timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    pub fn dns() -> Self {
        Self {
            max_retries: 4,
            backoff: BackoffStrategy::Exponential { factor: 1.5 },
            circuit_breaker_threshold: 3,
            timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    pub fn payments() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::Linear { factor: 1.0 },
            circuit_breaker_threshold: 4,
            timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let units = match self.backoff {
            BackoffStrategy::Exponential { factor } => factor.powi(retry as i32),
            BackoffStrategy::Linear { factor } => factor * retry as f64,
            BackoffStrategy::Immediate => 0.0,
        };
        if !units.is_finite() || units <= 0.0 {
            return Duration::ZERO;
        }
        self.base_delay.mul_f64(units)
    }

    /// Failure count at which the service is reported as failing.
    pub fn failing_threshold(&self) -> u32 {
        self.circuit_breaker_threshold / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::registrar();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::payments();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(3));
    }

    #[test]
    fn test_immediate_backoff() {
        let policy = RetryPolicy {
            backoff: BackoffStrategy::Immediate,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(4), Duration::ZERO);
    }

    #[test]
    fn test_base_delay_scales_backoff() {
        let policy = RetryPolicy {
            backoff: BackoffStrategy::Exponential { factor: 1.5 },
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(225));
    }
}
