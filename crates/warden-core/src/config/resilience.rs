//! Circuit breaker, retry and bulkhead configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time spent open before trial calls are admitted.
    #[serde(default = "default_reset_timeout", with = "super::duration")]
    pub reset_timeout: Duration,

    /// Maximum concurrent trial calls while half-open.
    #[serde(default = "default_half_open_limit")]
    pub half_open_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout: default_reset_timeout(),
            half_open_limit: default_half_open_limit(),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep before the second attempt.
    #[serde(default = "default_initial_interval", with = "super::duration")]
    pub initial_interval: Duration,

    /// Growth factor applied to the sleep after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on any single sleep.
    #[serde(default = "default_max_interval", with = "super::duration")]
    pub max_interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval: default_initial_interval(),
            multiplier: default_multiplier(),
            max_interval: default_max_interval(),
        }
    }
}

impl RetryConfig {
    /// Sleep after failed attempt number `attempt` (1-based):
    /// `min(initial_interval × multiplier^(attempt-1), max_interval)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Configuration for a bulkhead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    /// Maximum concurrent calls.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Longest wait for a permit. Unbounded (context-limited) when unset.
    #[serde(default, with = "super::duration::option")]
    pub max_wait: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_wait: None,
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_half_open_limit() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_concurrent() -> usize {
    10
}
