//! Rate limiting configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Admission-control algorithm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    /// Count admitted requests in a moving window ending at "now".
    #[default]
    SlidingWindow,
    /// Refill tokens continuously up to a burst capacity.
    TokenBucket,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Which algorithm to run.
    #[serde(default)]
    pub algorithm: RateLimitAlgorithm,

    /// Sustained requests per second per caller.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Sliding window length.
    #[serde(default = "default_window", with = "super::duration")]
    pub window: Duration,

    /// Token bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// How often inactive keys are purged.
    #[serde(default = "default_cleanup_interval", with = "super::duration")]
    pub cleanup_interval: Duration,

    /// A key idle for this long is forgotten.
    #[serde(default = "default_inactivity", with = "super::duration")]
    pub inactivity_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::default(),
            requests_per_second: default_requests_per_second(),
            window: default_window(),
            burst: default_burst(),
            cleanup_interval: default_cleanup_interval(),
            inactivity_timeout: default_inactivity(),
        }
    }
}

impl RateLimitConfig {
    /// Admitted requests per sliding window: `requests_per_second × window`.
    pub fn quota(&self) -> u64 {
        (f64::from(self.requests_per_second) * self.window.as_secs_f64()).floor() as u64
    }
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_window() -> Duration {
    Duration::from_secs(1)
}

fn default_burst() -> u32 {
    20
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_inactivity() -> Duration {
    Duration::from_secs(60 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_scales_with_window() {
        let config = RateLimitConfig {
            requests_per_second: 5,
            window: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(config.quota(), 50);

        let sub_second = RateLimitConfig {
            requests_per_second: 10,
            window: Duration::from_millis(500),
            ..Default::default()
        };
        assert_eq!(sub_second.quota(), 5);
    }
}
