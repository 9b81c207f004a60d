//! Per-caller admission control.
//!
//! Two algorithms share the [`RateLimiter`] contract:
//!
//! - [`SlidingWindowLimiter`] counts admissions in a moving window ending at
//!   "now" and admits at most `requests_per_second × window` of them.
//! - [`TokenBucketLimiter`] refills `requests_per_second` tokens per second up
//!   to `burst` and spends one per admission.
//!
//! Both fail fast and never block. Idle keys are forgotten by
//! [`spawn_cleanup`].

mod keyed;
mod sliding_window;
mod token_bucket;

pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use crate::error::RateLimitError;
use std::sync::{Arc, Weak};
use std::time::Duration;
use warden_core::{MaintenanceTask, RateLimitAlgorithm, RateLimitConfig};

/// Admission control keyed by caller identity.
pub trait RateLimiter: Send + Sync {
    /// Admit one request for `key`, or fail with
    /// [`RateLimitError::Exceeded`].
    fn allow(&self, key: &str) -> Result<(), RateLimitError>;

    /// Requests `key` could make right now, floored at zero.
    fn remaining(&self, key: &str) -> u64;

    /// Forget everything recorded for `key`.
    fn reset(&self, key: &str);

    /// Drop keys idle for at least `idle`. Returns how many were dropped.
    fn purge_inactive(&self, idle: Duration) -> usize;

    /// Number of keys currently holding state.
    fn tracked_keys(&self) -> usize;
}

/// Create the limiter selected by `config.algorithm`.
pub fn create_limiter(config: &RateLimitConfig) -> Arc<dyn RateLimiter> {
    match config.algorithm {
        RateLimitAlgorithm::SlidingWindow => {
            tracing::debug!(
                quota = config.quota(),
                window = ?config.window,
                "using sliding window rate limiter"
            );
            Arc::new(SlidingWindowLimiter::from_config(config))
        }
        RateLimitAlgorithm::TokenBucket => {
            tracing::debug!(
                rate = config.requests_per_second,
                burst = config.burst,
                "using token bucket rate limiter"
            );
            Arc::new(TokenBucketLimiter::from_config(config))
        }
    }
}

/// Purge keys idle longer than `config.inactivity_timeout` every
/// `config.cleanup_interval`.
///
/// The task holds a weak reference and stops doing work once the limiter is
/// dropped.
pub fn spawn_cleanup(limiter: &Arc<dyn RateLimiter>, config: &RateLimitConfig) -> MaintenanceTask {
    let limiter: Weak<dyn RateLimiter> = Arc::downgrade(limiter);
    let idle = config.inactivity_timeout;

    MaintenanceTask::spawn("rate-limit-cleanup", config.cleanup_interval, move || {
        let limiter = limiter.upgrade();
        async move {
            if let Some(limiter) = limiter {
                let purged = limiter.purge_inactive(idle);
                if purged > 0 {
                    tracing::debug!(purged, remaining = limiter.tracked_keys(), "purged idle rate limit keys");
                }
            }
        }
    })
}
