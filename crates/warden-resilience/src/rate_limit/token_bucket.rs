//! Token-bucket rate limiting.

use super::RateLimiter;
use super::keyed::{KeyState, KeyedState};
use crate::error::RateLimitError;
use std::time::Duration;
use tokio::time::Instant;
use warden_core::RateLimitConfig;

struct Bucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.refilled_at = now;
    }

    fn level_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        (self.tokens + elapsed * self.rate).min(self.capacity)
    }
}

impl KeyState for Bucket {
    fn settled(&self, now: Instant) -> bool {
        self.level_at(now) >= self.capacity
    }
}

/// Refills `rate` tokens per second up to `burst`; each request takes one.
pub struct TokenBucketLimiter {
    rate: f64,
    burst: u32,
    keys: KeyedState<Bucket>,
}

impl TokenBucketLimiter {
    pub fn new(rate_per_second: u32, burst: u32) -> Self {
        Self {
            rate: f64::from(rate_per_second),
            burst,
            keys: KeyedState::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst)
    }

    fn full_bucket(&self, now: Instant) -> Bucket {
        Bucket {
            tokens: f64::from(self.burst),
            capacity: f64::from(self.burst),
            rate: self.rate,
            refilled_at: now,
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, key: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        self.keys.update(
            key,
            now,
            || self.full_bucket(now),
            |bucket| {
                bucket.refill(now);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                let retry_after = if bucket.rate > 0.0 {
                    Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
                } else {
                    Duration::MAX
                };
                tracing::debug!(key, burst = self.burst, "rate limit exceeded");
                Err(RateLimitError::Exceeded {
                    key: key.to_string(),
                    retry_after,
                })
            },
        )
    }

    fn remaining(&self, key: &str) -> u64 {
        let now = Instant::now();
        self.keys
            .inspect(key, |bucket| bucket.level_at(now).floor() as u64)
            .unwrap_or(u64::from(self.burst))
    }

    fn reset(&self, key: &str) {
        if self.keys.remove(key) {
            tracing::info!(key, "token bucket reset");
        }
    }

    fn purge_inactive(&self, idle: Duration) -> usize {
        self.keys.purge(Instant::now(), idle)
    }

    fn tracked_keys(&self) -> usize {
        self.keys.len()
    }
}
