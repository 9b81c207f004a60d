//! Sliding-window rate limiting.

use super::RateLimiter;
use super::keyed::{KeyState, KeyedState};
use crate::error::RateLimitError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use warden_core::RateLimitConfig;

/// Admitted request times still inside the window, oldest first.
struct Window {
    admitted: VecDeque<Instant>,
    size: Duration,
}

impl Window {
    fn evict(&mut self, now: Instant) {
        let Some(start) = now.checked_sub(self.size) else {
            return;
        };
        while self.admitted.front().is_some_and(|t| *t < start) {
            self.admitted.pop_front();
        }
    }
}

impl KeyState for Window {
    fn settled(&self, now: Instant) -> bool {
        self.admitted
            .back()
            .is_none_or(|last| now.saturating_duration_since(*last) > self.size)
    }
}

/// Allows at most `quota` requests per key in any window of `window` length.
pub struct SlidingWindowLimiter {
    quota: u64,
    window: Duration,
    keys: KeyedState<Window>,
}

impl SlidingWindowLimiter {
    pub fn new(quota: u64, window: Duration) -> Self {
        Self {
            quota,
            window,
            keys: KeyedState::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.quota(), config.window)
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }

    fn empty_window(&self) -> Window {
        Window {
            admitted: VecDeque::new(),
            size: self.window,
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn allow(&self, key: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let quota = self.quota;
        self.keys.update(
            key,
            now,
            || self.empty_window(),
            |window| {
                window.evict(now);
                if window.admitted.len() as u64 >= quota {
                    let retry_after = window
                        .admitted
                        .front()
                        .map(|oldest| (*oldest + window.size).saturating_duration_since(now))
                        .unwrap_or(window.size);
                    tracing::debug!(key, quota, "rate limit exceeded");
                    return Err(RateLimitError::Exceeded {
                        key: key.to_string(),
                        retry_after,
                    });
                }
                window.admitted.push_back(now);
                Ok(())
            },
        )
    }

    fn remaining(&self, key: &str) -> u64 {
        let now = Instant::now();
        self.keys
            .inspect(key, |window| {
                window.evict(now);
                self.quota.saturating_sub(window.admitted.len() as u64)
            })
            .unwrap_or(self.quota)
    }

    fn reset(&self, key: &str) {
        if self.keys.remove(key) {
            tracing::info!(key, "rate limit window reset");
        }
    }

    fn purge_inactive(&self, idle: Duration) -> usize {
        self.keys.purge(Instant::now(), idle)
    }

    fn tracked_keys(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_exact_quota_then_rejection() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(1));

        for _ in 0..3 {
            limiter.allow("alice").unwrap();
        }
        let err = limiter.allow("alice").unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { ref key, .. } if key == "alice"));
        assert_eq!(limiter.remaining("alice"), 0);

        // Other callers are unaffected.
        assert!(limiter.allow("bob").is_ok());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(limiter.remaining("alice"), 3);
        assert!(limiter.allow("alice").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(1));

        limiter.allow("k").unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;
        limiter.allow("k").unwrap();
        assert!(limiter.allow("k").is_err());

        // Only the first admission has left the window.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.remaining("k"), 1);
        limiter.allow("k").unwrap();
        let RateLimitError::Exceeded { retry_after, .. } = limiter.allow("k").unwrap_err();
        assert_eq!(retry_after, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(1));
        limiter.allow("k").unwrap();
        for _ in 0..10 {
            assert!(limiter.allow("k").is_err());
        }
        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.allow("k").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_purge() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(1));
        limiter.allow("a").unwrap();
        limiter.allow("b").unwrap();

        limiter.reset("a");
        assert!(limiter.allow("a").is_ok());

        assert_eq!(limiter.purge_inactive(Duration::from_secs(60)), 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.allow("a").unwrap();
        assert_eq!(limiter.purge_inactive(Duration::from_secs(60)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_keeps_unsettled_windows() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10));
        limiter.allow("k").unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        // Idle long enough, but forgetting the key would grant a fresh quota.
        assert_eq!(limiter.purge_inactive(Duration::from_secs(1)), 0);
        assert!(limiter.allow("k").is_err());
    }
}
