//! Bounded retries with exponential backoff.

use crate::error::ResilienceError;
use std::future::Future;
use warden_core::{RequestContext, RetryConfig};

/// Re-runs an operation after retryable failures.
///
/// Only [`ResilienceError::Inner`] failures are retried. The context is
/// checked before every attempt and raced against every backoff sleep.
#[derive(Debug, Clone, Default)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` up to `max_attempts` times.
    ///
    /// When every attempt fails the result is
    /// [`ResilienceError::RetryExhausted`] wrapping the last failure.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if let Some(err) = ctx.err() {
                return Err(ResilienceError::Context(err));
            }
            attempt += 1;

            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, "retry attempts exhausted");
                return Err(ResilienceError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.config.backoff(attempt);
            tracing::debug!(attempt, max_attempts, delay = ?delay, "attempt failed, backing off");
            tokio::select! {
                biased;
                err = ctx.done() => return Err(ResilienceError::Context(err)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
