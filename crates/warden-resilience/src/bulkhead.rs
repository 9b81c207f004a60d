//! Concurrency isolation.

use crate::error::ResilienceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use warden_core::{BulkheadConfig, RequestContext};

/// Caps the number of concurrent calls on one path.
///
/// Waiting for a permit is bounded by the request context and, when
/// configured, by `max_wait`. The permit is released on every exit path,
/// including a panic or the caller dropping the future.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    name: String,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    max_wait: Option<Duration>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: &BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
            max_wait: config.max_wait,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn acquire<E>(&self) -> Result<SemaphorePermit<'_>, ResilienceError<E>> {
        let full = || ResilienceError::BulkheadFull {
            name: self.name.clone(),
        };
        let acquire = self.permits.acquire();
        let permit = match self.max_wait {
            Some(wait) => tokio::time::timeout(wait, acquire)
                .await
                .map_err(|_| full())?,
            None => acquire.await,
        };
        // The semaphore is never closed.
        permit.map_err(|_| full())
    }

    /// Run `op` while holding a permit.
    ///
    /// If `ctx` is done before a permit is available, `op` is never invoked.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        if let Some(err) = ctx.err() {
            return Err(ResilienceError::Context(err));
        }

        let permit = tokio::select! {
            biased;
            err = ctx.done() => return Err(ResilienceError::Context(err)),
            permit = self.acquire() => permit,
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(err) => {
                tracing::debug!(bulkhead = %self.name, max_concurrent = self.max_concurrent, "bulkhead full");
                return Err(err);
            }
        };

        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;
    use warden_core::ContextError;

    type Outcome = Result<(), ResilienceError<&'static str>>;

    fn bulkhead(max_concurrent: usize, max_wait: Option<Duration>) -> Bulkhead {
        Bulkhead::new(
            "backend",
            &BulkheadConfig {
                max_concurrent,
                max_wait,
            },
        )
    }

    /// Occupy one permit until the returned sender fires.
    async fn hold(bulkhead: &Bulkhead) -> (oneshot::Sender<()>, tokio::task::JoinHandle<Outcome>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let holder = bulkhead.clone();
        let handle = tokio::spawn(async move {
            holder
                .execute(&RequestContext::background(), || async move {
                    let _ = entered_tx.send(());
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
        });
        entered_rx.await.unwrap();
        (release_tx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_limits_concurrency() {
        let bulkhead = bulkhead(3, None);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..10).map(|_| {
            let bulkhead = bulkhead.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                bulkhead
                    .execute(&RequestContext::background(), || async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, ResilienceError<()>>(())
                    })
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(bulkhead.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_rejects_as_full() {
        let bulkhead = bulkhead(1, Some(Duration::from_millis(50)));
        let (release, holder) = hold(&bulkhead).await;
        assert_eq!(bulkhead.available(), 0);

        let invoked = AtomicBool::new(false);
        let result: Outcome = bulkhead
            .execute(&RequestContext::background(), || async {
                invoked.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::BulkheadFull { ref name }) if name == "backend"));
        assert!(!invoked.load(Ordering::SeqCst));

        release.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(bulkhead.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_never_invokes() {
        let bulkhead = bulkhead(1, None);
        let (release, holder) = hold(&bulkhead).await;

        let (ctx, cancel) = RequestContext::with_cancel();
        let invoked = Arc::new(AtomicBool::new(false));
        let waiter = {
            let bulkhead = bulkhead.clone();
            let invoked = Arc::clone(&invoked);
            tokio::spawn(async move {
                let result: Outcome = bulkhead
                    .execute(&ctx, || async move {
                        invoked.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                    .await;
                result
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ResilienceError::Context(ContextError::Canceled))));
        assert!(!invoked.load(Ordering::SeqCst));

        release.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(bulkhead.available(), 1);
    }

    async fn explode() -> Outcome {
        panic!("backend bug")
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_released_on_error_and_panic() {
        let bulkhead = bulkhead(1, None);
        let ctx = RequestContext::background();

        let failed: Outcome = bulkhead
            .execute(&ctx, || async { Err(ResilienceError::Inner("boom")) })
            .await;
        assert!(failed.is_err());
        assert_eq!(bulkhead.available(), 1);

        let panicking = bulkhead.clone();
        let join = tokio::spawn(async move {
            let _: Outcome = panicking
                .execute(&RequestContext::background(), explode)
                .await;
        })
        .await;
        assert!(join.is_err());
        assert_eq!(bulkhead.available(), 1);
    }
}
