//! Named breakers sharing one configuration.

use super::breaker::CircuitBreaker;
use super::state::{BreakerStats, StateObserver};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use warden_core::CircuitBreakerConfig;

/// Creates one [`CircuitBreaker`] per backend name on first use.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    observer: Option<StateObserver>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            observer: None,
        }
    }

    /// Attach `observer` to every breaker created from now on.
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The breaker for `name`, created if needed.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(breaker = name, "created circuit breaker");
            let breaker = CircuitBreaker::new(name, self.config.clone());
            Arc::new(match &self.observer {
                Some(observer) => breaker.with_observer(Arc::clone(observer)),
                None => breaker,
            })
        });
        Arc::clone(breaker)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Snapshot of every breaker, keyed by name.
    pub fn stats(&self) -> BTreeMap<String, BreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        breakers
            .into_iter()
            .map(|b| (b.name().to_string(), b.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;
    use crate::error::ResilienceError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_core::RequestContext;

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_isolated_per_name() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        })
        .with_observer(Arc::new(move |_: &str, _: CircuitState, to: CircuitState| {
            if to == CircuitState::Open {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let ctx = RequestContext::background();

        let orders = registry.get("orders");
        assert!(Arc::ptr_eq(&orders, &registry.get("orders")));

        let _: Result<(), ResilienceError<&str>> =
            orders.execute(&ctx, || async { Err("down") }).await;
        registry
            .get("billing")
            .execute(&ctx, || async { Ok::<_, &str>(()) })
            .await
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats["orders"].state, CircuitState::Open);
        assert_eq!(stats["billing"].state, CircuitState::Closed);
        assert_eq!(registry.names(), vec!["billing", "orders"]);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }
}
