//! Circuit breaker state machine and execution.

use super::state::{BreakerStats, CircuitState, StateObserver};
use crate::error::ResilienceError;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use warden_core::{CircuitBreakerConfig, RequestContext};

type Transition = Option<(CircuitState, CircuitState)>;

struct Shared {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_in_flight: u32,
    last_transition: Instant,
    /// Bumped on every transition so late results from an earlier state are
    /// ignored.
    generation: u64,
}

impl Shared {
    fn move_to(&mut self, to: CircuitState, now: Instant) -> Transition {
        if self.state == to {
            return None;
        }
        let from = self.state;
        self.state = to;
        self.last_transition = now;
        self.generation += 1;
        self.consecutive_failures = 0;
        self.half_open_in_flight = 0;
        Some((from, to))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Canceled, timed out by the caller, or dropped mid-flight.
    Abandoned,
}

/// Admission ticket for one call. Reports the outcome on drop, so a call
/// whose future is dropped still releases its half-open slot.
struct Call<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    outcome: Outcome,
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        self.breaker.record(self.generation, self.trial, self.outcome);
    }
}

/// Stops calling a failing backend for a cooldown period.
///
/// `Closed → Open` after `failure_threshold` consecutive failures.
/// `Open → HalfOpen` once `reset_timeout` has passed since the last
/// transition. While half-open at most `half_open_limit` trial calls run
/// concurrently. The first trial success closes the circuit and any trial
/// failure reopens it.
///
/// Only failures of the wrapped operation count. Cancellation does not.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    shared: Mutex<Shared>,
    observer: Option<StateObserver>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            shared: Mutex::new(Shared {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_in_flight: 0,
                last_transition: Instant::now(),
                generation: 0,
            }),
            observer: None,
        }
    }

    /// Receive every state change.
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply the time-based `Open → HalfOpen` transition.
    fn refresh(&self, shared: &mut Shared, now: Instant) -> Transition {
        if shared.state == CircuitState::Open
            && now.saturating_duration_since(shared.last_transition) >= self.config.reset_timeout
        {
            return shared.move_to(CircuitState::HalfOpen, now);
        }
        None
    }

    fn notify(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            CircuitState::Open => tracing::warn!(breaker = %self.name, %from, "circuit opened"),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "circuit half-open, admitting trial calls")
            }
            CircuitState::Closed => tracing::info!(breaker = %self.name, %from, "circuit closed"),
        }
        if let Some(observer) = &self.observer {
            observer(&self.name, from, to);
        }
    }

    /// Current state, after applying any due `Open → HalfOpen` transition.
    pub fn state(&self) -> CircuitState {
        self.stats().state
    }

    pub fn stats(&self) -> BreakerStats {
        let (stats, transition) = {
            let mut shared = self.lock();
            let transition = self.refresh(&mut shared, Instant::now());
            let stats = BreakerStats {
                state: shared.state,
                consecutive_failures: shared.consecutive_failures,
                half_open_in_flight: shared.half_open_in_flight,
                last_transition: shared.last_transition,
            };
            (stats, transition)
        };
        self.notify(transition);
        stats
    }

    fn admit(&self) -> Option<Call<'_>> {
        let (call, transition) = {
            let mut shared = self.lock();
            let transition = self.refresh(&mut shared, Instant::now());
            let generation = shared.generation;
            let call = match shared.state {
                CircuitState::Closed => Some((generation, false)),
                CircuitState::Open => None,
                CircuitState::HalfOpen if shared.half_open_in_flight < self.config.half_open_limit => {
                    shared.half_open_in_flight += 1;
                    Some((generation, true))
                }
                CircuitState::HalfOpen => None,
            };
            (call, transition)
        };
        self.notify(transition);

        call.map(|(generation, trial)| Call {
            breaker: self,
            generation,
            trial,
            outcome: Outcome::Abandoned,
        })
    }

    fn record(&self, generation: u64, trial: bool, outcome: Outcome) {
        let transition = {
            let mut shared = self.lock();
            if shared.generation != generation {
                // The state moved on while this call ran.
                return;
            }
            if trial {
                shared.half_open_in_flight = shared.half_open_in_flight.saturating_sub(1);
            }

            let now = Instant::now();
            match (shared.state, outcome) {
                (_, Outcome::Abandoned) | (CircuitState::Open, _) => None,
                (CircuitState::Closed, Outcome::Success) => {
                    shared.consecutive_failures = 0;
                    None
                }
                (CircuitState::Closed, Outcome::Failure) => {
                    shared.consecutive_failures += 1;
                    if shared.consecutive_failures >= self.config.failure_threshold {
                        shared.move_to(CircuitState::Open, now)
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, Outcome::Success) => {
                    shared.move_to(CircuitState::Closed, now)
                }
                (CircuitState::HalfOpen, Outcome::Failure) => {
                    shared.move_to(CircuitState::Open, now)
                }
            }
        };
        self.notify(transition);
    }

    /// Run `op` through the breaker.
    ///
    /// Fails with [`ResilienceError::CircuitOpen`] without invoking `op` when
    /// the circuit rejects the call, and with [`ResilienceError::Context`] if
    /// `ctx` is done before or while `op` runs.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(err) = ctx.err() {
            return Err(ResilienceError::Context(err));
        }

        let Some(mut call) = self.admit() else {
            tracing::debug!(breaker = %self.name, "call rejected by open circuit");
            return Err(ResilienceError::CircuitOpen {
                name: self.name.clone(),
            });
        };

        let result = tokio::select! {
            biased;
            err = ctx.done() => Err(ResilienceError::Context(err)),
            result = op() => result.map_err(ResilienceError::Inner),
        };

        call.outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(ResilienceError::Inner(_)) => Outcome::Failure,
            Err(_) => Outcome::Abandoned,
        };
        result
    }

    /// Force the circuit closed and clear its counters.
    pub fn reset(&self) {
        let transition = {
            let mut shared = self.lock();
            shared.consecutive_failures = 0;
            shared.move_to(CircuitState::Closed, Instant::now())
        };
        self.notify(transition);
    }
}
