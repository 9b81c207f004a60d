//! Circuit breaking.
//!
//! A [`CircuitBreaker`] is the innermost wrapper around a backend call: with
//! retry on the outside, every attempt is observed by the breaker on its own.
//! [`CircuitBreakerRegistry`] hands out one breaker per backend name.
//!
//! ```rust,no_run
//! use warden_core::{CircuitBreakerConfig, RequestContext};
//! use warden_resilience::{CircuitBreaker, ResilienceError};
//!
//! # async fn example() -> Result<u32, ResilienceError<std::io::Error>> {
//! let breaker = CircuitBreaker::new("orders", CircuitBreakerConfig::default());
//! let ctx = RequestContext::background();
//!
//! breaker
//!     .execute(&ctx, || async { Ok::<_, std::io::Error>(42) })
//!     .await
//! # }
//! ```

mod breaker;
mod registry;
mod state;

pub use breaker::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;
pub use state::{BreakerStats, CircuitState, StateObserver};
