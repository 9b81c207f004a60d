//! # warden-resilience
//!
//! Admission control and failure isolation for Warden backends.
//!
//! This crate provides:
//! - [`RateLimiter`] with sliding-window and token-bucket implementations
//! - [`CircuitBreaker`] and a per-backend [`CircuitBreakerRegistry`]
//! - [`Retry`] with exponential backoff
//! - [`Bulkhead`] concurrency caps
//!
//! Each wrapper exposes a single `execute` and takes a
//! [`RequestContext`](warden_core::RequestContext); a done context
//! short-circuits every layer with [`ResilienceError::Context`]. Wrappers
//! compose by nesting, outermost first:
//!
//! ```text
//! bulkhead → retry → circuit breaker → backend
//! ```
//!
//! Rate limiting and circuit breaking never block. Retry sleeps and bulkhead
//! waits are raced against the context.

pub mod bulkhead;
pub mod circuit;
pub mod error;
pub mod rate_limit;
pub mod retry;

pub use bulkhead::Bulkhead;
pub use circuit::{BreakerStats, CircuitBreaker, CircuitBreakerRegistry, CircuitState, StateObserver};
pub use error::{RateLimitError, ResilienceError};
pub use rate_limit::{
    RateLimiter, SlidingWindowLimiter, TokenBucketLimiter, create_limiter, spawn_cleanup,
};
pub use retry::Retry;
