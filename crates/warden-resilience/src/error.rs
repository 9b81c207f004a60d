//! Error types for the resilience wrappers.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use warden_core::ContextError;

/// Rejection from a rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for '{key}', retry after {retry_after:?}")]
    Exceeded { key: String, retry_after: Duration },
}

/// Failure of a call made through the resilience wrappers.
///
/// `E` is the error type of the protected operation.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The caller exhausted its quota.
    RateLimitExceeded { key: String, retry_after: Duration },

    /// The breaker rejected the call without invoking it.
    CircuitOpen { name: String },

    /// No bulkhead permit became available in time.
    BulkheadFull { name: String },

    /// Every attempt failed. `last` is the final attempt's error.
    RetryExhausted {
        attempts: u32,
        last: Box<ResilienceError<E>>,
    },

    /// The request context was canceled or its deadline passed.
    Context(ContextError),

    /// The operation itself failed.
    Inner(E),
}

impl<E> ResilienceError<E> {
    /// Only failures of the operation itself are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// The operation's own error, looking through `RetryExhausted`.
    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { last, .. } => last.inner(),
            _ => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { last, .. } => last.into_inner(),
            _ => None,
        }
    }
}

impl<E> From<ContextError> for ResilienceError<E> {
    fn from(err: ContextError) -> Self {
        Self::Context(err)
    }
}

impl<E> From<RateLimitError> for ResilienceError<E> {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Exceeded { key, retry_after } => {
                Self::RateLimitExceeded { key, retry_after }
            }
        }
    }
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimitExceeded { key, .. } => write!(f, "rate limit exceeded for '{key}'"),
            Self::CircuitOpen { name } => write!(f, "circuit '{name}' is open"),
            Self::BulkheadFull { name } => write!(f, "bulkhead '{name}' is full"),
            Self::RetryExhausted { attempts, last } => {
                write!(f, "retry exhausted after {attempts} attempts: {last}")
            }
            Self::Context(e) => e.fmt(f),
            Self::Inner(e) => e.fmt(f),
        }
    }
}

impl<E> StdError for ResilienceError<E>
where
    E: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::RetryExhausted { last, .. } => Some(last.as_ref()),
            Self::Context(e) => Some(e),
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
