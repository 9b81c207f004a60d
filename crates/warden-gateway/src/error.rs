//! Error types for the gateway.

use std::time::Duration;
use thiserror::Error;
use warden_core::ContextError;
use warden_policy::{Decision, PolicyError};
use warden_resilience::{RateLimitError, ResilienceError};
use warden_token::TokenError;

/// Why a request did not reach, or did not come back from, the backend.
///
/// `E` is the backend's error type.
#[derive(Debug, Error)]
pub enum GatewayError<E> {
    /// The caller exceeded its rate limit.
    #[error(transparent)]
    RateLimited(RateLimitError),

    /// The bearer token was rejected, or could not be checked.
    #[error("authentication failed: {0}")]
    Unauthenticated(TokenError),

    /// Policy evaluation denied the request.
    #[error("access denied: {}", .0.reason)]
    Forbidden(Decision),

    /// The request context was canceled or timed out.
    #[error(transparent)]
    Context(ContextError),

    /// The backend call failed after the resilience layers.
    #[error("backend call failed: {0}")]
    Backend(#[source] ResilienceError<E>),
}

impl<E> GatewayError<E> {
    /// Transport-level status a surrounding HTTP layer should answer with.
    pub fn status_hint(&self) -> u16 {
        match self {
            Self::RateLimited(_) => 429,
            Self::Unauthenticated(TokenError::InsufficientScope { .. }) => 403,
            Self::Unauthenticated(e) if e.is_rejection() => 401,
            Self::Unauthenticated(_) => 500,
            Self::Forbidden(_) => 403,
            Self::Context(ContextError::DeadlineExceeded) => 504,
            // Client closed the request.
            Self::Context(ContextError::Canceled) => 499,
            Self::Backend(e) => match e {
                ResilienceError::RateLimitExceeded { .. } => 429,
                ResilienceError::CircuitOpen { .. } | ResilienceError::BulkheadFull { .. } => 503,
                ResilienceError::Context(ContextError::DeadlineExceeded) => 504,
                ResilienceError::Context(ContextError::Canceled) => 499,
                ResilienceError::RetryExhausted { .. } | ResilienceError::Inner(_) => 502,
            },
        }
    }

    /// How long a rate-limited caller should wait.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(RateLimitError::Exceeded { retry_after, .. })
            | Self::Backend(ResilienceError::RateLimitExceeded { retry_after, .. }) => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Whether the request was turned away before any backend attempt.
    pub fn is_early_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Unauthenticated(_) | Self::Forbidden(_)
        )
    }
}

impl<E> From<ResilienceError<E>> for GatewayError<E> {
    fn from(err: ResilienceError<E>) -> Self {
        match err {
            ResilienceError::Context(e) => Self::Context(e),
            other => Self::Backend(other),
        }
    }
}

/// Failure assembling a gateway from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("token service: {0}")]
    Token(#[from] TokenError),

    #[error("policies: {0}")]
    Policy(#[from] PolicyError),
}
