//! Error types for the token crate.

use crate::token::TokenType;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised by a [`TokenStore`](crate::store::TokenStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("token not found: {0}")]
    NotFound(String),

    /// A record with this id already exists.
    #[error("token id already in use: {0}")]
    AlreadyExists(String),

    /// The backend cannot be constructed from the given configuration.
    #[error("store configuration error: {0}")]
    Config(String),

    /// Failure inside an external backend.
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors that can occur during token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No usable key, or key material could not sign.
    #[error("signing failed: {0}")]
    SigningError(String),

    /// No retained key verifies the token, or its claims were altered.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The token expired (beyond clock skew).
    #[error("token expired at {expired_at}")]
    TokenExpired { expired_at: DateTime<Utc> },

    /// The token is not valid yet (beyond clock skew).
    #[error("token not valid before {not_before}")]
    TokenNotYetValid { not_before: DateTime<Utc> },

    /// The issuer is not on the allow-list.
    #[error("issuer not allowed: {issuer}")]
    InvalidIssuer { issuer: String },

    /// None of the token audiences is on the allow-list.
    #[error("audience not allowed: {audience:?}")]
    InvalidAudience { audience: Vec<String> },

    /// The token lacks scopes the caller requires.
    #[error("insufficient scope: required {required:?}")]
    InsufficientScope { required: Vec<String> },

    /// The token was revoked or its record is gone.
    #[error("token revoked: {token_id}")]
    TokenRevoked { token_id: String },

    /// The token is not in the store.
    #[error("token not found: {token_id}")]
    TokenNotFound { token_id: String },

    /// The token failed validation where a valid token was required.
    #[error("invalid token: {0}")]
    InvalidToken(Box<TokenError>),

    /// The operation needs a different token type.
    #[error("invalid token type: expected {expected}, got {actual}")]
    InvalidTokenType { expected: TokenType, actual: TokenType },

    /// Claims violate `not_before <= expires_at` / `issued_at <= expires_at`
    /// or are otherwise malformed.
    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    /// Token store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl TokenError {
    /// Whether the error means the presented credential is not acceptable,
    /// as opposed to an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::SigningError(_))
    }
}
