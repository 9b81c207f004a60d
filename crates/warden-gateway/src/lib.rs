//! # warden-gateway
//!
//! The composition root of Warden. [`Gateway::handle`] takes one request
//! through every layer in order:
//!
//! 1. rate limit, keyed by caller
//! 2. token validation, including required scopes
//! 3. policy authorization, with the subject built from the token
//! 4. bulkhead, retry and a per-backend circuit breaker around the backend
//!
//! The gateway has no transport of its own. [`GatewayError::status_hint`]
//! tells the surrounding HTTP or RPC layer what to answer.

pub mod error;
pub mod gateway;

pub use error::{GatewayError, SetupError};
pub use gateway::{Gateway, GatewayRequest, Principal, ROLES_METADATA_KEY, subject_for};
