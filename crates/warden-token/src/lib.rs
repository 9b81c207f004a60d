//! # warden-token
//!
//! Token lifecycle for Warden.
//!
//! This crate provides:
//! - The [`Token`] model and [`TokenRequest`] builders
//! - [`TokenStore`], the storage capability, with an in-memory backend
//! - [`KeyRotator`], holding the active Ed25519 key and retired keys still
//!   needed for verification
//! - Biscuit-based signed envelopes ([`Signer`])
//! - [`ValidationChain`] and the [`TokenService`] facade
//!
//! ## Signed envelopes
//!
//! A token's `value` is a Biscuit signed by the active key. Its authority
//! block holds the canonical claim set, so a bearer value alone is enough to
//! recover and verify the claims. Metadata and revocation status are not
//! signed; they live in the store.

pub mod error;
pub mod keys;
pub mod rotator;
pub mod service;
pub mod signer;
pub mod store;
pub mod token;
pub mod validation;

pub use error::{StoreError, TokenError};
pub use keys::{KeyPair, key_id_for};
pub use rotator::{KeyInfo, KeyRotator};
pub use service::{ORIGINAL_SCOPES_KEY, TokenService};
pub use signer::{SignedClaims, Signer};
pub use store::{MemoryTokenStore, TokenStore, create_store};
pub use token::{
    RevocationStatus, SigningAlgorithm, Token, TokenFilter, TokenRequest, TokenType,
};
pub use validation::{ValidationChain, ValidationRequest};
