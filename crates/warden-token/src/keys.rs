//! Ed25519 key material and key identifiers.

use crate::error::TokenError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use biscuit_auth::{Algorithm, KeyPair as BiscuitKeyPair, PrivateKey, PublicKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Bytes of the public-key hash kept in a key id.
const KEY_ID_BYTES: usize = 12;

/// An Ed25519 keypair for signing and verifying tokens.
pub struct KeyPair {
    inner: BiscuitKeyPair,
    id: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("id", &self.id).finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a new random keypair from the OS-seeded generator.
    pub fn generate() -> Result<Self, TokenError> {
        let mut rng = rand::rng();
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);

        let private_key = PrivateKey::from_bytes(&bytes, Algorithm::Ed25519)
            .map_err(|e| TokenError::SigningError(format!("key generation failed: {e}")))?;
        Ok(Self::from_private_key(private_key))
    }

    /// Create a keypair from an existing private key.
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let inner = BiscuitKeyPair::from(&private_key);
        let id = key_id_for(&inner.public());
        Self { inner, id }
    }

    /// Load a keypair from a hex-encoded private key string.
    pub fn from_private_key_hex(hex: &str) -> Result<Self, TokenError> {
        let private_key = PrivateKey::from_bytes_hex(hex.trim(), Algorithm::Ed25519)
            .map_err(|e| TokenError::SigningError(format!("invalid private key: {e}")))?;
        Ok(Self::from_private_key(private_key))
    }

    /// Load a keypair from a file holding a hex private key.
    pub fn load_from_file(path: &Path) -> Result<Self, TokenError> {
        let hex = std::fs::read_to_string(path).map_err(|e| {
            TokenError::SigningError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_private_key_hex(&hex)
    }

    /// Stable identifier derived from the public key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn inner(&self) -> &BiscuitKeyPair {
        &self.inner
    }

    pub fn public_key(&self) -> PublicKey {
        self.inner.public()
    }

    pub fn private_key_hex(&self) -> String {
        self.inner.private().to_bytes_hex()
    }

    pub fn public_key_hex(&self) -> String {
        self.inner.public().to_bytes_hex()
    }
}

/// Derive the key id for a public key: URL-safe base64 of a truncated
/// SHA-256 over the hex public key. Same key, same id.
pub fn key_id_for(public_key: &PublicKey) -> String {
    let digest = Sha256::digest(public_key.to_bytes_hex().as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..KEY_ID_BYTES])
}
