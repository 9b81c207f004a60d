//! Signing key configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for signing key material and rotation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyConfig {
    /// Environment variable containing the private key (hex-encoded).
    #[serde(default)]
    pub private_key_env: Option<String>,

    /// Path to the private key file.
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,

    /// Rotate the active key on this period. No automatic rotation when unset.
    #[serde(default, with = "super::duration::option")]
    pub rotation_interval: Option<Duration>,
}

impl KeyConfig {
    /// Resolve the private key from environment or file.
    pub fn resolve_private_key(&self) -> Result<Option<String>, std::io::Error> {
        // Try environment variable first
        if let Some(env_var) = &self.private_key_env {
            if let Ok(key) = std::env::var(env_var) {
                return Ok(Some(key.trim().to_string()));
            }
        }

        if let Some(path) = &self.private_key_file {
            if path.exists() {
                let key = std::fs::read_to_string(path)?;
                return Ok(Some(key.trim().to_string()));
            }
        }

        Ok(None)
    }
}
