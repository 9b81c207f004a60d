//! Token store backend selection.

use serde::{Deserialize, Serialize};

/// Token store backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local in-memory store.
    #[default]
    Memory,
    /// A store supplied by the embedding application (database, cache).
    External,
}

/// Token store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Which backend holds token records.
    #[serde(default)]
    pub backend: StoreBackend,
}
