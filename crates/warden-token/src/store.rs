//! Token storage backends.

use crate::error::StoreError;
use crate::token::{RevocationStatus, Token, TokenFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use warden_core::config::{StoreBackend, StoreConfig};

/// Trait for token storage backends.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Get a token by id.
    async fn get(&self, id: &str) -> Result<Token, StoreError>;

    /// Store a new token. Fails with [`StoreError::AlreadyExists`] when the id
    /// is taken; the check and the write are one atomic step.
    async fn insert(&self, token: Token, ttl: Duration) -> Result<(), StoreError>;

    /// Insert or replace a token. `ttl` is how long the backend must keep the
    /// record; backends without native expiry rely on [`TokenStore::cleanup`].
    async fn save(&self, token: Token, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a token record. Its revocation entry, if any, is kept.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// List tokens matching `filter`, ordered by issuance time.
    async fn list(&self, filter: &TokenFilter) -> Result<Vec<Token>, StoreError>;

    /// Count tokens matching `filter`.
    async fn count(&self, filter: &TokenFilter) -> Result<usize, StoreError>;

    /// Mark a token revoked. Returns `false` when it already was; the first
    /// revocation record is never overwritten.
    async fn revoke(
        &self,
        id: &str,
        reason: &str,
        revoked_by: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Whether a token id is on the revocation list.
    async fn is_revoked(&self, id: &str) -> Result<bool, StoreError>;

    /// Remove tokens (and revocation entries) that expired before `before`.
    async fn cleanup(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Create a token store based on configuration.
///
/// `External` requires the embedding application to pass its own backend.
pub fn create_store(
    config: &StoreConfig,
    external: Option<Arc<dyn TokenStore>>,
) -> Result<Arc<dyn TokenStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            if external.is_some() {
                tracing::warn!("external token store supplied but backend is memory; ignoring it");
            }
            Ok(Arc::new(MemoryTokenStore::new()))
        }
        StoreBackend::External => external.ok_or_else(|| {
            StoreError::Config("backend 'external' requires a caller-supplied store".into())
        }),
    }
}

#[derive(Debug, Clone)]
struct Blacklisted {
    status: RevocationStatus,
    expires_at: DateTime<Utc>,
}

/// Process-local token store.
///
/// The map lock is only held to find or insert an entry; revocation locks the
/// single affected record.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, Arc<RwLock<Token>>>>,
    blacklist: RwLock<HashMap<String, Blacklisted>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Option<Arc<RwLock<Token>>> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        tokens.get(id).cloned()
    }

    fn snapshot(&self) -> Vec<Token> {
        let entries: Vec<_> = {
            let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
            tokens.values().cloned().collect()
        };
        entries
            .iter()
            .map(|e| e.read().unwrap_or_else(|e| e.into_inner()).clone())
            .collect()
    }

    fn blacklisted(&self, id: &str) -> Option<RevocationStatus> {
        let blacklist = self.blacklist.read().unwrap_or_else(|e| e.into_inner());
        blacklist.get(id).map(|b| b.status.clone())
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, id: &str) -> Result<Token, StoreError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let token = entry.read().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(token)
    }

    async fn insert(&self, mut token: Token, _ttl: Duration) -> Result<(), StoreError> {
        if token.revocation.is_none() {
            token.revocation = self.blacklisted(&token.id);
        }

        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        match tokens.entry(token.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(token.id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(token)));
                Ok(())
            }
        }
    }

    async fn save(&self, mut token: Token, _ttl: Duration) -> Result<(), StoreError> {
        // A re-saved record keeps its revocation.
        if token.revocation.is_none() {
            token.revocation = self.blacklisted(&token.id);
        }

        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        match tokens.entry(token.id.clone()) {
            Entry::Occupied(existing) => {
                let mut current = existing.get().write().unwrap_or_else(|e| e.into_inner());
                if token.revocation.is_none() {
                    token.revocation = current.revocation.clone();
                }
                *current = token;
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(token)));
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &TokenFilter) -> Result<Vec<Token>, StoreError> {
        let mut results: Vec<Token> = self
            .snapshot()
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        results.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    async fn count(&self, filter: &TokenFilter) -> Result<usize, StoreError> {
        Ok(self.snapshot().iter().filter(|t| filter.matches(t)).count())
    }

    async fn revoke(
        &self,
        id: &str,
        reason: &str,
        revoked_by: Option<&str>,
    ) -> Result<bool, StoreError> {
        let Some(entry) = self.entry(id) else {
            // Deleted records stay revoked.
            if self.blacklisted(id).is_some() {
                return Ok(false);
            }
            return Err(StoreError::NotFound(id.to_string()));
        };

        let mut token = entry.write().unwrap_or_else(|e| e.into_inner());
        if token.revocation.is_some() {
            return Ok(false);
        }

        let status = RevocationStatus {
            revoked_at: Utc::now(),
            revoked_by: revoked_by.map(str::to_string),
            reason: reason.to_string(),
        };
        token.revocation = Some(status.clone());

        let mut blacklist = self.blacklist.write().unwrap_or_else(|e| e.into_inner());
        blacklist.entry(id.to_string()).or_insert(Blacklisted {
            status,
            expires_at: token.expires_at,
        });
        Ok(true)
    }

    async fn is_revoked(&self, id: &str) -> Result<bool, StoreError> {
        if self.blacklisted(id).is_some() {
            return Ok(true);
        }
        Ok(self
            .entry(id)
            .is_some_and(|e| e.read().unwrap_or_else(|e| e.into_inner()).is_revoked()))
    }

    async fn cleanup(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = {
            let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
            let start = tokens.len();
            tokens.retain(|_, entry| {
                entry.read().unwrap_or_else(|e| e.into_inner()).expires_at >= before
            });
            start - tokens.len()
        };

        let mut blacklist = self.blacklist.write().unwrap_or_else(|e| e.into_inner());
        blacklist.retain(|_, b| b.expires_at >= before);

        if removed > 0 {
            tracing::debug!(removed, before = %before, "removed expired tokens");
        }
        Ok(removed)
    }
}
