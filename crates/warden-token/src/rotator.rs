//! Signing key rotation and retention.

use crate::error::TokenError;
use crate::keys::KeyPair;
use crate::signer::Signer;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use warden_core::config::KeyConfig;
use warden_core::{MaintenanceTask, SharedClock};

#[derive(Debug)]
struct RetainedKey {
    key: Arc<KeyPair>,
    created_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct KeyRing {
    keys: HashMap<String, RetainedKey>,
    active: Option<String>,
    /// Lower bound on the prune horizon.
    min_retention: Duration,
}

impl KeyRing {
    fn activate(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(previous) = self.active.take() {
            if previous != id {
                if let Some(old) = self.keys.get_mut(&previous) {
                    old.retired_at = Some(now);
                }
            }
        }
        if let Some(key) = self.keys.get_mut(id) {
            key.retired_at = None;
        }
        self.active = Some(id.to_string());
    }

    /// Ids with the active key first, then by creation time, newest first.
    fn ordered_ids(&self) -> Vec<String> {
        let mut ids: Vec<(&String, &RetainedKey)> = self.keys.iter().collect();
        ids.sort_by(|(a_id, a), (b_id, b)| {
            let a_active = self.active.as_ref() == Some(*a_id);
            let b_active = self.active.as_ref() == Some(*b_id);
            b_active
                .cmp(&a_active)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a_id.cmp(b_id))
        });
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Public view of a retained key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Holds the active signing key and every retired key still needed to
/// verify outstanding tokens.
///
/// Retired keys are only removed by an explicit [`KeyRotator::prune`], and
/// never sooner than the floor set with [`KeyRotator::retain_at_least`].
#[derive(Debug)]
pub struct KeyRotator {
    ring: RwLock<KeyRing>,
    clock: SharedClock,
}

impl KeyRotator {
    /// A rotator with no keys. Issuance fails until a key is added or rotated in.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            ring: RwLock::new(KeyRing::default()),
            clock,
        }
    }

    /// A rotator with `key` active.
    pub fn with_key(key: KeyPair, clock: SharedClock) -> Self {
        let rotator = Self::new(clock);
        rotator.add_key(key, true);
        rotator
    }

    /// Build from configuration: load the configured private key, or generate
    /// a fresh one when none is configured.
    pub fn from_config(config: &KeyConfig, clock: SharedClock) -> Result<Self, TokenError> {
        let resolved = config
            .resolve_private_key()
            .map_err(|e| TokenError::SigningError(format!("cannot read private key: {e}")))?;

        let key = match resolved {
            Some(hex) => KeyPair::from_private_key_hex(&hex)?,
            None => {
                tracing::info!("no private key configured; generating an ephemeral signing key");
                KeyPair::generate()?
            }
        };
        Ok(Self::with_key(key, clock))
    }

    /// Generate a new key and make it active. Returns its id.
    pub fn rotate_key(&self) -> Result<String, TokenError> {
        let key = KeyPair::generate()?;
        let id = self.add_key(key, true);
        tracing::info!(key_id = %id, "rotated signing key");
        Ok(id)
    }

    /// Install externally supplied key material. Adding a key that is already
    /// retained keeps its original creation time.
    pub fn add_key(&self, key: KeyPair, activate: bool) -> String {
        let now = self.clock.now();
        let id = key.id().to_string();

        let mut ring = self.ring.write().unwrap_or_else(|e| e.into_inner());
        ring.keys.entry(id.clone()).or_insert_with(|| RetainedKey {
            key: Arc::new(key),
            created_at: now,
            // An inactive key starts retired.
            retired_at: Some(now),
        });
        if activate || ring.active.is_none() {
            ring.activate(&id, now);
        }
        tracing::debug!(key_id = %id, active = ring.active.as_deref() == Some(id.as_str()), "added signing key");
        id
    }

    /// Signer bound to a specific retained key.
    pub fn signer_for(&self, key_id: &str) -> Option<Signer> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.keys.get(key_id).map(|k| Signer::new(Arc::clone(&k.key)))
    }

    /// Signer for the active key.
    pub fn active_signer(&self) -> Result<Signer, TokenError> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.active
            .as_ref()
            .and_then(|id| ring.keys.get(id))
            .map(|k| Signer::new(Arc::clone(&k.key)))
            .ok_or_else(|| TokenError::SigningError("no active signing key".into()))
    }

    /// Signers to try when verifying: `preferred` first, then the active key,
    /// then the rest newest first.
    pub fn verification_signers(&self, preferred: Option<&str>) -> Vec<Signer> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        let mut ids = ring.ordered_ids();
        if let Some(pos) = preferred.and_then(|p| ids.iter().position(|id| id == p)) {
            let id = ids.remove(pos);
            ids.insert(0, id);
        }
        ids.iter()
            .filter_map(|id| ring.keys.get(id))
            .map(|k| Signer::new(Arc::clone(&k.key)))
            .collect()
    }

    pub fn active_key_id(&self) -> Option<String> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.active.clone()
    }

    /// Retained key ids, active first.
    pub fn key_ids(&self) -> Vec<String> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.ordered_ids()
    }

    pub fn keys(&self) -> Vec<KeyInfo> {
        let ring = self.ring.read().unwrap_or_else(|e| e.into_inner());
        ring.ordered_ids()
            .into_iter()
            .filter_map(|id| {
                ring.keys.get(&id).map(|k| KeyInfo {
                    active: ring.active.as_deref() == Some(id.as_str()),
                    created_at: k.created_at,
                    retired_at: k.retired_at,
                    id,
                })
            })
            .collect()
    }

    /// Raise the retention floor to `lifetime`. The floor never decreases.
    pub fn retain_at_least(&self, lifetime: Duration) {
        let mut ring = self.ring.write().unwrap_or_else(|e| e.into_inner());
        ring.min_retention = ring.min_retention.max(lifetime);
    }

    pub fn min_retention(&self) -> Duration {
        self.ring.read().unwrap_or_else(|e| e.into_inner()).min_retention
    }

    /// Remove retired keys whose retirement is older than `max_token_lifetime`
    /// (or the retention floor, whichever is longer): nothing they signed can
    /// still be valid. Returns the removed ids.
    pub fn prune(&self, max_token_lifetime: Duration) -> Vec<String> {
        let now = self.clock.now();

        let mut ring = self.ring.write().unwrap_or_else(|e| e.into_inner());
        let lifetime = chrono::Duration::from_std(max_token_lifetime.max(ring.min_retention))
            .unwrap_or(chrono::Duration::MAX);
        let active = ring.active.clone();
        let expired: Vec<String> = ring
            .keys
            .iter()
            .filter(|(id, _)| active.as_ref() != Some(*id))
            .filter(|(_, k)| {
                k.retired_at
                    .and_then(|retired| retired.checked_add_signed(lifetime))
                    .is_some_and(|safe_after| safe_after < now)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            ring.keys.remove(id);
            tracing::info!(key_id = %id, "pruned retired signing key");
        }
        expired
    }

    /// Rotate the active key every `interval` on a background task.
    pub fn spawn_rotation(self: &Arc<Self>, interval: Duration) -> MaintenanceTask {
        let rotator = Arc::downgrade(self);
        MaintenanceTask::spawn("key-rotation", interval, move || {
            let rotator = rotator.clone();
            async move {
                let Some(rotator) = rotator.upgrade() else {
                    return;
                };
                if let Err(e) = rotator.rotate_key() {
                    tracing::warn!(error = %e, "scheduled key rotation failed");
                }
            }
        })
    }
}
