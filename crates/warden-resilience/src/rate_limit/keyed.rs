//! Per-key limiter state.
//!
//! The outer map lock is only taken for writing when a key is first seen or
//! purged. Admission decisions lock a single key's entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// State a limiter keeps per key.
pub(crate) trait KeyState: Send + 'static {
    /// Whether the state is indistinguishable from a fresh one at `now`.
    fn settled(&self, now: Instant) -> bool;
}

struct Entry<S> {
    state: S,
    last_seen: Instant,
    /// Set once the entry has left the map. Holders of a stale handle retry.
    removed: bool,
}

pub(crate) struct KeyedState<S> {
    entries: RwLock<HashMap<String, Arc<Mutex<Entry<S>>>>>,
}

impl<S: KeyState> KeyedState<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &str) -> Option<Arc<Mutex<Entry<S>>>> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn insert(&self, key: &str, now: Instant, init: &impl Fn() -> S) -> Arc<Mutex<Entry<S>>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(entries.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Entry {
                state: init(),
                last_seen: now,
                removed: false,
            }))
        }))
    }

    /// Run `f` on the key's state, creating it with `init` when absent.
    pub(crate) fn update<T>(
        &self,
        key: &str,
        now: Instant,
        init: impl Fn() -> S,
        f: impl FnOnce(&mut S) -> T,
    ) -> T {
        loop {
            let entry = match self.entry(key) {
                Some(entry) => entry,
                None => self.insert(key, now, &init),
            };

            let mut entry = entry.lock().unwrap_or_else(|e| e.into_inner());
            // Purged or reset between the lookup and the lock.
            if entry.removed {
                continue;
            }
            entry.last_seen = now;
            return f(&mut entry.state);
        }
    }

    /// Read the key's state without recording activity.
    pub(crate) fn inspect<T>(&self, key: &str, f: impl FnOnce(&mut S) -> T) -> Option<T> {
        let entry = self.entry(key)?;
        let mut entry = entry.lock().unwrap_or_else(|e| e.into_inner());
        Some(f(&mut entry.state))
    }

    pub(crate) fn remove(&self, key: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        match removed {
            Some(entry) => {
                entry.lock().unwrap_or_else(|e| e.into_inner()).removed = true;
                true
            }
            None => false,
        }
    }

    /// Drop keys idle for at least `idle` whose state has settled.
    ///
    /// Entries locked by an in-flight decision are active and kept.
    pub(crate) fn purge(&self, now: Instant, idle: Duration) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| match entry.try_lock() {
            Ok(mut entry) => {
                let keep = now.saturating_duration_since(entry.last_seen) < idle
                    || !entry.state.settled(now);
                entry.removed = !keep;
                keep
            }
            Err(_) => true,
        });
        before - entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
