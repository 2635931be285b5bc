//! Per-key serialization
//!
//! Each `(user, date)` pair gets its own mutex, created on demand and dropped
//! again once nobody holds or waits on it. Work for different keys never
//! contends here.

use std::hash::Hash;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::trace;

use crate::error::ChallengeError;

/// Lazily-created mutexes keyed by `K`
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Run `f` while holding the lock for `key`
    pub fn with_lock<T, F>(&self, key: &K, f: F) -> Result<T, ChallengeError>
    where
        F: FnOnce() -> Result<T, ChallengeError>,
    {
        // Clone the Arc out so the shard guard is released before we block.
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock
                .lock()
                .map_err(|e| ChallengeError::Internal(format!("Key lock poisoned: {}", e)))?;
            trace!(key = ?key, "Key lock acquired");
            f()
        };

        drop(lock);
        // Only the map's own reference left: nobody is waiting.
        self.locks
            .remove_if(key, |_, held| Arc::strong_count(held) == 1);

        result
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
