//! Per-form-key serialization of ledger mutations.
//!
//! Saving a draft reads the ledger length and the finality of its last
//! version before writing, so two requests for the same key must not
//! interleave. Requests for different keys never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Holds the locks of one or more keys until dropped.
pub struct KeyGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    /// Locks every key in `keys`, always in sorted order so that two renames
    /// touching the same pair of keys cannot deadlock.
    pub async fn lock(&self, keys: &[&str]) -> KeyGuard {
        let mut sorted: Vec<&str> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // entries only the map still points at are idle
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            sorted
                .iter()
                .map(|k| locks.entry(k.to_string()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for m in mutexes {
            guards.push(m.lock_owned().await);
        }
        KeyGuard { _guards: guards }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
