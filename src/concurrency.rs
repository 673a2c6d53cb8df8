//! Per-identity locking for derivation builds
//!
//! Within one process, two threads asked to normalise the same derivation
//! must not both run its builder. Each identity gets its own lock; there is no
//! global lock, so a long build never blocks unrelated normalisations.
//! Across processes the store's write-once objects and advisory successors
//! make duplicate work harmless.

use crate::types::FSId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-identity lock manager
pub struct IdLockManager {
    locks: RwLock<HashMap<FSId, Arc<Mutex<()>>>>,
}

impl IdLockManager {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the lock for `id`
    pub fn get_lock(&self, id: &FSId) -> Arc<Mutex<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(id) {
                return lock.clone();
            }
        }

        // Double-check after acquiring write lock (another thread might have created it)
        let mut map = self.locks.write();
        map.entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop locks nobody holds a handle to.
    pub fn prune(&self) {
        self.locks
            .write()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}

impl Default for IdLockManager {
    fn default() -> Self {
        Self::new()
    }
}
