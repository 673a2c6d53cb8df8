//! In-process successor table
//!
//! Used when no persistent state directory is wanted, and by tests that need
//! to observe how often the normaliser consults or updates the cache.

use crate::error::StorageError;
use crate::successor::SuccessorCache;
use crate::types::FSId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemorySuccessorCache {
    entries: RwLock<HashMap<FSId, FSId>>,
    lookups: AtomicUsize,
    registrations: AtomicUsize,
}

impl MemorySuccessorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `lookup` calls so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of `register` and `replace` calls so far, including ignored repeats
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Current entry for `id` without counting a lookup.
    pub fn get(&self, id: &FSId) -> Option<FSId> {
        self.entries.read().get(id).copied()
    }
}

impl SuccessorCache for MemorySuccessorCache {
    fn lookup(&self, id: &FSId) -> Result<Option<FSId>, StorageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.read().get(id).copied())
    }

    fn register(&self, id1: &FSId, id2: &FSId) -> Result<(), StorageError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.entries.write().entry(*id1).or_insert(*id2);
        Ok(())
    }

    fn replace(&self, id1: &FSId, stale: &FSId, fresh: &FSId) -> Result<(), StorageError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.write();
        match entries.get(id1) {
            Some(current) if current != stale => {}
            _ => {
                entries.insert(*id1, *fresh);
            }
        }
        Ok(())
    }
}
