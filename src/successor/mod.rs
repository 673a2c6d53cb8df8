//! Successor Cache
//!
//! Memoizes `id -> normal form id` edges. Entries are advisory: the
//! normaliser only trusts an entry whose target is still present in the term
//! store, and recomputation must always agree with any cached successor.

pub mod memory;
pub mod persistence;

pub use memory::MemorySuccessorCache;
pub use persistence::SledSuccessorCache;

use crate::error::StorageError;
use crate::types::FSId;

/// Successor table interface
pub trait SuccessorCache: Send + Sync {
    /// Return the registered successor of `id`, if any.
    fn lookup(&self, id: &FSId) -> Result<Option<FSId>, StorageError>;

    /// Record that `id1` normalizes to `id2`.
    ///
    /// Idempotent. A second registration for the same `id1` is ignored; the
    /// mapping is a pure function of `id1`, so a disagreeing value indicates a
    /// non-deterministic builder and is only reported.
    fn register(&self, id1: &FSId, id2: &FSId) -> Result<(), StorageError>;

    /// Swap the successor of `id1` from `stale` to `fresh`.
    ///
    /// Only takes effect while the entry still reads `stale`, so a concurrent
    /// replacement is never undone. Used once `stale` no longer resolves.
    fn replace(&self, id1: &FSId, stale: &FSId, fresh: &FSId) -> Result<(), StorageError>;
}
