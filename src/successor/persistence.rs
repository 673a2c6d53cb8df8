//! Persistence layer for the successor table

use crate::error::StorageError;
use crate::successor::SuccessorCache;
use crate::types::FSId;
use bincode;
use serde::{Deserialize, Serialize};
use sled;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Value stored per source identity
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SuccessorRecord {
    target: FSId,
    registered_at: u64,
}

/// Sled-based implementation of SuccessorCache
pub struct SledSuccessorCache {
    db: sled::Db,
}

impl SledSuccessorCache {
    /// Open (or create) the successor table at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)
            .map_err(|e| StorageError::Database(format!("Failed to open sled database: {}", e)))?;
        Ok(Self { db })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Number of registered successors
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db
            .flush()
            .map_err(|e| StorageError::Database(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    fn encode(target: &FSId) -> Result<Vec<u8>, StorageError> {
        let record = SuccessorRecord {
            target: *target,
            registered_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        bincode::serialize(&record).map_err(|e| {
            StorageError::Database(format!("Failed to serialize successor record: {}", e))
        })
    }

    fn decode(value: &[u8]) -> Result<SuccessorRecord, StorageError> {
        bincode::deserialize(value).map_err(|e| {
            StorageError::Database(format!("Failed to deserialize successor record: {}", e))
        })
    }
}

impl SuccessorCache for SledSuccessorCache {
    fn lookup(&self, id: &FSId) -> Result<Option<FSId>, StorageError> {
        match self
            .db
            .get(id.as_bytes())
            .map_err(|e| StorageError::Database(format!("Failed to get successor: {}", e)))?
        {
            Some(value) => Ok(Some(Self::decode(&value)?.target)),
            None => Ok(None),
        }
    }

    fn register(&self, id1: &FSId, id2: &FSId) -> Result<(), StorageError> {
        let value = Self::encode(id2)?;
        let outcome = self
            .db
            .compare_and_swap(id1.as_bytes(), None as Option<&[u8]>, Some(value))
            .map_err(|e| StorageError::Database(format!("Failed to put successor: {}", e)))?;

        if let Err(conflict) = outcome {
            if let Some(current) = conflict.current {
                let existing = Self::decode(&current)?;
                if existing.target != *id2 {
                    warn!(
                        id = %id1,
                        existing = %existing.target,
                        registered_at = existing.registered_at,
                        rejected = %id2,
                        "Conflicting successor registration ignored; builder may be non-deterministic"
                    );
                }
            }
        }

        Ok(())
    }

    fn replace(&self, id1: &FSId, stale: &FSId, fresh: &FSId) -> Result<(), StorageError> {
        let Some(current) = self
            .db
            .get(id1.as_bytes())
            .map_err(|e| StorageError::Database(format!("Failed to get successor: {}", e)))?
        else {
            return self.register(id1, fresh);
        };
        let existing = Self::decode(&current)?;
        if existing.target != *stale {
            return Ok(());
        }

        let outcome = self
            .db
            .compare_and_swap(id1.as_bytes(), Some(current), Some(Self::encode(fresh)?))
            .map_err(|e| StorageError::Database(format!("Failed to replace successor: {}", e)))?;
        match outcome {
            Ok(()) => info!(
                id = %id1,
                stale = %stale,
                registered_at = existing.registered_at,
                fresh = %fresh,
                "Replaced stale successor"
            ),
            Err(_) => debug!(id = %id1, "Successor changed concurrently; keeping it"),
        }
        Ok(())
    }
}
