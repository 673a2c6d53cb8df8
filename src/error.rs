//! Error types for the fstate store and normaliser.

use crate::types::FSId;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Term not found: {0}")]
    NotFound(FSId),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: FSId, actual: FSId },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Term nested {depth} levels deep; at most {limit} can be read back")]
    TooDeep { depth: usize, limit: usize },

    #[error("Successor table error: {0}")]
    Database(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure reported by a builder collaborator
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("builder exited with status {status:?}: {message}")]
    Exited { status: Option<i32>, message: String },

    #[error("builder did not produce declared output {0}")]
    MissingOutput(String),

    #[error("platform mismatch: derivation requires {required}, host is {host}")]
    PlatformMismatch { required: String, host: String },

    #[error("failed to start builder {builder}: {source}")]
    Spawn {
        builder: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot capture output {output}: {source}")]
    Capture {
        output: String,
        #[source]
        source: StorageError,
    },

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by normalisation, realisation and closure computation
#[derive(Debug, Error)]
pub enum FStateError {
    #[error("Parse error at offset {offset}: {message}")]
    ParseError { offset: usize, message: String },

    #[error("{message}: {term}")]
    BadTerm { message: String, term: String },

    #[error("Missing reference: {id} (referenced by {referrer})")]
    MissingReference { id: FSId, referrer: FSId },

    #[error("Cycle detected: {id} reappears on its own resolution path")]
    CycleDetected { id: FSId, path: Vec<FSId> },

    #[error("Build of {id} failed: {source}")]
    BuildFailed {
        id: FSId,
        #[source]
        source: BuildError,
    },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: FSId, actual: FSId },

    #[error("Term not found: {0}")]
    NotFound(FSId),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl FStateError {
    /// Whether the caller may retry after correcting inputs or the build
    /// environment. Corruption and modelling bugs are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            FStateError::BuildFailed { .. } | FStateError::MissingReference { .. } => true,
            FStateError::Storage(StorageError::IoError(_)) => true,
            _ => false,
        }
    }
}

impl From<StorageError> for FStateError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => FStateError::NotFound(id),
            StorageError::HashMismatch { expected, actual } => {
                FStateError::HashMismatch { expected, actual }
            }
            other => FStateError::Storage(other),
        }
    }
}

impl From<std::io::Error> for FStateError {
    fn from(err: std::io::Error) -> Self {
        FStateError::Storage(StorageError::IoError(err))
    }
}

impl From<config::ConfigError> for FStateError {
    fn from(err: config::ConfigError) -> Self {
        FStateError::ConfigError(err.to_string())
    }
}

/// Wrap an I/O error with the path it concerns.
pub(crate) fn io_error_at(context: &str, path: &std::path::Path, e: std::io::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        e.kind(),
        format!("{} {}: {}", context, path.display(), e),
    ))
}
