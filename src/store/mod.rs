//! Term Store
//!
//! Content-addressed storage for terms using the filesystem. Terms are stored
//! at paths computed directly from their identity, so lookup never searches.

use crate::error::{io_error_at, FStateError, StorageError};
use crate::fstate::FState;
use crate::term::{hash_text, parse_term, print_term, Term, MAX_TERM_DEPTH};
use crate::types::FSId;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

const TERMS_DIR: &str = "terms";
const TMP_DIR: &str = "tmp";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Content-addressed term storage
///
/// Stores terms on the filesystem using a content-addressed path structure:
/// `{root}/terms/{hex[0..2]}/{hex}`
///
/// Objects are write-once. A write goes to a uniquely named file under
/// `{root}/tmp`, is re-hashed, and is then renamed into place, so a reader
/// never observes a partially written object and concurrent writers of the
/// same term are harmless.
pub struct TermStore {
    root: PathBuf,
    verify_on_read: bool,
}

impl TermStore {
    /// Create a new TermStore at the given root path
    ///
    /// The directory structure will be created as needed. With
    /// `verify_on_read`, every load re-hashes the stored text and fails with
    /// `HashMismatch` if it disagrees with the requested identity.
    pub fn new<P: AsRef<Path>>(root: P, verify_on_read: bool) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();

        for dir in [root.join(TERMS_DIR), root.join(TMP_DIR)] {
            fs::create_dir_all(&dir)
                .map_err(|e| io_error_at("Failed to create store directory", &dir, e))?;
        }

        Ok(Self {
            root,
            verify_on_read,
        })
    }

    /// Get the root path of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the filesystem path for a given identity
    ///
    /// Path structure: `{root}/terms/{hex[0..2]}/{hex}`
    pub fn object_path(&self, id: &FSId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(TERMS_DIR).join(&hex[0..2]).join(hex)
    }

    /// Check if a term with the given identity is stored
    pub fn contains(&self, id: &FSId) -> bool {
        self.object_path(id).is_file()
    }

    /// Write a term to the store and return its identity
    ///
    /// If an object with the same identity already exists this is a no-op.
    /// A non-empty `suffix` also publishes a hard-linked alias named
    /// `{hex}{suffix}` next to the object, to make the store browsable.
    /// Terms nested deeper than the parser accepts are refused, since they
    /// could never be loaded again.
    pub fn write_term(&self, term: &Term, suffix: &str) -> Result<FSId, StorageError> {
        validate_suffix(suffix)?;
        let depth = term.depth();
        if depth > MAX_TERM_DEPTH {
            return Err(StorageError::TooDeep {
                depth,
                limit: MAX_TERM_DEPTH,
            });
        }

        let text = print_term(term);
        let id = hash_text(&text);
        let object_path = self.object_path(&id);

        if object_path.is_file() {
            trace!(id = %id, "Term already stored");
        } else {
            self.publish(&id, &text, &object_path)?;
            debug!(id = %id, bytes = text.len(), "Stored term");
        }

        if !suffix.is_empty() {
            self.link_alias(&id, &object_path, suffix)?;
        }

        Ok(id)
    }

    /// Convenience for writing a typed expression.
    pub fn write_fstate(&self, fs: &FState, suffix: &str) -> Result<FSId, StorageError> {
        self.write_term(&fs.to_term(), suffix)
    }

    /// Load the canonical text stored under `id`.
    pub fn read_text(&self, id: &FSId) -> Result<String, StorageError> {
        let object_path = self.object_path(id);
        let text = match fs::read_to_string(&object_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(*id))
            }
            Err(e) => return Err(io_error_at("Failed to read term from", &object_path, e)),
        };

        if self.verify_on_read {
            let actual = hash_text(&text);
            if actual != *id {
                return Err(StorageError::HashMismatch {
                    expected: *id,
                    actual,
                });
            }
        }

        Ok(text)
    }

    /// Load and parse the term stored under `id`.
    pub fn term_from_id(&self, id: &FSId) -> Result<Term, FStateError> {
        let text = self.read_text(id)?;
        parse_term(&text)
    }

    /// Load the term stored under `id` and decode it as an expression.
    pub fn fstate_from_id(&self, id: &FSId) -> Result<FState, FStateError> {
        FState::from_term(&self.term_from_id(id)?)
    }

    fn publish(&self, id: &FSId, text: &str, object_path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_error_at("Failed to create parent directory", parent, e))?;
        }

        let temp_path = self.root.join(TMP_DIR).join(format!(
            "{}.{}.{}.tmp",
            id.to_hex(),
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&temp_path, text.as_bytes())
            .map_err(|e| io_error_at("Failed to write term to", &temp_path, e))?;

        // Verify what actually landed on disk before publishing it.
        let written = fs::read_to_string(&temp_path)
            .map_err(|e| io_error_at("Failed to re-read term from", &temp_path, e))?;
        let actual = hash_text(&written);
        if actual != *id {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::HashMismatch {
                expected: *id,
                actual,
            });
        }

        fs::rename(&temp_path, object_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            io_error_at("Failed to publish term at", object_path, e)
        })
    }

    fn link_alias(&self, id: &FSId, object_path: &Path, suffix: &str) -> Result<(), StorageError> {
        let alias = object_path.with_file_name(format!("{}{}", id.to_hex(), suffix));
        match fs::hard_link(object_path, &alias) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(io_error_at("Failed to link alias", &alias, e)),
        }
    }
}

fn validate_suffix(suffix: &str) -> Result<(), StorageError> {
    if suffix.contains('/') || suffix.contains('\\') || suffix.contains('\0') {
        return Err(StorageError::InvalidPath(format!(
            "invalid term suffix: {:?}",
            suffix
        )));
    }
    Ok(())
}
