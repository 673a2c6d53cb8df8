//! Path canonicalization for store paths
//!
//! Paths inside terms are logical, absolute, `/`-separated strings such as
//! `/store/a`. They are mapped onto the host filesystem below a realisation
//! root, which is `/` in production and a scratch directory in tests.

use crate::error::StorageError;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Normalize a logical path string for use inside a term
///
/// Applies Unicode NFC, removes trailing slashes (except root) and rejects
/// relative paths and `.`/`..` components, so one file object has exactly one
/// spelling and therefore one identity.
pub fn normalize_store_path(path: &str) -> Result<String, StorageError> {
    let normalized: String = path.nfc().collect();

    if !normalized.starts_with('/') {
        return Err(StorageError::InvalidPath(format!(
            "store path must be absolute: {}",
            path
        )));
    }

    let mut segments = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" => continue,
            "." | ".." => {
                return Err(StorageError::InvalidPath(format!(
                    "store path must not contain '{}': {}",
                    segment, path
                )))
            }
            s => segments.push(s),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Map a logical store path onto the host filesystem below `root`.
pub fn resolve_under_root(root: &Path, logical: &str) -> Result<PathBuf, StorageError> {
    let normalized = normalize_store_path(logical)?;
    let mut resolved = root.to_path_buf();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(name) => resolved.push(name),
            Component::RootDir => {}
            _ => {
                return Err(StorageError::InvalidPath(format!(
                    "unsupported path component in {}",
                    logical
                )))
            }
        }
    }
    Ok(resolved)
}

/// Whether canonical path `ancestor` strictly contains `path`.
pub fn is_ancestor_path(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Whether two canonical paths are equal or one lies below the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    a == b || is_ancestor_path(a, b) || is_ancestor_path(b, a)
}

/// Canonicalize a host directory, creating it if needed.
pub fn canonicalize_root(root: &Path) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(root)?;
    dunce::canonicalize(root).map_err(|e| {
        StorageError::InvalidPath(format!(
            "Failed to canonicalize {}: {}",
            root.display(),
            e
        ))
    })
}
