//! Slice Realiser
//!
//! Materialises every element of a slice at its path below the realisation
//! root. Realisation is idempotent: an element whose content is already in
//! place is skipped. All references are checked before anything is written,
//! and each object is written under a temporary sibling name and renamed into
//! place, so a failed realisation leaves no partially written object behind.

use crate::error::{io_error_at, FStateError, StorageError};
use crate::fstate::{Content, FState, Slice, SliceElem};
use crate::paths::resolve_under_root;
use crate::store::TermStore;
use crate::term::bad_term;
use crate::types::FSId;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// What realising one element requires
struct Planned<'s> {
    elem: &'s SliceElem,
    target: PathBuf,
    content: Content,
}

pub struct SliceRealiser<'a> {
    store: &'a TermStore,
    fs_root: &'a Path,
}

impl<'a> SliceRealiser<'a> {
    pub fn new(store: &'a TermStore, fs_root: &'a Path) -> Self {
        Self { store, fs_root }
    }

    /// Ensure every element of `slice` exists on the filesystem.
    pub fn realise_slice(&self, slice: &Slice) -> Result<(), FStateError> {
        let mut ids = HashSet::with_capacity(slice.elems.len());
        for elem in &slice.elems {
            if !ids.insert(elem.id) {
                return Err(bad_term("duplicate slice element", &elem.to_term()));
            }
        }

        let mut pending = Vec::new();
        for elem in &slice.elems {
            for r in &elem.refs {
                if !ids.contains(r) && !self.is_realised(r)? {
                    return Err(FStateError::MissingReference {
                        id: *r,
                        referrer: elem.id,
                    });
                }
            }

            let content = self.stored_content(elem)?;
            let target = resolve_under_root(self.fs_root, &elem.path)?;
            if on_disk_matches(&target, &content)? {
                debug!(path = %elem.path, id = %elem.id, "Already realised");
                continue;
            }
            pending.push(Planned {
                elem,
                target,
                content,
            });
        }

        for planned in pending {
            write_atomically(&planned.target, &planned.content)?;
            info!(path = %planned.elem.path, id = %planned.elem.id, "Realised file object");
        }

        Ok(())
    }

    /// Whether `id` names a stored `Path` whose content is already in place.
    fn is_realised(&self, id: &FSId) -> Result<bool, FStateError> {
        match self.store.fstate_from_id(id) {
            Ok(FState::Path { path, content, .. }) => {
                let target = resolve_under_root(self.fs_root, &path)?;
                Ok(on_disk_matches(&target, &content)?)
            }
            Ok(_) | Err(FStateError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The content the store holds for an element, checked against the
    /// element's own description.
    fn stored_content(&self, elem: &SliceElem) -> Result<Content, FStateError> {
        let term = self.store.term_from_id(&elem.id)?;
        match FState::from_term(&term)? {
            FState::Path {
                path,
                content,
                refs,
            } => {
                if path != elem.path || refs != elem.refs {
                    return Err(bad_term(
                        format!("slice element for {} disagrees with stored term", elem.path),
                        &term,
                    ));
                }
                Ok(content)
            }
            _ => Err(bad_term("slice element does not name a file object", &term)),
        }
    }
}

/// `Ok(true)` if `target` holds `content`, `Ok(false)` if it is absent, and an
/// error if something else occupies it.
fn on_disk_matches(target: &Path, content: &Content) -> Result<bool, StorageError> {
    if fs::symlink_metadata(target).is_err() {
        return Ok(false);
    }
    let existing = Content::read_from(target)?;
    if existing.content_hash() == content.content_hash() {
        Ok(true)
    } else {
        Err(StorageError::InvalidPath(format!(
            "{} exists with different content",
            target.display()
        )))
    }
}

fn write_atomically(target: &Path, content: &Content) -> Result<(), StorageError> {
    let parent = target.parent().ok_or_else(|| {
        StorageError::InvalidPath(format!("cannot realise at {}", target.display()))
    })?;
    fs::create_dir_all(parent)
        .map_err(|e| io_error_at("Failed to create parent directory", parent, e))?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(
        ".{}.tmp-{}-{}",
        name,
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = content.write_to(&temp) {
        remove_any(&temp);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp, target) {
        remove_any(&temp);
        // A concurrent realiser may have published the same object first.
        if on_disk_matches(target, content).unwrap_or(false) {
            return Ok(());
        }
        return Err(io_error_at("Failed to publish", target, e));
    }

    Ok(())
}

fn remove_any(path: &Path) {
    if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    } else {
        let _ = fs::remove_file(path);
    }
}
