//! File object contents encoded as terms
//!
//! `Regular("<hex>")`, `Executable("<hex>")` and
//! `Directory([("name",<content>),...])`. Directory entries are kept in a
//! `BTreeMap`, so the printed form lists them sorted by name and a directory
//! has exactly one term (and one identity) regardless of the order the
//! filesystem returned its entries in.

use crate::error::{io_error_at, FStateError, StorageError};
use crate::term::{bad_term, hash_term, Term, MAX_TERM_DEPTH};
use crate::types::FSId;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Deepest directory nesting a captured file object may have. Each level
/// costs three term levels inside a `Path` term, which must stay parseable.
pub const MAX_DIRECTORY_DEPTH: usize = (MAX_TERM_DEPTH - 3) / 3;

/// Contents of a file object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Regular(Vec<u8>),
    Executable(Vec<u8>),
    Directory(BTreeMap<String, Content>),
}

impl Content {
    pub fn regular<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Content::Regular(bytes.into())
    }

    pub fn to_term(&self) -> Term {
        match self {
            Content::Regular(bytes) => Term::app("Regular", vec![Term::Str(hex::encode(bytes))]),
            Content::Executable(bytes) => {
                Term::app("Executable", vec![Term::Str(hex::encode(bytes))])
            }
            Content::Directory(entries) => Term::app(
                "Directory",
                vec![Term::List(
                    entries
                        .iter()
                        .map(|(name, content)| {
                            Term::Tuple(vec![Term::Str(name.clone()), content.to_term()])
                        })
                        .collect(),
                )],
            ),
        }
    }

    pub fn from_term(t: &Term) -> Result<Self, FStateError> {
        if let Some(args) = t.as_app("Regular", 1) {
            return Ok(Content::Regular(decode_bytes(&args[0], t)?));
        }
        if let Some(args) = t.as_app("Executable", 1) {
            return Ok(Content::Executable(decode_bytes(&args[0], t)?));
        }
        if let Some(args) = t.as_app("Directory", 1) {
            let items = args[0]
                .as_list()
                .ok_or_else(|| bad_term("directory entries must be a list", t))?;
            let mut entries = BTreeMap::new();
            let mut previous: Option<&str> = None;
            for item in items {
                let (name, content) = match item.as_tuple() {
                    Some([Term::Str(name), content]) => (name.as_str(), content),
                    _ => return Err(bad_term("malformed directory entry", item)),
                };
                validate_entry_name(name, item)?;
                if let Some(prev) = previous {
                    if prev >= name {
                        return Err(bad_term(
                            "directory entries must be unique and sorted by name",
                            t,
                        ));
                    }
                }
                previous = Some(name);
                entries.insert(name.to_string(), Content::from_term(content)?);
            }
            return Ok(Content::Directory(entries));
        }
        Err(bad_term("not a content term", t))
    }

    /// Identity of the content alone, used to compare on-disk objects.
    pub fn content_hash(&self) -> FSId {
        hash_term(&self.to_term())
    }

    /// Capture the file object at `path` from the host filesystem.
    pub fn read_from(path: &Path) -> Result<Self, StorageError> {
        Self::capture(path, 1)
    }

    fn capture(path: &Path, level: usize) -> Result<Self, StorageError> {
        let metadata =
            fs::symlink_metadata(path).map_err(|e| io_error_at("Failed to stat", path, e))?;

        if metadata.file_type().is_symlink() {
            return Err(StorageError::InvalidPath(format!(
                "symbolic links are not supported: {}",
                path.display()
            )));
        }

        if metadata.is_dir() {
            if level > MAX_DIRECTORY_DEPTH {
                return Err(StorageError::InvalidPath(format!(
                    "{} nests directories more than {} levels deep",
                    path.display(),
                    MAX_DIRECTORY_DEPTH
                )));
            }
            let mut entries = BTreeMap::new();
            for entry in WalkDir::new(path)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| {
                    StorageError::IoError(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("Failed to list {}: {}", path.display(), e),
                    ))
                })?;
                let name = entry.file_name().to_str().ok_or_else(|| {
                    StorageError::InvalidPath(format!(
                        "non-UTF-8 file name in {}",
                        path.display()
                    ))
                })?;
                entries.insert(name.to_string(), Content::capture(entry.path(), level + 1)?);
            }
            return Ok(Content::Directory(entries));
        }

        let bytes = fs::read(path).map_err(|e| io_error_at("Failed to read", path, e))?;
        if is_executable(&metadata) {
            Ok(Content::Executable(bytes))
        } else {
            Ok(Content::Regular(bytes))
        }
    }

    /// Write this content at `path`, which must not exist yet.
    pub fn write_to(&self, path: &Path) -> Result<(), StorageError> {
        match self {
            Content::Regular(bytes) => {
                fs::write(path, bytes).map_err(|e| io_error_at("Failed to write", path, e))
            }
            Content::Executable(bytes) => {
                fs::write(path, bytes).map_err(|e| io_error_at("Failed to write", path, e))?;
                set_executable(path)
            }
            Content::Directory(entries) => {
                fs::create_dir(path).map_err(|e| io_error_at("Failed to create", path, e))?;
                for (name, content) in entries {
                    content.write_to(&path.join(name))?;
                }
                Ok(())
            }
        }
    }
}

fn decode_bytes(arg: &Term, whole: &Term) -> Result<Vec<u8>, FStateError> {
    let text = arg
        .as_str()
        .ok_or_else(|| bad_term("file contents must be a hex string", whole))?;
    hex::decode(text).map_err(|_| bad_term("file contents are not valid hex", whole))
}

fn validate_entry_name(name: &str, item: &Term) -> Result<(), FStateError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(bad_term("invalid directory entry name", item));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| io_error_at("Failed to set permissions on", path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}
