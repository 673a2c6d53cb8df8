//! Configuration System
//!
//! Layered configuration for the store: built-in defaults, the global config
//! file, an optional explicit file and `FSTATE__*` environment variables, in
//! increasing order of precedence. A loaded configuration is validated once
//! and then passed by reference; nothing here is global.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FStateConfig {
    /// Store layout and behaviour
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the store keeps its objects and successors, and where file objects
/// are realised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Term objects live under `{store_dir}/terms`
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Mutable state; the successor table lives in `{state_dir}/successors`
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Host directory that absolute logical paths resolve under
    #[serde(default = "default_fs_root")]
    pub fs_root: PathBuf,

    /// Re-hash objects when they are read
    #[serde(default = "default_true")]
    pub verify_on_read: bool,

    /// Platform accepted by the process builder (defaults to the host)
    #[serde(default)]
    pub platform: Option<String>,
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "fstate", "fstate")
}

pub(crate) fn default_store_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".fstate/store"))
}

pub(crate) fn default_state_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .to_path_buf()
        })
        .unwrap_or_else(|| PathBuf::from(".fstate/state"))
}

pub(crate) fn default_fs_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            state_dir: default_state_dir(),
            fs_root: default_fs_root(),
            verify_on_read: default_true(),
            platform: None,
        }
    }
}

impl StoreConfig {
    /// A self-contained layout below `root`: `store/`, `state/` and `fs/`.
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            store_dir: root.join("store"),
            state_dir: root.join("state"),
            fs_root: root.join("fs"),
            verify_on_read: true,
            platform: None,
        }
    }

    pub fn successors_dir(&self) -> PathBuf {
        self.state_dir.join("successors")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.store_dir.as_os_str().is_empty() {
            return Err("Store directory cannot be empty".to_string());
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err("State directory cannot be empty".to_string());
        }
        if !self.fs_root.is_absolute() {
            return Err(format!(
                "Filesystem root must be absolute, got {}",
                self.fs_root.display()
            ));
        }
        if let Some(platform) = &self.platform {
            if platform.trim().is_empty() {
                return Err("Platform cannot be blank".to_string());
            }
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Store(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Store(msg) => write!(f, "Store: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FStateConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.store.validate() {
            errors.push(ValidationError::Store(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
