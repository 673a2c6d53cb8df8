//! Merge rules: defaults applied beneath every other source.

use crate::config::{default_fs_root, default_state_dir, default_store_dir};
use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("store.store_dir", default_store_dir().to_string_lossy().into_owned())?
        .set_default("store.state_dir", default_state_dir().to_string_lossy().into_owned())?
        .set_default("store.fs_root", default_fs_root().to_string_lossy().into_owned())?
        .set_default("store.verify_on_read", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
