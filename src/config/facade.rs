//! ConfigLoader facade: compose sources, deserialize and validate.

use super::merge::merge_policy;
use super::sources::{environment, global_file};
use super::FStateConfig;
use crate::error::FStateError;
use config::File;
use std::path::Path;
use tracing::debug;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the standard sources plus an optional
    /// explicit file.
    ///
    /// Precedence: defaults (lowest) -> global file -> explicit file ->
    /// environment (highest).
    pub fn load(explicit: Option<&Path>) -> Result<FStateConfig, FStateError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = match explicit {
            Some(path) => {
                debug!(config_path = %path.display(), "Loading explicit configuration file");
                builder.add_source(File::from(path).required(true))
            }
            None => builder,
        };
        let builder = environment::add_to_builder(builder)?;

        let config: FStateConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            FStateError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(config)
    }

    /// Create default configuration.
    pub fn default() -> FStateConfig {
        FStateConfig::default()
    }
}
