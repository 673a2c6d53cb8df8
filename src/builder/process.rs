//! Builder that runs the derivation's builder program as a child process

use super::{host_platform, BuildRequest, Builder};
use crate::error::BuildError;
use crate::paths::resolve_under_root;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

const STDERR_TAIL_BYTES: usize = 4096;

/// Runs the builder program with a cleared environment
///
/// The child sees exactly the derivation's `env`, plus `out` (the first
/// declared output) and `outputs` (all outputs, space separated). Decoding
/// refuses derivations that bind either name themselves. `PATH` is
/// set to a non-existent directory unless the derivation provides one, so a
/// build cannot silently pick up host tools. The working directory is the
/// realisation root.
pub struct ProcessBuilder {
    platform: String,
}

impl ProcessBuilder {
    pub fn new() -> Self {
        Self {
            platform: host_platform(),
        }
    }

    /// Accept derivations for `platform` instead of the detected host platform.
    pub fn with_platform<S: Into<String>>(platform: S) -> Self {
        Self {
            platform: platform.into(),
        }
    }

    /// A builder naming a realised file runs that file; anything else is
    /// taken as a host program.
    fn program(request: &BuildRequest<'_>) -> PathBuf {
        if request.builder.starts_with('/') {
            if let Ok(realised) = resolve_under_root(request.input_root, request.builder) {
                if realised.is_file() {
                    return realised;
                }
            }
        }
        PathBuf::from(request.builder)
    }
}

impl Default for ProcessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder for ProcessBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        if request.platform != self.platform {
            return Err(BuildError::PlatformMismatch {
                required: request.platform.to_string(),
                host: self.platform.clone(),
            });
        }

        let program = Self::program(request);
        let mut command = Command::new(&program);
        command
            .env_clear()
            .env("PATH", "/path-not-set")
            .envs(request.env)
            .current_dir(request.input_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if let Some(first) = request.outputs.first() {
            command.env("out", first);
        }
        let outputs: Vec<String> = request
            .outputs
            .iter()
            .map(|o| o.to_string_lossy().into_owned())
            .collect();
        command.env("outputs", outputs.join(" "));

        info!(builder = %program.display(), platform = request.platform, "Running builder");
        let output = command.output().map_err(|source| BuildError::Spawn {
            builder: program.display().to_string(),
            source,
        })?;

        if output.status.success() {
            debug!(builder = %program.display(), "Builder finished");
            return Ok(());
        }

        let stderr = &output.stderr;
        let tail = &stderr[stderr.len().saturating_sub(STDERR_TAIL_BYTES)..];
        Err(BuildError::Exited {
            status: output.status.code(),
            message: String::from_utf8_lossy(tail).trim().to_string(),
        })
    }
}
