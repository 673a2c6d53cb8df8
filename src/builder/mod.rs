//! Builder collaborator
//!
//! The normaliser delegates the actual construction of derivation outputs to a
//! `Builder`. A build is a synchronous call that either produces content at
//! every declared output path or reports why it did not; the normaliser never
//! memoizes a failed build.

pub mod process;

pub use process::ProcessBuilder;

use crate::error::BuildError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything a builder needs to run one derivation
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    /// Platform the derivation requires, e.g. `x86_64-linux`
    pub platform: &'a str,
    /// Builder program, as named in the derivation
    pub builder: &'a str,
    /// Host directory under which the input closure has been realised
    pub input_root: &'a Path,
    /// Host paths the builder must create, in declared order
    pub outputs: &'a [PathBuf],
    pub env: &'a BTreeMap<String, String>,
}

pub trait Builder: Send + Sync {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError>;
}

impl<F> Builder for F
where
    F: Fn(&BuildRequest<'_>) -> Result<(), BuildError> + Send + Sync,
{
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        self(request)
    }
}

/// Platform string of the running host, `{arch}-{os}`.
pub fn host_platform() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}
