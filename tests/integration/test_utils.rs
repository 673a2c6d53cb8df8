//! Shared test utilities for integration tests
//!
//! `TestStore` owns an isolated store layout in a temp directory, an
//! in-memory successor cache and a `ScriptedBuilder` whose calls are
//! counted, so tests can assert on exactly when builds happen.

use fstate::builder::{BuildRequest, Builder};
use fstate::config::StoreConfig;
use fstate::successor::MemorySuccessorCache;
use fstate::{BuildError, Content, Derivation, FSId, FState, FStateEngine};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Builder driven by the derivation's environment
///
/// - `content`: text written to the output (defaults to the builder name);
///   with several outputs, output `i` gets `{content}#{i}`
/// - `needs`: space separated logical paths that must be realised
/// - `sleep_ms`: delay before writing outputs
pub struct ScriptedBuilder {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Builder for ScriptedBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BuildError::Exited {
                status: Some(1),
                message: "scripted failure".to_string(),
            });
        }

        if let Some(needed) = request.env.get("needs") {
            for logical in needed.split_whitespace() {
                let host = request.input_root.join(logical.trim_start_matches('/'));
                if !host.exists() {
                    return Err(BuildError::Other(format!("input {} not realised", logical)));
                }
            }
        }

        if let Some(ms) = request.env.get("sleep_ms").and_then(|v| v.parse().ok()) {
            std::thread::sleep(Duration::from_millis(ms));
        }

        let content = request
            .env
            .get("content")
            .cloned()
            .unwrap_or_else(|| request.builder.to_string());
        for (i, out) in request.outputs.iter().enumerate() {
            let text = if request.outputs.len() == 1 {
                content.clone()
            } else {
                format!("{}#{}", content, i)
            };
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent).map_err(|e| BuildError::Other(e.to_string()))?;
            }
            fs::write(out, text).map_err(|e| BuildError::Other(e.to_string()))?;
        }
        Ok(())
    }
}

pub struct TestStore {
    _temp: TempDir,
    pub config: StoreConfig,
    pub engine: FStateEngine,
    pub cache: Arc<MemorySuccessorCache>,
    pub builder: Arc<ScriptedBuilder>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_verify(true)
    }

    pub fn with_verify(verify_on_read: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = StoreConfig::under(temp.path());
        config.verify_on_read = verify_on_read;
        let cache = Arc::new(MemorySuccessorCache::new());
        let builder = Arc::new(ScriptedBuilder::new());
        let engine = FStateEngine::with_parts(&config, cache.clone(), builder.clone()).unwrap();
        Self {
            _temp: temp,
            config,
            engine,
            cache,
            builder,
        }
    }

    /// Store a regular file object.
    pub fn file(&self, path: &str, content: &str, refs: Vec<FSId>) -> FSId {
        self.engine
            .write_term(
                &FState::Path {
                    path: path.to_string(),
                    content: Content::regular(content),
                    refs,
                }
                .to_term(),
                "",
            )
            .unwrap()
    }

    /// Store a derivation run by the scripted builder.
    pub fn derive(&self, inputs: Vec<FSId>, outputs: &[&str], env: &[(&str, &str)]) -> FSId {
        let env: BTreeMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.engine
            .write_term(
                &FState::Derive(Derivation {
                    platform: "test".to_string(),
                    builder: "scripted".to_string(),
                    inputs,
                    outputs: outputs.iter().map(|o| o.to_string()).collect(),
                    env,
                })
                .to_term(),
                "",
            )
            .unwrap()
    }

    /// Host location of a logical path.
    pub fn host_path(&self, logical: &str) -> PathBuf {
        self.engine.fs_root().join(logical.trim_start_matches('/'))
    }

    /// Plant raw text under an identity it does not hash to.
    pub fn plant(&self, id: FSId, text: &str) {
        let path = self.engine.store().object_path(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }
}
