//! Engine API
//!
//! `FStateEngine` ties one store layout to its collaborators: the term
//! store, the successor cache, the builder and the per-identity lock table.
//! Pure term operations (`print_term`, `hash_term`, `bad_term`) need none of
//! that and are free functions at the crate root.

use crate::builder::{Builder, ProcessBuilder};
use crate::closure;
use crate::concurrency::IdLockManager;
use crate::config::StoreConfig;
use crate::error::FStateError;
use crate::fstate::Slice;
use crate::normalise::Normaliser;
use crate::paths::canonicalize_root;
use crate::realise::SliceRealiser;
use crate::store::TermStore;
use crate::successor::{SledSuccessorCache, SuccessorCache};
use crate::term::Term;
use crate::types::FSId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Store engine
///
/// Safe to share between threads: concurrent normalisations of the same
/// derivation serialize on that derivation's lock, unrelated ones proceed in
/// parallel.
pub struct FStateEngine {
    config: StoreConfig,
    store: TermStore,
    successors: Arc<dyn SuccessorCache>,
    builder: Arc<dyn Builder>,
    locks: IdLockManager,
    fs_root: PathBuf,
}

impl FStateEngine {
    /// Open the store described by `config` with the persistent successor
    /// table and a `ProcessBuilder`.
    pub fn open(config: &StoreConfig) -> Result<Self, FStateError> {
        config.validate().map_err(FStateError::ConfigError)?;

        let successors = Arc::new(SledSuccessorCache::new(config.successors_dir())?);
        let builder = match &config.platform {
            Some(platform) => ProcessBuilder::with_platform(platform.clone()),
            None => ProcessBuilder::new(),
        };
        Self::with_parts(config, successors, Arc::new(builder))
    }

    /// Open the store with caller-supplied collaborators.
    pub fn with_parts(
        config: &StoreConfig,
        successors: Arc<dyn SuccessorCache>,
        builder: Arc<dyn Builder>,
    ) -> Result<Self, FStateError> {
        let store = TermStore::new(&config.store_dir, config.verify_on_read)?;
        let fs_root = canonicalize_root(&config.fs_root)?;
        info!(
            store = %config.store_dir.display(),
            fs_root = %fs_root.display(),
            "Opened fstate store"
        );

        Ok(Self {
            config: config.clone(),
            store,
            successors,
            builder,
            locks: IdLockManager::new(),
            fs_root,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn store(&self) -> &TermStore {
        &self.store
    }

    pub fn successors(&self) -> &Arc<dyn SuccessorCache> {
        &self.successors
    }

    /// Canonical host directory logical paths resolve under
    pub fn fs_root(&self) -> &Path {
        &self.fs_root
    }

    fn normaliser(&self) -> Normaliser<'_> {
        Normaliser::new(
            &self.store,
            self.successors.as_ref(),
            self.builder.as_ref(),
            &self.locks,
            &self.fs_root,
        )
    }

    /// Load and parse the term stored under `id`.
    pub fn term_from_id(&self, id: &FSId) -> Result<Term, FStateError> {
        self.store.term_from_id(id)
    }

    /// Store `term`, returning its identity. Writing an existing term is a
    /// no-op that returns the same identity.
    ///
    /// # Arguments
    /// * `term` - The term to store
    /// * `suffix` - Extra alias name appended to the object's hex name; may be empty
    pub fn write_term(&self, term: &Term, suffix: &str) -> Result<FSId, FStateError> {
        Ok(self.store.write_term(term, suffix)?)
    }

    /// Record that `id1` normalises to `id2`.
    pub fn register_successor(&self, id1: &FSId, id2: &FSId) -> Result<(), FStateError> {
        debug!(id = %id1, successor = %id2, "Registering successor");
        Ok(self.successors.register(id1, id2)?)
    }

    /// Reduce the expression `id` to its normal form.
    pub fn normalise_fstate(&self, id: &FSId) -> Result<Slice, FStateError> {
        self.normaliser().normalise_fstate(id)
    }

    /// Materialise every element of `slice` below the filesystem root.
    pub fn realise_slice(&self, slice: &Slice) -> Result<(), FStateError> {
        SliceRealiser::new(&self.store, &self.fs_root).realise_slice(slice)
    }

    /// Paths `id` designates; see [`closure::fstate_paths`].
    pub fn fstate_paths(&self, id: &FSId, normalise: bool) -> Result<Vec<String>, FStateError> {
        closure::fstate_paths(&self.normaliser(), id, normalise)
    }

    /// Every path the normal form of `id` needs, its roots included.
    pub fn fstate_refs(&self, id: &FSId) -> Result<BTreeSet<String>, FStateError> {
        closure::fstate_refs(&self.normaliser(), id)
    }
}
