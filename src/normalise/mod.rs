//! Normaliser
//!
//! Reduces an fstate expression to its normal form, a `Slice`. `Path` nodes
//! are already normal and only pull in the closure of their references;
//! `Derive` nodes have their inputs normalised and realised, their builder
//! run, and their outputs written back to the store as new `Path` terms.
//!
//! Reduction runs on an explicit work stack, so graph depth is bounded by
//! memory rather than by the native stack. Each call resolves an expression
//! at most once, remembers only its root ids, and collects every element in
//! one shared table that is canonicalised once at the end.
//!
//! Successful derivations are memoized in the successor cache: a
//! single-output derivation maps to its output's `Path` id, any other to a
//! `Slice` term written with the `-slice` suffix. Nothing is memoized on a
//! failing path, so a retry always does real work.

mod merge;

use merge::SliceMerger;

use crate::builder::{BuildRequest, Builder};
use crate::concurrency::IdLockManager;
use crate::error::{BuildError, FStateError};
use crate::fstate::{Content, Derivation, FState, Slice, SliceElem};
use crate::paths::{paths_overlap, resolve_under_root};
use crate::realise::SliceRealiser;
use crate::store::TermStore;
use crate::successor::SuccessorCache;
use crate::term::{bad_term, Term};
use crate::types::FSId;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace, warn};

/// Suffix of the store alias given to multi-output successor terms.
pub const SLICE_SUFFIX: &str = "-slice";

/// Where a pending expression is in its reduction
enum Step {
    /// Consult the successor cache, then decode.
    Start,
    /// Waiting for a successor `Path` target to resolve.
    Successor { target: FSId },
    /// Decode the stored term, ignoring the successor cache.
    Decode,
    /// Waiting for the references of a file object, `next` onwards.
    Refs {
        term: Term,
        path: String,
        refs: Vec<FSId>,
        next: usize,
    },
    /// Waiting for the inputs of a derivation, `next` onwards.
    Inputs { drv: Derivation, next: usize },
}

struct Task {
    id: FSId,
    step: Step,
}

enum Poll {
    /// Put the task back and resolve the given id first.
    Descend(Task, FSId),
    /// The task is resolved to these roots.
    Done(Vec<FSId>),
}

enum Successor {
    Hit(Vec<FSId>),
    /// A `Path` target that still has to be resolved.
    Follow(FSId),
    /// A registered target that no longer resolves.
    Stale(FSId),
    Miss,
}

/// Per-call resolution state
///
/// `path` lists the ids being resolved, outermost first, including the task
/// currently being advanced; ids on it are also in `resolving`. `roots`
/// holds the result of every id resolved so far and `table` every element
/// those results mention. `realised` tracks elements already on disk.
#[derive(Default)]
struct Resolution {
    tasks: Vec<Task>,
    path: Vec<FSId>,
    resolving: HashSet<FSId>,
    roots: HashMap<FSId, Vec<FSId>>,
    table: SliceMerger,
    realised: HashSet<FSId>,
}

impl Resolution {
    /// Schedule `id` unless it is already resolved.
    fn enter(&mut self, id: FSId) -> Result<(), FStateError> {
        if self.roots.contains_key(&id) {
            return Ok(());
        }
        if self.resolving.contains(&id) {
            let mut path = self.path.clone();
            path.push(id);
            return Err(FStateError::CycleDetected { id, path });
        }
        self.resolving.insert(id);
        self.path.push(id);
        self.tasks.push(Task {
            id,
            step: Step::Start,
        });
        Ok(())
    }

    fn finish(&mut self, id: FSId, roots: Vec<FSId>) {
        self.leave(&id);
        self.roots.insert(id, roots);
    }

    fn leave(&mut self, id: &FSId) {
        self.resolving.remove(id);
        if self.path.last() == Some(id) {
            self.path.pop();
        }
    }

    fn roots_of(&self, id: &FSId) -> Result<Vec<FSId>, FStateError> {
        self.roots.get(id).cloned().ok_or(FStateError::NotFound(*id))
    }
}

pub struct Normaliser<'a> {
    store: &'a TermStore,
    successors: &'a dyn SuccessorCache,
    builder: &'a dyn Builder,
    locks: &'a IdLockManager,
    fs_root: &'a Path,
}

impl<'a> Normaliser<'a> {
    pub fn new(
        store: &'a TermStore,
        successors: &'a dyn SuccessorCache,
        builder: &'a dyn Builder,
        locks: &'a IdLockManager,
        fs_root: &'a Path,
    ) -> Self {
        Self {
            store,
            successors,
            builder,
            locks,
            fs_root,
        }
    }

    pub fn store(&self) -> &'a TermStore {
        self.store
    }

    /// Normalise an fstate expression, returning an equivalent canonical
    /// `Slice`.
    #[instrument(skip_all, fields(id = %id))]
    pub fn normalise_fstate(&self, id: &FSId) -> Result<Slice, FStateError> {
        let mut res = Resolution::default();
        let roots = self.resolve(id, &mut res)?;
        Ok(res.table.closure(roots))
    }

    /// Run the work stack until `id` is resolved. Tasks already on the
    /// stack when this is called are left alone.
    fn resolve(&self, id: &FSId, res: &mut Resolution) -> Result<Vec<FSId>, FStateError> {
        let base = res.tasks.len();
        res.enter(*id)?;

        while res.tasks.len() > base {
            let Some(task) = res.tasks.pop() else {
                break;
            };
            let current = task.id;
            let outcome = match self.advance(task, res) {
                Ok(Poll::Descend(task, child)) => {
                    res.tasks.push(task);
                    res.enter(child)
                }
                Ok(Poll::Done(roots)) => {
                    res.finish(current, roots);
                    Ok(())
                }
                Err(e) => {
                    res.leave(&current);
                    Err(e)
                }
            };
            if let Err(e) = outcome {
                self.unwind(e, base, res)?;
            }
        }

        res.roots_of(id)
    }

    /// Drop tasks after a failure until one can recover from it. A successor
    /// whose closure has gone missing is recoverable: its source is decoded
    /// and reduced afresh.
    fn unwind(&self, err: FStateError, base: usize, res: &mut Resolution) -> Result<(), FStateError> {
        while res.tasks.len() > base {
            let Some(task) = res.tasks.pop() else {
                break;
            };
            if let (Step::Successor { target }, FStateError::NotFound(missing)) = (&task.step, &err)
            {
                warn!(id = %task.id, successor = %target, missing = %missing, "Successor closure is incomplete; recomputing");
                res.tasks.push(Task {
                    id: task.id,
                    step: Step::Decode,
                });
                return Ok(());
            }
            res.leave(&task.id);
        }
        Err(err)
    }

    fn advance(&self, task: Task, res: &mut Resolution) -> Result<Poll, FStateError> {
        let Task { id, step } = task;
        match step {
            Step::Start => match self.successor(&id, res)? {
                Successor::Hit(roots) => Ok(Poll::Done(roots)),
                Successor::Follow(target) => Ok(Poll::Descend(
                    Task {
                        id,
                        step: Step::Successor { target },
                    },
                    target,
                )),
                Successor::Stale(_) | Successor::Miss => self.decode(id, res),
            },
            Step::Successor { target } => {
                debug!(id = %id, successor = %target, "Successor hit");
                Ok(Poll::Done(res.roots_of(&target)?))
            }
            Step::Decode => self.decode(id, res),
            Step::Refs {
                term,
                path,
                refs,
                mut next,
            } => {
                while next < refs.len() {
                    let r = refs[next];
                    match res.roots.get(&r) {
                        None => {
                            return Ok(Poll::Descend(
                                Task {
                                    id,
                                    step: Step::Refs {
                                        term,
                                        path,
                                        refs,
                                        next,
                                    },
                                },
                                r,
                            ))
                        }
                        Some(roots) if roots.as_slice() != [r] => {
                            return Err(bad_term(
                                format!("reference {} is not a normalised file object", r),
                                &term,
                            ))
                        }
                        Some(_) => next += 1,
                    }
                }
                res.table.add(SliceElem { path, id, refs })?;
                Ok(Poll::Done(vec![id]))
            }
            Step::Inputs { drv, mut next } => {
                while let Some(input) = drv.inputs.get(next).copied() {
                    if !res.roots.contains_key(&input) {
                        return Ok(Poll::Descend(
                            Task {
                                id,
                                step: Step::Inputs { drv, next },
                            },
                            input,
                        ));
                    }
                    next += 1;
                }
                Ok(Poll::Done(self.build(&id, &drv, res)?))
            }
        }
    }

    fn decode(&self, id: FSId, res: &mut Resolution) -> Result<Poll, FStateError> {
        let term = self.store.term_from_id(&id)?;
        match FState::from_term(&term)? {
            FState::Path { path, refs, .. } => {
                // Every file implicitly references itself; listing it is an error.
                if refs.contains(&id) {
                    return Err(bad_term(
                        "file object lists its own identity among its references",
                        &term,
                    ));
                }
                let step = Step::Refs {
                    term,
                    path,
                    refs,
                    next: 0,
                };
                self.advance(Task { id, step }, res)
            }
            FState::Derive(drv) => {
                let step = Step::Inputs { drv, next: 0 };
                self.advance(Task { id, step }, res)
            }
            FState::Slice(slice) => {
                slice.check_closed()?;
                res.table.merge(&slice)?;
                Ok(Poll::Done(slice.roots))
            }
            FState::Opaque(t) => Err(bad_term("not an fstate expression", &t)),
        }
    }

    /// Consult the successor cache. Entries whose target has gone missing
    /// from the store, or does not decode to a normal form, are stale.
    fn successor(&self, id: &FSId, res: &mut Resolution) -> Result<Successor, FStateError> {
        let Some(target) = self.successors.lookup(id)? else {
            trace!(id = %id, "No successor");
            return Ok(Successor::Miss);
        };
        if target == *id {
            return Ok(Successor::Miss);
        }
        if let Some(roots) = res.roots.get(&target) {
            debug!(id = %id, successor = %target, "Successor hit");
            return Ok(Successor::Hit(roots.clone()));
        }

        match self.store.fstate_from_id(&target) {
            Ok(FState::Slice(slice)) => {
                if slice.check_closed().is_err()
                    || !slice.elems.iter().all(|e| self.store.contains(&e.id))
                {
                    warn!(id = %id, successor = %target, "Successor slice is incomplete; recomputing");
                    return Ok(Successor::Stale(target));
                }
                res.table.merge(&slice)?;
                debug!(id = %id, successor = %target, "Successor hit");
                Ok(Successor::Hit(slice.roots))
            }
            Ok(FState::Path { .. }) => Ok(Successor::Follow(target)),
            Ok(_) => {
                warn!(id = %id, successor = %target, "Successor is not a normal form; recomputing");
                Ok(Successor::Stale(target))
            }
            Err(FStateError::NotFound(_)) => {
                warn!(id = %id, successor = %target, "Successor target no longer stored; recomputing");
                Ok(Successor::Stale(target))
            }
            Err(e) => Err(e),
        }
    }

    /// Outputs must name a proper path that neither contains nor lies inside
    /// another output or any element of the input closure.
    fn check_outputs(
        &self,
        drv: &Derivation,
        input_roots: &[FSId],
        res: &Resolution,
    ) -> Result<(), FStateError> {
        let refuse = |message: String| bad_term(message, &FState::Derive(drv.clone()).to_term());
        let mut inputs: Option<HashSet<FSId>> = None;

        for (i, output) in drv.outputs.iter().enumerate() {
            if output == "/" {
                return Err(refuse(format!("output {} is the filesystem root", output)));
            }
            if let Some(other) = drv.outputs[..i]
                .iter()
                .find(|o| paths_overlap(o.as_str(), output))
            {
                return Err(refuse(format!("outputs {} and {} overlap", other, output)));
            }

            let overlapping = res.table.overlapping(output);
            if overlapping.is_empty() {
                continue;
            }
            let inputs = inputs.get_or_insert_with(|| res.table.reachable(input_roots));
            if let Some(elem) = overlapping.into_iter().find(|e| inputs.contains(&e.id)) {
                return Err(refuse(format!(
                    "output {} overlaps input path {}",
                    output, elem.path
                )));
            }
        }
        Ok(())
    }

    fn build(
        &self,
        id: &FSId,
        drv: &Derivation,
        res: &mut Resolution,
    ) -> Result<Vec<FSId>, FStateError> {
        let lock = self.locks.get_lock(id);
        let guard = lock.lock();

        // Another thread may have finished this build while we waited.
        let stale = match self.successor(id, res)? {
            Successor::Hit(roots) => return Ok(roots),
            Successor::Follow(target) => match self.resolve(&target, res) {
                Ok(roots) => {
                    debug!(id = %id, successor = %target, "Successor hit");
                    return Ok(roots);
                }
                Err(FStateError::NotFound(missing)) => {
                    warn!(id = %id, successor = %target, missing = %missing, "Successor closure is incomplete; recomputing");
                    Some(target)
                }
                Err(e) => return Err(e),
            },
            Successor::Stale(target) => Some(target),
            Successor::Miss => None,
        };

        let mut input_roots: Vec<FSId> = Vec::new();
        for input in &drv.inputs {
            for root in res.roots_of(input)? {
                if !input_roots.contains(&root) {
                    input_roots.push(root);
                }
            }
        }
        self.check_outputs(drv, &input_roots, res)?;

        let pending = res.table.pending(&input_roots, &res.realised);
        let realised: Vec<FSId> = pending.iter().map(|e| e.id).collect();
        SliceRealiser::new(self.store, self.fs_root).realise_slice(&Slice {
            roots: Vec::new(),
            elems: pending,
        })?;
        res.realised.extend(realised);

        let host_outputs = drv
            .outputs
            .iter()
            .map(|o| resolve_under_root(self.fs_root, o))
            .collect::<Result<Vec<PathBuf>, _>>()?;
        for previous in host_outputs.iter().filter(|p| fs::symlink_metadata(p).is_ok()) {
            debug!(path = %previous.display(), "Removing stale output");
            remove_output(previous)?;
        }

        info!(
            id = %id,
            builder = %drv.builder,
            inputs = input_roots.len(),
            outputs = drv.outputs.len(),
            "Building derivation"
        );
        let request = BuildRequest {
            platform: &drv.platform,
            builder: &drv.builder,
            input_root: self.fs_root,
            outputs: &host_outputs,
            env: &drv.env,
        };
        self.builder
            .build(&request)
            .map_err(|source| FStateError::BuildFailed { id: *id, source })?;

        let mut output_ids = Vec::with_capacity(drv.outputs.len());
        for (output, host) in drv.outputs.iter().zip(&host_outputs) {
            if fs::symlink_metadata(host).is_err() {
                return Err(FStateError::BuildFailed {
                    id: *id,
                    source: BuildError::MissingOutput(output.clone()),
                });
            }
            let content = Content::read_from(host).map_err(|source| FStateError::BuildFailed {
                id: *id,
                source: BuildError::Capture {
                    output: output.clone(),
                    source,
                },
            })?;
            let output_id = self.store.write_fstate(
                &FState::Path {
                    path: output.clone(),
                    content,
                    refs: input_roots.clone(),
                },
                "",
            )?;
            res.table.add(SliceElem {
                path: output.clone(),
                id: output_id,
                refs: input_roots.clone(),
            })?;
            res.realised.insert(output_id);
            output_ids.push(output_id);
        }

        let representative = match output_ids.as_slice() {
            [single] => *single,
            _ => self.store.write_fstate(
                &FState::Slice(res.table.closure(output_ids.clone())),
                SLICE_SUFFIX,
            )?,
        };
        match stale {
            Some(previous) => self.successors.replace(id, &previous, &representative)?,
            None => self.successors.register(id, &representative)?,
        }
        info!(id = %id, successor = %representative, "Registered successor");

        drop(guard);
        drop(lock);
        self.locks.prune();

        Ok(output_ids)
    }
}

fn remove_output(path: &Path) -> Result<(), FStateError> {
    let result = if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(FStateError::from)
}
