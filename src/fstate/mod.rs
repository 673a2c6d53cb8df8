//! FState expressions
//!
//! A typed view over terms. Every stored term decodes into exactly one
//! variant:
//!
//! - `Path(path, content, refs)`: a concrete file object and the objects it
//!   points to
//! - `Derive(platform, builder, inputs, outputs, env)`: a pending build
//! - `Slice(roots, elems)`: a normal form, as produced by normalisation
//! - anything else is `Opaque` and only kept for printing and hashing
//!
//! A term whose head names a known variant but whose arguments have the wrong
//! shape is a `BadTerm`, never `Opaque`.

pub mod content;
pub mod slice;

pub use content::Content;
pub use slice::{Slice, SliceElem};

use crate::error::FStateError;
use crate::paths::normalize_store_path;
use crate::term::{bad_term, Term};
use crate::types::FSId;
use std::collections::{BTreeMap, HashSet};

/// A pending build step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    pub platform: String,
    pub builder: String,
    pub inputs: Vec<FSId>,
    pub outputs: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// File-system-state expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FState {
    Path {
        path: String,
        content: Content,
        refs: Vec<FSId>,
    },
    Derive(Derivation),
    Slice(Slice),
    Opaque(Term),
}

impl FState {
    pub fn to_term(&self) -> Term {
        match self {
            FState::Path {
                path,
                content,
                refs,
            } => Term::app(
                "Path",
                vec![Term::Str(path.clone()), content.to_term(), Term::id_list(refs)],
            ),
            FState::Derive(drv) => Term::app(
                "Derive",
                vec![
                    Term::Str(drv.platform.clone()),
                    Term::Str(drv.builder.clone()),
                    Term::id_list(&drv.inputs),
                    Term::List(drv.outputs.iter().cloned().map(Term::Str).collect()),
                    Term::List(
                        drv.env
                            .iter()
                            .map(|(k, v)| Term::Tuple(vec![Term::Str(k.clone()), Term::Str(v.clone())]))
                            .collect(),
                    ),
                ],
            ),
            FState::Slice(slice) => slice.to_term(),
            FState::Opaque(t) => t.clone(),
        }
    }

    pub fn from_term(t: &Term) -> Result<Self, FStateError> {
        match t.head() {
            Some("Path") => {
                let args = t
                    .as_app("Path", 3)
                    .ok_or_else(|| bad_term("Path expects (path, content, refs)", t))?;
                Ok(FState::Path {
                    path: store_path(&args[0], t)?,
                    content: Content::from_term(&args[1])?,
                    refs: id_list(&args[2], t)?,
                })
            }
            Some("Derive") => {
                let args = t.as_app("Derive", 5).ok_or_else(|| {
                    bad_term("Derive expects (platform, builder, inputs, outputs, env)", t)
                })?;
                let outputs = args[3]
                    .as_list()
                    .ok_or_else(|| bad_term("Derive outputs must be a list", t))?
                    .iter()
                    .map(|o| store_path(o, t))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut seen = HashSet::new();
                if !outputs.iter().all(|o| seen.insert(o.as_str())) {
                    return Err(bad_term("Derive declares the same output twice", t));
                }
                Ok(FState::Derive(Derivation {
                    platform: string(&args[0], "platform", t)?,
                    builder: string(&args[1], "builder", t)?,
                    inputs: id_list(&args[2], t)?,
                    outputs,
                    env: env_map(&args[4], t)?,
                }))
            }
            Some("Slice") => {
                let args = t
                    .as_app("Slice", 2)
                    .ok_or_else(|| bad_term("Slice expects (roots, elems)", t))?;
                let roots = id_list(&args[0], t)?;
                let elems = args[1]
                    .as_list()
                    .ok_or_else(|| bad_term("Slice elements must be a list", t))?
                    .iter()
                    .map(|e| slice_elem(e, t))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FState::Slice(Slice { roots, elems }))
            }
            _ => Ok(FState::Opaque(t.clone())),
        }
    }
}

fn string(t: &Term, what: &str, whole: &Term) -> Result<String, FStateError> {
    t.as_str()
        .map(str::to_string)
        .ok_or_else(|| bad_term(format!("{} must be a string", what), whole))
}

/// A path argument, which must already be in canonical form.
fn store_path(t: &Term, whole: &Term) -> Result<String, FStateError> {
    let path = string(t, "path", whole)?;
    match normalize_store_path(&path) {
        Ok(normalized) if normalized == path => Ok(path),
        _ => Err(bad_term(format!("path {:?} is not canonical", path), whole)),
    }
}

fn id(t: &Term, whole: &Term) -> Result<FSId, FStateError> {
    t.as_str()
        .and_then(FSId::from_hex)
        .ok_or_else(|| bad_term("expected a 64-character hex identity", whole))
}

fn id_list(t: &Term, whole: &Term) -> Result<Vec<FSId>, FStateError> {
    t.as_list()
        .ok_or_else(|| bad_term("expected a list of identities", whole))?
        .iter()
        .map(|i| id(i, whole))
        .collect()
}

/// Variables the builder sets itself from the declared outputs.
pub const RESERVED_ENV: [&str; 2] = ["out", "outputs"];

fn env_map(t: &Term, whole: &Term) -> Result<BTreeMap<String, String>, FStateError> {
    let mut env = BTreeMap::new();
    for binding in t
        .as_list()
        .ok_or_else(|| bad_term("Derive env must be a list", whole))?
    {
        match binding.as_tuple() {
            Some([Term::Str(k), Term::Str(v)]) => {
                if RESERVED_ENV.contains(&k.as_str()) {
                    return Err(bad_term(
                        format!("env binding {:?} is set by the builder", k),
                        whole,
                    ));
                }
                if env.insert(k.clone(), v.clone()).is_some() {
                    return Err(bad_term(format!("duplicate env binding {:?}", k), whole));
                }
            }
            _ => return Err(bad_term("env bindings must be (string, string)", binding)),
        }
    }
    Ok(env)
}

fn slice_elem(t: &Term, whole: &Term) -> Result<SliceElem, FStateError> {
    match t.as_tuple() {
        Some([path, elem_id, refs]) => Ok(SliceElem {
            path: store_path(path, whole)?,
            id: id(elem_id, whole)?,
            refs: id_list(refs, whole)?,
        }),
        _ => Err(bad_term("slice elements must be (path, id, refs)", t)),
    }
}
