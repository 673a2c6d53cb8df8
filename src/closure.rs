//! Closure queries over normalised expressions
//!
//! `fstate_paths` answers "which paths does this expression produce" and
//! `fstate_refs` answers "which paths must exist for those to be usable".

use crate::error::FStateError;
use crate::fstate::FState;
use crate::normalise::Normaliser;
use crate::term::bad_term;
use crate::types::FSId;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Paths an expression designates.
///
/// With `normalise`, these are the root paths of the normal form in root
/// order. Without, the expression is only inspected: a `Path` gives its own
/// path, a `Derive` its declared outputs and a `Slice` its root paths. No
/// build is ever started in that mode.
pub fn fstate_paths(
    normaliser: &Normaliser<'_>,
    id: &FSId,
    normalise: bool,
) -> Result<Vec<String>, FStateError> {
    if normalise {
        return normaliser.normalise_fstate(id)?.root_paths();
    }

    match normaliser.store().fstate_from_id(id)? {
        FState::Path { path, .. } => Ok(vec![path]),
        FState::Derive(drv) => Ok(drv.outputs),
        FState::Slice(slice) => slice.root_paths(),
        FState::Opaque(t) => Err(bad_term("not an fstate expression", &t)),
    }
}

/// Every path reachable from the roots of the expression's normal form,
/// the roots included.
pub fn fstate_refs(normaliser: &Normaliser<'_>, id: &FSId) -> Result<BTreeSet<String>, FStateError> {
    let slice = normaliser.normalise_fstate(id)?;
    let by_id: HashMap<FSId, usize> = slice
        .elems
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id, i))
        .collect();

    let mut paths = BTreeSet::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<(FSId, FSId)> = slice.roots.iter().rev().map(|r| (*r, *id)).collect();

    while let Some((current, referrer)) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        let elem = by_id
            .get(&current)
            .map(|&i| &slice.elems[i])
            .ok_or(FStateError::MissingReference {
                id: current,
                referrer,
            })?;
        paths.insert(elem.path.clone());
        for r in elem.refs.iter().rev() {
            if !visited.contains(r) {
                stack.push((*r, current));
            }
        }
    }

    Ok(paths)
}
