//! Deduplicating merge of slice elements

use crate::error::FStateError;
use crate::fstate::{Slice, SliceElem};
use crate::paths::is_ancestor_path;
use crate::term::{bad_term, Term};
use crate::types::FSId;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Accumulates elements from several slices, keeping one element per id
///
/// Two elements reporting the same id must be identical, and two different
/// ids may not claim the same path; either disagreement means the graph is
/// inconsistent. One merger serves a whole normalisation call, so every
/// element is stored once however many expressions reach it.
#[derive(Debug, Default)]
pub(crate) struct SliceMerger {
    elems: Vec<SliceElem>,
    by_id: HashMap<FSId, usize>,
    by_path: BTreeMap<String, FSId>,
}

impl SliceMerger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, elem: SliceElem) -> Result<(), FStateError> {
        if let Some(&i) = self.by_id.get(&elem.id) {
            let existing = &self.elems[i];
            if *existing != elem {
                return Err(bad_term(
                    "inconsistent slice elements for one identity",
                    &Term::List(vec![existing.to_term(), elem.to_term()]),
                ));
            }
            return Ok(());
        }

        if let Some(other) = self.by_path.get(&elem.path) {
            if let Some(&i) = self.by_id.get(other) {
                return Err(bad_term(
                    "two file objects claim the same path",
                    &Term::List(vec![self.elems[i].to_term(), elem.to_term()]),
                ));
            }
        }

        self.by_id.insert(elem.id, self.elems.len());
        self.by_path.insert(elem.path.clone(), elem.id);
        self.elems.push(elem);
        Ok(())
    }

    pub(crate) fn merge(&mut self, slice: &Slice) -> Result<(), FStateError> {
        for elem in &slice.elems {
            self.add(elem.clone())?;
        }
        Ok(())
    }

    /// Elements whose path equals `path`, lies above it or lies below it.
    pub(crate) fn overlapping(&self, path: &str) -> Vec<&SliceElem> {
        let mut found = Vec::new();

        let mut push = |id: &FSId| {
            if let Some(&i) = self.by_id.get(id) {
                found.push(&self.elems[i]);
            }
        };

        if let Some(id) = self.by_path.get("/") {
            push(id);
        }
        for (i, _) in path.match_indices('/').skip(1) {
            if let Some(id) = self.by_path.get(&path[..i]) {
                push(id);
            }
        }
        if path != "/" {
            if let Some(id) = self.by_path.get(path) {
                push(id);
            }
        }

        let below = self
            .by_path
            .range::<str, _>((std::ops::Bound::Excluded(path), std::ops::Bound::Unbounded))
            .take_while(|(p, _)| p.starts_with(path))
            .filter(|(p, _)| is_ancestor_path(path, p));
        for (_, id) in below {
            push(id);
        }

        found
    }

    /// Ids reachable from `roots`, the roots included.
    pub(crate) fn reachable(&self, roots: &[FSId]) -> HashSet<FSId> {
        self.walk(roots, &HashSet::new())
            .into_iter()
            .map(|i| self.elems[i].id)
            .collect()
    }

    /// Elements reachable from `roots` without passing through `done`.
    pub(crate) fn pending(&self, roots: &[FSId], done: &HashSet<FSId>) -> Vec<SliceElem> {
        self.walk(roots, done)
            .into_iter()
            .map(|i| self.elems[i].clone())
            .collect()
    }

    /// The closure of `roots` as a canonical slice.
    pub(crate) fn closure(&self, roots: Vec<FSId>) -> Slice {
        let elems = self.pending(&roots, &HashSet::new());
        Slice { roots, elems }.canonicalize()
    }

    fn walk(&self, roots: &[FSId], done: &HashSet<FSId>) -> Vec<usize> {
        let mut seen: HashSet<FSId> = HashSet::new();
        let mut found = Vec::new();
        let mut stack: Vec<FSId> = roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            if done.contains(&id) || !seen.insert(id) {
                continue;
            }
            let Some(&i) = self.by_id.get(&id) else {
                continue;
            };
            found.push(i);
            stack.extend(self.elems[i].refs.iter().rev().copied());
        }

        found
    }
}
