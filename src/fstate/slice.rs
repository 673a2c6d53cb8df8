//! Slices: flattened, deduplicated closures of file objects

use crate::error::FStateError;
use crate::term::{bad_term, Term};
use crate::types::FSId;
use std::collections::{HashMap, HashSet};

/// One concrete file object within a slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceElem {
    pub path: String,
    pub id: FSId,
    pub refs: Vec<FSId>,
}

impl SliceElem {
    pub fn to_term(&self) -> Term {
        Term::Tuple(vec![
            Term::Str(self.path.clone()),
            Term::Str(self.id.to_hex()),
            Term::id_list(&self.refs),
        ])
    }
}

/// The normal form of an fstate expression
///
/// Invariants: no id appears twice in `elems`; every root and every ref names
/// an element of the same slice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Slice {
    pub roots: Vec<FSId>,
    pub elems: Vec<SliceElem>,
}

impl Slice {
    pub fn elem(&self, id: &FSId) -> Option<&SliceElem> {
        self.elems.iter().find(|e| e.id == *id)
    }

    pub fn ids(&self) -> HashSet<FSId> {
        self.elems.iter().map(|e| e.id).collect()
    }

    /// Paths of the roots, in root order.
    pub fn root_paths(&self) -> Result<Vec<String>, FStateError> {
        let index: HashMap<FSId, &SliceElem> = self.elems.iter().map(|e| (e.id, e)).collect();
        self.roots
            .iter()
            .map(|root| {
                index
                    .get(root)
                    .map(|e| e.path.clone())
                    .ok_or_else(|| bad_term("slice root has no element", &self.to_term()))
            })
            .collect()
    }

    /// Check the slice invariants: unique ids, roots present, refs closed.
    pub fn check_closed(&self) -> Result<(), FStateError> {
        let mut ids = HashSet::with_capacity(self.elems.len());
        for elem in &self.elems {
            if !ids.insert(elem.id) {
                return Err(bad_term("duplicate slice element", &elem.to_term()));
            }
        }
        for root in &self.roots {
            if !ids.contains(root) {
                return Err(bad_term("slice root has no element", &self.to_term()));
            }
        }
        for elem in &self.elems {
            for r in &elem.refs {
                if !ids.contains(r) {
                    return Err(FStateError::MissingReference {
                        id: *r,
                        referrer: elem.id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Reorder elements dependency-first.
    ///
    /// Elements are emitted in depth-first post-order from the roots (roots in
    /// order, refs in order); elements unreachable from the roots follow in
    /// their previous order. Two slices with the same roots and refs therefore
    /// compare equal however they were assembled.
    pub fn canonicalize(self) -> Slice {
        let Slice { roots, elems } = self;
        let index: HashMap<FSId, usize> =
            elems.iter().enumerate().map(|(i, e)| (e.id, i)).collect();

        let mut order = Vec::with_capacity(elems.len());
        let mut visited = vec![false; elems.len()];
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in &roots {
            let Some(&start) = index.get(root) else {
                continue;
            };
            if visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push((start, 0));
            while let Some((current, next_ref)) = stack.pop() {
                let refs = &elems[current].refs;
                if next_ref < refs.len() {
                    stack.push((current, next_ref + 1));
                    if let Some(&child) = index.get(&refs[next_ref]) {
                        if !visited[child] {
                            visited[child] = true;
                            stack.push((child, 0));
                        }
                    }
                } else {
                    order.push(current);
                }
            }
        }
        for (i, seen) in visited.iter().enumerate() {
            if !seen {
                order.push(i);
            }
        }

        let mut slots: Vec<Option<SliceElem>> = elems.into_iter().map(Some).collect();
        let elems = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Slice { roots, elems }
    }

    pub fn to_term(&self) -> Term {
        Term::app(
            "Slice",
            vec![
                Term::id_list(&self.roots),
                Term::List(self.elems.iter().map(SliceElem::to_term).collect()),
            ],
        )
    }
}
