//! Property-based tests for determinism guarantees

use fstate::fstate::Slice;
use fstate::{hash_term, parse_term, print_term, FSId, SliceElem, Term};
use proptest::prelude::*;

fn arb_term() -> impl Strategy<Value = Term> {
    let leaf = prop_oneof![
        any::<String>().prop_map(Term::Str),
        "[a-zA-Z_][a-zA-Z0-9_-]{0,8}".prop_map(|name| Term::app(name, vec![])),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Term::List),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Term::Tuple),
            (
                "[A-Z][a-zA-Z0-9_]{0,8}",
                prop::collection::vec(inner, 1..5)
            )
                .prop_map(|(name, args)| Term::app(name, args)),
        ]
    })
}

proptest! {
    /// Printing then parsing gives back the same term.
    #[test]
    fn test_print_parse_round_trip(term in arb_term()) {
        let text = print_term(&term);
        prop_assert_eq!(parse_term(&text).unwrap(), term);
    }

    /// Structurally equal terms hash equally, however they were built.
    #[test]
    fn test_hash_is_stable(term in arb_term()) {
        let reparsed = parse_term(&print_term(&term)).unwrap();
        prop_assert_eq!(hash_term(&term), hash_term(&reparsed));
        prop_assert_eq!(hash_term(&term), hash_term(&term.clone()));
    }

    /// Whitespace between tokens does not change the parsed term.
    #[test]
    fn test_whitespace_is_insignificant(items in prop::collection::vec(any::<String>(), 0..5)) {
        let printed: Vec<String> = items.iter().map(|s| print_term(&Term::string(s.as_str()))).collect();
        let spaced = format!("[ {} ]\n", printed.join(" ,\n\t"));
        let term = Term::List(items.into_iter().map(Term::Str).collect());
        prop_assert_eq!(parse_term(&spaced).unwrap(), term);
    }

    /// Canonical ordering is independent of the order elements arrive in.
    #[test]
    fn test_canonical_order_ignores_input_order(
        edges in prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), 1..20),
        seed in any::<u64>(),
    ) {
        // Element i may only reference elements with a smaller index.
        let ids: Vec<FSId> = (0..edges.len())
            .map(|i| FSId(*blake3::hash(&(i as u64).to_le_bytes()).as_bytes()))
            .collect();
        let elems: Vec<SliceElem> = edges
            .iter()
            .enumerate()
            .map(|(i, picks)| {
                let mut refs: Vec<FSId> = if i == 0 {
                    vec![]
                } else {
                    picks.iter().map(|p| ids[p.index(i)]).collect()
                };
                refs.sort();
                refs.dedup();
                SliceElem { path: format!("/store/e{}", i), id: ids[i], refs }
            })
            .collect();

        // Every element not referenced by another is a root, so all are reachable.
        let referenced: std::collections::HashSet<FSId> =
            elems.iter().flat_map(|e| e.refs.iter().copied()).collect();
        let roots: Vec<FSId> = ids.iter().copied().filter(|id| !referenced.contains(id)).collect();
        let forward = Slice { roots: roots.clone(), elems: elems.clone() }.canonicalize();

        let mut shuffled = elems;
        let len = shuffled.len();
        for i in 0..len {
            let j = ((seed.rotate_left(i as u32) as usize) ^ i) % len;
            shuffled.swap(i, j);
        }
        let backward = Slice { roots, elems: shuffled }.canonicalize();

        prop_assert_eq!(forward, backward);
    }
}
