//! Normalisation of file objects and derivations

use super::test_utils::TestStore;
use fstate::successor::SuccessorCache;
use fstate::{BuildError, FSId, FState, FStateError, Slice, SliceElem};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

fn assert_closed_and_unique(slice: &Slice) {
    let ids: HashSet<FSId> = slice.elems.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), slice.elems.len(), "duplicate elements in {:?}", slice);
    for elem in &slice.elems {
        for r in &elem.refs {
            assert!(ids.contains(r), "dangling ref {} in {:?}", r, slice);
        }
    }
    for root in &slice.roots {
        assert!(ids.contains(root));
    }
}

#[test]
fn test_single_file_normalises_to_itself() {
    let t = TestStore::new();
    let a = t.file("/store/a", "hello", vec![]);

    let slice = t.engine.normalise_fstate(&a).unwrap();
    assert_eq!(
        slice,
        Slice {
            roots: vec![a],
            elems: vec![SliceElem {
                path: "/store/a".to_string(),
                id: a,
                refs: vec![],
            }],
        }
    );
    assert_eq!(t.builder.calls(), 0);
}

#[test]
fn test_derive_builds_once_and_memoizes() {
    let t = TestStore::new();
    let a = t.file("/store/a", "hello", vec![]);
    let d = t.derive(
        vec![a],
        &["/store/b"],
        &[("content", "hello world"), ("needs", "/store/a")],
    );

    let slice = t.engine.normalise_fstate(&d).unwrap();
    assert_eq!(t.builder.calls(), 1);
    assert_eq!(slice.roots.len(), 1);
    let b = slice.roots[0];
    assert_eq!(
        slice.elems,
        vec![
            SliceElem {
                path: "/store/a".to_string(),
                id: a,
                refs: vec![],
            },
            SliceElem {
                path: "/store/b".to_string(),
                id: b,
                refs: vec![a],
            },
        ]
    );
    assert_eq!(fs::read_to_string(t.host_path("/store/b")).unwrap(), "hello world");
    assert_eq!(t.cache.get(&d), Some(b));

    let again = t.engine.normalise_fstate(&d).unwrap();
    assert_eq!(again, slice);
    assert_eq!(t.builder.calls(), 1);
}

#[test]
fn test_output_is_stored_as_file_object() {
    let t = TestStore::new();
    let a = t.file("/store/a", "hello", vec![]);
    let d = t.derive(vec![a], &["/store/b"], &[("content", "hello world")]);

    let slice = t.engine.normalise_fstate(&d).unwrap();
    match FState::from_term(&t.engine.term_from_id(&slice.roots[0]).unwrap()).unwrap() {
        FState::Path { path, content, refs } => {
            assert_eq!(path, "/store/b");
            assert_eq!(content, fstate::Content::regular("hello world"));
            assert_eq!(refs, vec![a]);
        }
        other => panic!("Expected a file object, got {:?}", other),
    }
}

#[test]
fn test_failed_build_is_not_memoized() {
    let t = TestStore::new();
    let a = t.file("/store/a", "hello", vec![]);
    let d = t.derive(vec![a], &["/store/b"], &[("content", "hello world")]);

    t.builder.set_failing(true);
    let err = t.engine.normalise_fstate(&d).unwrap_err();
    match &err {
        FStateError::BuildFailed { id, source } => {
            assert_eq!(*id, d);
            assert!(matches!(source, BuildError::Exited { status: Some(1), .. }));
        }
        other => panic!("Expected BuildFailed, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert!(t.cache.is_empty());

    t.builder.set_failing(false);
    let slice = t.engine.normalise_fstate(&d).unwrap();
    assert_eq!(t.builder.calls(), 2);
    assert_eq!(t.cache.get(&d), Some(slice.roots[0]));
}

#[test]
fn test_normal_form_is_a_fixpoint() {
    let t = TestStore::new();
    let a = t.file("/store/a", "hello", vec![]);
    let d = t.derive(vec![a], &["/store/b"], &[("content", "hello world")]);
    let slice = t.engine.normalise_fstate(&d).unwrap();

    let slice_id = t
        .engine
        .write_term(&FState::Slice(slice.clone()).to_term(), "")
        .unwrap();
    assert_eq!(t.engine.normalise_fstate(&slice_id).unwrap(), slice);

    // The output root normalises to the same closure.
    assert_eq!(t.engine.normalise_fstate(&slice.roots[0]).unwrap(), slice);
    assert_eq!(t.builder.calls(), 1);
}

#[test]
fn test_multi_output_memo_is_a_slice_term() {
    let t = TestStore::new();
    let a = t.file("/store/a", "seed", vec![]);
    let d = t.derive(vec![a], &["/store/x", "/store/y"], &[("content", "pair")]);

    let slice = t.engine.normalise_fstate(&d).unwrap();
    assert_eq!(slice.roots.len(), 2);
    assert_eq!(slice.elems.len(), 3);
    assert_eq!(fs::read_to_string(t.host_path("/store/x")).unwrap(), "pair#0");
    assert_eq!(fs::read_to_string(t.host_path("/store/y")).unwrap(), "pair#1");

    let memo = t.cache.get(&d).unwrap();
    let stored = FState::from_term(&t.engine.term_from_id(&memo).unwrap()).unwrap();
    assert_eq!(stored, FState::Slice(slice.clone()));

    let alias = t
        .engine
        .store()
        .object_path(&memo)
        .with_file_name(format!("{}-slice", memo.to_hex()));
    assert!(alias.is_file());

    assert_eq!(t.engine.normalise_fstate(&d).unwrap(), slice);
    assert_eq!(t.builder.calls(), 1);
    assert_eq!(
        t.engine.fstate_paths(&d, true).unwrap(),
        vec!["/store/x", "/store/y"]
    );
}

#[test]
fn test_diamond_inputs_are_merged_once() {
    let t = TestStore::new();
    let base = t.derive(vec![], &["/store/base"], &[("content", "base")]);
    let left = t.derive(vec![base], &["/store/left"], &[("needs", "/store/base")]);
    let right = t.derive(vec![base], &["/store/right"], &[("needs", "/store/base")]);
    let top = t.derive(
        vec![left, right],
        &["/store/top"],
        &[("needs", "/store/left /store/right /store/base")],
    );

    let slice = t.engine.normalise_fstate(&top).unwrap();
    assert_eq!(t.builder.calls(), 4);
    assert_eq!(slice.elems.len(), 4);
    assert_closed_and_unique(&slice);

    let paths: Vec<&str> = slice.elems.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths.last(), Some(&"/store/top"));
    assert_eq!(paths[0], "/store/base");
}

#[test]
fn test_stale_successor_is_rebuilt() {
    let t = TestStore::new();
    let a = t.file("/store/a", "hello", vec![]);
    let d = t.derive(vec![a], &["/store/b"], &[("content", "hello world")]);
    let first = t.engine.normalise_fstate(&d).unwrap();

    fs::remove_file(t.engine.store().object_path(&first.roots[0])).unwrap();

    let second = t.engine.normalise_fstate(&d).unwrap();
    assert_eq!(second, first);
    assert_eq!(t.builder.calls(), 2);
    assert!(t.engine.store().contains(&first.roots[0]));
}

#[test]
fn test_registered_successor_short_circuits_build() {
    let t = TestStore::new();
    let b = t.file("/store/b", "precomputed", vec![]);
    let d = t.derive(vec![], &["/store/b"], &[]);

    t.engine.register_successor(&d, &b).unwrap();
    let slice = t.engine.normalise_fstate(&d).unwrap();
    assert_eq!(slice.roots, vec![b]);
    assert_eq!(t.builder.calls(), 0);
    assert!(t.cache.lookups() > 0);
}

#[test]
fn test_concurrent_normalisations_build_once() {
    let t = Arc::new(TestStore::new());
    let a = t.file("/store/a", "hello", vec![]);
    let d = t.derive(vec![a], &["/store/b"], &[("sleep_ms", "50")]);

    let slices: Vec<Slice> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = t.clone();
                scope.spawn(move || t.engine.normalise_fstate(&d).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(t.builder.calls(), 1);
    assert!(slices.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(t.cache.registrations(), 1);
}

#[test]
fn test_planted_cycle_is_detected() {
    let t = TestStore::with_verify(false);
    let x = FSId([0x11; 32]);
    let y = FSId([0x22; 32]);
    t.plant(
        x,
        &format!(
            r#"Derive("test","scripted",["{}"],["/store/x"],[])"#,
            y.to_hex()
        ),
    );
    t.plant(
        y,
        &format!(
            r#"Derive("test","scripted",["{}"],["/store/y"],[])"#,
            x.to_hex()
        ),
    );

    let err = t.engine.normalise_fstate(&x).unwrap_err();
    assert!(matches!(err, FStateError::CycleDetected { id, .. } if id == x));
    assert!(!err.is_retryable());
    assert_eq!(t.builder.calls(), 0);
    assert!(t.cache.is_empty());
}

#[test]
fn test_missing_input_is_not_found() {
    let t = TestStore::new();
    let ghost = FSId([0x33; 32]);
    let d = t.derive(vec![ghost], &["/store/b"], &[]);

    assert!(matches!(
        t.engine.normalise_fstate(&d),
        Err(FStateError::NotFound(id)) if id == ghost
    ));
    assert_eq!(t.builder.calls(), 0);
    assert!(t.cache.get(&d).is_none());
    assert!(t.cache.lookup(&d).unwrap().is_none());
}
