//! Write-once storage and corruption detection

use super::test_utils::TestStore;
use fstate::{hash_term, print_term, FSId, FStateError, Term};
use std::fs;

fn object_count(t: &TestStore) -> usize {
    walkdir::WalkDir::new(t.config.store_dir.join("terms"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[test]
fn test_write_is_idempotent() {
    let t = TestStore::new();
    let term = Term::app("Include", vec![Term::string("x"), Term::List(vec![])]);

    let first = t.engine.write_term(&term, "").unwrap();
    let second = t.engine.write_term(&term, "").unwrap();
    assert_eq!(first, second);
    assert_eq!(first, hash_term(&term));
    assert_eq!(object_count(&t), 1);
}

#[test]
fn test_stored_text_is_canonical() {
    let t = TestStore::new();
    let id = t.file("/store/a", "hello", vec![]);
    let text = fs::read_to_string(t.engine.store().object_path(&id)).unwrap();
    assert_eq!(text, print_term(&t.engine.term_from_id(&id).unwrap()));
    assert_eq!(text, r#"Path("/store/a",Regular("68656c6c6f"),[])"#);
}

#[test]
fn test_unknown_id_is_not_found() {
    let t = TestStore::new();
    let ghost = FSId([0x55; 32]);
    assert!(matches!(
        t.engine.term_from_id(&ghost),
        Err(FStateError::NotFound(id)) if id == ghost
    ));
}

#[test]
fn test_corrupted_object_is_hash_mismatch() {
    let t = TestStore::new();
    let id = t.file("/store/a", "hello", vec![]);
    fs::write(
        t.engine.store().object_path(&id),
        r#"Path("/store/a",Regular("6576696c"),[])"#,
    )
    .unwrap();

    let err = t.engine.term_from_id(&id).unwrap_err();
    assert!(matches!(err, FStateError::HashMismatch { expected, .. } if expected == id));
    assert!(!err.is_retryable());
    assert!(matches!(
        t.engine.normalise_fstate(&id),
        Err(FStateError::HashMismatch { .. })
    ));
}

#[test]
fn test_self_reference_is_rejected() {
    let id = FSId([0x66; 32]);
    let text = format!(r#"Path("/store/me",Regular(""),["{}"])"#, id.to_hex());

    let unverified = TestStore::with_verify(false);
    unverified.plant(id, &text);
    assert!(matches!(
        unverified.engine.normalise_fstate(&id),
        Err(FStateError::BadTerm { .. })
    ));

    let verified = TestStore::new();
    verified.plant(id, &text);
    assert!(matches!(
        verified.engine.normalise_fstate(&id),
        Err(FStateError::HashMismatch { .. })
    ));
}

#[test]
fn test_malformed_text_is_parse_error() {
    let t = TestStore::with_verify(false);
    let id = FSId([0x77; 32]);
    t.plant(id, r#"Path("/store/a","#);
    assert!(matches!(
        t.engine.term_from_id(&id),
        Err(FStateError::ParseError { .. })
    ));
}

#[test]
fn test_misshapen_known_term_is_bad_term() {
    let t = TestStore::new();
    let id = t
        .engine
        .write_term(&Term::app("Path", vec![Term::string("/store/a")]), "")
        .unwrap();
    assert!(matches!(
        t.engine.normalise_fstate(&id),
        Err(FStateError::BadTerm { .. })
    ));
}
