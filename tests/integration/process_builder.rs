//! End-to-end builds through the process builder
#![cfg(unix)]

use fstate::builder::host_platform;
use fstate::config::StoreConfig;
use fstate::{BuildError, Content, Derivation, FSId, FState, FStateEngine, FStateError};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tempfile::TempDir;

fn script(engine: &FStateEngine, path: &str, body: &str) -> FSId {
    engine
        .write_term(
            &FState::Path {
                path: path.to_string(),
                content: Content::Executable(format!("#!/bin/sh\n{}", body).into_bytes()),
                refs: vec![],
            }
            .to_term(),
            "",
        )
        .unwrap()
}

fn derive(
    engine: &FStateEngine,
    platform: &str,
    builder: &str,
    inputs: Vec<FSId>,
    outputs: &[&str],
    env: &[(&str, &str)],
) -> FSId {
    engine
        .write_term(
            &FState::Derive(Derivation {
                platform: platform.to_string(),
                builder: builder.to_string(),
                inputs,
                outputs: outputs.iter().map(|o| o.to_string()).collect(),
                env: env
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            })
            .to_term(),
            "",
        )
        .unwrap()
}

#[test]
fn test_realised_script_builds_output() {
    let temp_dir = TempDir::new().unwrap();
    let engine = FStateEngine::open(&StoreConfig::under(temp_dir.path())).unwrap();

    let builder = script(&engine, "/store/build.sh", "printf '%s' \"$message\" > \"$out\"\n");
    let d = derive(
        &engine,
        &host_platform(),
        "/store/build.sh",
        vec![builder],
        &["/store/b"],
        &[("message", "hello world")],
    );

    let slice = engine.normalise_fstate(&d).unwrap();
    assert_eq!(
        fs::read_to_string(engine.fs_root().join("store/b")).unwrap(),
        "hello world"
    );
    let refs: BTreeSet<String> = ["/store/b", "/store/build.sh"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(engine.fstate_refs(&d).unwrap(), refs);
    assert_eq!(engine.successors().lookup(&d).unwrap(), Some(slice.roots[0]));
}

#[test]
fn test_failing_script_reports_stderr() {
    let temp_dir = TempDir::new().unwrap();
    let engine = FStateEngine::open(&StoreConfig::under(temp_dir.path())).unwrap();

    let builder = script(&engine, "/store/fail.sh", "echo 'compiler exploded' >&2\nexit 2\n");
    let d = derive(
        &engine,
        &host_platform(),
        "/store/fail.sh",
        vec![builder],
        &["/store/b"],
        &[],
    );

    match engine.normalise_fstate(&d) {
        Err(FStateError::BuildFailed {
            source: BuildError::Exited { status, message },
            ..
        }) => {
            assert_eq!(status, Some(2));
            assert!(message.contains("compiler exploded"));
        }
        other => panic!("Expected BuildFailed, got {:?}", other),
    }
    assert_eq!(engine.successors().lookup(&d).unwrap(), None);
}

#[test]
fn test_foreign_platform_is_refused() {
    let temp_dir = TempDir::new().unwrap();
    let engine = FStateEngine::open(&StoreConfig::under(temp_dir.path())).unwrap();

    let d = derive(&engine, "vax-vms", "/bin/sh", vec![], &["/store/b"], &[]);
    assert!(matches!(
        engine.normalise_fstate(&d),
        Err(FStateError::BuildFailed {
            source: BuildError::PlatformMismatch { .. },
            ..
        })
    ));
}
