// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for lambda-container-exec.
//!
//! These tests drive the complete flow from source locator to a running
//! `bootstrap`, with an in-memory object store standing in for S3.

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use lambda_exec_core::config::{ENV_CODE_DIR, ENV_LAUNCH_MODE, ENV_SRC};
use lambda_exec_core::{
    ConfigLoader, ExecError, InvocationContext, InvocationMode, LaunchError, MemoryStore,
    ObjectLocation, Orchestrator,
};

const ECHO_BOOTSTRAP: &[u8] = b"#!/bin/sh\necho \"event=$CONTAINER_EXEC_EVENT\"\n";

/// Build a gzip-compressed tarball with a directory and the given files.
fn package(files: &[(&str, u32, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o755);
    dir.set_size(0);
    builder
        .append_data(&mut dir, "assets/", std::io::empty())
        .expect("Failed to append directory");

    for (name, mode, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(*mode);
        header.set_size(data.len() as u64);
        builder
            .append_data(&mut header, name, *data)
            .expect("Failed to append file");
    }

    let tar = builder.into_inner().expect("Failed to finish tarball");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).expect("Failed to compress");
    encoder.finish().expect("Failed to finish gzip")
}

fn orchestrator(vars: &[(&str, &str)], store: MemoryStore) -> Orchestrator<MemoryStore> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config =
        ConfigLoader::from_lookup(|key| vars.get(key).cloned()).expect("Failed to load config");
    Orchestrator::new(config, store)
}

/// Test the documented scenario: fetch, unpack under <codeDir>/<key>, run bootstrap
#[tokio::test]
async fn test_end_to_end_echoes_event() {
    let code_dir = TempDir::new().expect("Failed to create temp dir");
    let code_dir_str = code_dir.path().to_str().unwrap();

    let store = MemoryStore::new();
    store.put(
        ObjectLocation::new("bucket1", "fn/v1"),
        package(&[
            ("bootstrap", 0o755, ECHO_BOOTSTRAP),
            ("assets/data.json", 0o644, br#"{"greeting":"hello"}"#),
        ]),
    );

    let orch = orchestrator(
        &[(ENV_SRC, "s3://bucket1/fn/v1"), (ENV_CODE_DIR, code_dir_str)],
        store,
    );

    let out = orch
        .handle(&serde_json::json!({ "id": 42 }), &InvocationContext::new("req-e2e"))
        .await
        .expect("Invocation failed");

    let func_dir = code_dir.path().join("fn/v1");
    assert!(func_dir.join("bootstrap").is_file());
    assert_eq!(
        std::fs::read(func_dir.join("assets/data.json")).unwrap(),
        br#"{"greeting":"hello"}"#
    );
    let mode = std::fs::metadata(func_dir.join("bootstrap"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);

    let out = String::from_utf8(out).expect("Output is not UTF-8");
    assert!(out.contains(r#"{"id":42}"#), "unexpected output: {out}");
}

/// Test that a second invocation reuses and overwrites the same directory
#[tokio::test]
async fn test_reinvocation_over_existing_directory() {
    let code_dir = TempDir::new().expect("Failed to create temp dir");
    let code_dir_str = code_dir.path().to_str().unwrap();

    let store = MemoryStore::new();
    let location = ObjectLocation::new("bucket1", "fn/v1");
    store.put(
        location.clone(),
        package(&[("bootstrap", 0o755, b"#!/bin/sh\nprintf v1\n")]),
    );

    let orch = orchestrator(
        &[(ENV_SRC, "s3://bucket1/fn/v1"), (ENV_CODE_DIR, code_dir_str)],
        store.clone(),
    );
    let ctx = InvocationContext::new("req-1");

    let first = orch.handle(&serde_json::json!({}), &ctx).await.unwrap();
    assert_eq!(first, b"v1");

    // New package published under the same key
    store.put(
        location,
        package(&[("bootstrap", 0o755, b"#!/bin/sh\nprintf v2\n")]),
    );
    let second = orch.handle(&serde_json::json!({}), &ctx).await.unwrap();
    assert_eq!(second, b"v2");
}

/// Test that a failing bootstrap produces an error and no payload
#[tokio::test]
async fn test_failing_bootstrap_is_launch_error() {
    let code_dir = TempDir::new().expect("Failed to create temp dir");
    let code_dir_str = code_dir.path().to_str().unwrap();

    let store = MemoryStore::new();
    store.put(
        ObjectLocation::new("bucket1", "broken"),
        package(&[(
            "bootstrap",
            0o755,
            b"#!/bin/sh\necho 'starting'\necho 'boom' >&2\nexit 2\n",
        )]),
    );

    let orch = orchestrator(
        &[(ENV_SRC, "s3://bucket1/broken"), (ENV_CODE_DIR, code_dir_str)],
        store,
    );

    let err = orch
        .handle(&serde_json::json!({}), &InvocationContext::new("req-2"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecError::Launch(LaunchError::NonZeroExit { .. })
    ));
    assert_eq!(err.kind(), "LaunchError");
}

/// Test that a traversal entry aborts extraction before anything escapes
#[tokio::test]
async fn test_traversal_package_rejected() {
    let root = TempDir::new().expect("Failed to create temp dir");
    let code_dir = root.path().join("code");
    std::fs::create_dir(&code_dir).unwrap();

    // append_data refuses `..`, so write the name into the header directly
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    let name = b"../../outside";
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(3);
    header.set_cksum();
    builder.append(&header, &b"bad"[..]).unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();

    let store = MemoryStore::new();
    store.put(
        ObjectLocation::new("bucket1", "fn"),
        encoder.finish().unwrap(),
    );

    let orch = orchestrator(
        &[
            (ENV_SRC, "s3://bucket1/fn"),
            (ENV_CODE_DIR, code_dir.to_str().unwrap()),
        ],
        store,
    );

    let err = orch
        .handle(&serde_json::json!({}), &InvocationContext::new("req-3"))
        .await
        .unwrap_err();
    assert_eq!(err.stage(), "unsafe_path");
    assert!(!root.path().join("outside").exists());
}

/// Test configuration loading from a variable lookup
#[test]
fn test_config_loading_and_validation() {
    let vars: HashMap<&str, &str> = [
        (ENV_SRC, "s3://bucket1/fn/v1"),
        (ENV_LAUNCH_MODE, "replace"),
    ]
    .into_iter()
    .collect();

    let config = ConfigLoader::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
        .expect("Failed to load config");
    assert_eq!(config.mode, InvocationMode::Replace);
    assert_eq!(config.code_dir, Path::new("/tmp/lambda"));

    let invalid = ConfigLoader::from_lookup(|key| {
        (key == ENV_LAUNCH_MODE).then(|| "daemonize".to_string())
    });
    assert!(invalid.is_err(), "Unknown launch mode should be rejected");
}
