// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Replace-mode launch tests.
//!
//! `execve` cannot be observed from inside the process that calls it, so
//! the test re-runs its own test binary as a child. The child replaces
//! itself with `bootstrap`; the parent inspects the exit status and output.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::Command;

use lambda_exec_core::launch::{self, ENTRY_POINT};
use lambda_exec_core::{EventPayload, InvocationMode, LaunchSpec};

/// Set in the child to the directory holding the bootstrap.
const CHILD_DIR_VAR: &str = "REPLACE_MODE_TEST_DIR";

#[test]
fn test_replace_mode_hands_off_process() {
    if let Ok(dir) = std::env::var(CHILD_DIR_VAR) {
        let payload = EventPayload::from_event(&serde_json::json!({ "id": 42 })).unwrap();
        let spec = LaunchSpec::new(&PathBuf::from(dir), &payload, InvocationMode::Replace)
            .expect("Failed to resolve bootstrap");
        let err = launch::replace_self(spec);
        panic!("execve returned: {err}");
    }

    let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let bootstrap = temp_dir.path().join(ENTRY_POINT);
    fs::write(
        &bootstrap,
        "#!/bin/sh\nprintf 'replaced:%s' \"$CONTAINER_EXEC_EVENT\"\nexit 7\n",
    )
    .expect("Failed to write bootstrap");
    fs::set_permissions(&bootstrap, fs::Permissions::from_mode(0o755)).unwrap();

    let exe = std::env::current_exe().expect("Failed to locate test binary");
    let output = Command::new(exe)
        .args(["test_replace_mode_hands_off_process", "--exact", "--nocapture"])
        .env(CHILD_DIR_VAR, temp_dir.path())
        .output()
        .expect("Failed to run child test");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(7), "stdout: {stdout}");
    assert!(stdout.contains(r#"replaced:{"id":42}"#), "stdout: {stdout}");
}
