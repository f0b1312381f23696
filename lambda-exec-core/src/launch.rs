// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Entry point invocation.
//!
//! Locates `bootstrap` in the unpacked artifact and hands it the event
//! through the environment, either as a child process or by replacing the
//! current process image.

use std::collections::BTreeMap;
use std::ffi::{CString, OsString};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;

use crate::config::{InvocationMode, ENV_EVENT};
use crate::error::LaunchError;
use crate::types::EventPayload;

/// Fixed file name of the packaged entry point.
pub const ENTRY_POINT: &str = "bootstrap";

/// Trace header variable read by the AWS SDKs inside user code.
pub const ENV_TRACE_ID: &str = "_X_AMZN_TRACE_ID";

/// Spawn attempts while the entry point reports ETXTBSY.
const SPAWN_ATTEMPTS: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Resolved executable plus the environment it runs with.
/// Built once per invocation and consumed by [`launch`].
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    executable: PathBuf,
    env: BTreeMap<OsString, OsString>,
    mode: InvocationMode,
}

impl LaunchSpec {
    /// Resolve `bootstrap` in `entry_dir` on top of the current environment.
    pub fn new(
        entry_dir: &Path,
        event: &EventPayload,
        mode: InvocationMode,
    ) -> Result<Self, LaunchError> {
        Self::with_base_env(entry_dir, event, mode, std::env::vars_os())
    }

    /// Same as [`LaunchSpec::new`] with an explicit base environment.
    pub fn with_base_env<I>(
        entry_dir: &Path,
        event: &EventPayload,
        mode: InvocationMode,
        base_env: I,
    ) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let executable = find_executable(&entry_dir.join(ENTRY_POINT))?;

        let mut env: BTreeMap<OsString, OsString> = base_env.into_iter().collect();
        env.insert(ENV_EVENT.into(), event.as_str().into());

        Ok(Self {
            executable,
            env,
            mode,
        })
    }

    /// Export the platform trace header to the entry point.
    pub fn with_trace_id(mut self, trace_id: &str) -> Self {
        self.env.insert(ENV_TRACE_ID.into(), trace_id.into());
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn env(&self) -> &BTreeMap<OsString, OsString> {
        &self.env
    }

    pub fn mode(&self) -> InvocationMode {
        self.mode
    }
}

/// Check that `path` is a regular file the current user may execute.
pub fn find_executable(path: &Path) -> Result<PathBuf, LaunchError> {
    let metadata = std::fs::metadata(path).map_err(|_| LaunchError::NotFound {
        path: path.to_path_buf(),
    })?;

    if !metadata.is_file() || access(path, AccessFlags::X_OK).is_err() {
        return Err(LaunchError::NotExecutable {
            path: path.to_path_buf(),
        });
    }

    Ok(path.to_path_buf())
}

/// Run the entry point in the mode recorded in `spec`.
///
/// Spawn mode returns the captured stdout. Replace mode only returns on
/// failure.
pub async fn launch(spec: LaunchSpec, deadline: Option<Instant>) -> Result<Vec<u8>, LaunchError> {
    match spec.mode {
        InvocationMode::Spawn => spawn_child(spec, deadline).await,
        InvocationMode::Replace => Err(replace_self(spec)),
    }
}

/// Start the entry point as a child process.
///
/// Stderr is relayed line by line as it arrives while stdout is buffered.
/// The payload is only returned once stdout hit EOF and the child exited
/// with status zero. When `deadline` passes first the child is killed.
pub async fn spawn_child(
    spec: LaunchSpec,
    deadline: Option<Instant>,
) -> Result<Vec<u8>, LaunchError> {
    let path = spec.executable;
    tracing::info!(command = %path.display(), "Running bootstrap");

    let mut command = Command::new(&path);
    command
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut attempt = 1;
    let mut child = loop {
        match command.spawn() {
            Ok(child) => break child,
            // A process forked while the entry point was still open for
            // writing holds it busy until that process execs.
            Err(e)
                if e.raw_os_error() == Some(Errno::ETXTBSY as i32) && attempt < SPAWN_ATTEMPTS =>
            {
                tracing::debug!(attempt = attempt, "Entry point busy, retrying spawn");
                attempt += 1;
                tokio::time::sleep(SPAWN_RETRY_DELAY).await;
            }
            Err(source) => {
                tracing::warn!(error = %source, "Failed to start command");
                return Err(LaunchError::Start {
                    path: path.clone(),
                    source,
                });
            }
        }
    };

    let pid = child.id().unwrap_or_default();
    tracing::debug!(pid = pid, "Spawned bootstrap");

    let (Some(mut stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(LaunchError::Start {
            path,
            source: std::io::Error::other("child pipes were not captured"),
        });
    };

    let relay = async move {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        let mut forwarding = true;
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok::<_, std::io::Error>(());
            }
            if !forwarding {
                continue;
            }
            if !line.ends_with(b"\n") {
                line.push(b'\n');
            }
            // The pipe keeps being drained so the child never writes into a closed pipe
            if let Err(e) = forward_stderr(&line) {
                tracing::warn!(error = %e, "Failed to forward bootstrap stderr, discarding the rest");
                forwarding = false;
            }
        }
    };

    let collect = async move {
        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.map(|_| out)
    };

    let run = async { tokio::join!(relay, collect, child.wait()) };
    let outcome = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, run).await.ok(),
        None => Some(run.await),
    };

    let Some((relayed, collected, status)) = outcome else {
        tracing::warn!(pid = pid, "Bootstrap exceeded deadline, killing");
        let _ = child.start_kill();
        return Err(LaunchError::DeadlineExceeded);
    };

    if let Err(e) = relayed {
        tracing::warn!(error = %e, "Failed to read bootstrap stderr");
    }

    let out = collected.map_err(|source| {
        tracing::warn!(error = %source, "Failed to read command output");
        LaunchError::Wait {
            path: path.clone(),
            source,
        }
    })?;

    let status = status.map_err(|source| {
        tracing::warn!(error = %source, "Failed to wait command");
        LaunchError::Wait {
            path: path.clone(),
            source,
        }
    })?;

    if !status.success() {
        tracing::warn!(pid = pid, status = %status, "Bootstrap failed");
        return Err(LaunchError::NonZeroExit {
            status: status.to_string(),
        });
    }

    tracing::info!(pid = pid, output_bytes = out.len(), "Done command");
    Ok(out)
}

fn forward_stderr(line: &[u8]) -> std::io::Result<()> {
    let mut err = std::io::stderr().lock();
    err.write_all(line)?;
    err.flush()
}

/// Replace the current process image with the entry point.
///
/// Only returns if `execve` fails.
pub fn replace_self(spec: LaunchSpec) -> LaunchError {
    let path = spec.executable;
    let exec_err = |reason: String| LaunchError::Exec {
        path: path.clone(),
        reason,
    };

    let program = match CString::new(path.as_os_str().as_bytes()) {
        Ok(program) => program,
        Err(e) => return exec_err(e.to_string()),
    };

    let mut env = Vec::with_capacity(spec.env.len());
    for (key, value) in &spec.env {
        let mut pair = key.as_bytes().to_vec();
        pair.push(b'=');
        pair.extend_from_slice(value.as_bytes());
        match CString::new(pair) {
            Ok(pair) => env.push(pair),
            Err(e) => return exec_err(format!("invalid environment entry: {}", e)),
        }
    }

    tracing::info!(command = %path.display(), "Replacing process with bootstrap");

    match nix::unistd::execve(&program, &[&program], &env) {
        Ok(never) => match never {},
        Err(errno) => {
            tracing::warn!(command = %path.display(), error = %errno, "execve failed");
            exec_err(errno.to_string())
        }
    }
}
