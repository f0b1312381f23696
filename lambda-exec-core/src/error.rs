// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for lambda-container-exec.
//!
//! One explicit enum per pipeline stage, gathered under [`ExecError`].
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for one invocation of the pipeline.
/// Every variant maps to exactly one stage so operators can tell
/// a bad package from a bad network from bad user code.
#[derive(Debug, Error)]
pub enum ExecError {
    // =========================================================================
    // Configuration Errors - Fail-Fast at Startup
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // =========================================================================
    // Pipeline Stage Errors
    // =========================================================================
    #[error("Source locator error: {0}")]
    Parse(#[from] ParseError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    // =========================================================================
    // State Machine Errors
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // Event Errors
    // =========================================================================
    #[error("Failed to serialize event: {0}")]
    EventSerialize(#[from] serde_json::Error),
}

impl ExecError {
    /// Name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Parse(_) => "resolve",
            Self::Fetch(_) => "fetch",
            Self::Extract(e) => e.stage(),
            Self::Launch(e) => e.stage(),
            Self::InvalidStateTransition(_) => "state",
            Self::EventSerialize(_) => "serialize",
        }
    }

    /// Short type name reported to the invocation harness.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Parse(_) => "ParseError",
            Self::Fetch(_) => "FetchError",
            Self::Extract(_) => "ExtractError",
            Self::Launch(_) => "LaunchError",
            Self::InvalidStateTransition(_) => "StateError",
            Self::EventSerialize(_) => "EventError",
        }
    }
}

/// Invalid environment configuration detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {variable}: {value} - {reason}")]
    InvalidValue {
        variable: &'static str,
        value: String,
        reason: String,
    },
}

/// State transition errors for the invocation state machine.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for request {request_id}")]
    InvalidTransition {
        request_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Request {request_id} is in terminal state: {state}")]
    TerminalState {
        request_id: String,
        state: &'static str,
    },
}

/// Source locator could not be resolved into a bucket and key.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid locator '{locator}': {reason}")]
    InvalidUri { locator: String, reason: String },

    #[error("Not supported scheme '{scheme}' (expected '{expected}')")]
    NotSupportedScheme {
        scheme: String,
        expected: &'static str,
    },
}

/// Object storage failure. Backend errors are not retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GetObject failed for s3://{container}/{object}: {message}")]
    Backend {
        container: String,
        object: String,
        message: String,
    },

    #[error("GetObject for s3://{container}/{object} exceeded the invocation deadline")]
    DeadlineExceeded { container: String, object: String },
}

/// Failure while unpacking an artifact. Extraction is not transactional,
/// the destination may be left partially populated.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Artifact is not a gzip stream: {reason}")]
    Decompress { reason: String },

    #[error("Failed to read archive: {source}")]
    Read {
        #[source]
        source: std::io::Error,
    },

    #[error("Archive entry escapes destination: {entry}")]
    UnsafePath { entry: PathBuf },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction task failed: {reason}")]
    Task { reason: String },
}

impl ExtractError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Decompress { .. } => "decompress",
            Self::Read { .. } => "read",
            Self::UnsafePath { .. } => "unsafe_path",
            Self::Write { .. } => "write",
            Self::Task { .. } => "extract",
        }
    }
}

/// Failure to locate, start or complete the packaged entry point.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Entry point not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Entry point is not executable: {path}")]
    NotExecutable { path: PathBuf },

    #[error("Failed to start {path}: {source}")]
    Start {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait on {path}: {source}")]
    Wait {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Entry point exited with {status}")]
    NonZeroExit { status: String },

    #[error("Entry point did not finish before the invocation deadline")]
    DeadlineExceeded,

    #[error("Failed to replace process with {path}: {reason}")]
    Exec { path: PathBuf, reason: String },
}

impl LaunchError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::NotExecutable { .. } => "resolve",
            Self::Start { .. } => "start",
            Self::Wait { .. } | Self::NonZeroExit { .. } | Self::DeadlineExceeded => "wait",
            Self::Exec { .. } => "exec",
        }
    }
}

/// Result type alias using ExecError.
pub type ExecResult<T> = Result<T, ExecError>;
