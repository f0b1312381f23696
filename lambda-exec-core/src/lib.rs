// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! lambda-container-exec Core Library
//!
//! Retrieve-unpack-launch pipeline of the lambda-container-exec runtime.
//! Provides S3 locator parsing, artifact retrieval, safe streaming tarball
//! extraction, entry point invocation and the per-invocation orchestrator.

pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod launch;
pub mod orchestrator;
pub mod path;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use archive::{ExtractSummary, ExtractionTarget};
pub use config::{ConfigLoader, ExecConfig, InvocationMode, LogLevel};
pub use error::{
    ConfigError, ExecError, ExecResult, ExtractError, FetchError, LaunchError, ParseError,
};
pub use fetch::{ArtifactStream, MemoryStore, ObjectStore, S3Store};
pub use launch::LaunchSpec;
pub use orchestrator::Orchestrator;
pub use state::{InvocationState, InvocationStateMachine};
pub use types::{EventPayload, InvocationContext, ObjectLocation};
