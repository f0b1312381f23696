// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-invocation pipeline: resolve → fetch → extract → launch.
//!
//! The first failing stage aborts the invocation. Nothing is retried and
//! nothing is rolled back; the harness decides whether to invoke again.

use std::io::ErrorKind;

use serde::Serialize;

use crate::archive::{self, ExtractionTarget};
use crate::config::ExecConfig;
use crate::error::{ExecError, ExecResult, ExtractError, FetchError};
use crate::fetch::{self, ArtifactStream, ObjectStore};
use crate::launch::{self, LaunchSpec};
use crate::path;
use crate::state::{InvocationState, InvocationStateMachine};
use crate::types::{EventPayload, InvocationContext, ObjectLocation};

/// Runs the retrieve-unpack-launch pipeline against an object store.
pub struct Orchestrator<S> {
    config: ExecConfig,
    store: S,
}

impl<S: ObjectStore> Orchestrator<S> {
    pub fn new(config: ExecConfig, store: S) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Handle one event and return the entry point's stdout.
    ///
    /// In replace mode a successful launch does not return.
    pub async fn handle<E>(&self, event: &E, ctx: &InvocationContext) -> ExecResult<Vec<u8>>
    where
        E: Serialize + ?Sized,
    {
        let mut sm = InvocationStateMachine::new(ctx.request_id.as_str());

        match self.run(event, ctx, &mut sm).await {
            Ok(out) => {
                sm.transition_to(InvocationState::Succeeded)?;
                tracing::info!(
                    request_id = %ctx.request_id,
                    elapsed_ms = sm.elapsed().as_millis() as u64,
                    output_bytes = out.len(),
                    "Invocation succeeded"
                );
                Ok(out)
            }
            Err(e) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    stage = e.stage(),
                    state = sm.state().name(),
                    error = %e,
                    "Invocation failed"
                );
                let _ = sm.transition_to(InvocationState::Failed);
                Err(e)
            }
        }
    }

    async fn run<E>(
        &self,
        event: &E,
        ctx: &InvocationContext,
        sm: &mut InvocationStateMachine,
    ) -> ExecResult<Vec<u8>>
    where
        E: Serialize + ?Sized,
    {
        let payload = EventPayload::from_event(event)?;
        tracing::debug!(payload_bytes = payload.len(), "Event serialized");

        let location = path::resolve(&self.config.source)?;
        sm.transition_to(InvocationState::Resolved)?;
        tracing::debug!(
            bucket = %location.container(),
            key = %location.object(),
            "Source resolved"
        );

        let target = ExtractionTarget::new(&self.config.code_dir, location.object())?;
        target.prepare()?;

        let stream = self.fetch(&location, ctx).await?;
        sm.transition_to(InvocationState::Fetched)?;

        let summary = archive::extract_stream(stream, target.path())
            .await
            .map_err(|e| match e {
                ExtractError::Read { source } if source.kind() == ErrorKind::TimedOut => {
                    ExecError::Fetch(deadline_exceeded(&location))
                }
                other => other.into(),
            })?;
        sm.transition_to(InvocationState::Extracted)?;
        tracing::debug!(
            target = %target.path().display(),
            files = summary.files,
            bytes = summary.bytes,
            "Tarball unarchived"
        );

        let mut spec = LaunchSpec::new(target.path(), &payload, self.config.mode)?;
        if let Some(trace_id) = &ctx.trace_id {
            spec = spec.with_trace_id(trace_id);
        }
        sm.transition_to(InvocationState::Launched)?;

        Ok(launch::launch(spec, ctx.deadline).await?)
    }

    /// Open the artifact body, bounded by the invocation deadline.
    async fn fetch(
        &self,
        location: &ObjectLocation,
        ctx: &InvocationContext,
    ) -> Result<ArtifactStream, FetchError> {
        tracing::debug!(source = %location, "Start to place source code");

        let request = self.store.get_object(location);
        let result = match ctx.deadline {
            // The body is streamed during extraction, so its reads are bounded too
            Some(deadline) => tokio::time::timeout_at(deadline, request)
                .await
                .unwrap_or_else(|_| Err(deadline_exceeded(location)))
                .map(|stream| fetch::with_deadline(stream, deadline)),
            None => request.await,
        };

        if let Err(e) = &result {
            tracing::warn!(source = %location, error = %e, "Failed to GetObject");
        }
        result
    }
}

fn deadline_exceeded(location: &ObjectLocation) -> FetchError {
    FetchError::DeadlineExceeded {
        container: location.container().to_string(),
        object: location.object().to_string(),
    }
}
