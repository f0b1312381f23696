// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Invocation state machine with typed state transitions.
//!
//! Implements the linear pipeline: Idle → Resolved → Fetched → Extracted →
//! Launched → Succeeded. Failed is reachable from every non-terminal state.
//! Nothing moves backwards.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::StateTransitionError;

/// Pipeline states of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvocationState {
    /// Event received, nothing done yet.
    Idle,

    /// Source locator split into bucket and key.
    Resolved,

    /// Artifact body is open.
    Fetched,

    /// Artifact unpacked into its target directory.
    Extracted,

    /// Entry point started.
    Launched,

    /// Entry point finished and its output was captured.
    Succeeded,

    /// A stage failed; the pipeline stopped.
    Failed,
}

impl InvocationState {
    /// Get the state name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Resolved => "Resolved",
            Self::Fetched => "Fetched",
            Self::Extracted => "Extracted",
            Self::Launched => "Launched",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Check if transition to the target state is valid.
    pub fn can_transition_to(&self, target: InvocationState) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, target),
            (Self::Idle, Self::Resolved)
                | (Self::Resolved, Self::Fetched)
                | (Self::Fetched, Self::Extracted)
                | (Self::Extracted, Self::Launched)
                | (Self::Launched, Self::Succeeded)
                | (_, Self::Failed)
        )
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// State machine for one invocation.
/// Enforces the stage order and tracks time spent per stage.
#[derive(Debug)]
pub struct InvocationStateMachine {
    request_id: String,
    current_state: InvocationState,
    started: Instant,
    last_transition: Instant,
    transition_count: u64,
}

impl InvocationStateMachine {
    pub fn new(request_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            request_id: request_id.into(),
            current_state: InvocationState::Idle,
            started: now,
            last_transition: now,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> InvocationState {
        self.current_state
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Total time since the invocation started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: InvocationState) -> Result<(), StateTransitionError> {
        if self.current_state.is_terminal() {
            return Err(StateTransitionError::TerminalState {
                request_id: self.request_id.clone(),
                state: self.current_state.name(),
            });
        }

        if !self.current_state.can_transition_to(target) {
            return Err(StateTransitionError::InvalidTransition {
                request_id: self.request_id.clone(),
                from: self.current_state.name(),
                to: target.name(),
            });
        }

        tracing::debug!(
            request_id = %self.request_id,
            from = self.current_state.name(),
            to = target.name(),
            stage_ms = self.last_transition.elapsed().as_millis() as u64,
            "State transition"
        );

        self.current_state = target;
        self.last_transition = Instant::now();
        self.transition_count += 1;

        Ok(())
    }
}
