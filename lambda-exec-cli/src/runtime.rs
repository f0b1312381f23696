// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Lambda Runtime API client.
//!
//! Long-polls for the next invocation and reports its outcome back to the
//! runtime endpoint named by `AWS_LAMBDA_RUNTIME_API`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

use lambda_exec_core::{ConfigError, ExecError, InvocationContext};

/// Environment variable holding the `host:port` of the Runtime API.
pub const ENV_RUNTIME_API: &str = "AWS_LAMBDA_RUNTIME_API";

const API_VERSION: &str = "2018-06-01";
const HEADER_REQUEST_ID: &str = "Lambda-Runtime-Aws-Request-Id";
const HEADER_DEADLINE_MS: &str = "Lambda-Runtime-Deadline-Ms";
const HEADER_TRACE_ID: &str = "Lambda-Runtime-Trace-Id";
const HEADER_ERROR_TYPE: &str = "Lambda-Runtime-Function-Error-Type";

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{} is not set", ENV_RUNTIME_API)]
    MissingEndpoint,

    #[error("Runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Runtime API returned {status} for {path}")]
    Status { path: String, status: StatusCode },

    #[error("Invocation is missing header {0}")]
    MissingHeader(&'static str),

    #[error("Invalid value '{value}' in header {name}")]
    InvalidHeader { name: &'static str, value: String },
}

/// One event handed out by `GET /runtime/invocation/next`.
#[derive(Debug)]
pub struct Invocation {
    pub context: InvocationContext,
    pub event: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error_message: String,
    error_type: &'a str,
}

fn exec_error_body(err: &ExecError) -> ErrorBody<'static> {
    ErrorBody {
        error_message: err.to_string(),
        error_type: err.kind(),
    }
}

fn config_error_body(err: &ConfigError) -> ErrorBody<'static> {
    ErrorBody {
        error_message: err.to_string(),
        error_type: "ConfigError",
    }
}

/// Time left until `deadline_ms` (milliseconds since the epoch) as seen at `now`.
fn time_until(deadline_ms: u64, now: SystemTime) -> Duration {
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Duration::from_millis(deadline_ms.saturating_sub(now_ms))
}

fn header<'h>(headers: &'h HeaderMap, name: &'static str) -> Result<Option<&'h str>, RuntimeError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| RuntimeError::InvalidHeader {
                name,
                value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            }),
    }
}

/// Build the invocation context from the `next` response headers.
fn context_from_headers(headers: &HeaderMap) -> Result<InvocationContext, RuntimeError> {
    let request_id =
        header(headers, HEADER_REQUEST_ID)?.ok_or(RuntimeError::MissingHeader(HEADER_REQUEST_ID))?;
    let mut ctx = InvocationContext::new(request_id);

    if let Some(raw) = header(headers, HEADER_DEADLINE_MS)? {
        let deadline_ms: u64 = raw.parse().map_err(|_| RuntimeError::InvalidHeader {
            name: HEADER_DEADLINE_MS,
            value: raw.to_string(),
        })?;
        ctx = ctx.with_timeout(time_until(deadline_ms, SystemTime::now()));
    }

    if let Some(trace_id) = header(headers, HEADER_TRACE_ID)? {
        ctx = ctx.with_trace_id(trace_id);
    }

    Ok(ctx)
}

pub struct RuntimeClient {
    client: Client,
    base: String,
}

impl RuntimeClient {
    pub fn new(endpoint: &str) -> Result<Self, RuntimeError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base: format!("http://{}/{}/runtime", endpoint, API_VERSION),
        })
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        let endpoint = std::env::var(ENV_RUNTIME_API)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(RuntimeError::MissingEndpoint)?;
        Self::new(&endpoint)
    }

    /// Block until the next event is available.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let path = "invocation/next";
        let response = self.client.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(RuntimeError::Status {
                path: path.to_string(),
                status: response.status(),
            });
        }

        let context = context_from_headers(response.headers())?;
        let event = response.json::<serde_json::Value>().await?;
        tracing::debug!(request_id = %context.request_id, "Received invocation");

        Ok(Invocation { context, event })
    }

    pub async fn send_response(&self, request_id: &str, body: Vec<u8>) -> Result<(), RuntimeError> {
        let path = format!("invocation/{}/response", request_id);
        let response = self.client.post(self.url(&path)).body(body).send().await?;
        Self::check(path, response.status())
    }

    pub async fn send_error(&self, request_id: &str, err: &ExecError) -> Result<(), RuntimeError> {
        let path = format!("invocation/{}/error", request_id);
        self.post_error(path, &exec_error_body(err)).await
    }

    /// Report a configuration failure before the first invocation.
    pub async fn send_init_error(&self, err: &ConfigError) -> Result<(), RuntimeError> {
        self.post_error("init/error".to_string(), &config_error_body(err))
            .await
    }

    async fn post_error(&self, path: String, body: &ErrorBody<'_>) -> Result<(), RuntimeError> {
        let response = self
            .client
            .post(self.url(&path))
            .header(HEADER_ERROR_TYPE, body.error_type)
            .json(body)
            .send()
            .await?;
        Self::check(path, response.status())
    }

    fn check(path: String, status: StatusCode) -> Result<(), RuntimeError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(RuntimeError::Status { path, status })
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }
}
