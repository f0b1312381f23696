// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Artifact retrieval from object storage.
//!
//! A single GetObject per invocation. Credentials are resolved from the
//! default AWS provider chain at call time and never cached, so every
//! invocation sees the current role credentials.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

use crate::error::FetchError;
use crate::types::ObjectLocation;

/// Open, sequentially readable body of a compressed artifact.
pub type ArtifactStream = Pin<Box<dyn AsyncRead + Send>>;

/// Minimal object storage interface consumed by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Issue one get request and return the body unread.
    async fn get_object(&self, location: &ObjectLocation) -> Result<ArtifactStream, FetchError>;
}

/// S3 backed store. Honors the standard `AWS_*` environment, including
/// `AWS_ENDPOINT_URL` for S3-compatible backends.
#[derive(Debug, Clone, Default)]
pub struct S3Store;

impl S3Store {
    pub fn new() -> Self {
        Self
    }

    async fn client(&self) -> Client {
        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Client::new(&shared)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, location: &ObjectLocation) -> Result<ArtifactStream, FetchError> {
        tracing::debug!(
            bucket = %location.container(),
            key = %location.object(),
            "Issuing GetObject"
        );

        let output = self
            .client()
            .await
            .get_object()
            .bucket(location.container())
            .key(location.object())
            .send()
            .await
            .map_err(|e| FetchError::Backend {
                container: location.container().to_string(),
                object: location.object().to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(
            bucket = %location.container(),
            key = %location.object(),
            content_length = output.content_length().unwrap_or_default(),
            "GetObject succeeded"
        );

        Ok(Box::pin(output.body.into_async_read()))
    }
}

/// Bound every read of `stream` by `deadline`.
///
/// Once the deadline passes, pending and later reads fail with
/// [`io::ErrorKind::TimedOut`], including reads stalled on the network.
pub fn with_deadline(stream: ArtifactStream, deadline: Instant) -> ArtifactStream {
    Box::pin(DeadlineStream {
        inner: stream,
        sleep: Box::pin(tokio::time::sleep_until(deadline)),
    })
}

struct DeadlineStream {
    inner: ArtifactStream,
    sleep: Pin<Box<Sleep>>,
}

impl AsyncRead for DeadlineStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sleep.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "artifact download exceeded the invocation deadline",
            )));
        }
        self.inner.as_mut().poll_read(cx, buf)
    }
}

/// Ephemeral in-memory store keyed by location.
///
/// Stands in for S3 in tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<ObjectLocation, Arc<Vec<u8>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, location: ObjectLocation, bytes: Vec<u8>) {
        let mut lock = self
            .objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lock.insert(location, Arc::new(bytes));
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, location: &ObjectLocation) -> Result<ArtifactStream, FetchError> {
        let lock = self
            .objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match lock.get(location) {
            Some(bytes) => Ok(Box::pin(std::io::Cursor::new(SharedBytes(bytes.clone())))),
            None => Err(FetchError::Backend {
                container: location.container().to_string(),
                object: location.object().to_string(),
                message: "NoSuchKey: The specified key does not exist.".to_string(),
            }),
        }
    }
}

#[derive(Debug)]
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}
