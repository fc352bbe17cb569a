//! Transport seam for segment fetches.
//!
//! The engine treats payloads as opaque bytes; the wire encoding belongs to
//! the transport implementation. Every response carries the deployment id of
//! the build that produced it so the client can detect deployment skew.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::cache::key::VaryKey;

/// Fetch errors surfaced by a transport.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network failure fetching {path}: {reason}")]
    Network { path: String, reason: String },

    #[error("no segment payload for {0}")]
    NotFound(String),
}

/// What a prefetch is allowed to pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefetchMode {
    /// Fetch everything reachable without request-time-only data.
    Full,
    /// Fetch only the statically-knowable shell, validated against
    /// representative parameter samples.
    RuntimeSampled,
}

/// One fetched segment.
#[derive(Debug, Clone)]
pub struct SegmentResponse {
    /// Opaque segment payload.
    pub payload: Bytes,

    /// Deployment id of the build that produced this payload.
    pub deployment_id: String,

    /// Revalidation tags attached by the server.
    pub tags: Vec<String>,
}

/// Fetches one segment's payload for a (path, vary key) pair.
#[async_trait]
pub trait SegmentTransport: Send + Sync {
    async fn fetch_segment(
        &self,
        path: &str,
        vary_key: &VaryKey,
        mode: PrefetchMode,
    ) -> Result<SegmentResponse, FetchError>;
}

/// In-memory transport serving programmed responses, with optional latency
/// and failure injection. Backs the integration tests and examples.
pub struct FixtureTransport {
    responses: Mutex<HashMap<String, SegmentResponse>>,
    fail_remaining: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
    fetches: AtomicU64,
}

impl Default for FixtureTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fail_remaining: Mutex::new(HashMap::new()),
            delay: None,
            fetches: AtomicU64::new(0),
        }
    }

    /// Program a payload for a path.
    pub async fn insert(&self, path: &str, payload: &[u8], deployment_id: &str) {
        self.responses.lock().await.insert(
            path.to_owned(),
            SegmentResponse {
                payload: Bytes::copy_from_slice(payload),
                deployment_id: deployment_id.to_owned(),
                tags: Vec::new(),
            },
        );
    }

    /// Program a payload carrying revalidation tags.
    pub async fn insert_tagged(
        &self,
        path: &str,
        payload: &[u8],
        deployment_id: &str,
        tags: &[&str],
    ) {
        self.responses.lock().await.insert(
            path.to_owned(),
            SegmentResponse {
                payload: Bytes::copy_from_slice(payload),
                deployment_id: deployment_id.to_owned(),
                tags: tags.iter().map(|t| (*t).to_owned()).collect(),
            },
        );
    }

    /// Make the next `times` fetches of `path` fail.
    pub async fn fail_next(&self, path: &str, times: u32) {
        self.fail_remaining
            .lock()
            .await
            .insert(path.to_owned(), times);
    }

    /// Add fixed latency to every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total fetches served (including failures).
    pub fn total_fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentTransport for FixtureTransport {
    async fn fetch_segment(
        &self,
        path: &str,
        _vary_key: &VaryKey,
        _mode: PrefetchMode,
    ) -> Result<SegmentResponse, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.fail_remaining.lock().await;
            if let Some(remaining) = failures.get_mut(path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Network {
                        path: path.to_owned(),
                        reason: "injected failure".to_owned(),
                    });
                }
            }
        }

        self.responses
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(path.to_owned()))
    }
}
