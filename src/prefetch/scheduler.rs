//! Prefetch scheduler: issues, dedupes, and sequences the fetches that
//! populate the segment cache ahead of navigation.
//!
//! Concurrent requests for the same (path, best-known vary key) share one
//! network fetch; late joiners attach to the in-flight task. The queue is
//! priority-ordered (navigation ahead of speculative) with bounded
//! concurrency, and a started fetch is never cancelled: abandoned tasks run
//! to completion and still populate the cache. Eviction, not cancellation,
//! is the memory-pressure release valve.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::key::SegmentCacheKey;
use crate::cache::store::{Lookup, PendingClaim, SharedCache};
use crate::cache::vary::VaryTracker;
use crate::config::PrefetchConfig;
use crate::prefetch::transport::{PrefetchMode, SegmentTransport};

/// Errors a prefetch task can settle with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrefetchError {
    #[error("fetch failed for {path}: {reason}")]
    FetchFailure { path: String, reason: String },

    #[error("deployment id mismatch: expected {expected}, got {actual}")]
    DeploymentMismatch { expected: String, actual: String },
}

/// What caused a task to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An in-progress navigation needs this segment now.
    Navigation,
    /// Speculative prefetch (link hover, viewport entry).
    Speculative,
}

/// Observable status of a prefetch task.
#[derive(Debug, Clone)]
pub enum TaskStatus {
    Queued,
    InFlight,
    Completed(Bytes),
    Failed(PrefetchError),
}

/// Handle onto a scheduled (possibly shared) prefetch task.
#[derive(Clone)]
pub struct PrefetchHandle {
    pub id: Uuid,
    pub key: SegmentCacheKey,
    status: watch::Receiver<TaskStatus>,
}

impl PrefetchHandle {
    /// Snapshot of the current status.
    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    /// Wait for the task to settle, returning the payload on completion.
    pub async fn wait(&mut self) -> Result<Bytes, PrefetchError> {
        loop {
            let status = self.status.borrow_and_update().clone();
            match status {
                TaskStatus::Completed(payload) => return Ok(payload),
                TaskStatus::Failed(err) => return Err(err),
                TaskStatus::Queued | TaskStatus::InFlight => {}
            }
            if self.status.changed().await.is_err() {
                return Err(PrefetchError::FetchFailure {
                    path: self.key.path.clone(),
                    reason: "scheduler dropped before completion".to_owned(),
                });
            }
        }
    }
}

/// Scheduler counters for monitoring and tests.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub deduped: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
}

struct QueuedTask {
    key: SegmentCacheKey,
    mode: PrefetchMode,
    priority: u32,
    tx: watch::Sender<TaskStatus>,
}

struct Inner {
    queue: VecDeque<QueuedTask>,
    /// Dedupe index over queued and running tasks.
    in_flight: HashMap<SegmentCacheKey, PrefetchHandle>,
    running: usize,
    stats: SchedulerStats,
}

/// The prefetch scheduler. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct PrefetchScheduler {
    cache: SharedCache,
    tracker: Arc<RwLock<VaryTracker>>,
    transport: Arc<dyn SegmentTransport>,
    /// Deployment id adopted from the first response; shared with the session.
    deployment: Arc<RwLock<Option<String>>>,
    inner: Arc<Mutex<Inner>>,
    config: PrefetchConfig,
}

impl PrefetchScheduler {
    pub fn new(
        cache: SharedCache,
        tracker: Arc<RwLock<VaryTracker>>,
        transport: Arc<dyn SegmentTransport>,
        deployment: Arc<RwLock<Option<String>>>,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            cache,
            tracker,
            transport,
            deployment,
            inner: Arc::new(Mutex::new(Inner {
                queue: VecDeque::new(),
                in_flight: HashMap::new(),
                running: 0,
                stats: SchedulerStats::default(),
            })),
            config,
        }
    }

    /// Schedule a fetch for `path`, deduping against in-flight tasks for the
    /// same (path, best-known vary key). A navigation joining a queued
    /// speculative task promotes its priority; a started fetch is untouched.
    pub async fn schedule(&self, path: &str, mode: PrefetchMode, trigger: Trigger) -> PrefetchHandle {
        let key = self.tracker.read().await.derive_key(path);
        let priority = match trigger {
            Trigger::Navigation => self.config.navigation_priority,
            Trigger::Speculative => self.config.speculative_priority,
        };

        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.in_flight.get(&key).cloned() {
            inner.stats.deduped += 1;
            if trigger == Trigger::Navigation {
                promote_queued(&mut inner.queue, &key, priority);
            }
            debug!(path, key = %key, "joined in-flight prefetch");
            return handle;
        }

        let (tx, rx) = watch::channel(TaskStatus::Queued);
        let handle = PrefetchHandle {
            id: Uuid::new_v4(),
            key: key.clone(),
            status: rx,
        };
        inner.in_flight.insert(key.clone(), handle.clone());
        inner.stats.scheduled += 1;

        // Insert in priority order, navigation ahead of speculative.
        let pos = inner
            .queue
            .iter()
            .position(|queued| queued.priority < priority)
            .unwrap_or(inner.queue.len());
        inner.queue.insert(
            pos,
            QueuedTask {
                key,
                mode,
                priority,
                tx,
            },
        );
        debug!(path, priority, "prefetch scheduled");
        drop(inner);

        self.pump().await;
        handle
    }

    /// Number of tasks queued or running.
    pub async fn in_flight_count(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.inner.lock().await.stats.clone()
    }

    /// Start queued tasks while concurrency allows. Boxed because spawned
    /// tasks call back into `pump` when they finish, which would otherwise
    /// make the future type recursive.
    fn pump(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            loop {
                let task = {
                    let mut inner = self.inner.lock().await;
                    if inner.running >= self.config.max_concurrent {
                        return;
                    }
                    match inner.queue.pop_front() {
                        Some(task) => {
                            inner.running += 1;
                            task
                        }
                        None => return,
                    }
                };
                let scheduler = self.clone();
                tokio::spawn(async move {
                    scheduler.run_task(task).await;
                });
            }
        })
    }

    async fn run_task(&self, task: QueuedTask) {
        let _ = task.tx.send(TaskStatus::InFlight);

        let claim = self.cache.lock().await.begin_pending(&task.key);
        if let PendingClaim::Joined(mut settled) = claim {
            // Another writer owns this key; mirror its result.
            let _ = settled.changed().await;
            let outcome = self.cache.lock().await.lookup(&task.key);
            match outcome {
                Lookup::Hit(payload) | Lookup::Stale(payload) => {
                    let _ = task.tx.send(TaskStatus::Completed(payload));
                }
                _ => {
                    let _ = task.tx.send(TaskStatus::Failed(PrefetchError::FetchFailure {
                        path: task.key.path.clone(),
                        reason: "shared fetch did not produce a payload".to_owned(),
                    }));
                }
            }
            self.finish(&task.key).await;
            return;
        }

        let mut attempt = 0u32;
        let result = loop {
            match self
                .transport
                .fetch_segment(&task.key.path, &task.key.vary_key, task.mode)
                .await
            {
                Ok(resp) => break Ok(resp),
                Err(err) if attempt < self.config.retry_limit => {
                    attempt += 1;
                    self.inner.lock().await.stats.retries += 1;
                    warn!(path = %task.key.path, attempt, error = %err, "fetch failed, retrying");
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(resp) => {
                if let Some(expected) = self.check_deployment(&resp.deployment_id).await {
                    warn!(
                        path = %task.key.path,
                        expected,
                        actual = %resp.deployment_id,
                        "deployment skew detected"
                    );
                    self.cache.lock().await.reject(&task.key);
                    let _ = task.tx.send(TaskStatus::Failed(PrefetchError::DeploymentMismatch {
                        expected,
                        actual: resp.deployment_id,
                    }));
                    self.inner.lock().await.stats.failed += 1;
                } else {
                    self.cache
                        .lock()
                        .await
                        .fulfill(&task.key, resp.payload.clone(), resp.tags);
                    let _ = task.tx.send(TaskStatus::Completed(resp.payload));
                    self.inner.lock().await.stats.completed += 1;
                }
            }
            Err(err) => {
                warn!(path = %task.key.path, error = %err, "fetch rejected after retry");
                self.cache.lock().await.reject(&task.key);
                let _ = task.tx.send(TaskStatus::Failed(PrefetchError::FetchFailure {
                    path: task.key.path.clone(),
                    reason: err.to_string(),
                }));
                self.inner.lock().await.stats.failed += 1;
            }
        }

        self.finish(&task.key).await;
    }

    /// Adopt the first observed deployment id; report a mismatch otherwise.
    async fn check_deployment(&self, actual: &str) -> Option<String> {
        let mut known = self.deployment.write().await;
        match known.as_deref() {
            None => {
                *known = Some(actual.to_owned());
                None
            }
            Some(expected) if expected != actual => Some(expected.to_owned()),
            Some(_) => None,
        }
    }

    async fn finish(&self, key: &SegmentCacheKey) {
        {
            let mut inner = self.inner.lock().await;
            inner.in_flight.remove(key);
            inner.running = inner.running.saturating_sub(1);
        }
        self.pump().await;
    }
}

fn promote_queued(queue: &mut VecDeque<QueuedTask>, key: &SegmentCacheKey, priority: u32) {
    let Some(pos) = queue.iter().position(|t| &t.key == key) else {
        return;
    };
    if queue[pos].priority >= priority {
        return;
    }
    let Some(mut task) = queue.remove(pos) else {
        return;
    };
    task.priority = priority;
    let new_pos = queue
        .iter()
        .position(|queued| queued.priority < priority)
        .unwrap_or(queue.len());
    queue.insert(new_pos, task);
}
