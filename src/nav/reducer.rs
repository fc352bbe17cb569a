//! Navigation reducer: the top-level state machine driving each navigation.
//!
//! Per navigation: diff the current tree against the target, render reusable
//! branches from the committed tree, serve cache hits instantly, and keep
//! branches with misses pending behind navigation-priority fetches until they
//! resolve or the deadline elapses. Transitions are serialized by a
//! generation counter: a newer `navigate` supersedes an older pending one,
//! whose fetches still finish and populate the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::store::{Lookup, SharedCache};
use crate::cache::vary::VaryTracker;
use crate::config::NavigationConfig;
use crate::prefetch::scheduler::{PrefetchError, PrefetchHandle, PrefetchScheduler, Trigger};
use crate::prefetch::transport::PrefetchMode;
use crate::tree::differ::{diff, SegmentDecision};
use crate::tree::node::TreeArena;

/// Reducer lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReducerPhase {
    Idle,
    Pending,
    Committed,
}

/// Destination of a navigation.
#[derive(Clone)]
pub struct NavigationTarget {
    /// URL path of the destination (used for validator gating).
    pub path: String,
    /// The server-sent route tree for the destination.
    pub tree: Arc<TreeArena>,
}

/// Why a branch (or the whole navigation) fell back to a full reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardReason {
    /// The differ found no safe partial reconciliation.
    TreeStructure,
    /// The branch fetch was rejected after its retry.
    FetchRejected,
    /// Cache population missed the configured deadline.
    Timeout,
    /// The server is running a different build than the client knows.
    DeploymentMismatch,
    /// The route claims static prefetch but was not validated in this build.
    UnvalidatedRoute,
}

/// Per-branch outcome of a committed navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    /// Rendered content reused unchanged.
    Reused,
    /// Served from cache with zero round-trip.
    Instant,
    /// Served stale from cache; a refresh is in flight.
    Refreshing,
    /// Fetched during this navigation before commit.
    Fetched,
    /// This branch alone degrades to a full reload.
    HardFallback(HardReason),
}

/// Result of one `navigate` call.
#[derive(Debug)]
pub enum NavigationResult {
    Committed(CommitSummary),
    /// The whole navigation degrades to a full reload.
    HardNavigation(HardReason),
    /// A newer navigation superseded this one before it committed.
    Superseded,
}

/// What happened per branch, plus whether the navigation painted without any
/// round-trip.
#[derive(Debug)]
pub struct CommitSummary {
    pub outcomes: Vec<(String, BranchOutcome)>,
    pub instant: bool,
}

/// The navigation state machine. One logical owner; a second `navigate`
/// supersedes rather than runs concurrently.
pub struct NavigationReducer {
    cache: SharedCache,
    tracker: Arc<RwLock<VaryTracker>>,
    scheduler: PrefetchScheduler,
    current: RwLock<Arc<TreeArena>>,
    phase: RwLock<ReducerPhase>,
    generation: AtomicU64,
    config: NavigationConfig,
}

impl NavigationReducer {
    pub fn new(
        initial: Arc<TreeArena>,
        cache: SharedCache,
        tracker: Arc<RwLock<VaryTracker>>,
        scheduler: PrefetchScheduler,
        config: NavigationConfig,
    ) -> Self {
        Self {
            cache,
            tracker,
            scheduler,
            current: RwLock::new(initial),
            phase: RwLock::new(ReducerPhase::Idle),
            generation: AtomicU64::new(0),
            config,
        }
    }

    /// The committed route tree.
    pub async fn committed_tree(&self) -> Arc<TreeArena> {
        self.current.read().await.clone()
    }

    pub async fn phase(&self) -> ReducerPhase {
        *self.phase.read().await
    }

    /// Drive one navigation to commit, supersession, or hard fallback.
    pub async fn navigate(&self, target: NavigationTarget) -> NavigationResult {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        *self.phase.write().await = ReducerPhase::Pending;

        // Snapshot: the previous tree stays alive for in-flight renders.
        let previous = self.current.read().await.clone();
        let decisions = diff(&previous, &target.tree);

        if decisions.decision(target.tree.root()) == SegmentDecision::Hard {
            warn!(path = %target.path, "root branch unreconcilable, hard navigation");
            *self.phase.write().await = ReducerPhase::Idle;
            return NavigationResult::HardNavigation(HardReason::TreeStructure);
        }

        let mut outcomes: Vec<(String, BranchOutcome)> = Vec::new();
        let mut pending: Vec<(String, PrefetchHandle)> = Vec::new();
        let mut hard_prefixes: Vec<String> = Vec::new();
        let mut instant = true;

        for (node, path) in target.tree.segment_paths() {
            if under_hard_prefix(&hard_prefixes, &path) {
                continue;
            }
            match decisions.decision(node) {
                SegmentDecision::Hard => {
                    outcomes.push((path.clone(), BranchOutcome::HardFallback(HardReason::TreeStructure)));
                    hard_prefixes.push(path);
                }
                SegmentDecision::Reuse => {
                    outcomes.push((path, BranchOutcome::Reused));
                }
                SegmentDecision::Refetch => {
                    let key = self.tracker.read().await.derive_key(&path);
                    let lookup = self.cache.lock().await.lookup(&key);
                    match lookup {
                        Lookup::Hit(_) => {
                            debug!(path, "branch served instantly from cache");
                            outcomes.push((path, BranchOutcome::Instant));
                        }
                        Lookup::Stale(_) => {
                            // Serve stale now, refresh behind the scenes.
                            self.scheduler
                                .schedule(&path, PrefetchMode::Full, Trigger::Speculative)
                                .await;
                            outcomes.push((path, BranchOutcome::Refreshing));
                        }
                        Lookup::Pending(_) | Lookup::Miss => {
                            instant = false;
                            let handle = self
                                .scheduler
                                .schedule(&path, PrefetchMode::Full, Trigger::Navigation)
                                .await;
                            pending.push((path, handle));
                        }
                    }
                }
            }
        }

        // Resolve pending branches under the shared deadline.
        let deadline = Duration::from_millis(self.config.commit_timeout_ms);
        for (path, mut handle) in pending {
            let remaining = deadline.saturating_sub(started.elapsed());
            let outcome = match timeout(remaining, handle.wait()).await {
                Ok(Ok(_payload)) => BranchOutcome::Fetched,
                Ok(Err(PrefetchError::DeploymentMismatch { .. })) => {
                    *self.phase.write().await = ReducerPhase::Idle;
                    return NavigationResult::HardNavigation(HardReason::DeploymentMismatch);
                }
                Ok(Err(err)) => {
                    warn!(path, error = %err, "branch fetch rejected, hard fallback for branch");
                    BranchOutcome::HardFallback(HardReason::FetchRejected)
                }
                Err(_elapsed) => {
                    warn!(path, "branch fetch missed deadline, hard fallback for branch");
                    BranchOutcome::HardFallback(HardReason::Timeout)
                }
            };
            outcomes.push((path, outcome));

            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "navigation superseded while pending");
                return NavigationResult::Superseded;
            }
        }

        if !self.config.allow_partial_commit {
            if let Some((_, BranchOutcome::HardFallback(reason))) = outcomes
                .iter()
                .find(|(_, o)| matches!(o, BranchOutcome::HardFallback(_)))
            {
                *self.phase.write().await = ReducerPhase::Idle;
                return NavigationResult::HardNavigation(*reason);
            }
        }

        // Check-and-swap under the tree lock: a navigation superseded after
        // its last pending await must never overwrite a newer commit.
        {
            let mut current = self.current.write().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "navigation superseded before commit");
                return NavigationResult::Superseded;
            }
            *current = target.tree.clone();
        }
        *self.phase.write().await = ReducerPhase::Committed;
        info!(
            generation,
            path = %target.path,
            branches = outcomes.len(),
            instant,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "navigation committed"
        );
        NavigationResult::Committed(CommitSummary { outcomes, instant })
    }
}

fn under_hard_prefix(prefixes: &[String], path: &str) -> bool {
    prefixes.iter().any(|prefix| {
        path != prefix
            && (path.starts_with(&format!("{prefix}/"))
                || (prefix == "/" && path.starts_with('/')))
    })
}
