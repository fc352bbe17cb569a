//! Navigation session: the explicitly owned service bundle.
//!
//! A session owns the segment cache, vary tracker, prefetch scheduler, and
//! reducer, created together at session start and torn down on unload. All
//! external collaborators (render layer instrumentation, invalidation
//! signals, deployment skew) talk to the engine through this type.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cache::key::InputCategory;
use crate::cache::store::{new_shared_cache, CacheStats, EvictReason, SharedCache};
use crate::cache::vary::VaryTracker;
use crate::config::Config;
use crate::nav::reducer::{HardReason, NavigationReducer, NavigationResult, NavigationTarget};
use crate::prefetch::scheduler::{PrefetchHandle, PrefetchScheduler, SchedulerStats, Trigger};
use crate::prefetch::transport::{PrefetchMode, SegmentTransport};
use crate::tree::node::TreeArena;
use crate::validate::{InstantConfig, PrefetchPolicy, ValidationReport};

/// The navigation engine for one client session.
pub struct NavSession {
    config: Arc<Config>,
    cache: SharedCache,
    tracker: Arc<RwLock<VaryTracker>>,
    scheduler: PrefetchScheduler,
    reducer: NavigationReducer,
    deployment: Arc<RwLock<Option<String>>>,
    /// Per registered route: whether an instant commit is permitted.
    routes: RwLock<HashMap<String, bool>>,
}

impl NavSession {
    /// Build a session around an injected transport and the initial tree the
    /// document was served with.
    pub fn new(
        config: Config,
        transport: Arc<dyn SegmentTransport>,
        initial_tree: Arc<TreeArena>,
    ) -> Self {
        let config = Arc::new(config);
        let cache = new_shared_cache(config.cache.clone());
        let tracker = Arc::new(RwLock::new(VaryTracker::new()));
        let deployment = Arc::new(RwLock::new(None));

        let scheduler = PrefetchScheduler::new(
            cache.clone(),
            tracker.clone(),
            transport,
            deployment.clone(),
            config.prefetch.clone(),
        );
        let reducer = NavigationReducer::new(
            initial_tree,
            cache.clone(),
            tracker.clone(),
            scheduler.clone(),
            config.navigation.clone(),
        );

        info!(
            cache_budget = config.cache.max_bytes,
            max_concurrent = config.prefetch.max_concurrent,
            "navigation session created"
        );

        Self {
            config,
            cache,
            tracker,
            scheduler,
            reducer,
            deployment,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Render-layer instrumentation: a render of `path` read a non-path input.
    pub async fn on_input_read(&self, path: &str, category: InputCategory, name: &str, value: &str) {
        self.tracker
            .write()
            .await
            .record_read(path, category, name, value);
    }

    /// Register a route's build-time instant configuration together with its
    /// validation outcome. A route claiming static prefetch commits instantly
    /// only if the validator passed (or validation is explicitly disabled).
    pub async fn register_route(
        &self,
        path: &str,
        instant: &InstantConfig,
        report: &ValidationReport,
    ) {
        let allowed = instant.prefetch_mode != PrefetchPolicy::Static
            || report.valid
            || instant.disable_validation;
        if !allowed {
            warn!(path, "static route failed validation, instant commits disabled");
        }
        self.routes.write().await.insert(path.to_owned(), allowed);
    }

    /// Drive a navigation to the given target.
    pub async fn navigate(&self, target: NavigationTarget) -> NavigationResult {
        if self.routes.read().await.get(&target.path).copied() == Some(false) {
            return NavigationResult::HardNavigation(HardReason::UnvalidatedRoute);
        }
        self.reducer.navigate(target).await
    }

    /// Speculatively prefetch a path (link hover, viewport entry).
    pub async fn schedule_prefetch(&self, path: &str, mode: PrefetchMode) -> PrefetchHandle {
        self.scheduler.schedule(path, mode, Trigger::Speculative).await
    }

    /// The committed route tree, for the render layer.
    pub async fn committed_tree(&self) -> Arc<TreeArena> {
        self.reducer.committed_tree().await
    }

    /// A segment's cached payload, if resident and usable.
    pub async fn segment_payload(&self, path: &str) -> Option<Bytes> {
        let key = self.tracker.read().await.derive_key(path);
        match self.cache.lock().await.lookup(&key) {
            crate::cache::store::Lookup::Hit(payload)
            | crate::cache::store::Lookup::Stale(payload) => Some(payload),
            _ => None,
        }
    }

    /// Remove every cached entry carrying the tag, before the next lookup.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        self.cache.lock().await.invalidate_tag(tag)
    }

    /// Remove every cached entry for the path, before the next lookup.
    pub async fn invalidate_path(&self, path: &str) -> usize {
        self.cache.lock().await.invalidate_path(path)
    }

    /// Adopt a deployment id. A change against the known id flushes the
    /// cache: payloads from another build cannot be trusted.
    pub async fn set_deployment_id(&self, id: &str) {
        let mut known = self.deployment.write().await;
        if known.as_deref().is_some_and(|current| current != id) {
            warn!(
                previous = known.as_deref().unwrap_or(""),
                current = id,
                "deployment changed, flushing segment cache"
            );
            self.cache.lock().await.clear(EvictReason::DeploymentChange);
        }
        *known = Some(id.to_owned());
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    pub async fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tear the session down, dropping every cached entry. In-flight fetches
    /// settle against the cleared cache and are then discarded.
    pub async fn teardown(&self) {
        self.cache.lock().await.clear(EvictReason::DeploymentChange);
        info!("navigation session torn down");
    }
}
