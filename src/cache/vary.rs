//! Vary-param tracker: records which non-path inputs each route actually
//! reads, fed by render-layer instrumentation.
//!
//! Observation is monotone within a session: once a (category, name) pair has
//! been read for a path it stays in every future key for that path, favoring
//! correctness over hit rate. Inputs that were never read stay excluded,
//! favoring hit rate.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::cache::key::{canonical_vary_key, InputCategory, SegmentCacheKey, VaryKey};

/// Per-session tracker of observed inputs, keyed by route path.
#[derive(Debug, Default)]
pub struct VaryTracker {
    // (category, name) -> last seen value; the key set only grows.
    observed: HashMap<String, BTreeMap<(InputCategory, String), String>>,
}

impl VaryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a render of `path` read the given input. New names widen
    /// the vary key; repeated reads update the stored value.
    pub fn record_read(&mut self, path: &str, category: InputCategory, name: &str, value: &str) {
        let inputs = self.observed.entry(path.to_owned()).or_default();
        let first = inputs
            .insert((category, name.to_owned()), value.to_owned())
            .is_none();
        if first {
            debug!(path, %category, name, "vary input observed");
        }
    }

    /// Derive the cache key for a path from everything observed so far.
    /// Idempotent: re-deriving with no new observations yields the same key.
    pub fn derive_key(&self, path: &str) -> SegmentCacheKey {
        let vary = match self.observed.get(path) {
            Some(inputs) => canonical_vary_key(
                inputs
                    .iter()
                    .map(|((cat, name), value)| (*cat, name.clone(), value.clone())),
            ),
            None => VaryKey::none(),
        };
        SegmentCacheKey::new(path, vary)
    }

    /// Number of distinct (category, name) pairs observed for a path.
    pub fn observed_count(&self, path: &str) -> usize {
        self.observed.get(path).map_or(0, |m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unobserved_path_has_no_vary() {
        let tracker = VaryTracker::new();
        let key = tracker.derive_key("/about");
        assert!(key.vary_key.is_none());
        assert_eq!(key.path, "/about");
    }

    #[test]
    fn test_derivation_is_idempotent() {
        let mut tracker = VaryTracker::new();
        tracker.record_read("/blog", InputCategory::SearchParam, "q", "rust");
        let a = tracker.derive_key("/blog");
        let b = tracker.derive_key("/blog");
        assert_eq!(a, b);
    }

    #[test]
    fn test_observation_set_only_grows() {
        let mut tracker = VaryTracker::new();
        tracker.record_read("/blog", InputCategory::Cookie, "theme", "dark");
        assert_eq!(tracker.observed_count("/blog"), 1);

        // Re-reading the same input with a new value changes the key but not
        // the observed set.
        tracker.record_read("/blog", InputCategory::Cookie, "theme", "light");
        assert_eq!(tracker.observed_count("/blog"), 1);

        tracker.record_read("/blog", InputCategory::SearchParam, "q", "rust");
        assert_eq!(tracker.observed_count("/blog"), 2);
        assert!(tracker
            .derive_key("/blog")
            .vary_key
            .as_str()
            .contains("ck.theme=light"));
    }

    #[test]
    fn test_paths_tracked_independently() {
        let mut tracker = VaryTracker::new();
        tracker.record_read("/a", InputCategory::Cookie, "sid", "1");
        assert!(tracker.derive_key("/b").vary_key.is_none());
    }
}
