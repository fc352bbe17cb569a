//! Integration tests for the segment cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use segment_nav::cache::key::{canonical_vary_key, InputCategory, SegmentCacheKey, VaryKey};
use segment_nav::cache::store::{EvictReason, Lookup, PendingClaim, SegmentCache};
use segment_nav::cache::vary::VaryTracker;
use segment_nav::config::CacheConfig;

fn key(path: &str) -> SegmentCacheKey {
    SegmentCacheKey::new(path, VaryKey::none())
}

fn cache_with_budget(max_bytes: usize) -> SegmentCache {
    SegmentCache::new(CacheConfig {
        max_bytes,
        default_stale_secs: 0,
        default_expire_secs: 0,
    })
}

#[test]
fn test_budget_two_eviction_example() {
    // budget=2; insert A, B; access A; insert C → B is evicted, A survives.
    let mut cache = cache_with_budget(2);
    cache.fulfill(&key("/a"), Bytes::from_static(b"1"), Vec::new());
    cache.fulfill(&key("/b"), Bytes::from_static(b"2"), Vec::new());

    assert!(matches!(cache.lookup(&key("/a")), Lookup::Hit(_)));

    cache.fulfill(&key("/c"), Bytes::from_static(b"3"), Vec::new());

    assert!(matches!(cache.lookup(&key("/b")), Lookup::Miss));
    assert!(matches!(cache.lookup(&key("/a")), Lookup::Hit(_)));
    assert!(matches!(cache.lookup(&key("/c")), Lookup::Hit(_)));
}

#[test]
fn test_no_over_eviction() {
    let evicted = Arc::new(AtomicUsize::new(0));
    let counter = evicted.clone();

    let mut cache = cache_with_budget(4);
    cache.set_evict_callback(Box::new(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    for path in ["/a", "/b", "/c", "/d"] {
        cache.fulfill(&key(path), Bytes::from_static(b"x"), Vec::new());
    }
    assert_eq!(cache.current_bytes(), 4);

    // One more byte only needs one eviction.
    cache.fulfill(&key("/e"), Bytes::from_static(b"y"), Vec::new());
    assert_eq!(evicted.load(Ordering::SeqCst), 1);
    assert!(cache.current_bytes() <= cache.budget());
}

#[test]
fn test_pinned_refresh_never_breaks_budget() {
    // The whole budget is held by a stale-while-revalidate refresh, which
    // eviction must not touch. A new insert stays non-resident instead of
    // pushing resident bytes past the budget.
    let mut cache = cache_with_budget(4);
    cache.fulfill(&key("/a"), Bytes::from_static(b"aaaa"), Vec::new());
    assert!(matches!(
        cache.begin_pending(&key("/a")),
        PendingClaim::Owner
    ));

    cache.fulfill(&key("/b"), Bytes::from_static(b"bb"), Vec::new());

    assert!(cache.current_bytes() <= cache.budget());
    assert!(matches!(cache.lookup(&key("/a")), Lookup::Stale(_)));
    assert!(matches!(cache.lookup(&key("/b")), Lookup::Miss));
}

#[test]
fn test_accounting_matches_resident_entries() {
    let mut cache = cache_with_budget(1024);
    cache.fulfill(&key("/a"), Bytes::from(vec![0u8; 100]), Vec::new());
    cache.fulfill(&key("/b"), Bytes::from(vec![0u8; 200]), Vec::new());
    assert_eq!(cache.current_bytes(), 300);

    // Overwriting replaces, never double-counts.
    cache.fulfill(&key("/a"), Bytes::from(vec![0u8; 50]), Vec::new());
    assert_eq!(cache.current_bytes(), 250);

    cache.invalidate_path("/b");
    assert_eq!(cache.current_bytes(), 50);
}

#[test]
fn test_vary_key_round_trip_isolation() {
    // Same path, different vary inputs: never another key's payload.
    let mut cache = cache_with_budget(1024);

    let anon = SegmentCacheKey::new("/profile", VaryKey::none());
    let user = SegmentCacheKey::new(
        "/profile",
        canonical_vary_key(vec![(InputCategory::Cookie, "uid".into(), "7".into())]),
    );

    cache.fulfill(&anon, Bytes::from_static(b"anonymous"), Vec::new());
    cache.fulfill(&user, Bytes::from_static(b"user-7"), Vec::new());

    match cache.lookup(&anon) {
        Lookup::Hit(payload) => assert_eq!(&payload[..], b"anonymous"),
        other => panic!("expected hit, got {other:?}"),
    }
    match cache.lookup(&user) {
        Lookup::Hit(payload) => assert_eq!(&payload[..], b"user-7"),
        other => panic!("expected hit, got {other:?}"),
    }
}

#[test]
fn test_tracker_derived_keys_round_trip() {
    let mut tracker = VaryTracker::new();
    let mut cache = cache_with_budget(1024);

    let before = tracker.derive_key("/search");
    cache.fulfill(&before, Bytes::from_static(b"plain"), Vec::new());

    // Observing an input widens the key; the old entry is not returned.
    tracker.record_read("/search", InputCategory::SearchParam, "q", "rust");
    let after = tracker.derive_key("/search");
    assert_ne!(before, after);
    assert!(matches!(cache.lookup(&after), Lookup::Miss));

    cache.fulfill(&after, Bytes::from_static(b"rust results"), Vec::new());
    match cache.lookup(&after) {
        Lookup::Hit(payload) => assert_eq!(&payload[..], b"rust results"),
        other => panic!("expected hit, got {other:?}"),
    }
}

#[test]
fn test_path_invalidation_removes_all_variants() {
    let mut cache = cache_with_budget(1024);
    let a = SegmentCacheKey::new("/p", VaryKey::none());
    let b = SegmentCacheKey::new(
        "/p",
        canonical_vary_key(vec![(InputCategory::Cookie, "sid".into(), "1".into())]),
    );
    cache.fulfill(&a, Bytes::from_static(b"x"), Vec::new());
    cache.fulfill(&b, Bytes::from_static(b"y"), Vec::new());

    assert_eq!(cache.invalidate_path("/p"), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.current_bytes(), 0);
}

#[test]
fn test_deployment_change_flushes_everything() {
    let mut cache = cache_with_budget(1024);
    cache.fulfill(&key("/a"), Bytes::from_static(b"x"), Vec::new());
    cache.fulfill(&key("/b"), Bytes::from_static(b"y"), Vec::new());

    cache.clear(EvictReason::DeploymentChange);
    assert!(cache.is_empty());
    assert_eq!(cache.current_bytes(), 0);
}

#[test]
fn test_stale_entries_served_stale() {
    let mut cache = SegmentCache::new(CacheConfig {
        max_bytes: 1024,
        default_stale_secs: 1,
        default_expire_secs: 0,
    });
    cache.fulfill(&key("/a"), Bytes::from_static(b"old"), Vec::new());

    std::thread::sleep(std::time::Duration::from_millis(1100));

    match cache.lookup(&key("/a")) {
        Lookup::Stale(payload) => assert_eq!(&payload[..], b"old"),
        other => panic!("expected stale, got {other:?}"),
    }
}

#[test]
fn test_expired_entries_are_misses() {
    let mut cache = SegmentCache::new(CacheConfig {
        max_bytes: 1024,
        default_stale_secs: 0,
        default_expire_secs: 1,
    });
    cache.fulfill(&key("/a"), Bytes::from_static(b"old"), Vec::new());

    std::thread::sleep(std::time::Duration::from_millis(1100));

    assert!(matches!(cache.lookup(&key("/a")), Lookup::Miss));
    assert_eq!(cache.current_bytes(), 0);
}
