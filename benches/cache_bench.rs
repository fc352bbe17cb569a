//! Benchmarks for the segment cache and tree differ.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use segment_nav::cache::key::{SegmentCacheKey, VaryKey};
use segment_nav::cache::store::SegmentCache;
use segment_nav::config::CacheConfig;
use segment_nav::tree::differ::diff;
use segment_nav::tree::node::{DynamicKind, SegmentValue, TreeArena};

fn bench_lru_insert_evict(c: &mut Criterion) {
    // Budget holds ~1,000 of the 10,000 inserted entries, so steady-state
    // inserts each trigger an eviction.
    c.bench_function("lru_insert_10k_with_eviction", |b| {
        b.iter(|| {
            let mut cache = SegmentCache::new(CacheConfig {
                max_bytes: 128 * 1000,
                default_stale_secs: 0,
                default_expire_secs: 0,
            });
            for i in 0..10_000u32 {
                let key = SegmentCacheKey::new(format!("/page/{i}"), VaryKey::none());
                cache.fulfill(&key, Bytes::from(vec![0u8; 128]), Vec::new());
            }
            black_box(cache.current_bytes());
        })
    });
}

fn bench_lru_lookup(c: &mut Criterion) {
    let mut cache = SegmentCache::new(CacheConfig {
        max_bytes: 64 * 1024 * 1024,
        default_stale_secs: 0,
        default_expire_secs: 0,
    });
    let keys: Vec<SegmentCacheKey> = (0..10_000u32)
        .map(|i| SegmentCacheKey::new(format!("/page/{i}"), VaryKey::none()))
        .collect();
    for key in &keys {
        cache.fulfill(key, Bytes::from(vec![0u8; 64]), Vec::new());
    }

    c.bench_function("lru_lookup_hot_10k", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            black_box(cache.lookup(black_box(key)));
        })
    });
}

fn deep_tree(depth: usize, slug: &str) -> TreeArena {
    let mut b = TreeArena::builder();
    let root = b.add(SegmentValue::Static(String::new()), true);
    let mut parent = root;
    for level in 0..depth {
        let child = b.add(SegmentValue::Static(format!("section{level}")), false);
        b.attach(parent, "children", child);
        parent = child;
    }
    let leaf = b.add(
        SegmentValue::Dynamic {
            name: "slug".into(),
            value: slug.into(),
            kind: DynamicKind::Single,
        },
        false,
    );
    b.attach(parent, "children", leaf);
    b.build(root)
}

fn bench_differ(c: &mut Criterion) {
    let old = deep_tree(64, "first");
    let new = deep_tree(64, "second");

    c.bench_function("diff_depth_64", |b| {
        b.iter(|| {
            let map = diff(black_box(&old), black_box(&new));
            black_box(map.has_hard());
        })
    });
}

criterion_group!(benches, bench_lru_insert_evict, bench_lru_lookup, bench_differ);
criterion_main!(benches);
