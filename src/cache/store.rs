//! The segment cache: a size-bounded LRU store mapping (path, vary key) to
//! cached payloads.
//!
//! The store is the central coordinator for cached segment data. It:
//! - Tracks resident bytes exactly (accounting always equals the sum of
//!   resident entries)
//! - Evicts least-recently-accessed entries before any insert that would
//!   exceed the byte budget, invoking a callback per evicted entry
//! - Uses a Pending entry per key as a mutex so concurrent writers for the
//!   same key attach to the in-flight fetch instead of re-entering
//! - Removes tagged entries on revalidation signals independent of LRU order

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::cache::key::SegmentCacheKey;
use crate::config::CacheConfig;

/// Lifecycle state of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// A fetch for this key is in flight; the entry acts as a per-key mutex.
    Pending,
    /// Payload is resident and fresh.
    Fulfilled,
    /// The fetch failed after its retry; served as a miss until replaced.
    Rejected,
    /// Payload is resident but past its freshness window.
    Stale,
}

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    Capacity,
    TagInvalidation,
    PathInvalidation,
    Expired,
    DeploymentChange,
}

/// One cached segment. Exclusively owned by the cache.
#[derive(Debug)]
pub struct SegmentCacheEntry {
    pub key: SegmentCacheKey,
    pub payload: Bytes,
    pub size: usize,
    pub last_accessed: Instant,
    pub state: EntryState,
    pub expires_at: Option<Instant>,
    pub stale_at: Option<Instant>,
    pub tags: Vec<String>,
}

struct Slot {
    entry: SegmentCacheEntry,
    /// Position in the recency order; None while the entry holds no resident
    /// payload (fresh Pending and Rejected entries).
    order_token: Option<u64>,
    /// Present while Pending; receivers are woken when the entry settles.
    signal: Option<watch::Sender<bool>>,
}

/// Outcome of a cache lookup. A miss is normal control flow, not an error.
#[derive(Debug)]
pub enum Lookup {
    /// Fresh payload.
    Hit(Bytes),
    /// Resident but past its freshness window; usable, should be refreshed.
    Stale(Bytes),
    /// A fetch is in flight; subscribe to be woken when it settles.
    Pending(watch::Receiver<bool>),
    Miss,
}

/// Result of claiming the pending slot for a key.
pub enum PendingClaim {
    /// Caller owns the fetch for this key.
    Owner,
    /// Another fetch is in flight; wait on the receiver instead.
    Joined(watch::Receiver<bool>),
}

/// Callback invoked once per evicted entry.
pub type EvictCallback = Box<dyn Fn(&SegmentCacheKey, EvictReason) + Send + Sync>;

/// Cache counters for monitoring and tests.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub invalidated: u64,
}

/// The size-bounded LRU segment cache.
pub struct SegmentCache {
    entries: HashMap<SegmentCacheKey, Slot>,
    /// Recency order: LRU at the first key, MRU at the last.
    recency: BTreeMap<u64, SegmentCacheKey>,
    clock: u64,
    current_bytes: usize,
    budget: usize,
    on_evict: Option<EvictCallback>,
    stats: CacheStats,
    config: CacheConfig,
}

impl SegmentCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            current_bytes: 0,
            budget: config.max_bytes,
            on_evict: None,
            stats: CacheStats::default(),
            config,
        }
    }

    /// Install the per-entry eviction callback.
    pub fn set_evict_callback(&mut self, cb: EvictCallback) {
        self.on_evict = Some(cb);
    }

    /// Look up a key, re-ordering on hit.
    pub fn lookup(&mut self, key: &SegmentCacheKey) -> Lookup {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(slot) => {
                slot.entry.state != EntryState::Pending
                    && slot.entry.expires_at.is_some_and(|at| at <= now)
            }
            None => {
                self.stats.misses += 1;
                return Lookup::Miss;
            }
        };
        if expired {
            self.remove_slot(key, EvictReason::Expired);
            self.stats.expired += 1;
            self.stats.misses += 1;
            return Lookup::Miss;
        }

        let token = self.next_token();
        let slot = match self.entries.get_mut(key) {
            Some(slot) => slot,
            None => return Lookup::Miss,
        };

        match slot.entry.state {
            EntryState::Pending => {
                // A refresh keeps the previous payload serving while pending.
                if !slot.entry.payload.is_empty() {
                    slot.entry.last_accessed = now;
                    return Lookup::Stale(slot.entry.payload.clone());
                }
                if let Some(tx) = &slot.signal {
                    return Lookup::Pending(tx.subscribe());
                }
                Lookup::Miss
            }
            EntryState::Rejected => {
                self.stats.misses += 1;
                Lookup::Miss
            }
            EntryState::Fulfilled | EntryState::Stale => {
                slot.entry.last_accessed = now;
                let stale = slot.entry.stale_at.is_some_and(|at| at <= now);
                if stale {
                    slot.entry.state = EntryState::Stale;
                }
                let payload = slot.entry.payload.clone();

                // Re-order: move to the MRU end.
                if let Some(old) = slot.order_token.replace(token) {
                    self.recency.remove(&old);
                }
                self.recency.insert(token, key.clone());

                if stale {
                    Lookup::Stale(payload)
                } else {
                    self.stats.hits += 1;
                    Lookup::Hit(payload)
                }
            }
        }
    }

    /// Claim the pending slot for a key. The first claimant owns the fetch;
    /// later claimants join the in-flight one. A refresh of a resident entry
    /// keeps its payload (and byte accounting) in place until fulfilled.
    pub fn begin_pending(&mut self, key: &SegmentCacheKey) -> PendingClaim {
        if let Some(slot) = self.entries.get(key) {
            if slot.entry.state == EntryState::Pending {
                if let Some(tx) = &slot.signal {
                    return PendingClaim::Joined(tx.subscribe());
                }
            }
        }

        let (tx, _rx) = watch::channel(false);
        match self.entries.get_mut(key) {
            Some(slot) => {
                // Rejected tombstones restart clean; resident entries keep serving.
                if slot.entry.state == EntryState::Rejected {
                    slot.entry.payload = Bytes::new();
                }
                slot.entry.state = EntryState::Pending;
                slot.signal = Some(tx);
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    Slot {
                        entry: SegmentCacheEntry {
                            key: key.clone(),
                            payload: Bytes::new(),
                            size: 0,
                            last_accessed: Instant::now(),
                            state: EntryState::Pending,
                            expires_at: None,
                            stale_at: None,
                            tags: Vec::new(),
                        },
                        order_token: None,
                        signal: Some(tx),
                    },
                );
            }
        }
        PendingClaim::Owner
    }

    /// Install a fulfilled payload for a key, evicting from the LRU end first
    /// if the insert would exceed the budget. Payloads larger than the whole
    /// budget are never made resident; waiters are still woken.
    pub fn fulfill(&mut self, key: &SegmentCacheKey, payload: Bytes, tags: Vec<String>) {
        let size = payload.len();
        let now = Instant::now();

        // Detach any previous residency for this key before evicting.
        if let Some(slot) = self.entries.get_mut(key) {
            self.current_bytes -= slot.entry.size;
            slot.entry.size = 0;
            if let Some(token) = slot.order_token.take() {
                self.recency.remove(&token);
            }
        }

        if size > self.budget {
            warn!(key = %key, size, budget = self.budget, "payload exceeds cache budget, not cached");
            if let Some(slot) = self.entries.remove(key) {
                if let Some(tx) = slot.signal {
                    let _ = tx.send(true);
                }
            }
            return;
        }

        self.evict_until_fits(size);

        // Pending refreshes retain their resident bytes and are never
        // evicted, so eviction alone may not free enough. The payload still
        // reaches waiters through the fetch handle; it just stays
        // non-resident rather than breaking the budget.
        if self.current_bytes + size > self.budget {
            warn!(
                key = %key,
                size,
                resident = self.current_bytes,
                "budget held by in-flight refreshes, not cached"
            );
            if let Some(slot) = self.entries.remove(key) {
                if let Some(tx) = slot.signal {
                    let _ = tx.send(true);
                }
            }
            return;
        }

        let token = self.next_token();
        let stale_at = freshness(now, self.config.default_stale_secs);
        let expires_at = freshness(now, self.config.default_expire_secs);

        let signal = match self.entries.get_mut(key) {
            Some(slot) => {
                slot.entry.payload = payload;
                slot.entry.size = size;
                slot.entry.last_accessed = now;
                slot.entry.state = EntryState::Fulfilled;
                slot.entry.stale_at = stale_at;
                slot.entry.expires_at = expires_at;
                slot.entry.tags = tags;
                slot.order_token = Some(token);
                slot.signal.take()
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    Slot {
                        entry: SegmentCacheEntry {
                            key: key.clone(),
                            payload,
                            size,
                            last_accessed: now,
                            state: EntryState::Fulfilled,
                            expires_at,
                            stale_at,
                            tags,
                        },
                        order_token: Some(token),
                        signal: None,
                    },
                );
                None
            }
        };

        self.current_bytes += size;
        self.recency.insert(token, key.clone());
        debug!(key = %key, size, resident = self.current_bytes, "segment cached");

        if let Some(tx) = signal {
            let _ = tx.send(true);
        }
    }

    /// Mark a key's fetch as rejected, waking any waiters. The entry stays
    /// resident as a zero-byte tombstone until the next `begin_pending`.
    pub fn reject(&mut self, key: &SegmentCacheKey) {
        if let Some(slot) = self.entries.get_mut(key) {
            self.current_bytes -= slot.entry.size;
            slot.entry.size = 0;
            slot.entry.payload = Bytes::new();
            slot.entry.state = EntryState::Rejected;
            if let Some(token) = slot.order_token.take() {
                self.recency.remove(&token);
            }
            if let Some(tx) = slot.signal.take() {
                let _ = tx.send(true);
            }
        }
    }

    /// Evict least-recently-accessed entries until `incoming` more bytes fit.
    /// Pending entries are skipped, never evicted mid-fetch.
    pub fn evict_until_fits(&mut self, incoming: usize) {
        let mut skipped: Vec<(u64, SegmentCacheKey)> = Vec::new();
        let mut evicted = 0usize;
        while self.current_bytes + incoming > self.budget {
            let Some((token, key)) = self.recency.pop_first() else {
                break;
            };
            let pending = self
                .entries
                .get(&key)
                .is_some_and(|s| s.entry.state == EntryState::Pending);
            if pending {
                skipped.push((token, key));
                continue;
            }
            self.remove_slot(&key, EvictReason::Capacity);
            self.stats.evictions += 1;
            evicted += 1;
        }
        for (token, key) in skipped {
            self.recency.insert(token, key);
        }
        if evicted > 0 {
            info!(evicted, resident = self.current_bytes, "eviction round complete");
        }
    }

    /// Remove every entry carrying the given tag, regardless of recency.
    pub fn invalidate_tag(&mut self, tag: &str) -> usize {
        let keys: Vec<SegmentCacheKey> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.tags.iter().any(|t| t == tag))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove_slot(key, EvictReason::TagInvalidation);
        }
        self.stats.invalidated += keys.len() as u64;
        keys.len()
    }

    /// Remove every entry for the given path (all vary variants).
    pub fn invalidate_path(&mut self, path: &str) -> usize {
        let keys: Vec<SegmentCacheKey> = self
            .entries
            .keys()
            .filter(|key| key.path == path)
            .cloned()
            .collect();
        for key in &keys {
            self.remove_slot(key, EvictReason::PathInvalidation);
        }
        self.stats.invalidated += keys.len() as u64;
        keys.len()
    }

    /// Drop everything (deployment skew: the cache cannot be trusted).
    pub fn clear(&mut self, reason: EvictReason) {
        let keys: Vec<SegmentCacheKey> = self.entries.keys().cloned().collect();
        for key in &keys {
            self.remove_slot(key, reason);
        }
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Current state of an entry, if resident.
    pub fn entry_state(&self, key: &SegmentCacheKey) -> Option<EntryState> {
        self.entries.get(key).map(|slot| slot.entry.state)
    }

    fn next_token(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove_slot(&mut self, key: &SegmentCacheKey, reason: EvictReason) {
        if let Some(slot) = self.entries.remove(key) {
            self.current_bytes -= slot.entry.size;
            if let Some(token) = slot.order_token {
                self.recency.remove(&token);
            }
            if let Some(tx) = slot.signal {
                let _ = tx.send(true);
            }
            debug!(key = %key, ?reason, "entry removed");
            if let Some(cb) = &self.on_evict {
                cb(key, reason);
            }
        }
    }
}

/// Thread-safe wrapper around the segment cache.
pub type SharedCache = Arc<Mutex<SegmentCache>>;

/// Create a new thread-safe segment cache.
pub fn new_shared_cache(config: CacheConfig) -> SharedCache {
    Arc::new(Mutex::new(SegmentCache::new(config)))
}

fn freshness(now: Instant, secs: u64) -> Option<Instant> {
    if secs == 0 {
        None
    } else {
        Some(now + Duration::from_secs(secs))
    }
}
