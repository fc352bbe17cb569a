//! Segment cache subsystem: cache keys, vary-input tracking, and the
//! size-bounded LRU store.

pub mod key;
pub mod store;
pub mod vary;
