//! Prefetching: the transport seam and the scheduler that issues, dedupes,
//! and sequences segment fetches ahead of navigation.

pub mod scheduler;
pub mod transport;
