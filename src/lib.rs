//! segment-nav: client-side navigation engine.
//!
//! Decides, per navigation, what can be rendered instantly from cache versus
//! what must be fetched, and maintains a segment-keyed prefetch/render cache
//! with LRU eviction under a byte budget:
//!   route tree differ → segment cache (path + vary key) → prefetch
//!   scheduler → navigation reducer, plus a build-time validator proving a
//!   route's static shell is safe to show before dynamic data resolves.
//!
//! Payloads are opaque bytes; rendering and wire encoding belong to external
//! collaborators behind the [`prefetch::transport::SegmentTransport`] seam.

pub mod cache;
pub mod config;
pub mod nav;
pub mod prefetch;
pub mod tree;
pub mod validate;

/// Initialize tracing for binaries and examples embedding the engine.
/// Honors `RUST_LOG`, falling back to a crate-scoped default.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "segment_nav=debug"
    } else {
        "segment_nav=info"
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .try_init();
}
