//! Runtime configuration for segment-nav.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All cache-related knobs (byte budget, freshness windows, scheduler limits,
//! navigation deadlines) live here.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Segment cache configuration.
    pub cache: CacheConfig,

    /// Prefetch scheduler configuration.
    pub prefetch: PrefetchConfig,

    /// Navigation reducer configuration.
    pub navigation: NavigationConfig,

    /// Instant-navigation validator configuration.
    pub validation: ValidationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            prefetch: PrefetchConfig::default(),
            navigation: NavigationConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Segment cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Byte budget for resident cache entries.
    pub max_bytes: usize,

    /// Seconds after which a fulfilled entry is served stale (0 = never stale).
    pub default_stale_secs: u64,

    /// Seconds after which a fulfilled entry is dropped entirely (0 = never).
    pub default_expire_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024, // 50 MB
            default_stale_secs: 300,
            default_expire_secs: 900,
        }
    }
}

/// Prefetch scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Maximum number of fetches in flight at once.
    pub max_concurrent: usize,

    /// Automatic retries per fetch before the entry is marked rejected.
    pub retry_limit: u32,

    /// Queue priority for navigation-triggered fetches.
    pub navigation_priority: u32,

    /// Queue priority for speculative prefetches.
    pub speculative_priority: u32,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            retry_limit: 1,
            navigation_priority: 100,
            speculative_priority: 10,
        }
    }
}

/// Navigation reducer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Deadline for cache population before pending branches hard-fall-back.
    pub commit_timeout_ms: u64,

    /// Commit with per-branch hard fallbacks instead of escalating the whole
    /// navigation when some branches miss the deadline or reject.
    pub allow_partial_commit: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            commit_timeout_ms: 3000,
            allow_partial_commit: true,
        }
    }
}

/// Validator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Production builds treat validation diagnostics as fatal; dev builds warn.
    pub production: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { production: false }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
