//! Cache key types and canonical vary-key encoding.
//!
//! A segment cache key is the route path plus a vary key: a deterministic
//! encoding of the non-path inputs (search params, cookies, root params) the
//! route has actually been observed to read. Never-read categories stay out
//! of the key so unrelated input changes do not fragment the cache.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a non-path input a route can read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum InputCategory {
    SearchParam,
    Cookie,
    RootParam,
}

impl InputCategory {
    /// Short stable prefix used in the canonical encoding.
    pub fn prefix(&self) -> &'static str {
        match self {
            InputCategory::SearchParam => "sp",
            InputCategory::Cookie => "ck",
            InputCategory::RootParam => "rp",
        }
    }
}

impl fmt::Display for InputCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Canonical vary key. Empty when the route has read no non-path inputs.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VaryKey(String);

impl VaryKey {
    /// The vary key of a route with no observed inputs.
    pub fn none() -> Self {
        VaryKey(String::new())
    }

    /// Whether no inputs contribute to this key.
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of one cached segment: route path plus vary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentCacheKey {
    pub path: String,
    pub vary_key: VaryKey,
}

impl SegmentCacheKey {
    pub fn new(path: impl Into<String>, vary_key: VaryKey) -> Self {
        Self {
            path: path.into(),
            vary_key,
        }
    }
}

impl fmt::Display for SegmentCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.vary_key.is_none() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}?{}", self.path, self.vary_key)
        }
    }
}

/// Canonically encode a set of observed inputs: sorted by category then name,
/// deduplicated, `cat.name=value` joined with `&`. Deterministic for any
/// iteration order of the source. Names and values are escaped so separator
/// characters in an input can never collide with the structure of the key.
pub fn canonical_vary_key(
    entries: impl IntoIterator<Item = (InputCategory, String, String)>,
) -> VaryKey {
    let mut items: Vec<(InputCategory, String, String)> = entries.into_iter().collect();
    items.sort();
    items.dedup();
    if items.is_empty() {
        return VaryKey::none();
    }
    let encoded = items
        .iter()
        .map(|(cat, name, value)| {
            format!("{}.{}={}", cat.prefix(), escape(name), escape(value))
        })
        .collect::<Vec<_>>()
        .join("&");
    VaryKey(encoded)
}

/// Percent-encode the characters the canonical encoding uses as separators.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '.' => out.push_str("%2E"),
            other => out.push(other),
        }
    }
    out
}
