//! Instant-navigation validator.
//!
//! Static analysis over the declared route manifest (not live data): a route
//! may claim static prefetch only if every request-time data access below it
//! is wrapped by a content boundary at or above the access. The walk runs
//! once per declared representative parameter sample; samples that disagree
//! on whether a boundary is needed make the route invalid rather than
//! guessing a merge policy. Diagnostics are fatal in production builds and
//! warnings in dev; they never block serving.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::cache::key::InputCategory;

/// Build-time prefetch claim for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefetchPolicy {
    /// The route's shell is fully static and may be shown before any dynamic
    /// data resolves.
    Static,
    /// Prefetch only what runtime sampling proves parameter-invariant.
    Runtime,
    /// No instant claim; navigation blocks on data.
    Blocking,
}

/// Per-route static declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantConfig {
    pub prefetch_mode: PrefetchPolicy,
    pub validation_samples: Vec<ParamSample>,
    #[serde(default)]
    pub disable_validation: bool,
}

/// One representative parameter assignment used during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSample {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

/// A request-time data access declared by a manifest node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicRead {
    /// Which input the node reads (cookies, search params, root params).
    pub source: InputCategory,
    /// If set, the read only occurs for these sample names; otherwise it
    /// occurs for every sample.
    pub only_for_samples: Option<Vec<String>>,
}

impl DynamicRead {
    fn applies_to(&self, sample: &str) -> bool {
        match &self.only_for_samples {
            Some(names) => names.iter().any(|n| n == sample),
            None => true,
        }
    }
}

/// One node of the declared route manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestNode {
    /// Segment name, for diagnostics.
    pub segment: String,
    /// Whether this node declares a content boundary.
    pub has_boundary: bool,
    /// Request-time reads performed by this node itself.
    pub dynamic_reads: Vec<DynamicRead>,
    pub children: Vec<ManifestNode>,
}

impl ManifestNode {
    pub fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_owned(),
            has_boundary: false,
            dynamic_reads: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_boundary(mut self) -> Self {
        self.has_boundary = true;
        self
    }

    pub fn reads(mut self, source: InputCategory) -> Self {
        self.dynamic_reads.push(DynamicRead {
            source,
            only_for_samples: None,
        });
        self
    }

    pub fn reads_for_samples(mut self, source: InputCategory, samples: &[&str]) -> Self {
        self.dynamic_reads.push(DynamicRead {
            source,
            only_for_samples: Some(samples.iter().map(|s| (*s).to_owned()).collect()),
        });
        self
    }

    pub fn child(mut self, node: ManifestNode) -> Self {
        self.children.push(node);
        self
    }
}

/// A single validator finding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{route}: segment `{segment}` reads {input} outside any content boundary (sample `{sample}`)")]
    UnwrappedDynamicRead {
        route: String,
        segment: String,
        input: InputCategory,
        sample: String,
    },

    #[error("{route}: validation samples disagree on boundary requirement ({with_reads} vs {without_reads})")]
    SampleDisagreement {
        route: String,
        with_reads: String,
        without_reads: String,
    },
}

/// Outcome of validating one route.
#[derive(Debug)]
pub struct ValidationReport {
    pub route: String,
    pub valid: bool,
    pub diagnostics: Vec<ValidationError>,
    /// Whether diagnostics are fatal (production) or advisory (dev).
    pub fatal: bool,
}

impl ValidationReport {
    fn passing(route: &str, fatal: bool) -> Self {
        Self {
            route: route.to_owned(),
            valid: true,
            diagnostics: Vec::new(),
            fatal,
        }
    }
}

/// Validate one route's manifest against its instant configuration.
pub fn validate_route(
    route: &str,
    manifest: &ManifestNode,
    config: &InstantConfig,
    production: bool,
) -> ValidationReport {
    // Only static-claiming routes are held to the shell proof.
    if config.prefetch_mode != PrefetchPolicy::Static || config.disable_validation {
        return ValidationReport::passing(route, production);
    }

    // With no declared samples, run one implicit pass.
    let sample_names: Vec<String> = if config.validation_samples.is_empty() {
        vec!["default".to_owned()]
    } else {
        config
            .validation_samples
            .iter()
            .map(|s| s.name.clone())
            .collect()
    };

    let mut diagnostics = Vec::new();
    let mut needs_by_sample: Vec<(String, bool)> = Vec::new();

    for sample in &sample_names {
        let mut needs_data = false;
        walk(route, manifest, sample, false, &mut needs_data, &mut diagnostics);
        needs_by_sample.push((sample.clone(), needs_data));
    }

    // Disagreement across samples is itself invalid.
    if let (Some((with_reads, _)), Some((without_reads, _))) = (
        needs_by_sample.iter().find(|(_, needs)| *needs),
        needs_by_sample.iter().find(|(_, needs)| !*needs),
    ) {
        diagnostics.push(ValidationError::SampleDisagreement {
            route: route.to_owned(),
            with_reads: with_reads.clone(),
            without_reads: without_reads.clone(),
        });
    }

    let valid = diagnostics.is_empty();
    if !valid && !production {
        for diag in &diagnostics {
            warn!(route, %diag, "instant-navigation validation warning");
        }
    }

    ValidationReport {
        route: route.to_owned(),
        valid,
        diagnostics,
        fatal: production,
    }
}

// `wrapped` travels by value so sibling branches never observe each other's
// boundary state, while an ancestor boundary still covers descendants.
fn walk(
    route: &str,
    node: &ManifestNode,
    sample: &str,
    wrapped: bool,
    needs_data: &mut bool,
    diagnostics: &mut Vec<ValidationError>,
) {
    let wrapped = wrapped || node.has_boundary;

    for read in &node.dynamic_reads {
        if !read.applies_to(sample) {
            continue;
        }
        *needs_data = true;
        if !wrapped {
            diagnostics.push(ValidationError::UnwrappedDynamicRead {
                route: route.to_owned(),
                segment: node.segment.clone(),
                input: read.source,
                sample: sample.to_owned(),
            });
        }
    }

    for child in &node.children {
        walk(route, child, sample, wrapped, needs_data, diagnostics);
    }
}
