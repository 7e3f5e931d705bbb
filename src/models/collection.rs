//! Collection descriptors and distance metrics.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::Metadata;

/// Similarity/distance function defining "closest" for a collection.
///
/// Score direction is decided here and nowhere else:
///
/// | Metric | Score | Better |
/// |--------|-------|--------|
/// | `Cosine` | cosine similarity in `[-1, 1]` | higher |
/// | `Dot` | inner product | higher |
/// | `Euclidean` | L2 distance | lower |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine similarity (vectors stored unit-normalized).
    #[default]
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Raw inner product.
    Dot,
}

impl DistanceMetric {
    /// Returns the metric name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Dot => "dot",
        }
    }

    /// Parses a metric name, accepting common engine aliases.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cosine" | "cos" => Some(Self::Cosine),
            "euclidean" | "euclid" | "l2" | "l2_norm" => Some(Self::Euclidean),
            "dot" | "ip" | "inner_product" | "dot_product" => Some(Self::Dot),
            _ => None,
        }
    }

    /// Returns true if a larger score means a closer match.
    #[must_use]
    pub const fn higher_is_better(&self) -> bool {
        !matches!(self, Self::Euclidean)
    }

    /// Returns true if score `a` is a strictly better match than `b`.
    #[must_use]
    pub fn is_better(&self, a: f32, b: f32) -> bool {
        if self.higher_is_better() { a > b } else { a < b }
    }

    /// Orders two scores so that the better one sorts first.
    #[must_use]
    pub fn compare(&self, a: f32, b: f32) -> Ordering {
        let ord = if self.higher_is_better() {
            b.partial_cmp(&a)
        } else {
            a.partial_cmp(&b)
        };
        ord.unwrap_or(Ordering::Equal)
    }

    /// Returns true if `score` satisfies `threshold` in this metric's direction.
    #[must_use]
    pub fn passes_threshold(&self, score: f32, threshold: f32) -> bool {
        if self.higher_is_better() {
            score >= threshold
        } else {
            score <= threshold
        }
    }

    /// Scores a stored vector against a query.
    ///
    /// For `Cosine`, both vectors must already be unit-normalized.
    #[must_use]
    pub fn score(&self, stored: &[f32], query: &[f32]) -> f32 {
        match self {
            Self::Cosine | Self::Dot => dot(stored, query),
            Self::Euclidean => l2_distance(stored, query),
        }
    }

    /// Returns true if vectors are normalized on ingestion.
    #[must_use]
    pub const fn normalizes(&self) -> bool {
        matches!(self, Self::Cosine)
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inner product of two equal-length vectors.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
#[must_use]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Euclidean distance between two equal-length vectors.
#[must_use]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Normalizes a vector to unit length in place. Zero vectors are left as-is.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm <= 0.0 {
        return;
    }
    let inv = norm.recip();
    for x in v.iter_mut() {
        *x *= inv;
    }
}

/// Options accepted by `create_collection`.
#[derive(Debug, Clone, Default)]
pub struct CollectionOptions {
    /// Return `Ok(false)` instead of `AlreadyExists` when the collection is present.
    pub exist_ok: bool,
    /// Engine-specific parameters (shards, replicas, HNSW settings).
    pub engine: Metadata,
}

impl CollectionOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tolerates an existing collection.
    #[must_use]
    pub const fn exist_ok(mut self) -> Self {
        self.exist_ok = true;
        self
    }

    /// Adds an engine-specific parameter.
    #[must_use]
    pub fn with_engine_param(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.engine.insert(key.into(), value.into());
        self
    }
}

/// Collection manifest returned by `get_collection_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Fixed vector dimension.
    pub dimension: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Number of live records.
    pub count: usize,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last mutation timestamp (Unix epoch seconds).
    pub updated_at: u64,
    /// Portable handle of the last export (content-addressed backend only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cid: Option<String>,
    /// Engine-specific fields.
    #[serde(default)]
    pub engine: Metadata,
}

/// Health of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Backend name.
    pub backend: String,
    /// Whether the backend answered.
    pub healthy: bool,
    /// Number of collections, when known.
    pub collections: Option<usize>,
    /// Error message for unhealthy backends.
    pub error: Option<String>,
    /// Round-trip time of the check in milliseconds.
    pub latency_ms: u64,
}

impl HealthStatus {
    /// Creates a healthy status.
    #[must_use]
    pub fn healthy(backend: impl Into<String>, collections: Option<usize>) -> Self {
        Self {
            backend: backend.into(),
            healthy: true,
            collections,
            error: None,
            latency_ms: 0,
        }
    }

    /// Creates an unhealthy status carrying the error message.
    #[must_use]
    pub fn unhealthy(backend: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            backend: backend.into(),
            healthy: false,
            collections: None,
            error: Some(error.to_string()),
            latency_ms: 0,
        }
    }

    /// Sets the measured latency.
    #[must_use]
    pub const fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}
