//! usearch HNSW index.
//!
//! Approximate nearest neighbor search over a Hierarchical Navigable Small
//! World graph. Keys are the append-only row offsets.

use super::AnnIndex;
use crate::models::DistanceMetric;
use crate::{Error, Result};
use std::path::Path;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// HNSW connectivity parameter (M).
/// Higher values improve recall but use more memory.
const HNSW_CONNECTIVITY: usize = 16;

/// HNSW expansion factor for construction (`ef_construction`).
const HNSW_EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search (`ef`).
const HNSW_EXPANSION_SEARCH: usize = 64;

/// Initial reserved capacity.
const INITIAL_CAPACITY: usize = 1024;

/// usearch-backed index.
///
/// Cosine collections are stored normalized and searched with inner product,
/// so `Cosine` and `Dot` both map to `MetricKind::IP`; `Euclidean` uses
/// squared L2 and converts back to distance.
pub struct HnswIndex {
    dimension: usize,
    metric: DistanceMetric,
    index: Index,
}

fn native_error(operation: &str, e: impl std::fmt::Display) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

impl HnswIndex {
    /// Creates an empty HNSW index.
    ///
    /// # Errors
    ///
    /// Returns an error if the native index cannot be created.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Result<Self> {
        let index = Index::new(&Self::options(dimension, metric))
            .map_err(|e| native_error("create_usearch_index", e))?;
        index
            .reserve(INITIAL_CAPACITY)
            .map_err(|e| native_error("reserve_usearch_capacity", e))?;

        Ok(Self {
            dimension,
            metric,
            index,
        })
    }

    /// Loads an index written by [`AnnIndex::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or was built with another dimension.
    pub fn load(path: &Path, dimension: usize, metric: DistanceMetric) -> Result<Self> {
        let loaded = Self::new(dimension, metric)?;
        loaded
            .index
            .load(path.to_string_lossy().as_ref())
            .map_err(|e| native_error("load_usearch_index", e))?;

        if loaded.index.dimensions() != dimension {
            return Err(Error::OperationFailed {
                operation: "load_usearch_index".to_string(),
                cause: format!(
                    "index is {}-d, side-table expects {dimension}-d",
                    loaded.index.dimensions()
                ),
            });
        }
        Ok(loaded)
    }

    fn options(dimension: usize, metric: DistanceMetric) -> IndexOptions {
        IndexOptions {
            dimensions: dimension,
            metric: match metric {
                DistanceMetric::Cosine | DistanceMetric::Dot => MetricKind::IP,
                DistanceMetric::Euclidean => MetricKind::L2sq,
            },
            quantization: ScalarKind::F32,
            connectivity: HNSW_CONNECTIVITY,
            expansion_add: HNSW_EXPANSION_ADD,
            expansion_search: HNSW_EXPANSION_SEARCH,
            multi: false,
        }
    }

    /// Converts a usearch distance into the metric's score convention.
    fn to_score(&self, distance: f32) -> f32 {
        match self.metric {
            DistanceMetric::Cosine | DistanceMetric::Dot => 1.0 - distance,
            DistanceMetric::Euclidean => distance.max(0.0).sqrt(),
        }
    }

    fn validate(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::InvalidInput(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(())
    }
}

impl AnnIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn add(&mut self, vector: &[f32]) -> Result<u64> {
        self.validate(vector)?;

        if self.index.size() >= self.index.capacity() {
            let grown = (self.index.capacity() * 2).max(INITIAL_CAPACITY);
            self.index
                .reserve(grown)
                .map_err(|e| native_error("reserve_usearch_capacity", e))?;
        }

        let offset = self.index.size() as u64;
        self.index
            .add(offset, vector)
            .map_err(|e| native_error("usearch_add", e))?;
        Ok(offset)
    }

    fn vector(&self, offset: u64) -> Option<Vec<f32>> {
        let mut buffer = vec![0.0f32; self.dimension];
        match self.index.get(offset, &mut buffer) {
            Ok(found) if found > 0 => Some(buffer),
            _ => None,
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.validate(query)?;
        if k == 0 || self.index.size() == 0 {
            return Ok(Vec::new());
        }

        let matches = self
            .index
            .search(query, k)
            .map_err(|e| native_error("usearch_search", e))?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(&key, &distance)| (key, self.to_score(distance)))
            .collect())
    }

    fn extension(&self) -> &'static str {
        "usearch"
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.index
            .save(path.to_string_lossy().as_ref())
            .map_err(|e| native_error("save_usearch_index", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hnsw_add_and_search() {
        let mut index = HnswIndex::new(3, DistanceMetric::Dot).expect("create failed");
        index.add(&[1.0, 0.0, 0.0]).expect("add failed");
        index.add(&[0.0, 1.0, 0.0]).expect("add failed");

        let hits = index.search(&[1.0, 0.0, 0.0], 1).expect("search failed");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 0);
        assert!((hits[0].1 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hnsw_euclidean_returns_distance() {
        let mut index = HnswIndex::new(2, DistanceMetric::Euclidean).expect("create failed");
        index.add(&[3.0, 4.0]).expect("add failed");
        let hits = index.search(&[0.0, 0.0], 1).expect("search failed");
        assert!((hits[0].1 - 5.0).abs() < 1e-3);
    }
}
