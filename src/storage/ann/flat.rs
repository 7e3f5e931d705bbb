//! Exhaustive flat index.

use super::AnnIndex;
use crate::models::DistanceMetric;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Brute-force O(n) index over an append-only row log.
///
/// Exact, with no build cost; used when the `usearch-hnsw` feature is off
/// and as the local fast-search index of the content-addressed backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    rows: Vec<Vec<f32>>,
}

impl FlatIndex {
    /// Creates an empty index.
    #[must_use]
    pub const fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            rows: Vec::new(),
        }
    }

    /// Loads an index written by [`AnnIndex::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not match
    /// `dimension`/`metric`.
    pub fn load(path: &Path, dimension: usize, metric: DistanceMetric) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "load_flat_index".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let index: Self = serde_json::from_str(&content).map_err(|e| Error::OperationFailed {
            operation: "parse_flat_index".to_string(),
            cause: e.to_string(),
        })?;

        if index.dimension != dimension || index.metric != metric {
            return Err(Error::OperationFailed {
                operation: "load_flat_index".to_string(),
                cause: format!(
                    "index is {}-d {}, side-table expects {dimension}-d {metric}",
                    index.dimension, index.metric
                ),
            });
        }
        if let Some(bad) = index.rows.iter().position(|r| r.len() != dimension) {
            return Err(Error::OperationFailed {
                operation: "load_flat_index".to_string(),
                cause: format!("row {bad} has wrong dimension"),
            });
        }

        Ok(index)
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

impl AnnIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn add(&mut self, vector: &[f32]) -> Result<u64> {
        self.validate(vector)?;
        let offset = self.rows.len() as u64;
        self.rows.push(vector.to_vec());
        Ok(offset)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn vector(&self, offset: u64) -> Option<Vec<f32>> {
        self.rows.get(offset as usize).cloned()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.validate(query)?;
        if k == 0 || self.rows.is_empty() {
            return Ok(Vec::new());
        }

        let metric = self.metric;
        let mut scored: Vec<(u64, f32)> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (i as u64, metric.score(row, query)))
            .collect();

        // Partial selection before the sort keeps large scans cheap.
        if k < scored.len() {
            scored.select_nth_unstable_by(k, |a, b| metric.compare(a.1, b.1));
            scored.truncate(k);
        }
        scored.sort_by(|a, b| metric.compare(a.1, b.1).then(a.0.cmp(&b.0)));

        Ok(scored)
    }

    fn extension(&self) -> &'static str {
        "flat.json"
    }

    fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_flat_index".to_string(),
            cause: e.to_string(),
        })?;

        fs::write(path, content).map_err(|e| Error::OperationFailed {
            operation: "write_flat_index".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_assigns_dense_offsets() {
        let mut index = FlatIndex::new(2, DistanceMetric::Dot);
        assert_eq!(index.add(&[1.0, 0.0]).expect("add failed"), 0);
        assert_eq!(index.add(&[0.0, 1.0]).expect("add failed"), 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.vector(1), Some(vec![0.0, 1.0]));
        assert_eq!(index.vector(2), None);
    }

    #[test]
    fn test_add_dimension_mismatch() {
        let mut index = FlatIndex::new(3, DistanceMetric::Cosine);
        assert!(index.add(&[1.0, 0.0]).is_err());
    }

    #[test]
    fn test_search_orders_best_first() {
        let mut index = FlatIndex::new(2, DistanceMetric::Euclidean);
        index.add(&[5.0, 5.0]).expect("add failed");
        index.add(&[0.0, 0.1]).expect("add failed");
        index.add(&[1.0, 1.0]).expect("add failed");

        let hits = index.search(&[0.0, 0.0], 2).expect("search failed");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 2);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn test_search_k_larger_than_rows() {
        let mut index = FlatIndex::new(2, DistanceMetric::Dot);
        index.add(&[1.0, 0.0]).expect("add failed");
        let hits = index.search(&[1.0, 0.0], 10).expect("search failed");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_search_empty() {
        let index = FlatIndex::new(2, DistanceMetric::Dot);
        assert!(index.search(&[1.0, 0.0], 5).expect("search failed").is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("index.flat.json");

        let mut index = FlatIndex::new(2, DistanceMetric::Cosine);
        index.add(&[0.6, 0.8]).expect("add failed");
        index.save(&path).expect("save failed");

        let loaded = FlatIndex::load(&path, 2, DistanceMetric::Cosine).expect("load failed");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.vector(0), Some(vec![0.6, 0.8]));
    }

    #[test]
    fn test_load_rejects_mismatched_side_table() {
        let dir = TempDir::new().expect("tempdir failed");
        let path = dir.path().join("index.flat.json");
        FlatIndex::new(2, DistanceMetric::Cosine)
            .save(&path)
            .expect("save failed");

        assert!(FlatIndex::load(&path, 3, DistanceMetric::Cosine).is_err());
        assert!(FlatIndex::load(&path, 2, DistanceMetric::Dot).is_err());
    }
}
