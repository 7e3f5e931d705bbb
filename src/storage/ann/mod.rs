//! Append-only nearest-neighbor indices.
//!
//! Rows are addressed by a dense `u64` offset assigned on insertion. No index
//! supports true deletion: callers hide rows through their own id mapping and
//! rebuild the index to reclaim space.
//!
//! | Index | Search | Feature |
//! |-------|--------|---------|
//! | [`FlatIndex`] | exhaustive, exact | default |
//! | [`HnswIndex`] | HNSW, approximate | `usearch-hnsw` |

mod flat;
#[cfg(feature = "usearch-hnsw")]
mod hnsw;

pub use flat::FlatIndex;
#[cfg(feature = "usearch-hnsw")]
pub use hnsw::HnswIndex;

use crate::Result;
use crate::models::DistanceMetric;
use std::path::Path;

/// Append-only vector index.
///
/// Scores follow [`DistanceMetric`] conventions and `search` returns hits
/// best-first. For cosine indices, vectors and queries are expected to be
/// unit-normalized by the caller.
pub trait AnnIndex: Send + Sync {
    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Metric used for scoring.
    fn metric(&self) -> DistanceMetric;

    /// Number of rows, including rows hidden by the caller.
    fn len(&self) -> usize;

    /// Returns true if no rows were ever added.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a vector and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension does not match or the engine rejects the row.
    fn add(&mut self, vector: &[f32]) -> Result<u64>;

    /// Returns the vector stored at `offset`.
    fn vector(&self, offset: u64) -> Option<Vec<f32>>;

    /// Returns up to `k` raw hits, best-first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query dimension does not match.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>>;

    /// File extension of the persisted index.
    fn extension(&self) -> &'static str;

    /// Writes the index to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn save(&self, path: &Path) -> Result<()>;
}

/// Builds an empty index of the configured kind.
///
/// # Errors
///
/// Returns an error if the native index cannot be created.
pub fn new_index(dimension: usize, metric: DistanceMetric) -> Result<Box<dyn AnnIndex>> {
    #[cfg(feature = "usearch-hnsw")]
    {
        Ok(Box::new(HnswIndex::new(dimension, metric)?))
    }
    #[cfg(not(feature = "usearch-hnsw"))]
    {
        Ok(Box::new(FlatIndex::new(dimension, metric)))
    }
}

/// Loads an index of the configured kind from `path`.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable, or inconsistent
/// with `dimension`/`metric`.
pub fn load_index(
    path: &Path,
    dimension: usize,
    metric: DistanceMetric,
) -> Result<Box<dyn AnnIndex>> {
    #[cfg(feature = "usearch-hnsw")]
    {
        Ok(Box::new(HnswIndex::load(path, dimension, metric)?))
    }
    #[cfg(not(feature = "usearch-hnsw"))]
    {
        Ok(Box::new(FlatIndex::load(path, dimension, metric)?))
    }
}

/// File extension used by [`new_index`] indices.
#[must_use]
pub const fn index_extension() -> &'static str {
    #[cfg(feature = "usearch-hnsw")]
    {
        "usearch"
    }
    #[cfg(not(feature = "usearch-hnsw"))]
    {
        "flat.json"
    }
}
