//! # vectorbridge
//!
//! Pluggable vector storage with online migration between engines.
//!
//! One [`VectorStore`] contract is implemented over four heterogeneous
//! engines, and a [`VectorBridge`] streams live collections between them.
//!
//! ## Features
//!
//! - In-process append-only index (pure Rust flat scan, or usearch HNSW)
//! - Client-server vector service adapter (Qdrant REST)
//! - Search-cluster adapter (Elasticsearch `dense_vector`)
//! - Content-addressed adapter with IPLD-style export/import
//! - Bounded-memory streaming migration and replica sync
//!
//! ## Example
//!
//! ```rust,ignore
//! use vectorbridge::{DistanceMetric, EmbeddingRecord, VectorStore};
//! use vectorbridge::storage::vector::LocalVectorStore;
//!
//! let store = LocalVectorStore::in_memory(DistanceMetric::Cosine);
//! store
//!     .add_embeddings(vec![EmbeddingRecord::new("a", vec![1.0, 0.0, 0.0, 0.0])], "docs")
//!     .await?;
//! let hits = store.search(&[1.0, 0.0, 0.0, 0.0], 1, "docs", None).await?;
//! assert_eq!(hits[0].chunk_id.as_str(), "a");
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod embedding;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{StoreConfig, StoreKind, VectorBridgeConfig};
pub use models::{
    ChunkId, CollectionInfo, CollectionOptions, DistanceMetric, EmbeddingRecord, FilterCondition,
    HealthStatus, MetadataFilter, SearchResult,
};
pub use services::{BackendFactory, MigrationReport, VectorBridge, VectorStoreManager};
pub use storage::VectorStore;

/// Error type for vectorbridge operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty record batches, malformed filters, bad config values |
/// | `InvalidDimension` | A collection is created with dimension 0 |
/// | `AlreadyExists` | `create_collection` on a name that is already present |
/// | `NotFound` | A must-exist precondition fails (unknown store, missing source collection) |
/// | `Connection` | The engine cannot be reached; callers decide whether to retry |
/// | `OperationFailed` | The engine rejected a well-formed request, dimension mismatch on add |
/// | `PartialFailure` | A bulk write was accepted for some documents and rejected for others |
/// | `FeatureNotEnabled` | Using a backend that requires a compile-time feature |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A collection dimension must be positive.
    #[error("invalid dimension: {0} (must be greater than zero)")]
    InvalidDimension(usize),

    /// The collection already exists.
    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    /// A required entity does not exist.
    ///
    /// Plain reads of absent records or collections return `None`/`false`
    /// instead; this variant is reserved for preconditions.
    #[error("not found: {0}")]
    NotFound(String),

    /// The storage engine is unreachable.
    ///
    /// No adapter retries internally.
    #[error("connection to '{backend}' failed: {cause}")]
    Connection {
        /// The backend that could not be reached.
        backend: String,
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A bulk operation was rejected for some documents.
    #[error("operation '{operation}' partially failed for {} id(s): {}", failed_ids.len(), failed_ids.join(", "))]
    PartialFailure {
        /// The operation that partially failed.
        operation: String,
        /// Chunk ids the engine rejected.
        failed_ids: Vec<String>,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds an [`Error::Connection`] from any displayable cause.
    pub fn connection(backend: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Connection {
            backend: backend.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns true if the engine could not be reached.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Result type alias for vectorbridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use vectorbridge::current_timestamp;
///
/// let ts = current_timestamp();
/// assert!(ts > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
