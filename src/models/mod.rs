//! Data models for vectorbridge.
//!
//! Entity types shared by every storage backend.

mod collection;
mod record;
mod search;

pub use collection::{
    CollectionInfo, CollectionOptions, DistanceMetric, HealthStatus, dot, l2_distance, l2_norm,
    normalize,
};
pub use record::{ChunkId, EmbeddingRecord, Metadata};
pub use search::{FilterCondition, MetadataFilter, SearchResult};
