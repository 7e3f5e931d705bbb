//! Embedding records and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// String-keyed metadata attached to a record.
///
/// Backed by a sorted map so serialization order is stable.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Caller-visible identifier of a stored chunk.
///
/// Opaque to every backend; each adapter maps it onto its own addressing
/// scheme (offsets, content hashes, or server point ids).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Creates a new chunk ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random chunk ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the ID is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A content embedding with its source text and metadata.
///
/// Within one collection every record's `embedding` has exactly the
/// collection's dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Caller-visible identifier. Empty ids are replaced with a generated one on add.
    pub chunk_id: ChunkId,
    /// Optional source text.
    #[serde(default)]
    pub content: Option<String>,
    /// The embedding vector.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Name of the model that produced the embedding.
    #[serde(default)]
    pub model_name: Option<String>,
}

impl EmbeddingRecord {
    /// Creates a record with an id and an embedding.
    #[must_use]
    pub fn new(chunk_id: impl Into<ChunkId>, embedding: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            content: None,
            embedding,
            metadata: Metadata::new(),
            model_name: None,
        }
    }

    /// Creates a record with only text; the embedding is generated later.
    #[must_use]
    pub fn from_text(chunk_id: impl Into<ChunkId>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(chunk_id, Vec::new())
        }
    }

    /// Sets the source text.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the model name.
    #[must_use]
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    /// Returns the embedding dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_roundtrip() {
        let id = ChunkId::new("chunk-001");
        assert_eq!(id.as_str(), "chunk-001");
        assert_eq!(id.to_string(), "chunk-001");
        assert_eq!(ChunkId::from("chunk-001"), id);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ChunkId::generate();
        let b = ChunkId::generate();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_record_builder() {
        let record = EmbeddingRecord::new("a", vec![1.0, 0.0])
            .with_content("hello")
            .with_metadata("lang", "en")
            .with_model_name("minilm");

        assert_eq!(record.dimension(), 2);
        assert_eq!(record.content.as_deref(), Some("hello"));
        assert_eq!(record.metadata["lang"], "en");
        assert_eq!(record.model_name.as_deref(), Some("minilm"));
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: EmbeddingRecord =
            serde_json::from_str(r#"{"chunk_id":"x"}"#).expect("deserialize failed");
        assert_eq!(record.chunk_id.as_str(), "x");
        assert!(record.embedding.is_empty());
        assert!(record.metadata.is_empty());
    }
}
