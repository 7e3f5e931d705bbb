//! Content-addressed block formats.
//!
//! A collection export is a two-level DAG:
//!
//! ```text
//! root ──► metadata block
//!   └────► record block, record block, ...
//! ```
//!
//! Every block is canonical JSON (sorted object keys, no whitespace), so the
//! same logical content always yields the same bytes and the same CID.

use crate::models::{DistanceMetric, Metadata};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Root block type tag.
pub const ROOT_TYPE: &str = "vector_collection";

/// Root block format version.
pub const ROOT_VERSION: &str = "1.0";

/// CID prefix for locally computed identifiers.
const CID_PREFIX: &str = "bafk";

/// Computes the content identifier of `bytes`.
#[must_use]
pub fn compute_cid(bytes: &[u8]) -> String {
    format!("{CID_PREFIX}{}", hex::encode(Sha256::digest(bytes)))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        },
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Serializes `value` as canonical JSON.
///
/// # Errors
///
/// Returns an error if `value` cannot be represented as JSON.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| Error::OperationFailed {
        operation: "canonical_json".to_string(),
        cause: e.to_string(),
    })?;
    serde_json::to_vec(&sort_keys(value)).map_err(|e| Error::OperationFailed {
        operation: "canonical_json".to_string(),
        cause: e.to_string(),
    })
}

/// Parses a block previously written with [`to_canonical_json`].
///
/// # Errors
///
/// Returns `InvalidInput` if the bytes are not a valid block of type `T`.
pub fn parse_block<T: DeserializeOwned>(kind: &str, cid: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::InvalidInput(format!("{kind} block {cid} is malformed: {e}")))
}

/// One stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBlock {
    /// Chunk id.
    pub id: String,
    /// Embedding as stored (normalized for cosine collections).
    pub vector: Vec<f32>,
    /// Source text.
    #[serde(default)]
    pub text: Option<String>,
    /// Record metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Ingest time (Unix epoch seconds).
    pub stored_at: u64,
}

/// Collection manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataBlock {
    /// Collection name.
    pub name: String,
    /// Vector dimension.
    pub dimension: usize,
    /// Distance metric.
    pub metric: DistanceMetric,
    /// Number of records referenced by the root.
    pub count: usize,
    /// Creation time of the collection.
    pub created_at: u64,
    /// Last mutation time of the collection.
    pub updated_at: u64,
}

/// Entry point of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootBlock {
    /// Always [`ROOT_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Block format version.
    pub version: String,
    /// CID of the [`MetadataBlock`].
    pub metadata_cid: String,
    /// CIDs of the [`RecordBlock`]s, ordered by chunk id.
    pub vectors_cids: Vec<String>,
    /// Creation time of the collection.
    pub created_at: u64,
}

impl RootBlock {
    /// Creates a root over the given blocks.
    #[must_use]
    pub fn new(metadata_cid: String, vectors_cids: Vec<String>, created_at: u64) -> Self {
        Self {
            kind: ROOT_TYPE.to_string(),
            version: ROOT_VERSION.to_string(),
            metadata_cid,
            vectors_cids,
            created_at,
        }
    }

    /// Rejects roots of another type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the type tag does not match.
    pub fn validate(&self, cid: &str) -> Result<()> {
        if self.kind != ROOT_TYPE {
            return Err(Error::InvalidInput(format!(
                "block {cid} is a '{}', not a {ROOT_TYPE}",
                self.kind
            )));
        }
        Ok(())
    }
}
