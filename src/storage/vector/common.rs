//! Helpers shared by the adapters.

use crate::models::{ChunkId, DistanceMetric, EmbeddingRecord, SearchResult, normalize};
use crate::{Error, Result};
use std::path::Path;

/// Rejects collection names that are not a single plain path segment.
///
/// Adapters map names onto directories and URL path segments, so a name
/// may not be empty, absolute, contain a separator or a `..` component.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.contains(['/', '\\', '\0'])
        || name.split('.').all(str::is_empty)
        || name.contains("..")
        || Path::new(name).is_absolute();
    if invalid {
        return Err(Error::InvalidInput(format!("invalid collection name: '{name}'")));
    }
    Ok(())
}

/// Rejects vectors containing NaN or infinite components.
pub fn check_finite(operation: &str, id: &str, vector: &[f32]) -> Result<()> {
    if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "{operation}: vector for '{id}' has a non-finite component at index {pos}"
        )));
    }
    Ok(())
}

/// Rejects a zero collection dimension.
pub fn validate_dimension(dimension: usize) -> Result<()> {
    if dimension == 0 {
        return Err(Error::InvalidDimension(dimension));
    }
    Ok(())
}

/// Rejects vectors whose length differs from the collection dimension.
pub fn check_dimension(
    operation: &str,
    collection: &str,
    expected: usize,
    actual: usize,
) -> Result<()> {
    if expected != actual {
        return Err(Error::OperationFailed {
            operation: operation.to_string(),
            cause: format!(
                "embedding dimension mismatch for collection '{collection}': expected {expected}, got {actual}"
            ),
        });
    }
    Ok(())
}

/// Assigns generated ids to records without one and validates dimensions.
///
/// Cosine collections get their vectors normalized in place.
pub fn prepare_records(
    records: &mut [EmbeddingRecord],
    collection: &str,
    dimension: usize,
    metric: DistanceMetric,
) -> Result<()> {
    for record in records.iter_mut() {
        if record.chunk_id.is_empty() {
            record.chunk_id = ChunkId::generate();
        }
        check_dimension("add_embeddings", collection, dimension, record.dimension())?;
        check_finite("add_embeddings", record.chunk_id.as_str(), &record.embedding)?;
        if metric.normalizes() {
            normalize(&mut record.embedding);
        }
    }
    Ok(())
}

/// Dimension used when a collection is created implicitly by an add.
pub fn implicit_dimension(records: &[EmbeddingRecord], collection: &str) -> Result<usize> {
    let dimension = records.first().map_or(0, EmbeddingRecord::dimension);
    if dimension == 0 {
        return Err(Error::InvalidInput(format!(
            "cannot create collection '{collection}' from a record without an embedding"
        )));
    }
    Ok(dimension)
}

/// Prepares a query vector for scoring under `metric`.
pub fn prepare_query(
    query: &[f32],
    collection: &str,
    dimension: usize,
    metric: DistanceMetric,
) -> Result<Vec<f32>> {
    check_dimension("search", collection, dimension, query.len())?;
    check_finite("search", "query", query)?;
    let mut query = query.to_vec();
    if metric.normalizes() {
        normalize(&mut query);
    }
    Ok(query)
}

/// Orders results best-first under `metric` and keeps at most `top_k`.
///
/// Ties keep their incoming order.
pub fn rank(results: &mut Vec<SearchResult>, metric: DistanceMetric, top_k: usize) {
    results.sort_by(|a, b| metric.compare(a.score, b.score));
    results.truncate(top_k);
}

/// Builds a search hit from a stored record.
pub fn to_result(record: &EmbeddingRecord, score: f32) -> SearchResult {
    SearchResult {
        chunk_id: record.chunk_id.clone(),
        content: record.content.clone(),
        score,
        metadata: record.metadata.clone(),
    }
}

/// Ids sorted ascending after `cursor`, truncated to `limit`, plus the next cursor.
///
/// `ids` must already be sorted ascending.
pub fn page_after<'a, I>(ids: I, cursor: Option<&str>, limit: usize) -> (Vec<&'a ChunkId>, Option<String>)
where
    I: IntoIterator<Item = &'a ChunkId>,
{
    let limit = limit.max(1);
    let mut page: Vec<&ChunkId> = ids
        .into_iter()
        .filter(|id| cursor.is_none_or(|c| id.as_str() > c))
        .take(limit + 1)
        .collect();
    let has_more = page.len() > limit;
    page.truncate(limit);
    let next = if has_more {
        page.last().map(|id| id.as_str().to_string())
    } else {
        None
    };
    (page, next)
}
