//! Deterministic hash embeddings.

use super::Embedder;
use crate::Result;
use crate::models::normalize;
use sha2::{Digest, Sha256};

/// Upper bound on words hashed per text.
const MAX_WORDS: usize = 1000;

/// Bag-of-words pseudo-embedder.
///
/// Each word is hashed and spread over the vector; the result is
/// unit-normalized. Texts sharing words land close together, which is
/// enough for tests and offline demos. Word hashes are SHA-256, so vectors
/// are stable across processes.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Model name recorded on generated records.
    pub const MODEL_NAME: &'static str = "hash-bow-v1";

    /// Creates an embedder producing `dimensions`-length vectors.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn distribute_hash(embedding: &mut [f32], hash: &[u8], word_idx: usize) {
        let dims = embedding.len();
        for pair in hash.chunks_exact(2).take(8) {
            let idx = (usize::from(pair[0]) + word_idx) % dims;
            let value = f32::from(pair[1]) / 255.0 - 0.5;
            embedding[idx] += value;
        }
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for (i, word) in text.split_whitespace().take(MAX_WORDS).enumerate() {
            let hash = Sha256::digest(word.to_lowercase().as_bytes());
            Self::distribute_hash(&mut embedding, &hash, i);
        }
        normalize(&mut embedding);
        Ok(embedding)
    }
}
