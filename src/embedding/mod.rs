//! Embedding providers.
//!
//! The index never computes embeddings itself; it consumes an `Embedder`.
//! Two providers ship with the crate:
//! - `HashEmbedder`: deterministic feature-hashing, no model download
//! - `FastEmbedder`: local ONNX models via fastembed (feature `local-embeddings`)

mod hash;

#[cfg(feature = "local-embeddings")]
mod onnx;

pub use hash::{DEFAULT_HASH_DIMENSION, HashEmbedder};

#[cfg(feature = "local-embeddings")]
pub use onnx::FastEmbedder;

use thiserror::Error;

/// Errors from embedding providers.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Embedding provider failed: {0}")]
    Provider(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: sent {expected} texts, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Unknown embedding provider: {0}")]
    UnknownProvider(String),
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for embedding backends.
///
/// Implementations must be safe to call from several threads at once.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input text (in order).
    fn embed(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// The dimensionality of the output vectors.
    fn dimension(&self) -> usize;

    /// Embed a single query string.
    fn embed_query(&self, query: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed(&[query])?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }
}

/// Check a provider's response against the request.
pub(crate) fn check_batch(
    embeddings: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> EmbeddingResult<()> {
    if embeddings.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: embeddings.len(),
        });
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
