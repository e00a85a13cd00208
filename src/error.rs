//! Error types for tree building, storage and retrieval.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::storage::BackendError;

/// Errors surfaced by the hierarchical index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Chunk not found: {0}")]
    NotFound(String),

    #[error("Vector backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    #[error("Embedding service unavailable: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Inconsistent tree at {chunk_id}: link to {missing} has no matching counterpart")]
    InconsistentTree { chunk_id: String, missing: String },
}

impl IndexError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn inconsistent(chunk_id: &str, missing: &str) -> Self {
        Self::InconsistentTree {
            chunk_id: chunk_id.to_string(),
            missing: missing.to_string(),
        }
    }

    /// True when the failure came from the vector backend or the embedding service.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::Embedding(_))
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
