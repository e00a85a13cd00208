//! The similarity-index seam.
//!
//! A `VectorBackend` persists records with their embeddings and answers
//! nearest-neighbour queries. Backends receive vectors, never raw text to
//! embed; embedding happens one layer up in `ChunkStore`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::BackendResult;
use crate::tree::{Metadata, MetadataValue};

/// A record as stored in the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

/// A record paired with its embedding, ready for upsert.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub record: StoredRecord,
    pub vector: Vec<f32>,
}

/// A query hit with its relevance score (higher is more relevant).
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: StoredRecord,
    pub score: f32,
}

/// Conjunction of exact `key = value` conditions over record metadata.
///
/// An empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, MetadataValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.conditions.iter()
    }

    /// Whether `metadata` satisfies every condition.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

impl<K, V> FromIterator<(K, V)> for MetadataFilter
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            conditions: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Persistent similarity index.
///
/// All methods take `&self`; implementations synchronize internally and must
/// be safe for concurrent callers. Failures are returned as-is, without retries.
pub trait VectorBackend: Send + Sync {
    /// Insert or overwrite records by id.
    fn upsert(&self, records: Vec<VectorRecord>) -> BackendResult<()>;

    /// Fetch records by id. Missing ids are absent from the result.
    fn get(&self, ids: &[String]) -> BackendResult<Vec<StoredRecord>>;

    /// Top `k` records by descending similarity to `vector`, restricted to `filter`.
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> BackendResult<Vec<ScoredRecord>>;

    /// Up to `limit` records matching `filter`, ordered by id.
    fn find(&self, filter: &MetadataFilter, limit: usize) -> BackendResult<Vec<StoredRecord>>;

    /// Remove records by id. Unknown ids are ignored.
    fn delete(&self, ids: &[String]) -> BackendResult<()>;

    /// Number of stored records.
    fn count(&self) -> BackendResult<usize>;

    /// Release resources. Later calls fail with `BackendError::Closed`.
    fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}
