//! Chunk persistence on top of a vector backend.
//!
//! `ChunkStore` owns the embedder and the backend. It flattens tree links
//! into reserved metadata keys on write and restores them on read, so the
//! backend only ever sees flat records.

use std::collections::HashMap;

use super::backend::{MetadataFilter, StoredRecord, VectorBackend, VectorRecord};
use crate::embedding::{Embedder, check_batch};
use crate::error::{IndexError, IndexResult};
use crate::tree::{Chunk, ChunkId, Metadata, MetadataValue};

/// Default number of texts per embedding request.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

pub const KEY_LEVEL: &str = "level";
pub const KEY_PARENT_ID: &str = "parent_id";
pub const KEY_CHILD_IDS: &str = "child_ids";
pub const KEY_ROOT_ID: &str = "root_id";
pub const KEY_IS_ROOT: &str = "is_root";

/// Metadata keys written by the store. Callers may filter on them but not set them.
pub const RESERVED_METADATA_KEYS: [&str; 5] =
    [KEY_LEVEL, KEY_PARENT_ID, KEY_CHILD_IDS, KEY_ROOT_ID, KEY_IS_ROOT];

/// A chunk returned by similarity search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

pub struct ChunkStore {
    backend: Box<dyn VectorBackend>,
    embedder: Box<dyn Embedder>,
    batch_size: usize,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("dimension", &self.embedder.dimension())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ChunkStore {
    pub fn new(backend: Box<dyn VectorBackend>, embedder: Box<dyn Embedder>) -> Self {
        Self {
            backend,
            embedder,
            batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }

    /// Set the embedding batch size (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Embed and upsert chunks.
    ///
    /// The whole input is validated before the first backend call. An empty
    /// slice is a no-op.
    pub fn add(&self, chunks: &[Chunk]) -> IndexResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.validate(chunks)?;

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = self.embed_batched(&texts)?;

        let roots = resolve_roots(chunks);
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .zip(roots)
            .map(|((chunk, vector), root_id)| VectorRecord {
                record: encode(chunk, &root_id),
                vector,
            })
            .collect();

        self.backend.upsert(records)?;
        tracing::debug!(target: "store", "stored {} chunks", chunks.len());
        Ok(())
    }

    /// Check ids, content and metadata without touching the backend.
    pub fn validate(&self, chunks: &[Chunk]) -> IndexResult<()> {
        chunks.iter().try_for_each(validate_chunk)
    }

    fn embed_batched(&self, texts: &[&str]) -> IndexResult<Vec<Vec<f32>>> {
        let dimension = self.embedder.dimension();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed(batch)?;
            check_batch(&embedded, batch.len(), dimension)?;
            vectors.extend(embedded);
        }

        tracing::trace!(
            target: "store",
            "embedded {} texts in {} batches",
            texts.len(),
            texts.len().div_ceil(self.batch_size)
        );
        Ok(vectors)
    }

    /// Fetch chunks by id. Unknown ids are skipped.
    pub fn get(&self, ids: &[ChunkId]) -> IndexResult<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.backend.get(ids)?;
        Ok(records.into_iter().map(decode).collect())
    }

    pub fn get_one(&self, id: &str) -> IndexResult<Option<Chunk>> {
        Ok(self.get(&[id.to_string()])?.into_iter().next())
    }

    /// Top `k` chunks by similarity to `query`, optionally restricted by `filter`.
    pub fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> IndexResult<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Err(IndexError::validation("query must not be blank"));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_query(query)?;
        check_batch(std::slice::from_ref(&vector), 1, self.embedder.dimension())?;

        let hits = self.backend.query(&vector, k, filter)?;
        Ok(hits
            .into_iter()
            .map(|hit| ScoredChunk {
                chunk: decode(hit.record),
                score: hit.score,
            })
            .collect())
    }

    /// Up to `limit` chunks whose metadata matches `filter`, ordered by id.
    pub fn find(&self, filter: &MetadataFilter, limit: usize) -> IndexResult<Vec<Chunk>> {
        let records = self.backend.find(filter, limit)?;
        Ok(records.into_iter().map(decode).collect())
    }

    /// Remove chunks by id. No cascade.
    pub fn delete(&self, ids: &[ChunkId]) -> IndexResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.backend.delete(ids)?;
        tracing::debug!(target: "store", "deleted {} chunks", ids.len());
        Ok(())
    }

    pub fn count(&self) -> IndexResult<usize> {
        Ok(self.backend.count()?)
    }

    pub fn close(&self) -> IndexResult<()> {
        Ok(self.backend.close()?)
    }
}

fn validate_chunk(chunk: &Chunk) -> IndexResult<()> {
    if chunk.id.is_empty() || chunk.id.contains(',') {
        return Err(IndexError::validation(format!(
            "invalid chunk id {:?}: must be non-empty and contain no ','",
            chunk.id
        )));
    }
    if chunk.content.trim().is_empty() {
        return Err(IndexError::validation(format!(
            "chunk {} has blank content",
            chunk.id
        )));
    }
    if let Some(key) = chunk
        .metadata
        .keys()
        .find(|k| RESERVED_METADATA_KEYS.contains(&k.as_str()))
    {
        return Err(IndexError::validation(format!(
            "metadata key {key:?} is reserved"
        )));
    }
    if let Some((key, value)) = chunk
        .metadata
        .iter()
        .find(|(_, v)| matches!(v, MetadataValue::Float(f) if !f.is_finite()))
    {
        return Err(IndexError::validation(format!(
            "metadata {key:?} on chunk {} is not a finite number: {value}",
            chunk.id
        )));
    }
    Ok(())
}

/// Root id of each chunk, following parent links inside the batch.
///
/// When a parent lies outside the batch, the root is recovered by stripping
/// `_L{n}_C{i}` suffixes from the id; failing that, the topmost known
/// ancestor is used.
fn resolve_roots(chunks: &[Chunk]) -> Vec<ChunkId> {
    let parents: HashMap<&str, Option<&str>> = chunks
        .iter()
        .map(|c| (c.id.as_str(), c.parent_id.as_deref()))
        .collect();

    chunks
        .iter()
        .map(|chunk| {
            let mut current = chunk.id.as_str();
            let mut steps = 0;
            loop {
                match parents.get(current) {
                    Some(Some(parent)) if steps < chunks.len() => {
                        current = *parent;
                        steps += 1;
                    }
                    Some(_) => return current.to_string(),
                    None => {
                        // `current` is an out-of-batch parent
                        return strip_levels(current).unwrap_or(current).to_string();
                    }
                }
            }
        })
        .collect()
}

/// Strip trailing `_L{n}_C{i}` segments down to level 0.
fn strip_levels(id: &str) -> Option<&str> {
    let mut rest = id;
    let mut stripped = false;
    while let Some(pos) = rest.rfind("_L") {
        let tail = &rest[pos + 2..];
        let Some((level, index)) = tail.split_once("_C") else {
            break;
        };
        let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !numeric(level) || !numeric(index) {
            break;
        }
        rest = &rest[..pos];
        stripped = true;
        if level == "1" {
            break;
        }
    }
    stripped.then_some(rest)
}

fn encode(chunk: &Chunk, root_id: &str) -> StoredRecord {
    let mut metadata = chunk.metadata.clone();
    metadata.insert(KEY_LEVEL.into(), MetadataValue::Int(chunk.level as i64));
    if let Some(parent) = &chunk.parent_id {
        metadata.insert(KEY_PARENT_ID.into(), parent.clone().into());
    }
    metadata.insert(KEY_CHILD_IDS.into(), chunk.child_ids.join(",").into());
    metadata.insert(KEY_ROOT_ID.into(), root_id.into());
    metadata.insert(KEY_IS_ROOT.into(), chunk.is_root().into());

    StoredRecord {
        id: chunk.id.clone(),
        content: chunk.content.clone(),
        metadata,
    }
}

fn decode(record: StoredRecord) -> Chunk {
    let mut metadata: Metadata = record.metadata;

    let level = metadata
        .remove(KEY_LEVEL)
        .and_then(|v| v.as_i64())
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);
    let parent_id = metadata
        .remove(KEY_PARENT_ID)
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|p| !p.is_empty());
    let child_ids = metadata
        .remove(KEY_CHILD_IDS)
        .and_then(|v| v.as_str().map(str::to_string))
        .map(|joined| {
            joined
                .split(',')
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    metadata.remove(KEY_ROOT_ID);
    metadata.remove(KEY_IS_ROOT);

    Chunk {
        id: record.id,
        content: record.content,
        metadata,
        level,
        parent_id,
        child_ids,
    }
}
