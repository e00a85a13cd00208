//! In-process vector backend.
//!
//! Brute-force cosine similarity over every matching record. Suitable for
//! tests and small corpora; nothing survives the process.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::{MetadataFilter, ScoredRecord, StoredRecord, VectorBackend, VectorRecord};
use super::error::{BackendError, BackendResult};
use crate::embedding::cosine_similarity;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, VectorRecord>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

impl VectorBackend for MemoryBackend {
    fn upsert(&self, records: Vec<VectorRecord>) -> BackendResult<()> {
        self.ensure_open()?;
        let mut map = self.records.write();
        for record in records {
            map.insert(record.record.id.clone(), record);
        }
        Ok(())
    }

    fn get(&self, ids: &[String]) -> BackendResult<Vec<StoredRecord>> {
        self.ensure_open()?;
        let map = self.records.read();
        Ok(ids
            .iter()
            .filter_map(|id| map.get(id).map(|r| r.record.clone()))
            .collect())
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> BackendResult<Vec<ScoredRecord>> {
        self.ensure_open()?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let map = self.records.read();
        let mut scored: Vec<ScoredRecord> = map
            .values()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.record.metadata)))
            .map(|r| ScoredRecord {
                score: cosine_similarity(vector, &r.vector),
                record: r.record.clone(),
            })
            .collect();

        sort_by_score(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn find(&self, filter: &MetadataFilter, limit: usize) -> BackendResult<Vec<StoredRecord>> {
        self.ensure_open()?;
        let map = self.records.read();
        let mut found: Vec<StoredRecord> = map
            .values()
            .filter(|r| filter.matches(&r.record.metadata))
            .map(|r| r.record.clone())
            .collect();

        found.sort_by(|a, b| a.id.cmp(&b.id));
        found.truncate(limit);
        Ok(found)
    }

    fn delete(&self, ids: &[String]) -> BackendResult<()> {
        self.ensure_open()?;
        let mut map = self.records.write();
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }

    fn count(&self) -> BackendResult<usize> {
        self.ensure_open()?;
        Ok(self.records.read().len())
    }

    fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Descending score, ties broken by ascending id.
pub(crate) fn sort_by_score(scored: &mut [ScoredRecord]) {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
}
