//! Tantivy-backed vector backend.
//!
//! Records live in a Tantivy index on disk. Metadata equality filters run as
//! term queries against `meta_terms`; similarity is exact cosine over the
//! filtered candidate set, so results match the in-memory backend.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{
    Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, Searcher,
    TantivyDocument as Document, Term,
};

use super::backend::{MetadataFilter, ScoredRecord, StoredRecord, VectorBackend, VectorRecord};
use super::error::{BackendError, BackendResult};
use super::memory::sort_by_score;
use super::schema::{ChunkSchema, meta_term};
use crate::embedding::cosine_similarity;
use crate::tree::Metadata;

/// Default writer heap size in bytes.
pub const DEFAULT_WRITER_HEAP_BYTES: usize = 50_000_000;

pub struct TantivyBackend {
    index: Index,
    reader: IndexReader,
    schema: ChunkSchema,
    index_path: Option<PathBuf>,
    writer: Mutex<Option<IndexWriter<Document>>>,
    heap_size: usize,
    closed: AtomicBool,
}

impl std::fmt::Debug for TantivyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyBackend")
            .field("index_path", &self.index_path)
            .field("heap_size", &self.heap_size)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl TantivyBackend {
    /// Open the index at `index_path`, creating it if needed.
    pub fn open(index_path: impl AsRef<Path>, heap_size: usize) -> BackendResult<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&index_path)?;

        let (schema, chunk_schema) = ChunkSchema::build();

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)?
        } else {
            let dir = MmapDirectory::open(&index_path)?;
            Index::create(dir, schema, IndexSettings::default())?
        };

        tracing::debug!(
            target: "backend",
            "opened tantivy index at {}",
            index_path.display()
        );

        Self::from_index(index, chunk_schema, Some(index_path), heap_size)
    }

    /// Create a RAM-only index. Nothing is persisted.
    pub fn in_memory(heap_size: usize) -> BackendResult<Self> {
        let (schema, chunk_schema) = ChunkSchema::build();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, chunk_schema, None, heap_size)
    }

    fn from_index(
        index: Index,
        schema: ChunkSchema,
        index_path: Option<PathBuf>,
        heap_size: usize,
    ) -> BackendResult<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            schema,
            index_path,
            writer: Mutex::new(None),
            heap_size,
            closed: AtomicBool::new(false),
        })
    }

    pub fn index_path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    /// Run `f` with the writer, creating it on first use, then commit and reload.
    fn write_and_commit<F>(&self, f: F) -> BackendResult<()>
    where
        F: FnOnce(&mut IndexWriter<Document>, &ChunkSchema) -> BackendResult<()>,
    {
        let mut writer_lock = self.writer.lock();
        if writer_lock.is_none() {
            *writer_lock = Some(self.index.writer_with_num_threads(1, self.heap_size)?);
        }
        let Some(writer) = writer_lock.as_mut() else {
            return Err(BackendError::Closed);
        };

        if let Err(err) = f(writer, &self.schema) {
            writer.rollback()?;
            return Err(err);
        }
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    fn to_document(&self, record: &VectorRecord) -> BackendResult<Document> {
        let id = &record.record.id;
        let metadata_json =
            serde_json::to_string(&record.record.metadata).map_err(|e| corrupt(id, e))?;
        let vector_json = serde_json::to_string(&record.vector).map_err(|e| corrupt(id, e))?;

        let mut doc = Document::new();
        doc.add_text(self.schema.chunk_id, id);
        doc.add_text(self.schema.content, &record.record.content);
        doc.add_text(self.schema.metadata_json, &metadata_json);
        for (key, value) in &record.record.metadata {
            doc.add_text(self.schema.meta_terms, meta_term(key, &value.term_repr()));
        }
        doc.add_text(self.schema.vector_json, &vector_json);
        Ok(doc)
    }

    fn read_text<'a>(&self, doc: &'a Document, field: tantivy::schema::Field) -> Option<&'a str> {
        doc.get_first(field).and_then(|v| v.as_str())
    }

    fn to_record(&self, doc: &Document) -> BackendResult<StoredRecord> {
        let id = self
            .read_text(doc, self.schema.chunk_id)
            .ok_or_else(|| corrupt("<unknown>", "missing chunk_id"))?
            .to_string();
        let content = self
            .read_text(doc, self.schema.content)
            .unwrap_or_default()
            .to_string();
        let metadata: Metadata = match self.read_text(doc, self.schema.metadata_json) {
            Some(json) => serde_json::from_str(json).map_err(|e| corrupt(&id, e))?,
            None => BTreeMap::new(),
        };

        Ok(StoredRecord {
            id,
            content,
            metadata,
        })
    }

    fn to_vector(&self, doc: &Document, id: &str) -> BackendResult<Vec<f32>> {
        let json = self
            .read_text(doc, self.schema.vector_json)
            .ok_or_else(|| corrupt(id, "missing vector"))?;
        serde_json::from_str(json).map_err(|e| corrupt(id, e))
    }

    fn filter_query(&self, filter: Option<&MetadataFilter>) -> Box<dyn Query> {
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return Box::new(AllQuery);
        };

        let clauses: Vec<(Occur, Box<dyn Query>)> = filter
            .conditions()
            .map(|(key, value)| {
                let term = Term::from_field_text(
                    self.schema.meta_terms,
                    &meta_term(key, &value.term_repr()),
                );
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Must, query)
            })
            .collect();

        Box::new(BooleanQuery::new(clauses))
    }

    fn candidates(
        &self,
        searcher: &Searcher,
        filter: Option<&MetadataFilter>,
    ) -> BackendResult<Vec<Document>> {
        let query = self.filter_query(filter);
        let addresses = searcher.search(query.as_ref(), &DocSetCollector)?;

        let mut docs = Vec::with_capacity(addresses.len());
        for address in addresses {
            docs.push(searcher.doc::<Document>(address)?);
        }
        Ok(docs)
    }
}

impl VectorBackend for TantivyBackend {
    fn upsert(&self, records: Vec<VectorRecord>) -> BackendResult<()> {
        self.ensure_open()?;
        if records.is_empty() {
            return Ok(());
        }

        let docs = records
            .iter()
            .map(|r| self.to_document(r))
            .collect::<BackendResult<Vec<_>>>()?;

        self.write_and_commit(|writer, schema| {
            for (record, doc) in records.iter().zip(docs) {
                writer.delete_term(Term::from_field_text(schema.chunk_id, &record.record.id));
                writer.add_document(doc)?;
            }
            Ok(())
        })?;

        tracing::debug!(target: "backend", "upserted {} records", records.len());
        Ok(())
    }

    fn get(&self, ids: &[String]) -> BackendResult<Vec<StoredRecord>> {
        self.ensure_open()?;
        let searcher = self.reader.searcher();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let term = Term::from_field_text(self.schema.chunk_id, id);
            let query = TermQuery::new(term, IndexRecordOption::Basic);
            let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;

            if let Some((_, address)) = top_docs.into_iter().next() {
                let doc: Document = searcher.doc(address)?;
                records.push(self.to_record(&doc)?);
            }
        }
        Ok(records)
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

        let searcher = self.reader.searcher();
        let mut scored = Vec::new();
        for doc in self.candidates(&searcher, filter)? {
            let record = self.to_record(&doc)?;
            let stored_vector = self.to_vector(&doc, &record.id)?;
            scored.push(ScoredRecord {
                score: cosine_similarity(vector, &stored_vector),
                record,
            });
        }

        sort_by_score(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn find(&self, filter: &MetadataFilter, limit: usize) -> BackendResult<Vec<StoredRecord>> {
        self.ensure_open()?;
        let searcher = self.reader.searcher();

        let mut records = self
            .candidates(&searcher, Some(filter))?
            .iter()
            .map(|doc| self.to_record(doc))
            .collect::<BackendResult<Vec<_>>>()?;

        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.truncate(limit);
        Ok(records)
    }

    fn delete(&self, ids: &[String]) -> BackendResult<()> {
        self.ensure_open()?;
        if ids.is_empty() {
            return Ok(());
        }

        self.write_and_commit(|writer, schema| {
            for id in ids {
                writer.delete_term(Term::from_field_text(schema.chunk_id, id));
            }
            Ok(())
        })?;

        tracing::debug!(target: "backend", "deleted {} records", ids.len());
        Ok(())
    }

    fn count(&self) -> BackendResult<usize> {
        self.ensure_open()?;
        Ok(self.reader.searcher().num_docs() as usize)
    }

    fn close(&self) -> BackendResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mut writer) = self.writer.lock().take() {
            writer.commit()?;
            writer.wait_merging_threads()?;
        }

        tracing::debug!(target: "backend", "closed tantivy index");
        Ok(())
    }
}

fn corrupt(id: &str, reason: impl std::fmt::Display) -> BackendError {
    BackendError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MetadataValue;

    fn record(id: &str, user: &str, turn: i64, vector: Vec<f32>) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("user_id".into(), user.into());
        metadata.insert("turn".into(), turn.into());
        VectorRecord {
            record: StoredRecord {
                id: id.to_string(),
                content: format!("content of {id}"),
                metadata,
            },
            vector,
        }
    }

    fn backend() -> TantivyBackend {
        TantivyBackend::in_memory(DEFAULT_WRITER_HEAP_BYTES).unwrap()
    }

    #[test]
    fn test_upsert_get_roundtrip_preserves_types() {
        let backend = backend();
        backend
            .upsert(vec![record("a", "u1", 3, vec![1.0, 0.0])])
            .unwrap();

        let got = backend.get(&["a".to_string()]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "content of a");
        assert_eq!(got[0].metadata["turn"], MetadataValue::Int(3));
        assert_eq!(got[0].metadata["user_id"], MetadataValue::Str("u1".into()));
    }

    #[test]
    fn test_upsert_replaces_existing_id() {
        let backend = backend();
        backend
            .upsert(vec![record("a", "u1", 1, vec![1.0, 0.0])])
            .unwrap();
        backend
            .upsert(vec![record("a", "u2", 2, vec![0.0, 1.0])])
            .unwrap();

        assert_eq!(backend.count().unwrap(), 1);
        let got = backend.get(&["a".to_string()]).unwrap();
        assert_eq!(got[0].metadata["user_id"].as_str(), Some("u2"));
    }

    #[test]
    fn test_query_filters_by_typed_metadata() {
        let backend = backend();
        backend
            .upsert(vec![
                record("a", "u1", 1, vec![1.0, 0.0]),
                record("b", "u1", 2, vec![0.6, 0.8]),
                record("c", "u2", 1, vec![1.0, 0.0]),
            ])
            .unwrap();

        let hits = backend.query(&[1.0, 0.0], 10, None).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);

        let filter = MetadataFilter::new().eq("user_id", "u1");
        let hits = backend.query(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 2);

        let filter = MetadataFilter::new().eq("user_id", "u1").eq("turn", 2i64);
        let hits = backend.query(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, "b");

        // Same digits, different type
        let filter = MetadataFilter::new().eq("turn", "2");
        assert!(backend.query(&[1.0, 0.0], 10, Some(&filter)).unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_find() {
        let backend = backend();
        backend
            .upsert(vec![
                record("b", "u1", 1, vec![1.0]),
                record("a", "u1", 1, vec![1.0]),
                record("c", "u2", 1, vec![1.0]),
            ])
            .unwrap();

        backend.delete(&["b".to_string(), "missing".to_string()]).unwrap();
        assert_eq!(backend.count().unwrap(), 2);

        let found = backend.find(&MetadataFilter::new(), 10).unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        assert_eq!(backend.find(&MetadataFilter::new(), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let backend = backend();
        backend
            .upsert(vec![record("a", "u1", 1, vec![1.0])])
            .unwrap();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(matches!(backend.count(), Err(BackendError::Closed)));
        assert!(matches!(
            backend.get(&["a".to_string()]),
            Err(BackendError::Closed)
        ));
    }
}
