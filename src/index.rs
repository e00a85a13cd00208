//! The hierarchical index facade.
//!
//! `HierarchicalIndex` ties the tree builder, the chunk store and the
//! retrieval components together behind the operations applications use:
//! add, search, inspect, window and delete whole trees.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::config::{BackendKind, EmbeddingProvider, SearchConfig, Settings};
use crate::embedding::{Embedder, HashEmbedder};
use crate::error::{IndexError, IndexResult};
use crate::retrieval::{
    ContextWindow, ContextWindowResolver, ExpandedResult, RetrievalExpander, SearchOptions,
};
use crate::storage::{
    ChunkStore, KEY_ROOT_ID, MemoryBackend, MetadataFilter, TantivyBackend, VectorBackend,
};
use crate::tree::{Chunk, ChunkId, ChunkTreeBuilder, Metadata, SplitConfig};
use crate::{debug_event, log_event};

/// A stored tree, grouped by level.
#[derive(Debug, Clone, Serialize)]
pub struct TreeView {
    pub root: Chunk,
    /// Chunks per level in breadth-first order, the root's level included.
    pub levels: BTreeMap<u32, Vec<Chunk>>,
}

impl TreeView {
    pub fn chunk_count(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// Levels below the root.
    pub fn depth(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn level(&self, level: u32) -> &[Chunk] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or_default()
    }

    /// All chunks, level by level.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.levels.values().flatten()
    }

    pub fn summary(&self) -> TreeSummary {
        TreeSummary {
            root_id: self.root.id.clone(),
            chunk_count: self.chunk_count(),
            depth: self.depth(),
            level_counts: self
                .levels
                .iter()
                .map(|(level, chunks)| (*level, chunks.len()))
                .collect(),
            char_count: self.root.char_count(),
        }
    }
}

/// Shape of a stored tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub root_id: ChunkId,
    pub chunk_count: usize,
    pub depth: usize,
    pub level_counts: BTreeMap<u32, usize>,
    /// Characters in the original text.
    pub char_count: usize,
}

pub struct HierarchicalIndex {
    store: ChunkStore,
    builder: ChunkTreeBuilder,
    split_config: SplitConfig,
    search: SearchConfig,
}

impl std::fmt::Debug for HierarchicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalIndex")
            .field("store", &self.store)
            .field("split_config", &self.split_config)
            .field("search", &self.search)
            .finish()
    }
}

impl HierarchicalIndex {
    pub fn new(store: ChunkStore, split_config: SplitConfig) -> IndexResult<Self> {
        split_config.validate()?;
        Ok(Self {
            store,
            builder: ChunkTreeBuilder::new(),
            split_config,
            search: SearchConfig::default(),
        })
    }

    /// In-process index with the hash embedder. Nothing is persisted.
    pub fn in_memory(split_config: SplitConfig) -> IndexResult<Self> {
        let store = ChunkStore::new(
            Box::new(MemoryBackend::new()),
            Box::new(HashEmbedder::default()),
        );
        Self::new(store, split_config)
    }

    /// Open the backend and embedder named in `settings`.
    pub fn open(settings: &Settings) -> IndexResult<Self> {
        settings.validate()?;

        let embedder = open_embedder(settings)?;
        let backend: Box<dyn VectorBackend> = match settings.storage.backend {
            BackendKind::Tantivy => Box::new(TantivyBackend::open(
                &settings.storage.index_path,
                settings.storage.writer_heap_bytes,
            )?),
            BackendKind::Memory => Box::new(MemoryBackend::new()),
        };

        let store = ChunkStore::new(backend, embedder).with_batch_size(settings.embedding.batch_size);

        log_event!(
            "index",
            "opened",
            "{:?} backend, {:?} embeddings",
            settings.storage.backend,
            settings.embedding.provider
        );

        Ok(Self::new(store, settings.hierarchy.clone())?.with_search_config(settings.search.clone()))
    }

    pub fn with_search_config(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_builder(mut self, builder: ChunkTreeBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn split_config(&self) -> &SplitConfig {
        &self.split_config
    }

    /// Search options from the configured defaults.
    pub fn search_options(&self) -> SearchOptions {
        self.search.default_options()
    }

    /// Split `text` into a tree and store it. Returns the root id.
    ///
    /// Without a `base_id` a UUID is generated. Adding under an existing root
    /// id replaces that tree; chunks of the old tree that the new one does not
    /// overwrite are removed after the new tree is stored.
    pub fn add_tree(
        &self,
        text: &str,
        metadata: &Metadata,
        base_id: Option<&str>,
    ) -> IndexResult<ChunkId> {
        let root_id = match base_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let chunks = self
            .builder
            .build(text, metadata, &root_id, &self.split_config)?;
        self.store.validate(&chunks)?;

        let previous = match self.store.get_one(&root_id)? {
            Some(existing) if !existing.is_root() => {
                return Err(IndexError::validation(format!(
                    "{root_id} already names a non-root chunk"
                )));
            }
            Some(_) => self.collect_tree_ids(&root_id)?,
            None => Vec::new(),
        };

        self.store.add(&chunks)?;

        if !previous.is_empty() {
            let fresh: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
            let stale: Vec<ChunkId> = previous
                .into_iter()
                .filter(|id| !fresh.contains(id.as_str()))
                .collect();
            debug_event!("index", "replaced", "{root_id}, {} stale chunks", stale.len());
            self.store.delete(&stale)?;
        }

        log_event!("index", "stored", "{} chunks under {root_id}", chunks.len());
        Ok(root_id)
    }

    /// Similarity search with hierarchical expansion.
    pub fn search(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
        options: &SearchOptions,
    ) -> IndexResult<Vec<ExpandedResult>> {
        RetrievalExpander::new(&self.store).search(query, filter, options)
    }

    /// The tree under `root_id`, grouped by level.
    ///
    /// Any id may be given; a non-root id yields its subtree. Fails with
    /// `InconsistentTree` when a referenced child is missing, names another
    /// parent, or is reached twice.
    pub fn get_tree(&self, root_id: &str) -> IndexResult<TreeView> {
        let root = self
            .store
            .get_one(root_id)?
            .ok_or_else(|| IndexError::NotFound(root_id.to_string()))?;

        let mut levels: BTreeMap<u32, Vec<Chunk>> = BTreeMap::new();
        let mut visited: HashSet<ChunkId> = HashSet::from([root.id.clone()]);
        let mut frontier = link_children(&root, &mut visited)?;
        levels.insert(root.level, vec![root.clone()]);

        while !frontier.is_empty() {
            let ids: Vec<ChunkId> = frontier.iter().map(|(_, id)| id.clone()).collect();
            let mut fetched: HashMap<ChunkId, Chunk> = self
                .store
                .get(&ids)?
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect();

            let mut next = Vec::new();
            for (parent_id, id) in &frontier {
                let chunk = fetched
                    .remove(id)
                    .ok_or_else(|| IndexError::inconsistent(parent_id, id))?;
                if chunk.parent_id.as_deref() != Some(parent_id.as_str()) {
                    return Err(IndexError::inconsistent(id, parent_id));
                }
                next.extend(link_children(&chunk, &mut visited)?);
                levels.entry(chunk.level).or_default().push(chunk);
            }
            frontier = next;
        }

        Ok(TreeView { root, levels })
    }

    /// Chunk and level counts for a stored tree.
    pub fn tree_summary(&self, root_id: &str) -> IndexResult<TreeSummary> {
        Ok(self.get_tree(root_id)?.summary())
    }

    /// Siblings around `chunk_id`, `window_size` on each side.
    pub fn get_window(&self, chunk_id: &str, window_size: usize) -> IndexResult<ContextWindow> {
        ContextWindowResolver::new(&self.store).window(chunk_id, window_size)
    }

    /// Window using the configured default size.
    pub fn get_default_window(&self, chunk_id: &str) -> IndexResult<ContextWindow> {
        self.get_window(chunk_id, self.search.window_size)
    }

    /// Delete a whole tree by its root id.
    ///
    /// Returns `false` when nothing is stored under `root_id`. Non-root ids
    /// are rejected so that trees are never left half-linked.
    pub fn delete_tree(&self, root_id: &str) -> IndexResult<bool> {
        let Some(root) = self.store.get_one(root_id)? else {
            return Ok(false);
        };
        if !root.is_root() {
            return Err(IndexError::validation(format!(
                "{root_id} is not a root chunk; delete its tree instead"
            )));
        }

        let ids = self.collect_tree_ids(root_id)?;
        self.store.delete(&ids)?;

        log_event!("index", "deleted", "{} chunks under {root_id}", ids.len());
        Ok(true)
    }

    /// Ids reachable from `root_id` through `child_ids`, plus any chunk
    /// stored under the same root. Missing links are skipped.
    fn collect_tree_ids(&self, root_id: &str) -> IndexResult<Vec<ChunkId>> {
        let mut seen: HashSet<ChunkId> = HashSet::new();
        let mut ids = Vec::new();
        let mut frontier = vec![root_id.to_string()];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for chunk in self.store.get(&frontier)? {
                if seen.insert(chunk.id.clone()) {
                    next.extend(chunk.child_ids.iter().cloned());
                    ids.push(chunk.id);
                }
            }
            frontier = next.into_iter().filter(|id| !seen.contains(id)).collect();
        }

        let stragglers = self
            .store
            .find(&MetadataFilter::new().eq(KEY_ROOT_ID, root_id), usize::MAX)?;
        for chunk in stragglers {
            if seen.insert(chunk.id.clone()) {
                ids.push(chunk.id);
            }
        }

        Ok(ids)
    }

    /// Stored chunks matching `filter`, ordered by id.
    pub fn find(&self, filter: &MetadataFilter, limit: usize) -> IndexResult<Vec<Chunk>> {
        self.store.find(filter, limit)
    }

    pub fn chunk_count(&self) -> IndexResult<usize> {
        self.store.count()
    }

    /// Commit pending writes and release the backend.
    pub fn close(&self) -> IndexResult<()> {
        self.store.close()?;
        log_event!("index", "closed");
        Ok(())
    }
}

fn open_embedder(settings: &Settings) -> IndexResult<Box<dyn Embedder>> {
    match settings.embedding.provider {
        EmbeddingProvider::Hash => Ok(Box::new(HashEmbedder::new(settings.embedding.dimension)?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Fastembed => Ok(Box::new(crate::embedding::FastEmbedder::from_settings(
            &settings.embedding.model,
            false,
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Fastembed => Err(crate::embedding::EmbeddingError::UnknownProvider(
            "fastembed (build with the `local-embeddings` feature)".to_string(),
        )
        .into()),
    }
}

/// `(parent, child)` pairs for the next walk step. Each child may be
/// reached once.
fn link_children(
    chunk: &Chunk,
    visited: &mut HashSet<ChunkId>,
) -> IndexResult<Vec<(ChunkId, ChunkId)>> {
    chunk
        .child_ids
        .iter()
        .map(|child| {
            if !visited.insert(child.clone()) {
                return Err(IndexError::inconsistent(&chunk.id, child));
            }
            Ok((chunk.id.clone(), child.clone()))
        })
        .collect()
}
