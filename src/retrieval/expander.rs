//! Similarity search with hierarchical expansion.
//!
//! Each raw hit is enriched with its parent and direct children. A parent
//! that has already been pulled in as context is suppressed as a later
//! top-level hit, which is why the store is queried for `fetch_k > limit`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{IndexError, IndexResult};
use crate::storage::{ChunkStore, MetadataFilter, ScoredChunk};
use crate::tree::Chunk;

/// Default number of expanded results.
pub const DEFAULT_LIMIT: usize = 5;

/// Default ratio of raw hits fetched per requested result.
pub const DEFAULT_FETCH_K_MULTIPLIER: usize = 4;

/// Tuning for one search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of results returned.
    pub limit: usize,

    /// Raw hits requested from the store before de-duplication.
    pub fetch_k: usize,

    /// Attach parent and children to every hit.
    pub include_hierarchy: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl SearchOptions {
    /// Options for `limit` results with the default fetch multiplier.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            fetch_k: limit.saturating_mul(DEFAULT_FETCH_K_MULTIPLIER),
            include_hierarchy: true,
        }
    }

    pub fn with_fetch_k(mut self, fetch_k: usize) -> Self {
        self.fetch_k = fetch_k;
        self
    }

    pub fn with_hierarchy(mut self, include_hierarchy: bool) -> Self {
        self.include_hierarchy = include_hierarchy;
        self
    }

    /// `fetch_k`, raised to `limit` when smaller.
    pub fn effective_fetch_k(&self) -> usize {
        self.fetch_k.max(self.limit)
    }
}

/// A hit with its surrounding hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedResult {
    pub chunk: Chunk,
    pub score: f32,
    pub parent: Option<Chunk>,
    /// Direct children in `child_ids` order; `None` for leaves.
    pub children: Option<Vec<Chunk>>,
}

impl ExpandedResult {
    fn bare(hit: ScoredChunk) -> Self {
        Self {
            chunk: hit.chunk,
            score: hit.score,
            parent: None,
            children: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalExpander<'a> {
    store: &'a ChunkStore,
}

impl<'a> RetrievalExpander<'a> {
    pub fn new(store: &'a ChunkStore) -> Self {
        Self { store }
    }

    pub fn search(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
        options: &SearchOptions,
    ) -> IndexResult<Vec<ExpandedResult>> {
        if query.trim().is_empty() {
            return Err(IndexError::validation("query must not be blank"));
        }
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let hits = self
            .store
            .similarity_search(query, options.effective_fetch_k(), filter)?;

        tracing::debug!(
            target: "retrieval",
            "{} raw hits for limit {}",
            hits.len(),
            options.limit
        );

        if !options.include_hierarchy {
            return Ok(hits
                .into_iter()
                .take(options.limit)
                .map(ExpandedResult::bare)
                .collect());
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(options.limit);

        for hit in hits {
            if results.len() >= options.limit {
                break;
            }
            if seen.contains(&hit.chunk.id) {
                tracing::trace!(target: "retrieval", "skipping {}, already in context", hit.chunk.id);
                continue;
            }

            seen.insert(hit.chunk.id.clone());
            if let Some(parent_id) = &hit.chunk.parent_id {
                seen.insert(parent_id.clone());
            }

            results.push(self.expand(hit)?);
        }

        Ok(results)
    }

    fn expand(&self, hit: ScoredChunk) -> IndexResult<ExpandedResult> {
        let parent = match &hit.chunk.parent_id {
            Some(parent_id) => {
                let parent = self.store.get_one(parent_id)?;
                if parent.is_none() {
                    tracing::debug!(
                        target: "retrieval",
                        "parent {parent_id} of {} is missing, omitting",
                        hit.chunk.id
                    );
                }
                parent
            }
            None => None,
        };

        let children = if hit.chunk.has_children() {
            self.fetch_children(&hit.chunk)?
        } else {
            None
        };

        Ok(ExpandedResult {
            chunk: hit.chunk,
            score: hit.score,
            parent,
            children,
        })
    }

    fn fetch_children(&self, chunk: &Chunk) -> IndexResult<Option<Vec<Chunk>>> {
        let mut fetched: HashMap<String, Chunk> = self
            .store
            .get(&chunk.child_ids)?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut children = Vec::with_capacity(chunk.child_ids.len());
        for id in &chunk.child_ids {
            match fetched.remove(id) {
                Some(child) => children.push(child),
                None => tracing::debug!(
                    target: "retrieval",
                    "child {id} of {} is missing, omitting",
                    chunk.id
                ),
            }
        }

        Ok((!children.is_empty()).then_some(children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::storage::MemoryBackend;
    use crate::tree::{Metadata, SplitConfig, build};

    fn store() -> ChunkStore {
        ChunkStore::new(
            Box::new(MemoryBackend::new()),
            Box::new(HashEmbedder::default()),
        )
    }

    fn garden_text() -> String {
        let topics = [
            "Tomatoes need full sun and steady watering through the summer months.",
            "Basil grows well beside tomatoes and keeps some pests away.",
            "Compost enriches the soil before planting in early spring.",
            "Pruning suckers helps tomato plants focus energy on fruit.",
        ];
        (0..24)
            .map(|i| format!("Note {i}. {}", topics[i % topics.len()]))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn stored_tree(store: &ChunkStore) -> Vec<Chunk> {
        let config = SplitConfig::from_pairs(&[(600, 0.1), (200, 0.1)]).unwrap();
        let chunks = build(&garden_text(), &Metadata::new(), "garden", &config).unwrap();
        store.add(&chunks).unwrap();
        chunks
    }

    #[test]
    fn test_search_options_defaults() {
        let options = SearchOptions::default();
        assert_eq!(options.limit, 5);
        assert_eq!(options.fetch_k, 20);
        assert!(options.include_hierarchy);

        let options = SearchOptions::new(10).with_fetch_k(3);
        assert_eq!(options.effective_fetch_k(), 10);
    }

    #[test]
    fn test_expansion_attaches_parent_and_children() {
        let store = store();
        let chunks = stored_tree(&store);
        let expander = RetrievalExpander::new(&store);

        let results = expander
            .search("tomato pruning suckers", None, &SearchOptions::new(10))
            .unwrap();
        assert!(!results.is_empty());

        for result in &results {
            let original = chunks.iter().find(|c| c.id == result.chunk.id).unwrap();
            assert_eq!(
                result.parent.as_ref().map(|p| p.id.clone()),
                original.parent_id
            );
            match &result.children {
                Some(children) => {
                    let ids: Vec<_> = children.iter().map(|c| c.id.clone()).collect();
                    assert_eq!(ids, original.child_ids);
                }
                None => assert!(original.child_ids.is_empty()),
            }
        }
    }

    #[test]
    fn test_no_repeats_and_parents_suppressed() {
        let store = store();
        stored_tree(&store);
        let expander = RetrievalExpander::new(&store);

        let results = expander
            .search("tomatoes", None, &SearchOptions::new(50).with_fetch_k(200))
            .unwrap();

        let mut seen = HashSet::new();
        for result in &results {
            assert!(seen.insert(result.chunk.id.clone()), "repeated id");
        }

        // A parent surfaced as context never reappears later as a top-level hit.
        for (i, result) in results.iter().enumerate() {
            if let Some(parent) = &result.parent {
                assert!(
                    results[i + 1..].iter().all(|r| r.chunk.id != parent.id),
                    "parent {} reappeared",
                    parent.id
                );
            }
        }
    }

    #[test]
    fn test_limit_and_flat_mode() {
        let store = store();
        stored_tree(&store);
        let expander = RetrievalExpander::new(&store);

        let results = expander
            .search("compost soil", None, &SearchOptions::new(3))
            .unwrap();
        assert!(results.len() <= 3);

        let flat = expander
            .search(
                "compost soil",
                None,
                &SearchOptions::new(4).with_hierarchy(false),
            )
            .unwrap();
        assert_eq!(flat.len(), 4);
        assert!(flat.iter().all(|r| r.parent.is_none() && r.children.is_none()));
        assert!(flat.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_missing_links_are_tolerated() {
        let store = store();
        let chunks = stored_tree(&store);

        let leaf = chunks.iter().find(|c| c.level == 2).unwrap();
        let parent_id = leaf.parent_id.clone().unwrap();
        store.delete(&[parent_id.clone()]).unwrap();

        let results = RetrievalExpander::new(&store)
            .search(&leaf.content, None, &SearchOptions::new(50).with_fetch_k(500))
            .unwrap();
        let hit = results.iter().find(|r| r.chunk.id == leaf.id).unwrap();
        assert!(hit.parent.is_none());

        let root = chunks.iter().find(|c| c.is_root()).unwrap().clone();
        let expected = root.child_ids.len() - 1;
        let expanded = RetrievalExpander::new(&store)
            .expand(ScoredChunk {
                chunk: root,
                score: 1.0,
            })
            .unwrap();
        let children = expanded.children.unwrap();
        assert_eq!(children.len(), expected);
        assert!(children.iter().all(|c| c.id != parent_id));
    }

    #[test]
    fn test_blank_query_and_zero_limit() {
        let store = store();
        let expander = RetrievalExpander::new(&store);
        assert!(matches!(
            expander.search(" ", None, &SearchOptions::default()),
            Err(IndexError::Validation(_))
        ));
        assert!(
            expander
                .search("anything", None, &SearchOptions::new(0))
                .unwrap()
                .is_empty()
        );
    }
}
