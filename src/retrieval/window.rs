//! Sibling context windows.

use serde::Serialize;
use std::collections::HashMap;

use crate::error::{IndexError, IndexResult};
use crate::storage::ChunkStore;
use crate::tree::Chunk;

/// Default number of siblings on each side of the target.
pub const DEFAULT_WINDOW_SIZE: usize = 1;

/// A run of siblings around a target chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ContextWindow {
    /// The requested chunk.
    pub chunk: Chunk,

    /// Its parent, `None` for roots.
    pub parent: Option<Chunk>,

    /// The window in `child_ids` order, target included. A root's window is
    /// the root alone: it has no siblings, so `before()` and `after()` are
    /// both empty and `siblings.len() - 1` is the sibling count.
    pub siblings: Vec<Chunk>,

    /// Index of the target within `siblings`.
    pub position: usize,
}

impl ContextWindow {
    /// Window contents joined in order.
    pub fn text(&self, separator: &str) -> String {
        self.siblings
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    pub fn before(&self) -> &[Chunk] {
        &self.siblings[..self.position]
    }

    pub fn after(&self) -> &[Chunk] {
        &self.siblings[self.position + 1..]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContextWindowResolver<'a> {
    store: &'a ChunkStore,
}

impl<'a> ContextWindowResolver<'a> {
    pub fn new(store: &'a ChunkStore) -> Self {
        Self { store }
    }

    /// Up to `window_size` siblings on each side of `chunk_id`, clipped at
    /// the ends of the parent's `child_ids`.
    pub fn window(&self, chunk_id: &str, window_size: usize) -> IndexResult<ContextWindow> {
        let chunk = self
            .store
            .get_one(chunk_id)?
            .ok_or_else(|| IndexError::NotFound(chunk_id.to_string()))?;

        let Some(parent_id) = chunk.parent_id.clone() else {
            return Ok(ContextWindow {
                siblings: vec![chunk.clone()],
                chunk,
                parent: None,
                position: 0,
            });
        };

        let parent = self
            .store
            .get_one(&parent_id)?
            .ok_or_else(|| IndexError::inconsistent(chunk_id, &parent_id))?;

        let index = parent
            .child_position(chunk_id)
            .ok_or_else(|| IndexError::inconsistent(&parent_id, chunk_id))?;

        let start = index.saturating_sub(window_size);
        let end = index
            .saturating_add(window_size)
            .min(parent.child_ids.len() - 1);
        let ids = &parent.child_ids[start..=end];

        let mut fetched: HashMap<String, Chunk> = self
            .store
            .get(ids)?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let siblings = ids
            .iter()
            .map(|id| {
                fetched
                    .remove(id)
                    .ok_or_else(|| IndexError::inconsistent(&parent_id, id))
            })
            .collect::<IndexResult<Vec<_>>>()?;

        tracing::debug!(
            target: "retrieval",
            "window for {chunk_id}: siblings {start}..={end} of {}",
            parent.child_ids.len()
        );

        Ok(ContextWindow {
            chunk,
            parent: Some(parent),
            siblings,
            position: index - start,
        })
    }
}
