//! Builds a multi-resolution chunk tree from one input text.

use rayon::prelude::*;

use super::splitter::{RecursiveSplitter, TextSplitter};
use super::types::{Chunk, Metadata, SplitConfig, child_id};
use crate::error::{IndexError, IndexResult};

/// Splits a text level by level into a tree of overlapping chunks.
///
/// Algorithm:
/// 1. Create the root (level 0) holding the full text
/// 2. For each configured level, split every chunk of the current frontier
/// 3. A parent whose content yields at most one piece gets no children
/// 4. Children are linked both ways and become the next frontier
/// 5. Stop when the levels are exhausted or the frontier is empty
///
/// Building is pure and deterministic: the same input always yields the same
/// ids, contents and structure.
pub struct ChunkTreeBuilder {
    splitter: Box<dyn TextSplitter>,
}

impl std::fmt::Debug for ChunkTreeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTreeBuilder").finish_non_exhaustive()
    }
}

impl Default for ChunkTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkTreeBuilder {
    /// Create a builder using the boundary-aware recursive splitter.
    pub fn new() -> Self {
        Self::with_splitter(Box::new(RecursiveSplitter::new()))
    }

    /// Create a builder with a custom splitter.
    pub fn with_splitter(splitter: Box<dyn TextSplitter>) -> Self {
        Self { splitter }
    }

    /// Build the full tree for `text`, root first, then level by level.
    pub fn build(
        &self,
        text: &str,
        metadata: &Metadata,
        base_id: &str,
        config: &SplitConfig,
    ) -> IndexResult<Vec<Chunk>> {
        validate_input(text, base_id)?;
        config.validate()?;

        let mut chunks = vec![Chunk::root(base_id, text, metadata.clone())];
        let mut frontier: Vec<usize> = vec![0];

        for (depth, split) in config.levels.iter().enumerate() {
            let level = depth as u32 + 1;
            let overlap = split.overlap_chars();

            // Parallel split; collect keeps frontier order
            let pieces: Vec<Vec<String>> = frontier
                .par_iter()
                .map(|&idx| {
                    self.splitter
                        .split(&chunks[idx].content, split.chunk_size, overlap)
                })
                .collect();

            let mut next = Vec::new();
            for (&parent_idx, parent_pieces) in frontier.iter().zip(pieces) {
                if parent_pieces.len() <= 1 {
                    continue;
                }

                let parent_id = chunks[parent_idx].id.clone();
                for (index, content) in parent_pieces.into_iter().enumerate() {
                    let id = child_id(&parent_id, level, index);
                    chunks[parent_idx].child_ids.push(id.clone());
                    chunks.push(Chunk {
                        id,
                        content,
                        metadata: metadata.clone(),
                        level,
                        parent_id: Some(parent_id.clone()),
                        child_ids: Vec::new(),
                    });
                    next.push(chunks.len() - 1);
                }
            }

            tracing::debug!(
                target: "tree",
                "level {level}: split {} parents into {} chunks (size={}, overlap={overlap})",
                frontier.len(),
                next.len(),
                split.chunk_size
            );

            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(chunks)
    }
}

/// Build a tree with the default recursive splitter.
pub fn build(
    text: &str,
    metadata: &Metadata,
    base_id: &str,
    config: &SplitConfig,
) -> IndexResult<Vec<Chunk>> {
    ChunkTreeBuilder::new().build(text, metadata, base_id, config)
}

fn validate_input(text: &str, base_id: &str) -> IndexResult<()> {
    if text.trim().is_empty() {
        return Err(IndexError::validation("text must not be empty"));
    }
    validate_base_id(base_id)
}

/// Root ids end up inside comma-joined `child_ids` at the storage boundary.
pub(crate) fn validate_base_id(base_id: &str) -> IndexResult<()> {
    if base_id.trim().is_empty() {
        return Err(IndexError::validation("base_id must not be empty"));
    }
    if base_id.contains(',') {
        return Err(IndexError::validation(format!(
            "base_id must not contain ',': {base_id}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MetadataValue;
    use std::collections::HashMap;

    fn metadata() -> Metadata {
        let mut m = Metadata::new();
        m.insert("user_id".into(), MetadataValue::from("u1"));
        m
    }

    fn numbered_sentences(count: usize) -> String {
        (0..count)
            .map(|i| format!("Sentence {i:03} covers a distinct idea about item {i:03}. "))
            .collect()
    }

    fn long_document() -> String {
        (0..12)
            .map(|p| {
                (0..8)
                    .map(|s| format!("Paragraph {p} sentence {s} describes progress on a goal."))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn assert_tree_invariants(chunks: &[Chunk]) {
        let by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();
        assert_eq!(by_id.len(), chunks.len(), "ids must be unique");

        let roots: Vec<_> = chunks.iter().filter(|c| c.parent_id.is_none()).collect();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].level, 0);

        for chunk in chunks {
            if let Some(parent_id) = &chunk.parent_id {
                let parent = by_id[parent_id.as_str()];
                assert_eq!(parent.level + 1, chunk.level);
                let occurrences = parent.child_ids.iter().filter(|c| **c == chunk.id).count();
                assert_eq!(occurrences, 1);
            }
            for (index, child) in chunk.child_ids.iter().enumerate() {
                let child_chunk = by_id[child.as_str()];
                assert_eq!(child_chunk.parent_id.as_deref(), Some(chunk.id.as_str()));
                assert_eq!(*child, child_id(&chunk.id, chunk.level + 1, index));
            }
        }
    }

    #[test]
    fn test_short_text_is_single_root() {
        let config = SplitConfig::default();
        let chunks = build("Checked in on my running goal today.", &metadata(), "j1", &config)
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_root());
        assert!(chunks[0].child_ids.is_empty());
        assert_eq!(chunks[0].metadata, metadata());
    }

    #[test]
    fn test_two_children_with_ten_percent_overlap() {
        // ~2,500 characters
        let text = numbered_sentences(48);
        let config = SplitConfig::from_pairs(&[(2000, 0.1)]).unwrap();
        let chunks = build(&text, &metadata(), "doc", &config).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].child_ids, vec!["doc_L1_C0", "doc_L1_C1"]);

        let (first, second) = (&chunks[1], &chunks[2]);
        assert!(first.char_count() <= 2000);

        // Content shared between siblings is bounded by the overlap
        let duplicated = first.char_count() + second.char_count() - text.chars().count();
        assert!(duplicated > 0);
        assert!(duplicated <= 200, "duplicated {duplicated} chars");

        let last_in_first = &first.content.rsplit("Sentence ").next().unwrap()[..3];
        assert!(second.content.contains(&format!("Sentence {last_in_first}")));
    }

    #[test]
    fn test_level_one_children_cover_text() {
        let text = long_document();
        let config = SplitConfig::from_pairs(&[(600, 0.1), (200, 0.1)]).unwrap();
        let chunks = build(&text, &metadata(), "doc", &config).unwrap();

        let level_one: Vec<&Chunk> = chunks.iter().filter(|c| c.level == 1).collect();
        assert!(level_one.len() > 1);

        let mut cursor = 0;
        for child in &level_one {
            let start = text.find(child.content.as_str()).expect("child is a substring");
            // No gap of real content between consecutive children
            assert!(text[cursor..start.max(cursor)].trim().is_empty());
            cursor = cursor.max(start + child.content.len());
        }
        assert!(text[cursor..].trim().is_empty());
    }

    #[test]
    fn test_multi_level_invariants() {
        let text = long_document();
        let config = SplitConfig::from_pairs(&[(1500, 0.1), (500, 0.1), (150, 0.0)]).unwrap();
        let chunks = build(&text, &metadata(), "doc", &config).unwrap();

        assert!(chunks.iter().any(|c| c.level == 3));
        assert_tree_invariants(&chunks);

        for chunk in &chunks {
            assert_eq!(chunk.metadata, metadata());
        }
    }

    #[test]
    fn test_branch_stops_when_piece_fits() {
        // Second paragraph is short enough to stay unsplit at level 2
        let long_para = numbered_sentences(8);
        let text = format!("{long_para}\n\nTiny closing paragraph.");
        let config = SplitConfig::from_pairs(&[(400, 0.0), (150, 0.0)]).unwrap();
        let chunks = build(&text, &Metadata::new(), "doc", &config).unwrap();

        let tiny = chunks
            .iter()
            .find(|c| c.level == 1 && c.content.contains("Tiny closing"))
            .expect("tiny paragraph chunk");
        assert!(tiny.child_ids.is_empty());
        assert_tree_invariants(&chunks);
    }

    #[test]
    fn test_build_is_deterministic() {
        let text = long_document();
        let config = SplitConfig::default();
        let a = build(&text, &metadata(), "doc", &config).unwrap();
        let b = build(&text, &metadata(), "doc", &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let config = SplitConfig::default();
        assert!(matches!(
            build("", &metadata(), "doc", &config),
            Err(IndexError::Validation(_))
        ));
        assert!(matches!(
            build("   \n", &metadata(), "doc", &config),
            Err(IndexError::Validation(_))
        ));
        assert!(matches!(
            build("text", &metadata(), "a,b", &config),
            Err(IndexError::Validation(_))
        ));
        assert!(matches!(
            build("text", &metadata(), "", &config),
            Err(IndexError::Validation(_))
        ));

        let increasing = SplitConfig {
            levels: vec![
                crate::tree::SplitLevel::new(100, 0.1),
                crate::tree::SplitLevel::new(200, 0.1),
            ],
        };
        assert!(matches!(
            build("text", &metadata(), "doc", &increasing),
            Err(IndexError::Validation(_))
        ));
    }
}
