//! Core types for hierarchical chunk trees.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{IndexError, IndexResult};

/// Identifier of a chunk, unique within a tree namespace.
///
/// Roots carry the caller's `base_id`; descendants are `{parent_id}_L{level}_C{index}`.
pub type ChunkId = String;

/// String-keyed scalar metadata attached to every chunk.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Type-tagged encoding used for exact-match index terms.
    pub fn term_repr(&self) -> String {
        match self {
            Self::Bool(v) => format!("b:{v}"),
            Self::Int(v) => format!("i:{v}"),
            Self::Float(v) => format!("f:{v}"),
            Self::Str(v) => format!("s:{v}"),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A node in a document's hierarchical split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier within the tree namespace.
    pub id: ChunkId,

    /// Text content of this chunk (the full text for the root).
    pub content: String,

    /// Caller-supplied metadata, inherited by every chunk of the tree.
    pub metadata: Metadata,

    /// Depth in the tree, 0 for the root.
    pub level: u32,

    /// Parent chunk, `None` only for the root.
    pub parent_id: Option<ChunkId>,

    /// Direct children in split order.
    pub child_ids: Vec<ChunkId>,
}

impl Chunk {
    /// Create a root chunk holding the full original text.
    pub fn root(id: impl Into<ChunkId>, content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
            level: 0,
            parent_id: None,
            child_ids: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn has_children(&self) -> bool {
        !self.child_ids.is_empty()
    }

    /// Position of `id` among this chunk's children.
    pub fn child_position(&self, id: &str) -> Option<usize> {
        self.child_ids.iter().position(|c| c == id)
    }

    /// Get a preview of the content (first N characters).
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.content.char_indices().nth(max_chars) {
            Some((end, _)) => &self.content[..end],
            None => &self.content,
        }
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Deterministic id of the `index`-th child of `parent_id` at `level`.
pub fn child_id(parent_id: &str, level: u32, index: usize) -> ChunkId {
    format!("{parent_id}_L{level}_C{index}")
}

/// Size and overlap for one hierarchy level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitLevel {
    /// Target chunk size in characters.
    pub chunk_size: usize,

    /// Fraction of `chunk_size` shared between adjacent chunks, in `[0, 1)`.
    pub overlap_ratio: f64,
}

impl SplitLevel {
    pub fn new(chunk_size: usize, overlap_ratio: f64) -> Self {
        Self {
            chunk_size,
            overlap_ratio,
        }
    }

    /// Overlap in characters (truncated).
    pub fn overlap_chars(&self) -> usize {
        (self.chunk_size as f64 * self.overlap_ratio) as usize
    }
}

/// Level-by-level split configuration, strictly decreasing in chunk size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(default = "default_levels")]
    pub levels: Vec<SplitLevel>,
}

fn default_levels() -> Vec<SplitLevel> {
    vec![
        SplitLevel::new(2000, 0.1),
        SplitLevel::new(1000, 0.1),
        SplitLevel::new(500, 0.1),
    ]
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            levels: default_levels(),
        }
    }
}

impl SplitConfig {
    /// Build a validated config from `(chunk_size, overlap_ratio)` pairs.
    pub fn from_pairs(pairs: &[(usize, f64)]) -> IndexResult<Self> {
        let config = Self {
            levels: pairs
                .iter()
                .map(|&(size, ratio)| SplitLevel::new(size, ratio))
                .collect(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Number of levels below the root.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Size of the first (largest) level, if any.
    pub fn first_chunk_size(&self) -> Option<usize> {
        self.levels.first().map(|l| l.chunk_size)
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.levels.is_empty() {
            return Err(IndexError::validation(
                "split config must define at least one level",
            ));
        }

        for (i, level) in self.levels.iter().enumerate() {
            if level.chunk_size == 0 {
                return Err(IndexError::validation(format!(
                    "level {} chunk_size must be greater than zero",
                    i + 1
                )));
            }
            if !(0.0..1.0).contains(&level.overlap_ratio) {
                return Err(IndexError::validation(format!(
                    "level {} overlap_ratio ({}) must be in [0, 1)",
                    i + 1,
                    level.overlap_ratio
                )));
            }
        }

        for pair in self.levels.windows(2) {
            if pair[1].chunk_size >= pair[0].chunk_size {
                return Err(IndexError::validation(format!(
                    "chunk sizes must be strictly decreasing ({} then {})",
                    pair[0].chunk_size, pair[1].chunk_size
                )));
            }
        }

        Ok(())
    }
}
