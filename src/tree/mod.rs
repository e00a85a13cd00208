//! Hierarchical chunk trees.
//!
//! This module provides:
//! - The `Chunk` node type and its metadata
//! - Level-by-level split configuration
//! - Boundary-aware text splitting
//! - The pure, deterministic tree builder

pub mod builder;
pub mod splitter;
pub mod types;

pub use builder::{ChunkTreeBuilder, build};
pub use splitter::{DEFAULT_SEPARATORS, RecursiveSplitter, TextSplitter};
pub use types::{Chunk, ChunkId, Metadata, MetadataValue, SplitConfig, SplitLevel, child_id};
