//! Hierarchical chunk index with context-aware retrieval.
//!
//! Texts are split into multi-resolution chunk trees, embedded and stored in
//! a vector backend. Searches return hits enriched with their parent and
//! children; sibling windows recover the text around any chunk.

pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod logging;
pub mod retrieval;
pub mod storage;
pub mod tree;

pub use config::Settings;
pub use embedding::{Embedder, EmbeddingError, HashEmbedder};
pub use error::{IndexError, IndexResult};
pub use index::{HierarchicalIndex, TreeSummary, TreeView};
pub use retrieval::{
    ContextWindow, ContextWindowResolver, ExpandedResult, RetrievalExpander, SearchOptions,
};
pub use storage::{
    BackendError, ChunkStore, MemoryBackend, MetadataFilter, TantivyBackend, VectorBackend,
};
pub use tree::{Chunk, ChunkId, ChunkTreeBuilder, Metadata, MetadataValue, SplitConfig, SplitLevel};

#[cfg(feature = "local-embeddings")]
pub use embedding::FastEmbedder;
