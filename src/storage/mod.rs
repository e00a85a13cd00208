//! Chunk persistence.
//!
//! - `VectorBackend`: the similarity-index seam
//! - `MemoryBackend` / `TantivyBackend`: shipped implementations
//! - `ChunkStore`: embeds chunks and maps tree links onto backend records

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
pub mod store;
pub mod tantivy;

pub use backend::{MetadataFilter, ScoredRecord, StoredRecord, VectorBackend, VectorRecord};
pub use error::{BackendError, BackendResult};
pub use memory::MemoryBackend;
pub use schema::ChunkSchema;
pub use store::{
    ChunkStore, DEFAULT_EMBED_BATCH_SIZE, KEY_CHILD_IDS, KEY_IS_ROOT, KEY_LEVEL, KEY_PARENT_ID,
    KEY_ROOT_ID, RESERVED_METADATA_KEYS, ScoredChunk,
};
pub use self::tantivy::{DEFAULT_WRITER_HEAP_BYTES, TantivyBackend};
