//! Context-aware retrieval over stored chunk trees.

pub mod expander;
pub mod window;

pub use expander::{
    DEFAULT_FETCH_K_MULTIPLIER, DEFAULT_LIMIT, ExpandedResult, RetrievalExpander, SearchOptions,
};
pub use window::{ContextWindow, ContextWindowResolver, DEFAULT_WINDOW_SIZE};
