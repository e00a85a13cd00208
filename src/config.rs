//! Layered configuration.
//!
//! Sources, later ones winning:
//! - Built-in defaults
//! - TOML file (`.chunktree/settings.toml`, found by walking up from the
//!   current directory, or an explicit path)
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CHUNKTREE_` and use double
//! underscores to separate nested levels:
//! - `CHUNKTREE_SEARCH__LIMIT=8` sets `search.limit`
//! - `CHUNKTREE_STORAGE__BACKEND=memory` sets `storage.backend`
//! - `CHUNKTREE_EMBEDDING__BATCH_SIZE=16` sets `embedding.batch_size`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, IndexResult};
use crate::retrieval::{DEFAULT_FETCH_K_MULTIPLIER, DEFAULT_LIMIT, DEFAULT_WINDOW_SIZE, SearchOptions};
use crate::storage::{DEFAULT_EMBED_BATCH_SIZE, DEFAULT_WRITER_HEAP_BYTES};
use crate::tree::SplitConfig;

/// Directory holding the settings file and, by default, the index.
pub const CONFIG_DIR: &str = ".chunktree";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CHUNKTREE_";

/// Smallest writer heap tantivy accepts for a single indexing thread.
const MIN_WRITER_HEAP_BYTES: usize = 15_000_000;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Split sizes per hierarchy level
    #[serde(default)]
    pub hierarchy: SplitConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// Results returned by `search` when no limit is given
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Raw hits fetched per requested result
    #[serde(default = "default_fetch_k_multiplier")]
    pub fetch_k_multiplier: usize,

    /// Attach parent and children to hits
    #[serde(default = "default_true")]
    pub include_hierarchy: bool,

    /// Siblings on each side for `get_window`
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Persistent tantivy index under `index_path`
    Tantivy,
    /// Process-local, nothing persisted
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Tantivy writer heap in bytes
    #[serde(default = "default_writer_heap_bytes")]
    pub writer_heap_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Feature-hashing embedder, no model files
    Hash,
    /// Local ONNX model (requires the `local-embeddings` feature)
    Fastembed,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProvider,

    /// Vector size for the hash provider
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Model to use with the fastembed provider
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `retrieval = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_limit() -> usize {
    DEFAULT_LIMIT
}
fn default_fetch_k_multiplier() -> usize {
    DEFAULT_FETCH_K_MULTIPLIER
}
fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}
fn default_backend() -> BackendKind {
    BackendKind::Tantivy
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_writer_heap_bytes() -> usize {
    DEFAULT_WRITER_HEAP_BYTES
}
fn default_provider() -> EmbeddingProvider {
    EmbeddingProvider::Hash
}
fn default_dimension() -> usize {
    crate::embedding::DEFAULT_HASH_DIMENSION
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            hierarchy: SplitConfig::default(),
            search: SearchConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            fetch_k_multiplier: default_fetch_k_multiplier(),
            include_hierarchy: true,
            window_size: default_window_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            index_path: default_index_path(),
            writer_heap_bytes: default_writer_heap_bytes(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            dimension: default_dimension(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl SearchConfig {
    /// Search options for `limit` results using the configured multiplier.
    pub fn options(&self, limit: usize) -> SearchOptions {
        SearchOptions::new(limit)
            .with_fetch_k(limit.saturating_mul(self.fetch_k_multiplier))
            .with_hierarchy(self.include_hierarchy)
    }

    /// Search options for the configured default limit.
    pub fn default_options(&self) -> SearchOptions {
        self.options(self.limit)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.chunktree/settings.toml` in the current directory or an ancestor
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Reject values the index cannot run with.
    pub fn validate(&self) -> IndexResult<()> {
        self.hierarchy.validate()?;

        if self.search.limit == 0 {
            return Err(IndexError::validation("search.limit must be greater than zero"));
        }
        if self.search.fetch_k_multiplier == 0 {
            return Err(IndexError::validation(
                "search.fetch_k_multiplier must be greater than zero",
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(IndexError::validation(
                "embedding.batch_size must be greater than zero",
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(IndexError::validation(
                "embedding.dimension must be greater than zero",
            ));
        }
        if self.storage.backend == BackendKind::Tantivy
            && self.storage.writer_heap_bytes < MIN_WRITER_HEAP_BYTES
        {
            return Err(IndexError::validation(format!(
                "storage.writer_heap_bytes must be at least {MIN_WRITER_HEAP_BYTES}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.hierarchy, SplitConfig::default());
        assert_eq!(settings.search.limit, 5);
        assert_eq!(settings.search.fetch_k_multiplier, 4);
        assert!(settings.search.include_hierarchy);
        assert_eq!(settings.search.window_size, 1);
        assert_eq!(settings.storage.backend, BackendKind::Tantivy);
        assert_eq!(settings.storage.index_path, PathBuf::from(".chunktree/index"));
        assert_eq!(settings.embedding.provider, EmbeddingProvider::Hash);
        assert_eq!(settings.embedding.dimension, 384);
        assert_eq!(settings.logging.default, "warn");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[[hierarchy.levels]]
chunk_size = 1200
overlap_ratio = 0.15

[[hierarchy.levels]]
chunk_size = 400
overlap_ratio = 0.1

[search]
limit = 3
include_hierarchy = false

[storage]
backend = "memory"

[embedding]
dimension = 128

[logging]
default = "info"

[logging.modules]
retrieval = "debug"
"#;
        std::fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert_eq!(settings.hierarchy.depth(), 2);
        assert_eq!(settings.hierarchy.levels[0].chunk_size, 1200);
        assert_eq!(settings.search.limit, 3);
        assert!(!settings.search.include_hierarchy);
        // Untouched fields keep defaults
        assert_eq!(settings.search.fetch_k_multiplier, 4);
        assert_eq!(settings.storage.backend, BackendKind::Memory);
        assert_eq!(settings.embedding.dimension, 128);
        assert_eq!(settings.embedding.batch_size, 64);
        assert_eq!(settings.logging.modules["retrieval"], "debug");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.search, SearchConfig::default());
        assert_eq!(settings.hierarchy, SplitConfig::default());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.search.limit = 9;
        settings.storage.backend = BackendKind::Memory;
        settings.save(&config_path).unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("backend = \"memory\""));

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.search.limit, 9);
        assert_eq!(loaded.storage.backend, BackendKind::Memory);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        std::fs::write(&config_path, "[storage]\nbackend = \"postgres\"\n").unwrap();
        assert!(Settings::load_from(&config_path).is_err());

        let mut settings = Settings::default();
        settings.search.limit = 0;
        assert!(matches!(settings.validate(), Err(IndexError::Validation(_))));

        let mut settings = Settings::default();
        settings.hierarchy = SplitConfig { levels: Vec::new() };
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.storage.writer_heap_bytes = 1_000;
        assert!(settings.validate().is_err());
        settings.storage.backend = BackendKind::Memory;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_search_options_from_config() {
        let config = SearchConfig {
            fetch_k_multiplier: 3,
            include_hierarchy: false,
            ..SearchConfig::default()
        };
        let options = config.options(4);
        assert_eq!(options.limit, 4);
        assert_eq!(options.fetch_k, 12);
        assert!(!options.include_hierarchy);
        assert_eq!(config.default_options().limit, 5);
    }
}
