//! Configuration types and constants for intellifs
//!
//! Defines embedding models, engine configuration, and the ignore rules that
//! decide which paths are indexable.

use crate::chunker::ChunkStrategy;
use crate::error::{IfsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "IFS_CACHE_DIR";

/// File names that are never indexed
pub const FILES_TO_IGNORE: &[&str] = &[".DS_Store", ".gitignore"];

/// File name suffixes that are never indexed
pub const EXTENSIONS_TO_IGNORE: &[&str] = &[".tar.gz", ".gz", ".whl"];

/// Directory names whose subtrees are never indexed
pub const DIRECTORIES_TO_IGNORE: &[&str] = &[".git", "__pycache__"];

/// Custom ignore file honoured next to `.gitignore`
pub const IGNORE_FILE_NAME: &str = ".ifsignore";

/// Supported embedding models
///
/// The ONNX models are downloaded on first use and cached locally.
/// `Hash` needs no download at all; it trades semantic quality for
/// determinism and is what the tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmbeddingModel {
    /// Fast, small model (384 dims, ~30MB)
    AllMiniLmL6V2,
    /// Fast and default English model (384 dims, ~130MB)
    #[default]
    BgeSmallEnV15,
    /// Better quality for technical text (768 dims, ~90MB)
    NomicEmbedTextV15,
    /// Multilingual support (384 dims, ~470MB)
    MultilingualE5Small,
    /// Feature-hashing embedder, no model download (256 dims)
    Hash,
}

impl EmbeddingModel {
    /// Every model, in display order
    pub const ALL: [EmbeddingModel; 5] = [
        Self::BgeSmallEnV15,
        Self::AllMiniLmL6V2,
        Self::NomicEmbedTextV15,
        Self::MultilingualE5Small,
        Self::Hash,
    ];

    /// Get the model identifier (HuggingFace name for ONNX models)
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BgeSmallEnV15 => "BAAI/bge-small-en-v1.5",
            Self::NomicEmbedTextV15 => "nomic-ai/nomic-embed-text-v1.5",
            Self::MultilingualE5Small => "intfloat/multilingual-e5-small",
            Self::Hash => "intellifs/feature-hash",
        }
    }

    /// Short label used on the command line
    pub fn label(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "minilm",
            Self::BgeSmallEnV15 => "bge",
            Self::NomicEmbedTextV15 => "nomic",
            Self::MultilingualE5Small => "multilingual",
            Self::Hash => "hash",
        }
    }

    /// Get the embedding vector dimension
    pub fn dimension(&self) -> usize {
        match self {
            Self::AllMiniLmL6V2 => 384,
            Self::BgeSmallEnV15 => 384,
            Self::NomicEmbedTextV15 => 768,
            Self::MultilingualE5Small => 384,
            Self::Hash => 256,
        }
    }

    /// One-line human description
    pub fn description(&self) -> &'static str {
        match self {
            Self::AllMiniLmL6V2 => "Fast, lightweight model (~30MB)",
            Self::BgeSmallEnV15 => "Fast and default English model (~130MB)",
            Self::NomicEmbedTextV15 => "Optimized for code and technical content (~90MB)",
            Self::MultilingualE5Small => "Supports 100+ languages (~470MB)",
            Self::Hash => "Offline feature hashing, keyword-level similarity only",
        }
    }
}

impl std::str::FromStr for EmbeddingModel {
    type Err = IfsError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.to_lowercase();
        if let Some(model) = Self::ALL
            .iter()
            .find(|m| m.model_name().to_lowercase() == lowered)
        {
            return Ok(*model);
        }
        match lowered.as_str() {
            "minilm" | "all-minilm-l6-v2" => Ok(Self::AllMiniLmL6V2),
            "bge" | "bge-small" | "bge-small-en-v1.5" | "default" => Ok(Self::BgeSmallEnV15),
            "nomic" | "nomic-embed" | "nomic-embed-text-v1.5" => Ok(Self::NomicEmbedTextV15),
            "multilingual" | "e5" | "multilingual-e5-small" => Ok(Self::MultilingualE5Small),
            "hash" | "feature-hash" => Ok(Self::Hash),
            _ => Err(IfsError::Config(format!(
                "Unknown model: {}. Valid options: bge, minilm, nomic, multilingual, hash",
                s
            ))),
        }
    }
}

/// Configuration for the intellifs engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding per-model stores and the config file
    pub cache_dir: PathBuf,
    /// Embedding model to use
    pub model: EmbeddingModel,
    /// How file content is split before embedding
    pub chunking: ChunkStrategy,
    /// Maximum chunks kept per file
    pub max_chunks: usize,
    /// Maximum file size to index (bytes)
    pub max_file_size: u64,
    /// Number of parallel workers for chunking and embedding
    pub workers: usize,
    /// Upper bound for a single embedder call
    pub embed_timeout: Duration,
    /// Texts sent to the embedder per call
    pub embed_batch_size: usize,
    /// Entries kept by the in-memory fingerprint cache
    pub cache_capacity: usize,
    /// Honour `.gitignore` and `.ifsignore` during traversal
    pub respect_ignore_files: bool,
    /// Index the scope directory before searching it when needed
    pub auto_index: bool,
    /// Draw progress bars while indexing
    #[serde(skip)]
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            model: EmbeddingModel::default(),
            chunking: ChunkStrategy::default(),
            max_chunks: 300,
            max_file_size: 10 * 1024 * 1024, // 10 MB
            workers: num_cpus::get(),
            embed_timeout: Duration::from_secs(120),
            embed_batch_size: 32,
            cache_capacity: 10_000,
            respect_ignore_files: true,
            auto_index: true,
            show_progress: false,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given cache directory
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            ..Default::default()
        }
    }

    /// Set the embedding model
    pub fn with_model(mut self, model: EmbeddingModel) -> Self {
        self.model = model;
        self
    }

    /// Set the chunking strategy
    pub fn with_chunking(mut self, chunking: ChunkStrategy) -> Self {
        self.chunking = chunking;
        self
    }

    /// Set the embedder timeout
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Toggle progress bars
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Toggle automatic indexing before search
    pub fn with_auto_index(mut self, auto_index: bool) -> Self {
        self.auto_index = auto_index;
        self
    }

    /// Directory of the store for the configured model
    pub fn store_dir(&self) -> PathBuf {
        self.store_dir_for(self.model.model_name())
    }

    /// Directory of the store for any model id
    pub fn store_dir_for(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id.replace('/', "--"))
    }

    /// Get path to the config file
    pub fn config_path(&self) -> PathBuf {
        self.cache_dir.join("config.json")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(self.config_path(), json)?;
        Ok(())
    }

    /// Load configuration from disk, falling back to defaults when absent
    pub fn load(cache_dir: &Path) -> Result<Self> {
        let config_path = cache_dir.join("config.json");
        if !config_path.exists() {
            return Ok(Self::new(cache_dir.to_path_buf()));
        }
        let json = std::fs::read_to_string(config_path)?;
        let mut config: Config = serde_json::from_str(&json)?;
        config.cache_dir = cache_dir.to_path_buf();
        Ok(config)
    }
}

/// `$IFS_CACHE_DIR`, else `~/.cache/intellifs`
pub fn default_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .map(|dir| dir.join("intellifs"))
        .unwrap_or_else(|| PathBuf::from(".intellifs"))
}

/// Check whether a path passes the ignore rules
///
/// Purely syntactic: `is_dir` tells whether the last component names a
/// directory. Directories are rejected when any component is ignored; files
/// additionally by name and suffix.
pub fn is_indexable(path: &Path, is_dir: bool) -> bool {
    let dir = if is_dir {
        path
    } else {
        path.parent().unwrap_or(path)
    };

    let ignored_dir = dir.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|name| DIRECTORIES_TO_IGNORE.contains(&name))
            .unwrap_or(false)
    });
    if ignored_dir {
        return false;
    }
    if is_dir {
        return true;
    }

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if FILES_TO_IGNORE.contains(&name) {
        return false;
    }
    !EXTENSIONS_TO_IGNORE.iter().any(|ext| name.ends_with(ext))
}
