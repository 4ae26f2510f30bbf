//! # intellifs - Content-aware file system
//!
//! Turns files and directory trees into vector embeddings, keeps them in a
//! local index and answers similarity queries with ranked file paths.
//!
//! ## Features
//!
//! - **Local**: embeddings come from ONNX models run on your machine
//! - **Incremental**: content fingerprints decide what gets re-embedded
//! - **Deduplicated**: identical content is embedded and stored once
//! - **Deterministic**: stable ranking, ties broken by path
//! - **Watch Mode**: keeps a directory's index current as files change
//!
//! ## Example
//!
//! ```no_run
//! use intellifs::{Config, Directory, FileSystem, Indexable, Scope};
//!
//! fn main() -> anyhow::Result<()> {
//!     let fs = FileSystem::open(Config::default())?;
//!
//!     let docs = Directory::open("docs")?;
//!     let stats = fs.index(&Indexable::from(docs.clone()))?;
//!     println!("{}", stats);
//!
//!     let results = fs.search("quarterly budget", &Scope::new(docs), 5, Some(0.3))?;
//!     for hit in &results {
//!         println!("{} ({:.2})", hit.path.display(), hit.score);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod fs;
pub mod index;
pub mod indexable;
pub mod indexer;
pub mod scope;
pub mod searcher;
pub mod watcher;

// Re-export commonly used types
pub use cache::{CacheStats, FingerprintCache};
pub use chunker::{Chunk, ChunkStrategy, Chunker};
pub use config::{default_cache_dir, is_indexable, Config, EmbeddingModel};
pub use embedder::{available_models, Embedder, EmbedderGateway, FastEmbedder, HashEmbedder};
pub use error::{IfsError, Result};
pub use fs::FileSystem;
pub use index::{ChunkLocation, EmbeddingRecord, IndexStats, ScoredRecord, SharedIndex, VectorIndex};
pub use indexable::{Directory, File, Fingerprint, Indexable};
pub use indexer::{Indexer, UpdateStats};
pub use scope::Scope;
pub use searcher::{format_contexts_json, format_results, format_results_json, ContextMode, SearchHit, SearchResults, Searcher};
pub use watcher::IndexWatcher;
