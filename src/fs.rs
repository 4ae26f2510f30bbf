//! The engine as one explicit value
//!
//! A [`FileSystem`] owns the shared vector index, the fingerprint cache and
//! the embedder gateway for one model, and exposes indexing and search on
//! top of them. Nothing is global; callers construct and pass it around.

use crate::cache::{CacheStats, FingerprintCache};
use crate::config::Config;
use crate::embedder::{from_model, Embedder, EmbedderGateway};
use crate::error::Result;
use crate::index::{read_index, write_index, IndexStats, SharedIndex, VectorIndex};
use crate::indexable::Indexable;
use crate::indexer::{Indexer, UpdateStats};
use crate::scope::Scope;
use crate::searcher::{ContextMode, SearchResults, Searcher};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Semantic index over files and directories
pub struct FileSystem {
    config: Config,
    store_dir: PathBuf,
    index: SharedIndex,
    cache: Arc<FingerprintCache>,
    indexer: Indexer,
    searcher: Searcher,
}

impl FileSystem {
    /// Open the engine for the configured model, loading it now
    pub fn open(config: Config) -> Result<Self> {
        let embedder = from_model(config.model)?;
        Self::with_embedder(config, Some(embedder))
    }

    /// Open the engine with an explicit embedder, or none
    ///
    /// Without an embedder, anything that needs a new vector fails with
    /// `EmbeddingUnavailable`; the store of the configured model is still
    /// readable.
    pub fn with_embedder(config: Config, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let (model_id, dimension) = match &embedder {
            Some(e) => (e.model_id().to_string(), e.dimension()),
            None => (
                config.model.model_name().to_string(),
                config.model.dimension(),
            ),
        };
        let store_dir = config.store_dir_for(&model_id);
        let index: SharedIndex = Arc::new(RwLock::new(VectorIndex::open(
            &store_dir, &model_id, dimension,
        )?));

        let gateway = EmbedderGateway::new(embedder, config.embed_timeout);
        let cache = Arc::new(FingerprintCache::new(config.cache_capacity));
        let indexer = Indexer::new(
            config.clone(),
            gateway.clone(),
            Arc::clone(&cache),
            Arc::clone(&index),
        )?;
        let searcher = Searcher::new(gateway, Arc::clone(&index));

        Ok(Self {
            config,
            store_dir,
            index,
            cache,
            indexer,
            searcher,
        })
    }

    /// Set how much context search hits carry
    pub fn with_context(mut self, context: ContextMode) -> Self {
        self.searcher = self.searcher.with_context(context);
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bring the index up to date for a file or directory
    pub fn index(&self, target: &Indexable) -> Result<UpdateStats> {
        self.indexer.index(target)
    }

    /// Whether the index matches the target's current content
    pub fn is_indexed(&self, target: &Indexable) -> Result<bool> {
        self.indexer.is_indexed(target)
    }

    /// Rank files under `scope` by similarity to `query`
    ///
    /// With `auto_index` set, the scope directory is indexed first if it is
    /// out of date.
    pub fn search(
        &self,
        query: &str,
        scope: &Scope,
        k: usize,
        threshold: Option<f32>,
    ) -> Result<SearchResults> {
        if self.config.auto_index && k > 0 {
            let target = Indexable::from(scope.directory().clone());
            if !self.is_indexed(&target)? {
                info!("Indexing {:?} before searching", target.path());
                self.index(&target)?;
            }
        }
        self.searcher.search(query, scope, k, threshold)
    }

    /// Index statistics
    pub fn stats(&self) -> Result<IndexStats> {
        Ok(read_index(&self.index)?.stats())
    }

    /// Fingerprint cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop the store and start from an empty index
    pub fn rebuild(&self) -> Result<()> {
        let mut index = write_index(&self.index)?;
        VectorIndex::destroy(&self.store_dir)?;
        let model_id = index.model_id().to_string();
        let dimension = index.dimension();
        *index = VectorIndex::open(&self.store_dir, &model_id, dimension)?;
        self.cache.clear();
        info!("Cleared index at {:?}", self.store_dir);
        Ok(())
    }

    /// Shared handle to the index
    pub fn shared_index(&self) -> SharedIndex {
        Arc::clone(&self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::error::IfsError;
    use crate::indexable::Directory;
    use std::fs;
    use tempfile::tempdir;

    fn engine(cache_dir: &std::path::Path) -> FileSystem {
        let config = Config::new(cache_dir.to_path_buf()).with_workers(2);
        FileSystem::with_embedder(config, Some(Arc::new(HashEmbedder::new(64)))).unwrap()
    }

    #[test]
    fn test_search_auto_indexes() {
        let cache = tempdir().unwrap();
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "meeting notes about budgets").unwrap();

        let fs_engine = engine(cache.path());
        let scope = Scope::new(Directory::open(dir.path()).unwrap());
        let results = fs_engine.search("budgets", &scope, 3, None).unwrap();

        assert_eq!(results.len(), 1);
        assert!(fs_engine.is_indexed(&Indexable::from_path(dir.path()).unwrap()).unwrap());
    }

    #[test]
    fn test_search_without_auto_index() {
        let cache = tempdir().unwrap();
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "budgets").unwrap();

        let config = Config::new(cache.path().to_path_buf()).with_auto_index(false);
        let fs_engine =
            FileSystem::with_embedder(config, Some(Arc::new(HashEmbedder::new(64)))).unwrap();
        let scope = Scope::new(Directory::open(dir.path()).unwrap());
        assert!(fs_engine.search("budgets", &scope, 3, None).unwrap().is_empty());
    }

    #[test]
    fn test_store_survives_reopen_and_rebuild_clears() {
        let cache = tempdir().unwrap();
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let target = Indexable::from_path(dir.path()).unwrap();

        engine(cache.path()).index(&target).unwrap();

        let reopened = engine(cache.path());
        assert!(reopened.is_indexed(&target).unwrap());
        assert_eq!(reopened.stats().unwrap().files, 1);

        reopened.rebuild().unwrap();
        assert_eq!(reopened.stats().unwrap().records, 0);
        assert!(!reopened.is_indexed(&target).unwrap());
        assert_eq!(engine(cache.path()).stats().unwrap().files, 0);
    }

    #[test]
    fn test_without_embedder() {
        let cache = tempdir().unwrap();
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        let config = Config::new(cache.path().to_path_buf());
        let fs_engine = FileSystem::with_embedder(config, None).unwrap();
        let err = fs_engine
            .index(&Indexable::from_path(dir.path()).unwrap())
            .unwrap_err();
        assert!(matches!(err, IfsError::EmbeddingUnavailable));
    }
}
