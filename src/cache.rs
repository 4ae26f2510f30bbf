//! Fingerprint-keyed embedding cache
//!
//! Resolves chunk vectors without re-embedding content that was seen
//! before. Lookup order is the live index, then an in-memory LRU, then the
//! embedder. Queries never go through here.

use crate::chunker::Chunk;
use crate::embedder::EmbedderGateway;
use crate::error::Result;
use crate::indexable::Fingerprint;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of entries evicted
    pub evictions: u64,
}

/// Vectors resolved for a list of chunks
#[derive(Debug, Default)]
pub struct Resolved {
    /// One vector per input chunk, in input order
    pub vectors: Vec<Arc<[f32]>>,
    /// Distinct texts sent to the embedder
    pub embedded: usize,
    /// Chunks answered without the embedder
    pub reused: usize,
}

struct Inner {
    entries: LruCache<Fingerprint, Arc<[f32]>>,
    stats: CacheStats,
}

/// LRU of recently computed vectors keyed by chunk fingerprint
pub struct FingerprintCache {
    inner: Mutex<Inner>,
}

impl FingerprintCache {
    /// Create a cache holding at most `capacity` vectors
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded state stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached vector for a fingerprint, counting the hit or miss
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<[f32]>> {
        let mut inner = self.lock();
        let found = inner.entries.get(fingerprint).cloned();
        if found.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        found
    }

    /// Remember a vector
    pub fn insert(&self, fingerprint: Fingerprint, vector: Arc<[f32]>) {
        let mut inner = self.lock();
        if let Some((evicted, _)) = inner.entries.push(fingerprint.clone(), vector) {
            if evicted != fingerprint {
                inner.stats.evictions += 1;
            }
        }
    }

    /// Vectors for `chunks`, embedding only fingerprints found nowhere else
    ///
    /// `lookup` consults the live index. Misses are deduplicated and sent
    /// to the gateway in batches of `batch_size`. Nothing is cached unless
    /// every batch succeeds.
    pub fn get_or_compute<L>(
        &self,
        chunks: &[Chunk],
        lookup: L,
        gateway: &EmbedderGateway,
        batch_size: usize,
    ) -> Result<Resolved>
    where
        L: Fn(&Fingerprint) -> Option<Arc<[f32]>>,
    {
        let mut known: HashMap<&Fingerprint, Arc<[f32]>> = HashMap::new();
        let mut pending: Vec<&Chunk> = Vec::new();
        let mut reused = 0;

        for chunk in chunks {
            if known.contains_key(&chunk.fingerprint)
                || pending.iter().any(|p| p.fingerprint == chunk.fingerprint)
            {
                reused += 1;
                continue;
            }
            let found = lookup(&chunk.fingerprint).or_else(|| self.get(&chunk.fingerprint));
            match found {
                Some(vector) => {
                    reused += 1;
                    known.insert(&chunk.fingerprint, vector);
                }
                None => pending.push(chunk),
            }
        }

        let embedded = pending.len();
        if !pending.is_empty() {
            debug!(
                "Embedding {} new chunks of {}",
                pending.len(),
                chunks[0].file_path.display()
            );
        }

        let mut fresh = Vec::with_capacity(pending.len());
        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = gateway.embed_batch(texts)?;
            fresh.extend(batch.iter().copied().zip(vectors.into_iter().map(Arc::<[f32]>::from)));
        }

        // Only a fully embedded file reaches the cache
        for (chunk, vector) in fresh {
            self.insert(chunk.fingerprint.clone(), Arc::clone(&vector));
            known.insert(&chunk.fingerprint, vector);
        }

        let vectors = chunks
            .iter()
            .filter_map(|chunk| known.get(&chunk.fingerprint).cloned())
            .collect();

        Ok(Resolved {
            vectors,
            embedded,
            reused,
        })
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Number of cached vectors
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached vector
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{ChunkStrategy, Chunker};
    use crate::embedder::{Embedder, HashEmbedder};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingEmbedder {
        inner: HashEmbedder,
        texts: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed_batch(texts)
        }
    }

    fn counting() -> (Arc<CountingEmbedder>, EmbedderGateway) {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashEmbedder::new(16),
            texts: AtomicUsize::new(0),
        });
        let gateway = EmbedderGateway::new(
            Some(embedder.clone() as Arc<dyn Embedder>),
            Duration::from_secs(5),
        );
        (embedder, gateway)
    }

    fn chunks(text: &str) -> Vec<Chunk> {
        Chunker::new(
            ChunkStrategy::Lines {
                chunk_size: 4,
                overlap: 0,
            },
            300,
        )
        .chunk_file(Path::new("/d/f.txt"), text.as_bytes())
    }

    #[test]
    fn test_second_resolve_hits_cache() {
        let (embedder, gateway) = counting();
        let cache = FingerprintCache::new(100);
        let input = chunks("abc\ndef");

        let first = cache.get_or_compute(&input, |_| None, &gateway, 8).unwrap();
        assert_eq!(first.embedded, 2);
        assert_eq!(first.vectors.len(), 2);

        let second = cache.get_or_compute(&input, |_| None, &gateway, 8).unwrap();
        assert_eq!(second.embedded, 0);
        assert_eq!(second.reused, 2);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 2);
        assert_eq!(first.vectors, second.vectors);
    }

    #[test]
    fn test_duplicate_chunks_embed_once() {
        let (embedder, gateway) = counting();
        let cache = FingerprintCache::new(100);
        let input = chunks("abc\nabc\nabc");

        let resolved = cache.get_or_compute(&input, |_| None, &gateway, 8).unwrap();
        assert_eq!(resolved.vectors.len(), 3);
        assert_eq!(resolved.embedded, 1);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_index_lookup_skips_embedder() {
        let (embedder, gateway) = counting();
        let cache = FingerprintCache::new(100);
        let input = chunks("abc");
        let stored: Arc<[f32]> = Arc::from(vec![0.5; 16]);

        let resolved = cache
            .get_or_compute(&input, |_| Some(Arc::clone(&stored)), &gateway, 8)
            .unwrap();
        assert_eq!(resolved.vectors[0], stored);
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_caches_nothing() {
        let cache = FingerprintCache::new(100);
        let input = chunks("abc");
        let result = cache.get_or_compute(&input, |_| None, &EmbedderGateway::unavailable(), 8);
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    struct FailsSecondBatch {
        inner: HashEmbedder,
        batches: AtomicUsize,
    }

    impl Embedder for FailsSecondBatch {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if self.batches.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(crate::error::IfsError::EmbeddingFailed {
                    model_id: self.model_id().to_string(),
                    message: "second batch refused".to_string(),
                });
            }
            self.inner.embed_batch(texts)
        }
    }

    #[test]
    fn test_partial_batches_are_not_cached() {
        let gateway = EmbedderGateway::new(
            Some(Arc::new(FailsSecondBatch {
                inner: HashEmbedder::new(16),
                batches: AtomicUsize::new(0),
            }) as Arc<dyn Embedder>),
            Duration::from_secs(5),
        );
        let cache = FingerprintCache::new(100);
        let input = chunks("abc
def
ghi");

        assert!(cache.get_or_compute(&input, |_| None, &gateway, 1).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_is_counted() {
        let cache = FingerprintCache::new(1);
        cache.insert(Fingerprint::of_bytes(b"a"), Arc::from(vec![1.0]));
        cache.insert(Fingerprint::of_bytes(b"b"), Arc::from(vec![2.0]));

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&Fingerprint::of_bytes(b"a")).is_none());
        assert!(cache.get(&Fingerprint::of_bytes(b"b")).is_some());

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
