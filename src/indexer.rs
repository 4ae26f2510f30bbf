//! Incremental indexing
//!
//! Files are read and chunked in parallel, compared against what the index
//! already holds for their path, and only changed files go through the
//! fingerprint cache and embedder. Each file's records are swapped in under
//! a single write lock so searches never see half an update.

use crate::cache::{FingerprintCache, Resolved};
use crate::chunker::{Chunk, Chunker};
use crate::config::Config;
use crate::embedder::EmbedderGateway;
use crate::error::{IfsError, Result};
use crate::index::{
    read_index, write_index, EmbeddingRecord, SharedIndex, VectorIndex,
};
use crate::indexable::{File, Fingerprint, Indexable};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A file read and chunked, waiting to be compared with the index
#[derive(Debug)]
struct PreparedFile {
    path: PathBuf,
    /// First occurrence of each distinct chunk, in offset order
    chunks: Vec<Chunk>,
}

/// Indexer for building and updating the semantic index
pub struct Indexer {
    config: Config,
    chunker: Chunker,
    gateway: EmbedderGateway,
    cache: Arc<FingerprintCache>,
    index: SharedIndex,
    pool: rayon::ThreadPool,
}

impl Indexer {
    /// Create an indexer writing into `index`
    pub fn new(
        config: Config,
        gateway: EmbedderGateway,
        cache: Arc<FingerprintCache>,
        index: SharedIndex,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("ifs-worker-{}", i))
            .build()
            .map_err(|e| IfsError::Config(format!("cannot start worker pool: {}", e)))?;
        let chunker = Chunker::from_config(&config);

        Ok(Self {
            config,
            chunker,
            gateway,
            cache,
            index,
            pool,
        })
    }

    /// Bring the index up to date for a file or directory
    ///
    /// Unchanged files are skipped. For directories, indexed paths beneath
    /// it that no longer exist or are no longer indexable are purged. Work
    /// completed before an embedding failure is kept and saved; the first
    /// failure (in path order) is then returned.
    pub fn index(&self, target: &Indexable) -> Result<UpdateStats> {
        info!("Indexing {:?}", target.path());

        let files = target.files(&self.config);
        let prepared = self.prepare(target, &files)?;
        let mut stats = UpdateStats::default();

        let changed: Vec<PreparedFile> = {
            let index = read_index(&self.index)?;
            let mut changed = Vec::new();
            for file in prepared {
                if is_current(&index, &file.path, &file.chunks) {
                    debug!("Skipping unchanged file: {:?}", file.path);
                    stats.unchanged += 1;
                } else {
                    changed.push(file);
                }
            }
            changed
        };

        let first_error = self.apply(changed, &mut stats);

        if let Indexable::Directory(dir) = target {
            let walked: HashSet<&Path> = files.iter().map(File::path).collect();
            let mut index = write_index(&self.index)?;
            for stale in index.paths_under(dir.path()) {
                if !walked.contains(stale.as_path()) {
                    debug!("Purging {:?}", stale);
                    index.remove_by_path(&stale);
                    stats.removed += 1;
                }
            }
        }

        write_index(&self.index)?.save()?;
        info!("Indexed {:?}: {}", target.path(), stats);

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// Whether the index matches the current content of a target
    ///
    /// A file is indexed when it owns at least one record and exactly the
    /// chunks its content produces now. A directory is indexed when all of
    /// its readable files are; files that `index` would skip are skipped here.
    pub fn is_indexed(&self, target: &Indexable) -> Result<bool> {
        match target {
            Indexable::File(file) => {
                let chunks = self.chunk(file)?;
                Ok(is_current(&*read_index(&self.index)?, file.path(), &chunks))
            }
            Indexable::Directory(dir) => {
                let files: Vec<File> = dir.files(&self.config).collect();
                self.all_current(&files)
            }
        }
    }

    fn all_current(&self, files: &[File]) -> Result<bool> {
        for file in files {
            let chunks = match self.chunk(file) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!("Skipping file: {}", e);
                    continue;
                }
            };
            if !is_current(&*read_index(&self.index)?, file.path(), &chunks) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn chunk(&self, file: &File) -> Result<Vec<Chunk>> {
        let bytes = file.content()?;
        Ok(distinct(self.chunker.chunk_file(file.path(), &bytes)))
    }

    /// Read and chunk every file in parallel, keeping path order
    fn prepare(&self, target: &Indexable, files: &[File]) -> Result<Vec<PreparedFile>> {
        let pb = self.progress(files.len(), "files read");

        let results: Vec<Result<PreparedFile>> = self.pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    let chunks = self.chunk(file);
                    pb.inc(1);
                    Ok(PreparedFile {
                        path: file.path().to_path_buf(),
                        chunks: chunks?,
                    })
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut prepared = Vec::with_capacity(results.len());
        for result in results {
            match (result, target) {
                (Ok(file), _) => prepared.push(file),
                (Err(e), Indexable::File(_)) => return Err(e),
                (Err(e), Indexable::Directory(_)) => warn!("Skipping file: {}", e),
            }
        }
        Ok(prepared)
    }

    /// Embed changed files in parallel, then swap them in one at a time
    fn apply(&self, changed: Vec<PreparedFile>, stats: &mut UpdateStats) -> Option<IfsError> {
        if changed.is_empty() {
            return None;
        }
        info!("Embedding {} changed files", changed.len());

        // Each new fingerprint is embedded once, by the first file holding it
        let mut claimed: HashSet<&Fingerprint> = HashSet::new();
        let claims: Vec<Vec<Chunk>> = changed
            .iter()
            .map(|file| {
                file.chunks
                    .iter()
                    .filter(|&chunk| claimed.insert(&chunk.fingerprint))
                    .cloned()
                    .collect()
            })
            .collect();

        let pb = self.progress(changed.len(), "files embedded");
        let batch_size = self.config.embed_batch_size;
        let resolved: Vec<Result<Resolved>> = self.pool.install(|| {
            claims
                .par_iter()
                .map(|chunks| {
                    let lookup = |fp: &Fingerprint| {
                        self.index.read().ok().and_then(|index| index.vector(fp))
                    };
                    let result = self
                        .cache
                        .get_or_compute(chunks, lookup, &self.gateway, batch_size);
                    pb.inc(1);
                    result
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut vectors: HashMap<Fingerprint, Arc<[f32]>> = HashMap::new();
        let mut first_error = None;
        for ((file, claim), result) in changed.into_iter().zip(claims).zip(resolved) {
            let embedded = match result {
                Ok(resolved) => {
                    let fingerprints = claim.into_iter().map(|chunk| chunk.fingerprint);
                    vectors.extend(fingerprints.zip(resolved.vectors));
                    resolved.embedded
                }
                Err(e) => {
                    warn!("Failed to embed {:?}: {}", file.path, e);
                    if first_error.is_none() {
                        first_error = Some(with_file_context(e, &file));
                    }
                    continue;
                }
            };
            let file_vectors: Option<Vec<Arc<[f32]>>> = file
                .chunks
                .iter()
                .map(|chunk| vectors.get(&chunk.fingerprint).cloned())
                .collect();
            let Some(file_vectors) = file_vectors else {
                warn!("Skipping {:?}: shares content that failed to embed", file.path);
                continue;
            };

            let mut index = match write_index(&self.index) {
                Ok(index) => index,
                Err(e) => return first_error.or(Some(e)),
            };
            let existed = index.contains_path(&file.path);
            let model_id = index.model_id().to_string();
            let chunk_count = file.chunks.len();
            let records = file
                .chunks
                .into_iter()
                .zip(file_vectors)
                .map(|(chunk, vector)| {
                    let location = chunk.location();
                    EmbeddingRecord::new(
                        chunk.fingerprint,
                        vector,
                        chunk.text,
                        model_id.clone(),
                        file.path.clone(),
                        location,
                    )
                })
                .collect();

            if let Err(e) = index.replace_file(&file.path, records) {
                if first_error.is_none() {
                    first_error = Some(e);
                }
                continue;
            }

            if existed {
                stats.updated += 1;
            } else {
                stats.added += 1;
            }
            stats.chunks_embedded += embedded;
            stats.chunks_reused += chunk_count - embedded;
        }

        first_error
    }

    fn progress(&self, len: usize, what: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let template = format!("{{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {}", what);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    }
}

/// Drop repeated chunks, keeping the first occurrence of each fingerprint
fn distinct(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.fingerprint.clone()))
        .collect()
}

/// Whether `path` owns exactly `chunks`, each at the same location
fn is_current(index: &VectorIndex, path: &Path, chunks: &[Chunk]) -> bool {
    let Some(registered) = index.fingerprints_for(path) else {
        return false;
    };
    let current: BTreeSet<_> = chunks.iter().map(|c| &c.fingerprint).collect();
    if registered.is_empty() || current.len() != registered.len() {
        return false;
    }
    chunks.iter().all(|chunk| {
        index
            .record(&chunk.fingerprint)
            .and_then(|record| record.owners.get(path))
            == Some(&chunk.location())
    })
}

fn with_file_context(error: IfsError, file: &PreparedFile) -> IfsError {
    match error {
        IfsError::EmbeddingFailed { model_id, message } => {
            let first = file
                .chunks
                .first()
                .map(|c| c.fingerprint.short().to_string())
                .unwrap_or_default();
            IfsError::EmbeddingFailed {
                model_id,
                message: format!("{} (chunk {}): {}", file.path.display(), first, message),
            }
        }
        other => other,
    }
}

/// Statistics for index updates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    /// Number of new files added
    pub added: usize,
    /// Number of files updated (changed content)
    pub updated: usize,
    /// Number of files removed (deleted or no longer indexable)
    pub removed: usize,
    /// Number of unchanged files
    pub unchanged: usize,
    /// Chunks sent to the embedder
    pub chunks_embedded: usize,
    /// Chunks whose vector was already known
    pub chunks_reused: usize,
}

impl UpdateStats {
    /// Whether the run changed the index
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

impl std::fmt::Display for UpdateStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Added: {}, Updated: {}, Removed: {}, Unchanged: {} ({} chunks embedded, {} reused)",
            self.added,
            self.updated,
            self.removed,
            self.unchanged,
            self.chunks_embedded,
            self.chunks_reused
        )
    }
}
