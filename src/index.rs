//! Durable vector index keyed by chunk fingerprint
//!
//! Records live in a fingerprint-ordered map; a secondary path map tells
//! which fingerprints each file currently owns. Byte-identical chunks from
//! different files share one record that lists every owner.
//!
//! Search is an exact cosine scan (parallel over records) so scope
//! predicates, thresholds and tie-breaking are applied to every candidate.
//!
//! The store is a single bincode file per model: a header with the model
//! id, dimension and a SHA-256 of the record payload, followed by the
//! payload. Saves go through a temp file and a rename.

use crate::embedder::cosine_similarity;
use crate::error::{IfsError, Result};
use crate::indexable::Fingerprint;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

const STORE_MAGIC: [u8; 4] = *b"IFS1";
const STORE_SCHEMA_VERSION: u32 = 2;
const STORE_FILE_NAME: &str = "records.bin";

/// Index shared by the indexing and search engines
pub type SharedIndex = Arc<RwLock<VectorIndex>>;

/// Take the shared index for reading
pub(crate) fn read_index(index: &SharedIndex) -> Result<RwLockReadGuard<'_, VectorIndex>> {
    index
        .read()
        .map_err(|_| IfsError::Index("index lock poisoned".to_string()))
}

/// Take the shared index for writing
pub(crate) fn write_index(index: &SharedIndex) -> Result<RwLockWriteGuard<'_, VectorIndex>> {
    index
        .write()
        .map_err(|_| IfsError::Index("index lock poisoned".to_string()))
}

/// Where a chunk sits inside one owning file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    /// Position of the chunk within the file (0-based)
    pub ordinal: usize,
    /// Starting line number (1-indexed)
    pub start_line: usize,
    /// Ending line number (1-indexed)
    pub end_line: usize,
    /// The chunk stands in for non-text content
    pub placeholder: bool,
}

/// An embedded chunk and the files that contain it
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// Chunk fingerprint, the primary key
    pub fingerprint: Fingerprint,
    /// Embedding vector, shared with the fingerprint cache
    pub vector: Arc<[f32]>,
    /// Chunk text, returned as search context
    pub text: String,
    /// Model that produced the vector
    pub model_id: String,
    /// Owning files and the chunk's location in each
    pub owners: BTreeMap<PathBuf, ChunkLocation>,
}

impl EmbeddingRecord {
    /// Record with a single owner
    pub fn new(
        fingerprint: Fingerprint,
        vector: Arc<[f32]>,
        text: String,
        model_id: String,
        path: PathBuf,
        location: ChunkLocation,
    ) -> Self {
        let mut owners = BTreeMap::new();
        owners.insert(path, location);
        Self {
            fingerprint,
            vector,
            text,
            model_id,
            owners,
        }
    }
}

/// A scored (path, record) pair returned by a query
#[derive(Debug, Clone, Copy)]
pub struct ScoredRecord<'a> {
    /// Owning file that satisfied the scope
    pub path: &'a Path,
    /// The matching record
    pub record: &'a EmbeddingRecord,
    /// Where the chunk sits in `path`
    pub location: ChunkLocation,
    /// Cosine similarity to the query
    pub score: f32,
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Number of indexed files
    pub files: usize,
    /// Number of distinct chunk records
    pub records: usize,
    /// Model name used for embeddings
    pub model: String,
    /// Embedding dimension
    pub dimension: usize,
    /// When the store was last written
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct StoreHeader {
    magic: [u8; 4],
    schema_version: u32,
    model_id: String,
    dimension: usize,
    saved_at_ms: i64,
    record_count: u64,
    checksum: String,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    header: StoreHeader,
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    fingerprint: Fingerprint,
    vector: Vec<f32>,
    text: String,
    model_id: String,
    owners: Vec<(PathBuf, ChunkLocation)>,
}

/// Vector index for semantic search
#[derive(Debug)]
pub struct VectorIndex {
    records: BTreeMap<Fingerprint, EmbeddingRecord>,
    by_path: BTreeMap<PathBuf, BTreeSet<Fingerprint>>,
    model_id: String,
    dimension: usize,
    store_path: Option<PathBuf>,
    saved_at: Option<DateTime<Utc>>,
    dirty: bool,
}

impl VectorIndex {
    /// Create a new empty, in-memory index
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            by_path: BTreeMap::new(),
            model_id: model_id.into(),
            dimension,
            store_path: None,
            saved_at: None,
            dirty: false,
        }
    }

    /// Open the store in `store_dir`, or start empty if there is none yet
    pub fn open(store_dir: &Path, model_id: &str, dimension: usize) -> Result<Self> {
        let store_path = store_dir.join(STORE_FILE_NAME);
        let mut index = Self::new(model_id, dimension);
        index.store_path = Some(store_path.clone());

        if !store_path.exists() {
            debug!("No store at {:?}, starting empty", store_path);
            return Ok(index);
        }

        info!("Loading index from {:?}", store_path);
        let bytes = std::fs::read(&store_path)?;
        index.load_bytes(&store_path, &bytes)?;

        info!(
            "Loaded {} records for {} files",
            index.records.len(),
            index.by_path.len()
        );

        Ok(index)
    }

    /// Delete the store in `store_dir` so the next open starts empty
    pub fn destroy(store_dir: &Path) -> Result<()> {
        let store_path = store_dir.join(STORE_FILE_NAME);
        if store_path.exists() {
            std::fs::remove_file(&store_path)?;
            info!("Removed store {:?}", store_path);
        }
        Ok(())
    }

    fn load_bytes(&mut self, store_path: &Path, bytes: &[u8]) -> Result<()> {
        let corrupt = |reason: String| IfsError::corrupt(store_path, reason);

        let file: StoreFile =
            bincode::deserialize(bytes).map_err(|e| corrupt(format!("unreadable store: {}", e)))?;
        let header = file.header;

        if header.magic != STORE_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        if header.schema_version != STORE_SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported schema version {} (expected {})",
                header.schema_version, STORE_SCHEMA_VERSION
            )));
        }
        if Fingerprint::of_bytes(&file.payload).as_str() != header.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        if header.model_id != self.model_id {
            return Err(corrupt(format!(
                "store was built with {}, expected {}",
                header.model_id, self.model_id
            )));
        }
        if header.dimension != self.dimension {
            return Err(corrupt(format!(
                "store dimension {} does not match model dimension {}",
                header.dimension, self.dimension
            )));
        }

        let persisted: Vec<PersistedRecord> = bincode::deserialize(&file.payload)
            .map_err(|e| corrupt(format!("unreadable records: {}", e)))?;
        if persisted.len() as u64 != header.record_count {
            return Err(corrupt(format!(
                "expected {} records, found {}",
                header.record_count,
                persisted.len()
            )));
        }

        let mut records = BTreeMap::new();
        let mut by_path: BTreeMap<PathBuf, BTreeSet<Fingerprint>> = BTreeMap::new();
        for record in persisted {
            if record.vector.len() != self.dimension {
                return Err(corrupt(format!(
                    "record {} has dimension {}",
                    record.fingerprint.short(),
                    record.vector.len()
                )));
            }
            if record.owners.is_empty() {
                return Err(corrupt(format!(
                    "record {} has no owning file",
                    record.fingerprint.short()
                )));
            }
            for (path, _) in &record.owners {
                by_path
                    .entry(path.clone())
                    .or_default()
                    .insert(record.fingerprint.clone());
            }
            let fingerprint = record.fingerprint.clone();
            let restored = EmbeddingRecord {
                fingerprint: record.fingerprint,
                vector: Arc::from(record.vector),
                text: record.text,
                model_id: record.model_id,
                owners: record.owners.into_iter().collect(),
            };
            if records.insert(fingerprint.clone(), restored).is_some() {
                return Err(corrupt(format!(
                    "duplicate record {}",
                    fingerprint.short()
                )));
            }
        }

        self.records = records;
        self.by_path = by_path;
        self.saved_at = DateTime::from_timestamp_millis(header.saved_at_ms);
        self.dirty = false;
        Ok(())
    }

    /// Write the store if anything changed since the last save
    ///
    /// Returns whether a write happened. In-memory indexes never write.
    pub fn save(&mut self) -> Result<bool> {
        let Some(store_path) = self.store_path.clone() else {
            return Ok(false);
        };
        if !self.dirty {
            return Ok(false);
        }
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let persisted: Vec<PersistedRecord> = self
            .records
            .values()
            .map(|record| PersistedRecord {
                fingerprint: record.fingerprint.clone(),
                vector: record.vector.to_vec(),
                text: record.text.clone(),
                model_id: record.model_id.clone(),
                owners: record
                    .owners
                    .iter()
                    .map(|(path, location)| (path.clone(), *location))
                    .collect(),
            })
            .collect();
        let payload = bincode::serialize(&persisted)?;

        let saved_at = Utc::now();
        let file = StoreFile {
            header: StoreHeader {
                magic: STORE_MAGIC,
                schema_version: STORE_SCHEMA_VERSION,
                model_id: self.model_id.clone(),
                dimension: self.dimension,
                saved_at_ms: saved_at.timestamp_millis(),
                record_count: persisted.len() as u64,
                checksum: Fingerprint::of_bytes(&payload).to_string(),
            },
            payload,
        };
        let bytes = bincode::serialize(&file)?;

        let tmp = store_path.with_extension("bin.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            // Data must be on disk before the rename makes it the store
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &store_path)?;

        self.saved_at = Some(saved_at);
        self.dirty = false;
        info!(
            "Saved {} records for {} files to {:?}",
            self.records.len(),
            self.by_path.len(),
            store_path
        );
        Ok(true)
    }

    /// Insert a record or merge it into the one with the same fingerprint
    ///
    /// Owners are merged; a differing vector or text replaces the stored one.
    pub fn upsert(&mut self, record: EmbeddingRecord) -> Result<()> {
        if record.vector.len() != self.dimension {
            return Err(IfsError::Index(format!(
                "record {} has dimension {}, index expects {}",
                record.fingerprint.short(),
                record.vector.len(),
                self.dimension
            )));
        }
        if record.vector.iter().any(|x| !x.is_finite()) {
            return Err(IfsError::Index(format!(
                "record {} contains non-finite values",
                record.fingerprint.short()
            )));
        }

        for path in record.owners.keys() {
            self.by_path
                .entry(path.clone())
                .or_default()
                .insert(record.fingerprint.clone());
        }

        match self.records.entry(record.fingerprint.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                self.dirty = true;
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if *existing.vector != *record.vector
                    || existing.text != record.text
                    || existing.model_id != record.model_id
                {
                    existing.vector = record.vector;
                    existing.text = record.text;
                    existing.model_id = record.model_id;
                    self.dirty = true;
                }
                for (path, location) in record.owners {
                    if existing.owners.insert(path, location) != Some(location) {
                        self.dirty = true;
                    }
                }
            }
        }

        Ok(())
    }

    /// Detach a file from all its records
    ///
    /// Records left without owners are dropped. Returns how many
    /// fingerprints the path owned.
    pub fn remove_by_path(&mut self, path: &Path) -> usize {
        let Some(fingerprints) = self.by_path.remove(path) else {
            return 0;
        };

        for fingerprint in &fingerprints {
            if let Some(record) = self.records.get_mut(fingerprint) {
                record.owners.remove(path);
                if record.owners.is_empty() {
                    self.records.remove(fingerprint);
                }
            }
        }

        self.dirty = true;
        debug!("Removed {} fingerprints from {:?}", fingerprints.len(), path);
        fingerprints.len()
    }

    /// Replace everything `path` owns with `records`
    ///
    /// Skipped when the path already owns exactly these chunks at the same
    /// locations. Returns whether the index changed.
    pub fn replace_file(&mut self, path: &Path, records: Vec<EmbeddingRecord>) -> Result<bool> {
        if self.owns_exactly(path, &records) {
            return Ok(false);
        }

        self.remove_by_path(path);
        for record in records {
            self.upsert(record)?;
        }
        Ok(true)
    }

    fn owns_exactly(&self, path: &Path, records: &[EmbeddingRecord]) -> bool {
        let Some(current) = self.by_path.get(path) else {
            return false;
        };
        let wanted: BTreeSet<&Fingerprint> = records.iter().map(|r| &r.fingerprint).collect();
        if wanted.len() != current.len() || !current.iter().all(|fp| wanted.contains(fp)) {
            return false;
        }
        records.iter().all(|record| {
            self.records
                .get(&record.fingerprint)
                .and_then(|stored| stored.owners.get(path))
                == record.owners.get(path)
        })
    }

    fn scored<F>(&self, query: &[f32], scope: F, threshold: Option<f32>) -> Vec<ScoredRecord<'_>>
    where
        F: Fn(&Path) -> bool + Sync,
    {
        let mut results: Vec<ScoredRecord<'_>> = self
            .records
            .par_iter()
            .flat_map_iter(|(_, record)| {
                let in_scope: Vec<(&Path, ChunkLocation)> = record
                    .owners
                    .iter()
                    .filter(|(path, _)| scope(path))
                    .map(|(path, location)| (path.as_path(), *location))
                    .collect();
                let score = if in_scope.is_empty() {
                    0.0
                } else {
                    cosine_similarity(query, &record.vector)
                };
                in_scope.into_iter().map(move |(path, location)| ScoredRecord {
                    path,
                    record,
                    location,
                    score,
                })
            })
            .filter(|hit| threshold.map_or(true, |t| hit.score >= t))
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.path.cmp(b.path))
                .then_with(|| a.location.ordinal.cmp(&b.location.ordinal))
        });
        results
    }

    /// Rank chunks in scope by similarity to `query`
    ///
    /// Sorted by score descending, ties by path then ordinal. Scores below
    /// `threshold` are dropped (equal is kept), then at most `k` remain.
    pub fn query<F>(
        &self,
        query: &[f32],
        scope: F,
        k: usize,
        threshold: Option<f32>,
    ) -> Vec<ScoredRecord<'_>>
    where
        F: Fn(&Path) -> bool + Sync,
    {
        if k == 0 || self.records.is_empty() {
            return vec![];
        }
        let mut results = self.scored(query, scope, threshold);
        results.truncate(k);
        results
    }

    /// Like [`VectorIndex::query`], keeping only the best chunk per file
    ///
    /// Collapsing happens before truncation, so `k` counts files.
    pub fn query_files<F>(
        &self,
        query: &[f32],
        scope: F,
        k: usize,
        threshold: Option<f32>,
    ) -> Vec<ScoredRecord<'_>>
    where
        F: Fn(&Path) -> bool + Sync,
    {
        if k == 0 || self.records.is_empty() {
            return vec![];
        }
        let mut seen: HashSet<&Path> = HashSet::new();
        let mut results = self.scored(query, scope, threshold);
        results.retain(|hit| seen.insert(hit.path));
        results.truncate(k);
        results
    }

    /// Fingerprints currently owned by a file
    pub fn fingerprints_for(&self, path: &Path) -> Option<&BTreeSet<Fingerprint>> {
        self.by_path.get(path)
    }

    /// Whether the file owns any record
    pub fn contains_path(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    /// Look up a record by fingerprint
    pub fn record(&self, fingerprint: &Fingerprint) -> Option<&EmbeddingRecord> {
        self.records.get(fingerprint)
    }

    /// Shared handle to a record's vector
    pub fn vector(&self, fingerprint: &Fingerprint) -> Option<Arc<[f32]>> {
        self.records.get(fingerprint).map(|r| Arc::clone(&r.vector))
    }

    /// Indexed files under `dir`, in path order
    pub fn paths_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.by_path
            .keys()
            .filter(|path| path.starts_with(dir))
            .cloned()
            .collect()
    }

    /// Get total number of records
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Get total number of indexed files
    pub fn file_count(&self) -> usize {
        self.by_path.len()
    }

    /// Model the vectors come from
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether there are unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Backing file, if the index is durable
    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    /// Summary for display
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            files: self.file_count(),
            records: self.record_count(),
            model: self.model_id.clone(),
            dimension: self.dimension,
            saved_at: self.saved_at,
        }
    }
}
