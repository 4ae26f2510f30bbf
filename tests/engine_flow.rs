//! End-to-end behaviour of indexing and search through the public API

use intellifs::{
    Config, Directory, Embedder, FileSystem, HashEmbedder, IfsError, Indexable, Result, Scope,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

const DIMENSION: usize = 64;

/// Hash embedder that refuses any text containing "poison"
struct FlakyEmbedder {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new() -> Self {
        Self {
            inner: HashEmbedder::new(DIMENSION),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Embedder for FlakyEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(IfsError::EmbeddingFailed {
                model_id: self.model_id().to_string(),
                message: "refused".to_string(),
            });
        }
        self.inner.embed_batch(texts)
    }
}

struct SleepyEmbedder;

impl Embedder for SleepyEmbedder {
    fn model_id(&self) -> &str {
        "test/sleepy"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(texts.iter().map(|_| vec![1.0; DIMENSION]).collect())
    }
}

struct Workspace {
    cache: TempDir,
    files: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            cache: tempdir().unwrap(),
            files: tempdir().unwrap(),
        }
    }

    fn config(&self) -> Config {
        Config::new(self.cache.path().to_path_buf())
            .with_workers(2)
            .with_auto_index(false)
    }

    fn engine(&self) -> FileSystem {
        FileSystem::with_embedder(self.config(), Some(Arc::new(HashEmbedder::new(DIMENSION))))
            .unwrap()
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.files.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path.canonicalize().unwrap()
    }

    fn root(&self) -> Indexable {
        Indexable::from_path(self.files.path()).unwrap()
    }

    fn scope(&self, sub: &str) -> Scope {
        Scope::new(Directory::open(self.files.path().join(sub)).unwrap())
    }

    fn store_file(&self) -> PathBuf {
        let model_id = HashEmbedder::new(DIMENSION).model_id().to_string();
        self.config().store_dir_for(&model_id).join("records.bin")
    }
}

fn names<I, P>(paths: I) -> Vec<String>
where
    I: Iterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .map(|p| {
            p.as_ref()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

#[test]
fn reindexing_unchanged_tree_leaves_store_identical() {
    let ws = Workspace::new();
    ws.write("a.txt", "first document");
    ws.write("sub/b.md", "second document");
    let engine = ws.engine();

    engine.index(&ws.root()).unwrap();
    let before = fs::read(ws.store_file()).unwrap();

    let stats = engine.index(&ws.root()).unwrap();
    assert_eq!(stats.unchanged, 2);
    assert!(!stats.changed());

    // A fresh engine over the same store behaves the same way
    ws.engine().index(&ws.root()).unwrap();
    assert_eq!(fs::read(ws.store_file()).unwrap(), before);
}

#[test]
fn identical_content_shares_one_record() {
    let ws = Workspace::new();
    ws.write("a.txt", "shared words here");
    ws.write("b.txt", "shared words here");
    let engine = ws.engine();

    engine.index(&ws.root()).unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.files, 2);

    let results = engine.search("shared words", &ws.scope(""), 5, None).unwrap();
    assert_eq!(names(results.paths()), vec!["a.txt", "b.txt"]);
}

#[test]
fn identical_binary_and_empty_files_share_records() {
    let ws = Workspace::new();
    let png: [u8; 4] = [0x89, 0x50, 0x00, 0xff];
    fs::write(ws.files.path().join("a.png"), png).unwrap();
    fs::write(ws.files.path().join("b.png"), png).unwrap();
    let b = ws.files.path().join("b.png").canonicalize().unwrap();
    ws.write("e1.txt", "");
    ws.write("e2.txt", "");

    let embedder = Arc::new(FlakyEmbedder::new());
    let engine =
        FileSystem::with_embedder(ws.config(), Some(embedder.clone() as Arc<dyn Embedder>))
            .unwrap();
    engine.index(&ws.root()).unwrap();

    let stats = engine.stats().unwrap();
    assert_eq!(stats.files, 4);
    assert_eq!(stats.records, 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.index(&ws.root()).unwrap().unchanged, 4);

    // Each copy is still reported under its own name
    let results = engine.search("a file", &ws.scope(""), 10, None).unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.get(&b).unwrap().context.contains("b.png"));
}

#[test]
fn modified_file_replaces_stale_records() {
    let ws = Workspace::new();
    let path = ws.write("notes.txt", "apples and oranges");
    let engine = ws.engine();
    engine.index(&ws.root()).unwrap();

    fs::write(&path, "bicycles and trains").unwrap();
    let file = Indexable::from_path(&path).unwrap();
    assert!(!engine.is_indexed(&file).unwrap());

    let stats = engine.index(&ws.root()).unwrap();
    assert_eq!(stats.updated, 1);
    assert!(engine.is_indexed(&file).unwrap());
    assert_eq!(engine.stats().unwrap().records, 1);

    let results = engine.search("apples", &ws.scope(""), 5, None).unwrap();
    assert_eq!(results.iter().next().unwrap().context, "bicycles and trains");
}

#[test]
fn equal_scores_rank_by_path() {
    let ws = Workspace::new();
    ws.write("c.txt", "same text");
    ws.write("a.txt", "same text");
    ws.write("b.txt", "same text");
    let engine = ws.engine();
    engine.index(&ws.root()).unwrap();

    let first = engine.search("same", &ws.scope(""), 10, None).unwrap();
    let second = engine.search("same", &ws.scope(""), 10, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(names(first.paths()), vec!["a.txt", "b.txt", "c.txt"]);

    let top = engine.search("same", &ws.scope(""), 2, None).unwrap();
    assert_eq!(names(top.paths()), vec!["a.txt", "b.txt"]);
}

#[test]
fn raising_threshold_only_removes_results() {
    let ws = Workspace::new();
    ws.write("a.txt", "rust borrow checker rules");
    ws.write("b.txt", "python garbage collection");
    ws.write("c.txt", "rust ownership and lifetimes");
    ws.write("d.txt", "cooking pasta at home");
    let engine = ws.engine();
    engine.index(&ws.root()).unwrap();

    let mut previous: Option<Vec<String>> = None;
    for t in [0.0, 0.1, 0.3, 0.5, 0.8, 1.0] {
        let results = engine.search("rust rules", &ws.scope(""), 10, Some(t)).unwrap();
        assert!(results.iter().all(|hit| hit.score >= t));
        let current = names(results.paths());
        if let Some(previous) = &previous {
            assert!(current.iter().all(|name| previous.contains(name)));
        }
        previous = Some(current);
    }
}

#[test]
fn search_stays_inside_scope() {
    let ws = Workspace::new();
    ws.write("left/one.txt", "the same sentence");
    ws.write("right/two.txt", "the same sentence");
    ws.write("leftover/three.txt", "the same sentence");
    let engine = ws.engine();
    engine.index(&ws.root()).unwrap();

    let results = engine.search("same sentence", &ws.scope("left"), 10, None).unwrap();
    assert_eq!(names(results.paths()), vec!["one.txt"]);
}

#[test]
fn quick_fox_finds_the_fox() {
    let ws = Workspace::new();
    let a = ws.write("dirA/a.txt", "The quick brown fox");
    ws.write("dirA/b.txt", "A lazy dog sleeps");
    let engine = ws.engine();

    let dir = Indexable::from_path(ws.files.path().join("dirA")).unwrap();
    engine.index(&dir).unwrap();

    let results = engine.search("quick fox", &ws.scope("dirA"), 1, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.get(&a).unwrap().context, "The quick brown fox");
}

#[test]
fn search_indexes_scope_on_demand() {
    let ws = Workspace::new();
    let a = ws.write("a.txt", "The quick brown fox");
    let engine = FileSystem::with_embedder(
        ws.config().with_auto_index(true),
        Some(Arc::new(HashEmbedder::new(DIMENSION))),
    )
    .unwrap();

    let results = engine.search("fox", &ws.scope(""), 3, None).unwrap();
    assert!(results.get(&a).is_some());
}

#[test]
fn is_indexed_tracks_content() {
    let ws = Workspace::new();
    let path = ws.write("doc.txt", "version one");
    let engine = ws.engine();
    let file = Indexable::from_path(&path).unwrap();

    assert!(!engine.is_indexed(&file).unwrap());
    engine.index(&file).unwrap();
    assert!(engine.is_indexed(&file).unwrap());

    fs::write(&path, "version two").unwrap();
    assert!(!engine.is_indexed(&file).unwrap());
}

#[test]
fn searches_during_reindex_always_see_the_file() {
    let ws = Workspace::new();
    let path = ws.write("doc.txt", "apple orchard in spring");
    ws.write("other.txt", "unrelated notes");
    let engine = ws.engine();
    engine.index(&ws.root()).unwrap();

    let file = Indexable::from_path(&path).unwrap();
    let contents = ["apple orchard in spring", "bicycle repair manual"];
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            for round in 0..40 {
                fs::write(&path, contents[(round + 1) % 2]).unwrap();
                engine.index(&file).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        let scope = ws.scope("");
        let mut searches = 0;
        while !done.load(Ordering::SeqCst) || searches == 0 {
            let results = engine.search("apple", &scope, 10, None).unwrap();
            let hit = results.get(&path).expect("file missing from results");
            assert!(contents.contains(&hit.context.as_str()));
            searches += 1;
        }
    });
}

#[test]
fn failed_file_does_not_lose_other_work() {
    let ws = Workspace::new();
    let a = ws.write("a.txt", "healthy apple");
    let b = ws.write("b.txt", "poison berry");
    let c = ws.write("c.txt", "healthy cherry");

    let embedder = Arc::new(FlakyEmbedder::new());
    let engine =
        FileSystem::with_embedder(ws.config(), Some(embedder.clone() as Arc<dyn Embedder>))
            .unwrap();

    let err = engine.index(&ws.root()).unwrap_err();
    match err {
        IfsError::EmbeddingFailed { message, .. } => assert!(message.contains("b.txt")),
        other => panic!("unexpected error: {}", other),
    }

    let indexed = |p: &Path| engine.is_indexed(&Indexable::from_path(p).unwrap()).unwrap();
    assert!(indexed(&a));
    assert!(!indexed(&b));
    assert!(indexed(&c));

    // Progress was saved: a new engine sees the two good files
    let reopened =
        FileSystem::with_embedder(ws.config(), Some(Arc::new(FlakyEmbedder::new()))).unwrap();
    assert_eq!(reopened.stats().unwrap().files, 2);

    fs::write(&b, "fresh berry").unwrap();
    let before = embedder.calls.load(Ordering::SeqCst);
    let stats = engine.index(&ws.root()).unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), before + 1);
}

#[test]
fn slow_embedder_times_out() {
    let ws = Workspace::new();
    ws.write("a.txt", "anything");
    let config = ws.config().with_embed_timeout(Duration::from_millis(50));
    let engine = FileSystem::with_embedder(config, Some(Arc::new(SleepyEmbedder))).unwrap();

    let err = engine.index(&ws.root()).unwrap_err();
    assert!(matches!(err, IfsError::EmbeddingTimeout { .. }));
    assert_eq!(engine.stats().unwrap().records, 0);
}

#[test]
fn corrupted_store_is_reported() {
    let ws = Workspace::new();
    ws.write("a.txt", "content");
    ws.engine().index(&ws.root()).unwrap();

    fs::write(ws.store_file(), b"definitely not an index").unwrap();
    let result =
        FileSystem::with_embedder(ws.config(), Some(Arc::new(HashEmbedder::new(DIMENSION))));
    assert!(matches!(result, Err(IfsError::IndexCorrupt { .. })));
}
