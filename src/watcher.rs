//! File system watcher for live index updates
//!
//! Watches a directory and re-indexes it when indexable files change.
//! Uses debouncing to avoid excessive updates on rapid changes.

use crate::config::is_indexable;
use crate::error::{IfsError, Result};
use crate::fs::FileSystem;
use crate::indexable::{Directory, Indexable};
use crate::indexer::UpdateStats;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keeps a directory's index in sync with the disk
pub struct IndexWatcher<'a> {
    engine: &'a FileSystem,
    directory: Directory,
    debounce: Duration,
}

impl<'a> IndexWatcher<'a> {
    /// Create a watcher for `directory`
    pub fn new(engine: &'a FileSystem, directory: Directory) -> Self {
        Self {
            engine,
            directory,
            debounce: Duration::from_millis(500),
        }
    }

    /// Set the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching for file changes
    ///
    /// Brings the index up to date first, then blocks until the event
    /// channel closes or the process is interrupted.
    pub fn watch(&self) -> Result<()> {
        let root = self.directory.path();
        info!("Watching {:?} for changes...", root);

        let stats = self.engine.index(&self.target())?;
        info!("Initial sync: {}", stats);

        let (tx, rx) = channel();
        let mut debouncer =
            new_debouncer(self.debounce, tx).map_err(|e| IfsError::Watch(e.to_string()))?;
        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| IfsError::Watch(e.to_string()))?;

        let index = self.engine.stats()?;
        println!(
            "\n✓ Index ready ({} files, {} chunks)",
            index.files, index.records
        );
        println!("  Watching for changes. Press Ctrl+C to stop.\n");

        self.process_events(rx)
    }

    fn target(&self) -> Indexable {
        Indexable::from(self.directory.clone())
    }

    /// Process file system events from the watcher
    fn process_events(
        &self,
        rx: Receiver<std::result::Result<Vec<DebouncedEvent>, notify::Error>>,
    ) -> Result<()> {
        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    let changed: HashSet<PathBuf> =
                        events.into_iter().map(|event| event.path).collect();
                    if let Some(stats) = self.handle_changes(&changed)? {
                        if stats.changed() {
                            println!(
                                "  Updated: +{} ~{} -{}",
                                stats.added, stats.updated, stats.removed
                            );
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!("Watch error: {:?}", e);
                }
                Err(e) => {
                    debug!("Watch channel closed: {:?}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Re-index the directory if any changed path matters
    ///
    /// Paths outside the directory, under the engine's cache directory or
    /// excluded by the ignore rules are disregarded. Returns `None` when
    /// nothing relevant changed.
    pub fn handle_changes(&self, changed: &HashSet<PathBuf>) -> Result<Option<UpdateStats>> {
        let cache_dir = &self.engine.config().cache_dir;
        let relevant = changed.iter().any(|path| {
            self.directory.contains(path)
                && !path.starts_with(cache_dir)
                && is_indexable(path, path.is_dir())
        });
        if !relevant {
            return Ok(None);
        }

        info!("Processing {} changed paths...", changed.len());
        match self.engine.index(&self.target()) {
            Ok(stats) => Ok(Some(stats)),
            // A single bad file should not stop the watch
            Err(e @ (IfsError::EmbeddingFailed { .. } | IfsError::EmbeddingTimeout { .. })) => {
                warn!("Re-index failed: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
