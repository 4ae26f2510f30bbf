//! Files and directories that can be indexed
//!
//! An [`Indexable`] is either a single [`File`] or a [`Directory`] whose
//! matching descendants are walked on demand. Content identity is a SHA-256
//! [`Fingerprint`] of the raw bytes, recomputed at call time.

use crate::config::{is_indexable, Config, IGNORE_FILE_NAME};
use crate::error::{IfsError, Result};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

/// Content-derived identifier (lowercase hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a byte string
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint of several byte strings, length-prefixed
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated digest for logs
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A regular file that passes the ignore rules
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Open a file by path, canonicalizing it
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = canonical(path.as_ref())?;
        if !path.is_file() {
            return Err(IfsError::not_indexable(path, "not a regular file"));
        }
        if !is_indexable(&path, false) {
            return Err(IfsError::not_indexable(path, "excluded by ignore rules"));
        }
        Ok(Self { path })
    }

    /// Absolute path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name for display
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Parent directory
    pub fn directory(&self) -> Result<Directory> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| IfsError::not_indexable(&self.path, "file has no parent"))?;
        Directory::open(parent)
    }

    /// Current size in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Whether the file is currently empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Last modification time
    pub fn modified(&self) -> Result<SystemTime> {
        Ok(std::fs::metadata(&self.path)?.modified()?)
    }

    /// Raw bytes, read now
    pub fn content(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| {
            IfsError::not_indexable(&self.path, format!("unreadable: {}", e))
        })
    }

    /// Content as UTF-8 text, read now
    pub fn read_text(&self) -> Result<String> {
        String::from_utf8(self.content()?)
            .map_err(|_| IfsError::not_indexable(&self.path, "content is not UTF-8 text"))
    }

    /// Fingerprint of the current content
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::of_bytes(&self.content()?))
    }
}

/// A directory that passes the ignore rules
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Directory {
    path: PathBuf,
}

impl Directory {
    /// Open a directory by path, canonicalizing it
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = canonical(path.as_ref())?;
        if !path.is_dir() {
            return Err(IfsError::not_indexable(path, "not a directory"));
        }
        if !is_indexable(&path, true) {
            return Err(IfsError::not_indexable(path, "excluded by ignore rules"));
        }
        Ok(Self { path })
    }

    /// The current working directory
    pub fn current() -> Result<Self> {
        Self::open(std::env::current_dir()?)
    }

    /// Absolute path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `path` lies in this directory's subtree
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.path)
    }

    /// Walk indexable descendant files
    ///
    /// Entries are visited sorted by name at every level, so the sequence
    /// is deterministic for a given tree. The walk reads the tree when
    /// iterated and may be restarted by calling this again.
    pub fn files<'a>(&self, config: &'a Config) -> impl Iterator<Item = File> + 'a {
        let mut builder = WalkBuilder::new(&self.path);
        builder
            .hidden(false)
            .follow_links(false)
            .git_ignore(config.respect_ignore_files)
            .git_global(config.respect_ignore_files)
            .git_exclude(config.respect_ignore_files)
            .ignore(config.respect_ignore_files)
            .parents(config.respect_ignore_files)
            .require_git(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(|entry| {
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                is_indexable(entry.path(), is_dir)
            });
        if config.respect_ignore_files {
            builder.add_custom_ignore_filename(IGNORE_FILE_NAME);
        }

        builder.build().filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    return None;
                }
            };
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                return None;
            }
            let too_large = entry
                .metadata()
                .map(|m| m.len() > config.max_file_size)
                .unwrap_or(true);
            if too_large {
                return None;
            }
            Some(File {
                path: entry.into_path(),
            })
        })
    }
}

/// Something that can be indexed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Indexable {
    File(File),
    Directory(Directory),
}

impl Indexable {
    /// Classify a path as file or directory
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_file() {
            Ok(Self::File(File::open(path)?))
        } else if path.is_dir() {
            Ok(Self::Directory(Directory::open(path)?))
        } else {
            Err(IfsError::not_indexable(
                path,
                "only files and directories can be indexed",
            ))
        }
    }

    /// Absolute path
    pub fn path(&self) -> &Path {
        match self {
            Self::File(file) => file.path(),
            Self::Directory(dir) => dir.path(),
        }
    }

    /// Files covered by this target, in traversal order
    pub fn files(&self, config: &Config) -> Vec<File> {
        match self {
            Self::File(file) => vec![file.clone()],
            Self::Directory(dir) => dir.files(config).collect(),
        }
    }
}

impl From<File> for Indexable {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl From<Directory> for Indexable {
    fn from(dir: Directory) -> Self {
        Self::Directory(dir)
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| {
        IfsError::not_indexable(path, format!("does not exist on the system ({})", e))
    })
}
