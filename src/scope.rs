//! Search scope
//!
//! A scope is a directory subtree, optionally narrowed by file extension
//! and by path patterns. Patterns match the path relative to the scope
//! directory and are compiled once when the scope is built.

use crate::error::Result;
use crate::indexable::Directory;
use regex::Regex;
use std::path::Path;

/// Which indexed files a search may return
#[derive(Debug, Clone)]
pub struct Scope {
    directory: Directory,
    /// Lowercase extensions without the dot
    extensions: Option<Vec<String>>,
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl Scope {
    /// Every file under `directory`
    pub fn new(directory: Directory) -> Self {
        Self {
            directory,
            extensions: None,
            include: None,
            exclude: None,
        }
    }

    /// Root of the scope
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Keep only files with one of these extensions (e.g. `["rs", ".md"]`)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions: Vec<String> = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self.extensions = (!extensions.is_empty()).then_some(extensions);
        self
    }

    /// Keep only relative paths matching `pattern`
    pub fn with_include(mut self, pattern: &str) -> Result<Self> {
        self.include = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Drop relative paths matching `pattern`
    pub fn with_exclude(mut self, pattern: &str) -> Result<Self> {
        self.exclude = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Whether an indexed path belongs to this scope
    pub fn matches(&self, path: &Path) -> bool {
        // Component-wise, so /a/bc is not under /a/b
        let Ok(relative) = path.strip_prefix(self.directory.path()) else {
            return false;
        };

        if let Some(ref extensions) = self.extensions {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());
            match ext {
                Some(ext) if extensions.contains(&ext) => {}
                _ => return false,
            }
        }

        if self.include.is_none() && self.exclude.is_none() {
            return true;
        }

        let relative = relative.to_string_lossy();
        if let Some(ref include) = self.include {
            if !include.is_match(&relative) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude {
            if exclude.is_match(&relative) {
                return false;
            }
        }

        true
    }
}

impl From<Directory> for Scope {
    fn from(directory: Directory) -> Self {
        Self::new(directory)
    }
}
