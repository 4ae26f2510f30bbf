//! Search functionality and result formatting
//!
//! Embeds the query, scans the index within a scope and returns one hit
//! per file, best first. Results can be formatted for the terminal or as
//! JSON.

use crate::chunker::placeholder_text;
use crate::embedder::EmbedderGateway;
use crate::error::Result;
use crate::index::{read_index, SharedIndex};
use crate::scope::Scope;
use colored::*;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How much of the matched chunk is returned as context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    /// The full chunk text
    #[default]
    Chunk,
    /// At most this many characters of the chunk
    Excerpt(usize),
}

impl ContextMode {
    fn apply(&self, text: &str) -> String {
        match *self {
            Self::Chunk => text.to_string(),
            Self::Excerpt(max_chars) => match text.char_indices().nth(max_chars) {
                Some((end, _)) => text[..end].to_string(),
                None => text.to_string(),
            },
        }
    }
}

/// Best match within one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Matching file
    pub path: PathBuf,
    /// Cosine similarity to the query
    pub score: f32,
    /// Text of the best-matching chunk
    pub context: String,
    /// First line of the chunk (1-indexed)
    pub start_line: usize,
    /// Last line of the chunk (1-indexed)
    pub end_line: usize,
}

/// Ranked mapping from file path to its best hit
///
/// Iteration order is rank order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    hits: Vec<SearchHit>,
}

impl SearchResults {
    /// Hit for a path, if it ranked
    pub fn get(&self, path: &Path) -> Option<&SearchHit> {
        self.hits.iter().find(|hit| hit.path == path)
    }

    /// Ranked paths
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.hits.iter().map(|hit| hit.path.as_path())
    }

    /// Ranked hits
    pub fn iter(&self) -> std::slice::Iter<'_, SearchHit> {
        self.hits.iter()
    }

    /// Number of files returned
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

impl IntoIterator for SearchResults {
    type Item = SearchHit;
    type IntoIter = std::vec::IntoIter<SearchHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a SearchHit;
    type IntoIter = std::slice::Iter<'a, SearchHit>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

/// Semantic searcher
pub struct Searcher {
    gateway: EmbedderGateway,
    index: SharedIndex,
    context: ContextMode,
}

impl Searcher {
    /// Create a searcher over a shared index
    pub fn new(gateway: EmbedderGateway, index: SharedIndex) -> Self {
        Self {
            gateway,
            index,
            context: ContextMode::default(),
        }
    }

    /// Set how much context each hit carries
    pub fn with_context(mut self, context: ContextMode) -> Self {
        self.context = context;
        self
    }

    /// Search for files matching the query
    ///
    /// At most `k` files are returned; with a `threshold`, only hits scoring
    /// at least that much. `k == 0` returns nothing without embedding.
    pub fn search(
        &self,
        query: &str,
        scope: &Scope,
        k: usize,
        threshold: Option<f32>,
    ) -> Result<SearchResults> {
        if k == 0 {
            return Ok(SearchResults::default());
        }

        let query_embedding = self.gateway.embed(query)?;

        // One read guard for the whole scan
        let index = read_index(&self.index)?;
        let hits: Vec<SearchHit> = index
            .query_files(&query_embedding, |path| scope.matches(path), k, threshold)
            .into_iter()
            .map(|scored| {
                // Placeholder records are shared by every copy of a file
                let context = if scored.location.placeholder {
                    self.context.apply(&placeholder_text(scored.path))
                } else {
                    self.context.apply(&scored.record.text)
                };
                SearchHit {
                    path: scored.path.to_path_buf(),
                    score: scored.score,
                    context,
                    start_line: scored.location.start_line,
                    end_line: scored.location.end_line,
                }
            })
            .collect();

        debug!(
            "{} hits for {:?} under {:?}",
            hits.len(),
            query,
            scope.directory().path()
        );
        Ok(SearchResults { hits })
    }
}

/// Format search results for terminal display
pub fn format_results(results: &SearchResults, show_content: bool, root: &Path) -> String {
    let mut output = String::new();

    for (i, hit) in results.iter().enumerate() {
        let shown = hit.path.strip_prefix(root).unwrap_or(&hit.path);
        let file_display = if hit.start_line == hit.end_line {
            format!("{}:{}", shown.display(), hit.start_line)
        } else {
            format!("{}:{}-{}", shown.display(), hit.start_line, hit.end_line)
        };

        // Score indicator with color
        let score_pct = (hit.score.max(0.0) * 100.0) as u32;
        let score_color = if score_pct >= 80 {
            "green"
        } else if score_pct >= 60 {
            "yellow"
        } else {
            "red"
        };

        output.push_str(&format!(
            "\n{} {} ({}%)\n",
            format!("[{}]", i + 1).dimmed(),
            file_display.cyan().bold(),
            format!("{}", score_pct).color(score_color)
        ));

        if show_content {
            output.push_str(&format!("{}\n", "─".repeat(60).dimmed()));

            let lines: Vec<&str> = hit.context.lines().collect();
            let max_lines = 15;
            let show_lines = if lines.len() > max_lines {
                &lines[..max_lines]
            } else {
                &lines
            };

            for (j, line) in show_lines.iter().enumerate() {
                let line_num = hit.start_line + j;
                output.push_str(&format!("{} {}\n", format!("{:4}", line_num).dimmed(), line));
            }

            if lines.len() > max_lines {
                output.push_str(&format!(
                    "{}\n",
                    format!("     ... ({} more lines)", lines.len() - max_lines).dimmed()
                ));
            }
        }
    }

    output
}

/// Format results as JSON
pub fn format_results_json(results: &SearchResults) -> Result<String> {
    Ok(serde_json::to_string_pretty(&results.hits)?)
}

/// Path to context object, keys in rank order
struct ContextMap<'a>(&'a SearchResults);

impl Serialize for ContextMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for hit in self.0 {
            map.serialize_entry(&hit.path.display().to_string(), &hit.context)?;
        }
        map.end()
    }
}

/// Format results as a JSON object from path to context, best match first
pub fn format_contexts_json(results: &SearchResults) -> Result<String> {
    Ok(serde_json::to_string_pretty(&ContextMap(results))?)
}
