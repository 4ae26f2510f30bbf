//! Text chunking for semantic indexing
//!
//! Splits file content into the units that get embedded. The default keeps
//! one chunk per file; line-window chunking with overlap is available for
//! long documents. Line numbers are kept for result display.

use crate::config::Config;
use crate::error::Result;
use crate::index::ChunkLocation;
use crate::indexable::{Fingerprint, Indexable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// How file content is split before embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// The whole file is a single chunk
    #[default]
    WholeFile,
    /// Line-aligned windows of roughly `chunk_size` characters
    Lines {
        /// Target size for each chunk in characters
        chunk_size: usize,
        /// Number of characters to overlap between chunks
        overlap: usize,
    },
}

/// A chunk of text derived from a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// SHA-256 of the chunk text
    pub fingerprint: Fingerprint,
    /// Owning file
    pub file_path: PathBuf,
    /// Position of the chunk within its file (0-based)
    pub ordinal: usize,
    /// Starting line number (1-indexed)
    pub start_line: usize,
    /// Ending line number (1-indexed)
    pub end_line: usize,
    /// The text content
    pub text: String,
    /// Stands in for content that is not text
    pub placeholder: bool,
}

impl Chunk {
    /// Where this chunk sits in its file
    pub fn location(&self) -> ChunkLocation {
        ChunkLocation {
            ordinal: self.ordinal,
            start_line: self.start_line,
            end_line: self.end_line,
            placeholder: self.placeholder,
        }
    }
}

struct Piece {
    start_line: usize,
    end_line: usize,
    text: String,
}

/// Splits file content into chunks
#[derive(Debug, Clone)]
pub struct Chunker {
    strategy: ChunkStrategy,
    max_chunks: usize,
}

impl Chunker {
    /// Create a new chunker
    ///
    /// # Arguments
    /// * `strategy` - How to split text
    /// * `max_chunks` - Chunks kept per file, the rest is dropped
    pub fn new(strategy: ChunkStrategy, max_chunks: usize) -> Self {
        Self {
            strategy,
            max_chunks: max_chunks.max(1),
        }
    }

    /// Chunker matching the engine configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.chunking, config.max_chunks)
    }

    /// Split raw file bytes into chunks, in offset order
    ///
    /// Content that is not UTF-8 text, or is blank, becomes a single
    /// placeholder chunk naming the file so it stays discoverable. The
    /// placeholder is keyed by the raw bytes, so identical files share it.
    pub fn chunk_file(&self, path: &Path, bytes: &[u8]) -> Vec<Chunk> {
        let text = std::str::from_utf8(bytes)
            .ok()
            .filter(|t| !t.trim().is_empty() && !t.contains('\0'));

        let Some(text) = text else {
            let file_fp = Fingerprint::of_bytes(bytes);
            return vec![Chunk {
                fingerprint: Fingerprint::of_parts(&[b"placeholder", file_fp.as_str().as_bytes()]),
                file_path: path.to_path_buf(),
                ordinal: 0,
                start_line: 1,
                end_line: 1,
                text: placeholder_text(path),
                placeholder: true,
            }];
        };

        let mut pieces = self.split(text);

        let capped = pieces.len() > self.max_chunks;
        pieces.truncate(self.max_chunks);
        let last = pieces.len().saturating_sub(1);

        pieces
            .into_iter()
            .enumerate()
            .map(|(ordinal, piece)| {
                // A capped file's last chunk is keyed by the whole file too,
                // otherwise edits past the cap would go unnoticed.
                let fingerprint = if capped && ordinal == last {
                    let file_fp = Fingerprint::of_bytes(bytes);
                    Fingerprint::of_parts(&[piece.text.as_bytes(), file_fp.as_str().as_bytes()])
                } else {
                    Fingerprint::of_bytes(piece.text.as_bytes())
                };
                Chunk {
                    fingerprint,
                    file_path: path.to_path_buf(),
                    ordinal,
                    start_line: piece.start_line,
                    end_line: piece.end_line,
                    text: piece.text,
                    placeholder: false,
                }
            })
            .collect()
    }

    /// Chunks of every file a target covers
    ///
    /// A file target yields its chunks in offset order and fails if the file
    /// cannot be read. A directory yields the path-sorted concatenation of
    /// its files' chunks, skipping files that vanish mid-walk.
    pub fn chunks(&self, target: &Indexable, config: &Config) -> Result<Vec<Chunk>> {
        match target {
            Indexable::File(file) => Ok(self.chunk_file(file.path(), &file.content()?)),
            Indexable::Directory(dir) => {
                let mut chunks = Vec::new();
                for file in dir.files(config) {
                    match file.content() {
                        Ok(bytes) => chunks.extend(self.chunk_file(file.path(), &bytes)),
                        Err(e) => warn!("Skipping {}: {}", file.path().display(), e),
                    }
                }
                Ok(chunks)
            }
        }
    }

    fn split(&self, text: &str) -> Vec<Piece> {
        match self.strategy {
            ChunkStrategy::WholeFile => vec![Piece {
                start_line: 1,
                end_line: text.lines().count().max(1),
                text: text.to_string(),
            }],
            ChunkStrategy::Lines {
                chunk_size,
                overlap,
            } => split_lines(text, chunk_size.max(1), overlap),
        }
    }
}

/// Split text on line boundaries into overlapping windows
fn split_lines(text: &str, chunk_size: usize, overlap: usize) -> Vec<Piece> {
    let lines: Vec<&str> = text.lines().collect();
    let mut pieces = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0;
    let mut start_line = 1;

    for (i, line) in lines.iter().enumerate() {
        let line_len = line.len() + 1; // +1 for newline

        if current_size + line_len > chunk_size && !current.is_empty() {
            pieces.push(Piece {
                start_line,
                end_line: start_line + current.len() - 1,
                text: current.join("\n"),
            });

            // Keep trailing lines for context, but always make progress
            let keep = overlap_lines(&current, overlap).min(current.len() - 1);
            if keep > 0 {
                current = current[current.len() - keep..].to_vec();
                current_size = current.iter().map(|l| l.len() + 1).sum();
                start_line = i + 1 - keep;
            } else {
                current.clear();
                current_size = 0;
                start_line = i + 1;
            }
        }

        current.push(line);
        current_size += line_len;
    }

    if !current.is_empty() {
        pieces.push(Piece {
            start_line,
            end_line: start_line + current.len() - 1,
            text: current.join("\n"),
        });
    }

    pieces
}

/// How many trailing lines fit in the overlap budget
fn overlap_lines(lines: &[&str], overlap: usize) -> usize {
    let mut size = 0;
    let mut count = 0;

    for line in lines.iter().rev() {
        size += line.len() + 1;
        if size > overlap {
            break;
        }
        count += 1;
    }

    count
}

/// Context shown for a file without text
pub(crate) fn placeholder_text(path: &Path) -> String {
    format!("There is a file at `{}`.", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexable::Directory;
    use tempfile::tempdir;

    fn lines_chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(
            ChunkStrategy::Lines {
                chunk_size,
                overlap,
            },
            300,
        )
    }

    #[test]
    fn test_whole_file_is_one_chunk() {
        let chunker = Chunker::new(ChunkStrategy::WholeFile, 300);
        let chunks = chunker.chunk_file(Path::new("/d/a.txt"), b"line 1\nline 2\nline 3");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert_eq!(chunks[0].text, "line 1\nline 2\nline 3");
        assert_eq!(
            chunks[0].fingerprint,
            Fingerprint::of_bytes(b"line 1\nline 2\nline 3")
        );
    }

    #[test]
    fn test_fingerprint_ignores_path() {
        let chunker = Chunker::new(ChunkStrategy::WholeFile, 300);
        let a = chunker.chunk_file(Path::new("/d/a.txt"), b"same words");
        let b = chunker.chunk_file(Path::new("/other/b.md"), b"same words");
        assert_eq!(a[0].fingerprint, b[0].fingerprint);
    }

    #[test]
    fn test_line_windows_are_ordered() {
        let chunker = lines_chunker(50, 10);
        let text = "line 1 with some content\nline 2 with more content\nline 3 with even more\nline 4 final";
        let chunks = chunker.chunk_file(Path::new("/d/test.rs"), text.as_bytes());

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert!(chunk.start_line <= chunk.end_line);
        }
        assert_eq!(chunks.last().unwrap().end_line, 4);
    }

    #[test]
    fn test_line_windows_overlap() {
        let chunker = lines_chunker(20, 8);
        let chunks = chunker.chunk_file(Path::new("/d/t.txt"), b"aaaaaaaaa\nbbbb\ncccccccccc\ndddd");

        assert!(chunks.len() >= 2);
        assert!(chunks[1].start_line <= chunks[0].end_line);
    }

    #[test]
    fn test_blank_and_binary_get_placeholder() {
        let chunker = Chunker::new(ChunkStrategy::WholeFile, 300);

        let blank = chunker.chunk_file(Path::new("/d/empty.txt"), b"");
        assert_eq!(blank.len(), 1);
        assert_eq!(blank[0].text, "There is a file at `/d/empty.txt`.");

        let binary = chunker.chunk_file(Path::new("/d/img.png"), &[0x89, 0x50, 0xff, 0x00]);
        assert_eq!(binary.len(), 1);
        assert!(binary[0].text.contains("img.png"));
        assert!(binary[0].placeholder && binary[0].location().placeholder);
    }

    #[test]
    fn test_placeholder_keyed_by_content() {
        let chunker = Chunker::new(ChunkStrategy::WholeFile, 300);
        let png: [u8; 4] = [0x89, 0x50, 0x00, 0xff];

        let a = chunker.chunk_file(Path::new("/d/a.png"), &png);
        let b = chunker.chunk_file(Path::new("/elsewhere/b.png"), &png);
        assert_eq!(a[0].fingerprint, b[0].fingerprint);

        let e1 = chunker.chunk_file(Path::new("/d/e1.txt"), b"");
        let e2 = chunker.chunk_file(Path::new("/d/e2.txt"), b"");
        assert_eq!(e1[0].fingerprint, e2[0].fingerprint);
        assert_ne!(a[0].fingerprint, e1[0].fingerprint);

        // Never collides with a text file holding the same words
        let text = chunker.chunk_file(Path::new("/d/t.txt"), a[0].text.as_bytes());
        assert_ne!(text[0].fingerprint, a[0].fingerprint);
    }

    #[test]
    fn test_cap_keys_last_chunk_by_file() {
        let chunker = Chunker::new(
            ChunkStrategy::Lines {
                chunk_size: 4,
                overlap: 0,
            },
            2,
        );
        let a = chunker.chunk_file(Path::new("/d/f"), b"one\ntwo\nthree\nfour");
        let b = chunker.chunk_file(Path::new("/d/f"), b"one\ntwo\nthree\nFIVE");

        assert_eq!(a.len(), 2);
        assert_eq!(a[0].fingerprint, b[0].fingerprint);
        assert_ne!(a[1].fingerprint, b[1].fingerprint);
        assert_eq!(a[1].text, b[1].text);
    }

    #[test]
    fn test_directory_chunks_follow_path_order() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "bee").unwrap();
        std::fs::write(dir.path().join("a.txt"), "ay").unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "see").unwrap();

        let config = Config::new(dir.path().join("cache"));
        let chunker = Chunker::from_config(&config);
        let target = Indexable::from(Directory::open(dir.path()).unwrap());
        let texts: Vec<String> = chunker
            .chunks(&target, &config)
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();

        assert_eq!(texts, vec!["ay", "bee", "see"]);
    }
}
