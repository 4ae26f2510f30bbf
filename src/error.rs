//! Custom error types for intellifs
//!
//! Uses thiserror for ergonomic error definitions with automatic
//! Display and Error trait implementations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Application-specific errors for intellifs
#[derive(Error, Debug)]
pub enum IfsError {
    /// Target is neither a file nor a directory, is ignored, or unreadable
    #[error("{} cannot be indexed: {reason}", path.display())]
    PathNotIndexable { path: PathBuf, reason: String },

    /// No embedding model is configured
    #[error("No embedding model configured. Run `ifs embedder --set <model>` first.")]
    EmbeddingUnavailable,

    /// The embedding backend returned an error or a malformed vector
    #[error("Embedding failed ({model_id}): {message}")]
    EmbeddingFailed { model_id: String, message: String },

    /// The embedding backend did not answer within the configured bound
    #[error("Embedding timed out after {timeout:?} ({model_id})")]
    EmbeddingTimeout { model_id: String, timeout: Duration },

    /// Persisted store failed its integrity check
    #[error("Index at {} is corrupt: {reason}. Run `ifs rebuild` to start over.", path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    /// Vector index operations failed
    #[error("Index error: {0}")]
    Index(String),

    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Scope filter pattern did not compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// File watcher errors
    #[error("Watch error: {0}")]
    Watch(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IfsError {
    pub(crate) fn not_indexable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PathNotIndexable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, IfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_indexable_display() {
        let err = IfsError::not_indexable("/tmp/archive.tar.gz", "ignored extension");
        assert_eq!(
            err.to_string(),
            "/tmp/archive.tar.gz cannot be indexed: ignored extension"
        );
    }

    #[test]
    fn test_timeout_display_carries_model() {
        let err = IfsError::EmbeddingTimeout {
            model_id: "BAAI/bge-small-en-v1.5".to_string(),
            timeout: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("2s"));
        assert!(msg.contains("BAAI/bge-small-en-v1.5"));
    }

    #[test]
    fn test_corrupt_mentions_rebuild() {
        let err = IfsError::corrupt("/cache/records.bin", "checksum mismatch");
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(err.to_string().contains("ifs rebuild"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IfsError = io.into();
        assert!(matches!(err, IfsError::Io(_)));
    }
}
