//! Error taxonomy for the answering pipeline.
//!
//! Library modules return [`Result<T>`]; the CLI and server wrap these in
//! `anyhow` or HTTP error bodies at the edges. Every variant names the file
//! or operation that failed so the message can be shown to the user as-is.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by extraction, embedding, indexing, and answering.
#[derive(Debug, Error)]
pub enum DocQaError {
    /// A PDF could not be read or parsed. Ingestion skips the file.
    #[error("failed to extract text from {path}: {message}")]
    DocumentExtraction { path: PathBuf, message: String },

    /// The embedding service failed, timed out, or returned malformed vectors.
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// The language model failed or timed out. No partial answer exists.
    #[error("language model error: {0}")]
    LanguageModel(String),

    /// No index has been written at this location yet.
    #[error("no index found at {0}")]
    IndexNotFound(PathBuf),

    /// An index file exists but cannot be trusted.
    #[error("index at {path} is corrupt: {message}")]
    IndexCorrupt { path: PathBuf, message: String },

    /// Two indexes (or an index and a provider) disagree on the embedding space.
    #[error("embedding model mismatch: index uses {expected}, got {found}")]
    EmbeddingModelMismatch { expected: String, found: String },

    /// Another writer holds the index lock.
    #[error("index at {0} is locked by another writer")]
    ConcurrentWriteConflict(PathBuf),

    /// Invalid configuration or provider setup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DocQaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocQaError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DocQaError::EmbeddingService(_)
                | DocQaError::LanguageModel(_)
                | DocQaError::ConcurrentWriteConflict(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DocQaError>;
