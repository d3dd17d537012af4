use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Document has no extractable text: {0}")]
    EmptyDocument(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Position {position} out of range for index of {count} vectors")]
    OutOfRange { position: usize, count: usize },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to persist vector store: {0}")]
    Persist(String),

    #[error("Vector store integrity error: {0}")]
    Integrity(String),

    #[error("Document already exists: {0}")]
    DuplicateDocument(String),

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Stable, machine-readable classification of a [`RagError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfiguration,
    EmptyDocument,
    EmbeddingFailure,
    DimensionMismatch,
    OutOfRange,
    NotFound,
    PersistFailure,
    Integrity,
    DuplicateDocument,
    UnsupportedFormat,
    CompletionFailure,
    Io,
    Other,
}

impl RagError {
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::EmptyDocument(_) => ErrorKind::EmptyDocument,
            Self::Embedding(_) => ErrorKind::EmbeddingFailure,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Persist(_) => ErrorKind::PersistFailure,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::DuplicateDocument(_) => ErrorKind::DuplicateDocument,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Completion(_) => ErrorKind::CompletionFailure,
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}

impl ErrorKind {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "invalid_configuration",
            Self::EmptyDocument => "empty_document",
            Self::EmbeddingFailure => "embedding_failure",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::OutOfRange => "out_of_range",
            Self::NotFound => "not_found",
            Self::PersistFailure => "persist_failure",
            Self::Integrity => "integrity",
            Self::DuplicateDocument => "duplicate_document",
            Self::UnsupportedFormat => "unsupported_format",
            Self::CompletionFailure => "completion_failure",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod commands;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod engine;
pub mod qa;
pub mod store;
