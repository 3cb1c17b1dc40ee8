//! Error types for the index crate.

use arca_model::ModelError;
use arca_store::StoreError;
use arca_types::ErrorKind;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// No document with the given type and id is committed.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The query cannot be evaluated.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The index engine rejected or failed an operation.
    #[error("index backend error: {0}")]
    Backend(String),

    /// Reading canonical state failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Reading a persisted record directly from storage failed.
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidQuery(_) => ErrorKind::RequestInvalid,
            Self::Backend(_) | Self::Serialization(_) => ErrorKind::GenericStorage,
            Self::Model(e) => e.kind(),
            Self::Storage(e) => e.kind(),
        }
    }
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
