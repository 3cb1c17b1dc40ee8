use arca_store::StoreError;
use arca_types::{ErrorKind, TypeError};

/// Errors surfaced by the model service.
///
/// Validation and storage errors pass through unchanged so callers can
/// inspect the original cause.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    RequestInvalid(String),

    /// Reported by an external authorization layer; never raised here.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::RequestInvalid(_) => ErrorKind::RequestInvalid,
            Self::AuthorizationDenied(_) => ErrorKind::AuthorizationDenied,
            Self::Storage(e) => e.kind(),
            Self::Type(e) => e.kind(),
            Self::Serialization(_) => ErrorKind::GenericStorage,
        }
    }

    pub(crate) fn not_found_or(what: impl FnOnce() -> String) -> impl FnOnce(StoreError) -> Self {
        move |e| match e {
            StoreError::NotFound(_) => Self::NotFound(what()),
            other => Self::Storage(other),
        }
    }
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
