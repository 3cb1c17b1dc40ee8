use arca_types::ErrorKind;

/// Errors from storage gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Nothing is stored at the given path.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A resource of a conflicting kind already occupies the path.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// The path is malformed or cannot be used for the requested operation.
    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend fault that is not an I/O error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidPath(_) => ErrorKind::RequestInvalid,
            Self::Io(_) | Self::Backend(_) => ErrorKind::GenericStorage,
        }
    }
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
