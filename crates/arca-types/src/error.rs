use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by every public operation of the repository core.
///
/// Each crate keeps its own error enum; all of them map onto one of these
/// kinds through a `kind()` method so callers can react uniformly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The addressed object does not exist.
    NotFound,
    /// An object with the same id already exists in its scope.
    AlreadyExists,
    /// Malformed id, path, or parameters.
    RequestInvalid,
    /// Propagated from the caller context; never decided by the core.
    AuthorizationDenied,
    /// I/O or backend fault in storage or index.
    GenericStorage,
    /// External tool failed to spawn, exited non-zero, or timed out.
    Command,
    /// Malformed ingest package.
    Migration,
}

impl ErrorKind {
    /// Expected domain outcomes are handled by callers; everything else is a
    /// fault and is logged at a higher severity.
    pub fn is_expected(self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::AlreadyExists | Self::RequestInvalid | Self::AuthorizationDenied
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::RequestInvalid => "RequestInvalid",
            Self::AuthorizationDenied => "AuthorizationDenied",
            Self::GenericStorage => "GenericStorageError",
            Self::Command => "CommandError",
            Self::Migration => "MigrationError",
        };
        write!(f, "{s}")
    }
}

/// Errors produced by object-model validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("path escapes the representation root: {0}")]
    PathTraversal(String),

    #[error("parent link {child} -> {parent} would close a cycle")]
    Cycle { child: String, parent: String },

    #[error("duplicate {scope} id: {id}")]
    Duplicate { scope: &'static str, id: String },

    #[error("report for job {0} is sealed")]
    ReportSealed(String),

    #[error("unknown outcome code: {0}")]
    UnknownOutcome(u8),
}

impl TypeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Duplicate { .. } => ErrorKind::AlreadyExists,
            _ => ErrorKind::RequestInvalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_kinds() {
        assert!(ErrorKind::NotFound.is_expected());
        assert!(ErrorKind::AuthorizationDenied.is_expected());
        assert!(!ErrorKind::GenericStorage.is_expected());
        assert!(!ErrorKind::Command.is_expected());
        assert!(!ErrorKind::Migration.is_expected());
    }

    #[test]
    fn duplicate_maps_to_already_exists() {
        let err = TypeError::Duplicate {
            scope: "representation",
            id: "r1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(TypeError::PathTraversal("..".into()).kind(), ErrorKind::RequestInvalid);
    }
}
