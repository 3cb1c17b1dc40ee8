//! Error types for the plugin crate.

use std::io;

use arca_model::ModelError;
use arca_types::{ErrorKind, TypeError};

/// Failure of an external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command line is empty")]
    EmptyCommandLine,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },

    #[error("`{command}` produced no output")]
    EmptyOutput { command: String },

    #[error("tool I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by plugins and the job runner.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A parameter value is missing, of the wrong type, or not allowed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// An ingest container could not be understood.
    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_) => ErrorKind::RequestInvalid,
            Self::Command(_) => ErrorKind::Command,
            Self::Migration(_) => ErrorKind::Migration,
            Self::Model(e) => e.kind(),
            Self::Type(e) => e.kind(),
            Self::Io(_) => ErrorKind::GenericStorage,
        }
    }
}

/// Convenience alias for plugin results.
pub type PluginResult<T> = Result<T, PluginError>;
