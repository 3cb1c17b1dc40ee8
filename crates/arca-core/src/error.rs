//! Error types for the repository context.

use std::path::PathBuf;

use arca_index::IndexError;
use arca_model::ModelError;
use arca_plugins::PluginError;
use arca_types::ErrorKind;

/// Failure to load repository configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors surfaced by [`Repository`](crate::Repository) operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// No tool with this name is configured and no preset exists.
    #[error("unknown conversion tool: {0}")]
    UnknownTool(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::UnknownTool(_) => ErrorKind::RequestInvalid,
            Self::Model(e) => e.kind(),
            Self::Index(e) => e.kind(),
            Self::Plugin(e) => e.kind(),
        }
    }
}

/// Convenience alias for repository results.
pub type CoreResult<T> = Result<T, CoreError>;
