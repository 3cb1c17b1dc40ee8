//! Repository context for the Arca preservation repository.
//!
//! Wires storage, the model service, the index and the plugin runner into a
//! single [`Repository`] value built from a [`RepositoryConfig`].
//!
//! # Key Types
//!
//! - [`Repository`] -- the wired-up context; ingest, convert, rebuild
//! - [`RepositoryConfig`] -- TOML-backed settings with defaults
//! - [`CoreError`] -- errors from any layer, classified by kind

pub mod config;
pub mod error;
pub mod logging;
pub mod repository;

pub use config::{ConversionConfig, RepositoryConfig};
pub use error::{ConfigError, CoreError, CoreResult};
pub use logging::init_logging;
pub use repository::Repository;
