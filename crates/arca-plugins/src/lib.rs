//! Plugin framework for the Arca preservation repository.
//!
//! A plugin processes a batch of items as one job. The [`PluginRunner`]
//! persists the job record and its report as the batch progresses and
//! isolates failures per item, so every input ends up in the report exactly
//! once.
//!
//! # Key Types
//!
//! - [`Plugin`] -- lifecycle hooks plus a typed parameter schema
//! - [`PluginRunner`] -- drives a plugin over a batch as a job
//! - [`ConvertPlugin`] -- derives a representation through a [`ConversionTool`]
//! - [`SipToPackagePlugin`] -- ingests SIP directories as packages
//! - [`PluginError`] -- failure taxonomy, including [`CommandError`]

pub mod convert;
pub mod error;
pub mod ingest;
pub mod parameter;
pub mod plugin;
pub mod runner;

pub use convert::{CommandTool, ConversionTool, ConvertPlugin, ToolConfig};
pub use error::{CommandError, PluginError, PluginResult};
pub use ingest::{sip_to_package, Sip, SipToPackagePlugin};
pub use parameter::{ParameterKind, ParameterValues, PluginParameter};
pub use plugin::{Plugin, PluginContext, PluginInfo, PluginItem, PluginType, TransferredResource};
pub use runner::{JobOutcome, PluginRunner};
