//! Foundation types for the Arca preservation repository.
//!
//! This crate is pure data plus invariants: no I/O happens here. Every other
//! Arca crate depends on `arca-types`.
//!
//! # Key Types
//!
//! - [`Package`] -- root unit of preservation, arranged in a parent forest
//! - [`Representation`] -- one rendering of a package's content
//! - [`File`] -- payload unit addressed by a [`RelativePath`]
//! - [`DescriptiveMetadata`] -- typed descriptive record attached to a package
//! - [`PreservationEvent`] -- immutable provenance record
//! - [`Job`], [`Report`], [`ReportItem`] -- plugin execution accounting
//! - [`ErrorKind`] -- failure taxonomy shared by every crate

pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod metadata;
pub mod package;
pub mod validation;

pub use error::{ErrorKind, TypeError};
pub use event::{EventOutcome, LogEntry, PreservationEvent};
pub use ids::{EventId, JobId, PackageId, RepresentationId};
pub use job::{Job, JobState, PluginState, Report, ReportItem};
pub use metadata::{DescriptiveMetadata, DEFAULT_METADATA_TYPE};
pub use package::{File, Package, PermissionType, Permissions, RelativePath, Representation};
pub use validation::{check_parent_link, AncestorStep, AncestorWalk};
