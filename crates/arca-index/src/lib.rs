//! Index synchronizer for the Arca preservation repository.
//!
//! The index is a derived, query-optimized projection of canonical storage.
//! It is kept current by an observer registered with the model service and
//! can always be rebuilt from storage alone.
//!
//! # Key Types
//!
//! - [`IndexService`] -- queries, lineage lookups, rebuild and maintenance
//! - [`IndexModelObserver`] -- applies model events to the index inline
//! - [`QueuedObserver`] -- runs any observer on a background worker
//! - [`IndexBackend`] -- the engine seam; [`InMemoryIndex`] implements it
//! - [`Query`] -- filter, sort, paging and facets

pub mod backend;
pub mod document;
pub mod error;
pub mod memory;
pub mod observer;
pub mod projection;
pub mod query;
pub mod queued;
pub mod service;

pub use backend::IndexBackend;
pub use document::{fields, DocType, IndexDocument};
pub use error::{IndexError, IndexResult};
pub use memory::InMemoryIndex;
pub use observer::IndexModelObserver;
pub use projection::{Lineage, Projector};
pub use query::{
    FacetCounts, Facets, Filter, FilterParameter, IndexPage, Query, SortParameter, Sorter, Sublist,
};
pub use queued::QueuedObserver;
pub use service::{IndexConfig, IndexService, RebuildSummary};
