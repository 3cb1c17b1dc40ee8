//! Model service for the Arca preservation repository.
//!
//! [`ModelService`] is the only writer of canonical object state. It applies
//! every mutation through the storage gateway and then emits a
//! [`ModelEvent`] to each registered [`ModelObserver`]. Reads go through the
//! cloneable [`ModelReader`].
//!
//! # Key Types
//!
//! - [`ModelService`] -- mutations plus observer fan-out
//! - [`ModelReader`] -- read-only view used by observers and plugins
//! - [`ModelEvent`] -- closed set of lifecycle events
//! - [`ModelObserver`] -- one callback per event kind, no-op by default
//! - [`ModelError`] -- failure taxonomy of the service

pub mod error;
pub mod event;
pub mod layout;
pub mod observer;
pub mod reader;
pub mod service;

pub use error::{ModelError, ModelResult};
pub use event::ModelEvent;
pub use observer::{ModelObserver, ObserverError, ObserverResult};
pub use reader::ModelReader;
pub use service::{ModelService, NewPackage};
