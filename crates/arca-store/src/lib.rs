//! Storage gateway for the Arca preservation repository.
//!
//! The gateway is the only thing that touches bytes. It stores binary
//! payloads and directories under hierarchical [`StoragePath`]s and hands out
//! lazy, closable listings. Physical drivers live outside this workspace;
//! [`InMemoryStorage`] backs tests and embedding.
//!
//! # Design Rules
//!
//! 1. Payloads are streamed and binary-safe; the gateway never interprets them.
//! 2. Every binary carries a BLAKE3 fixity digest computed on write.
//! 3. Listings hold a backend resource until closed or dropped.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod path;
pub mod resource;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStorage;
pub use path::StoragePath;
pub use resource::{Binary, BinaryInfo, CloseableIter, ContentStream, Resource};
pub use traits::StorageService;
