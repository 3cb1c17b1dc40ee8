use std::io::Read;

use crate::error::{StoreError, StoreResult};
use crate::path::StoragePath;
use crate::resource::{Binary, BinaryInfo, CloseableIter, Resource};

/// Storage gateway: binary payloads and directories addressed by path.
///
/// All implementations must satisfy these invariants:
/// - Payloads are binary-safe and streamed in both directions.
/// - Writing a binary implicitly creates its parent directories.
/// - Listings are lazy and must be closed (or dropped) to release the
///   backend resource they hold.
/// - All I/O errors are propagated, never silently ignored.
/// - The gateway never interprets payload contents.
pub trait StorageService: Send + Sync {
    /// Store a payload at `path`, replacing any binary already there.
    ///
    /// Fails with `AlreadyExists` if `path` is a directory.
    fn put_payload(&self, path: &StoragePath, payload: &mut dyn Read) -> StoreResult<BinaryInfo>;

    /// Open the binary at `path` for reading.
    fn get_payload(&self, path: &StoragePath) -> StoreResult<Binary>;

    /// Describe the resource at `path` without opening it.
    fn stat(&self, path: &StoragePath) -> StoreResult<Resource>;

    /// List the resources under a directory.
    ///
    /// With `recursive == false` only direct children are yielded.
    fn list_under(
        &self,
        container: &StoragePath,
        recursive: bool,
    ) -> StoreResult<CloseableIter<Resource>>;

    /// Delete a binary, or a directory with everything below it.
    fn delete(&self, path: &StoragePath) -> StoreResult<()>;

    /// Create a directory (and its parents). Idempotent for directories.
    fn create_directory(&self, path: &StoragePath) -> StoreResult<()>;

    /// Check whether anything exists at `path`.
    fn exists(&self, path: &StoragePath) -> StoreResult<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Convenience wrapper over [`put_payload`](Self::put_payload) for in-memory bytes.
    fn put_bytes(&self, path: &StoragePath, bytes: &[u8]) -> StoreResult<BinaryInfo> {
        let mut reader = bytes;
        self.put_payload(path, &mut reader)
    }

    /// Read a whole binary into memory.
    fn get_bytes(&self, path: &StoragePath) -> StoreResult<Vec<u8>> {
        Ok(self.get_payload(path)?.into_bytes()?)
    }
}
