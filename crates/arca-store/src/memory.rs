use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::path::StoragePath;
use crate::resource::{Binary, BinaryInfo, CloseableIter, Resource};
use crate::traits::StorageService;

#[derive(Clone)]
enum Entry {
    Binary { data: Arc<Vec<u8>>, digest: String },
    Directory,
}

/// In-memory, `BTreeMap`-based storage gateway.
///
/// Intended for tests and embedding. Payload bytes are shared behind `Arc`
/// so reads do not copy. Open listings are counted so callers can assert
/// that every listing was released.
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<StoragePath, Entry>>,
    open_listings: Arc<AtomicUsize>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            open_listings: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of listings handed out and not yet released.
    pub fn open_listings(&self) -> usize {
        self.open_listings.load(Ordering::SeqCst)
    }

    /// Number of binaries currently stored.
    pub fn binary_count(&self) -> usize {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|e| matches!(e, Entry::Binary { .. }))
            .count()
    }

    /// Total bytes across all stored binaries.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .map(|e| match e {
                Entry::Binary { data, .. } => data.len() as u64,
                Entry::Directory => 0,
            })
            .sum()
    }

    fn ensure_parents(map: &mut BTreeMap<StoragePath, Entry>, path: &StoragePath) -> StoreResult<()> {
        let mut parent = path.parent();
        while let Some(dir) = parent {
            match map.get(&dir) {
                Some(Entry::Directory) => break,
                Some(Entry::Binary { .. }) => {
                    return Err(StoreError::AlreadyExists(format!("{dir} is a binary")));
                }
                None => {
                    parent = dir.parent();
                    map.insert(dir, Entry::Directory);
                }
            }
        }
        Ok(())
    }

    fn describe(path: &StoragePath, entry: &Entry) -> Resource {
        match entry {
            Entry::Binary { data, digest } => Resource::Binary(BinaryInfo {
                path: path.clone(),
                size: data.len() as u64,
                digest: digest.clone(),
            }),
            Entry::Directory => Resource::Directory(path.clone()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageService for InMemoryStorage {
    fn put_payload(&self, path: &StoragePath, payload: &mut dyn Read) -> StoreResult<BinaryInfo> {
        let mut data = Vec::new();
        payload.read_to_end(&mut data)?;
        let digest = hex::encode(blake3::hash(&data).as_bytes());
        let size = data.len() as u64;

        let mut map = self.entries.write().expect("lock poisoned");
        if let Some(Entry::Directory) = map.get(path) {
            return Err(StoreError::AlreadyExists(format!("{path} is a directory")));
        }
        Self::ensure_parents(&mut map, path)?;
        map.insert(
            path.clone(),
            Entry::Binary {
                data: Arc::new(data),
                digest: digest.clone(),
            },
        );

        Ok(BinaryInfo {
            path: path.clone(),
            size,
            digest,
        })
    }

    fn get_payload(&self, path: &StoragePath) -> StoreResult<Binary> {
        let map = self.entries.read().expect("lock poisoned");
        match map.get(path) {
            Some(Entry::Binary { data, digest }) => Ok(Binary {
                info: BinaryInfo {
                    path: path.clone(),
                    size: data.len() as u64,
                    digest: digest.clone(),
                },
                content: Box::new(Cursor::new(SharedBytes(data.clone()))),
            }),
            Some(Entry::Directory) => Err(StoreError::InvalidPath(format!(
                "{path} is a directory"
            ))),
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }

    fn stat(&self, path: &StoragePath) -> StoreResult<Resource> {
        let map = self.entries.read().expect("lock poisoned");
        map.get(path)
            .map(|entry| Self::describe(path, entry))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn list_under(
        &self,
        container: &StoragePath,
        recursive: bool,
    ) -> StoreResult<CloseableIter<Resource>> {
        let map = self.entries.read().expect("lock poisoned");
        match map.get(container) {
            Some(Entry::Directory) => {}
            Some(Entry::Binary { .. }) => {
                return Err(StoreError::InvalidPath(format!("{container} is not a directory")));
            }
            None => return Err(StoreError::NotFound(container.to_string())),
        }

        let depth = container.depth() + 1;
        let snapshot: Vec<Resource> = map
            .range(container.clone()..)
            .skip(1)
            .take_while(|(path, _)| path.is_under(container))
            .filter(|(path, _)| recursive || path.depth() == depth)
            .map(|(path, entry)| Self::describe(path, entry))
            .collect();
        drop(map);

        let counter = self.open_listings.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(CloseableIter::new(snapshot.into_iter().map(Ok)).on_release(move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    fn delete(&self, path: &StoragePath) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        if map.remove(path).is_none() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        map.retain(|p, _| !p.is_under(path));
        Ok(())
    }

    fn create_directory(&self, path: &StoragePath) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        match map.get(path) {
            Some(Entry::Directory) => Ok(()),
            Some(Entry::Binary { .. }) => Err(StoreError::AlreadyExists(path.to_string())),
            None => {
                Self::ensure_parents(&mut map, path)?;
                map.insert(path.clone(), Entry::Directory);
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("binary_count", &self.binary_count())
            .field("open_listings", &self.open_listings())
            .finish()
    }
}

/// Shared payload bytes readable through a `Cursor`.
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> StoragePath {
        StoragePath::parse(s).unwrap()
    }

    #[test]
    fn put_and_get_roundtrip() {
        let store = InMemoryStorage::new();
        let info = store.put_bytes(&path("aip/p1/data/a.jpg"), b"\x00\xffjpeg").unwrap();
        assert_eq!(info.size, 6);
        assert_eq!(info.digest.len(), 64);

        let bytes = store.get_bytes(&path("aip/p1/data/a.jpg")).unwrap();
        assert_eq!(bytes, b"\x00\xffjpeg");
        assert!(store.stat(&path("aip/p1/data")).unwrap().is_directory());
    }

    #[test]
    fn missing_binary_is_not_found() {
        let store = InMemoryStorage::new();
        let err = store.get_payload(&path("aip/none")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!store.exists(&path("aip/none")).unwrap());
    }

    #[test]
    fn put_over_directory_fails() {
        let store = InMemoryStorage::new();
        store.create_directory(&path("aip/p1")).unwrap();
        let err = store.put_bytes(&path("aip/p1"), b"x").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn listing_direct_and_recursive() {
        let store = InMemoryStorage::new();
        store.put_bytes(&path("aip/p1/a.txt"), b"a").unwrap();
        store.put_bytes(&path("aip/p1/sub/b.txt"), b"b").unwrap();
        store.put_bytes(&path("aip/p10/c.txt"), b"c").unwrap();

        let direct: Vec<_> = store
            .list_under(&path("aip/p1"), false)
            .unwrap()
            .map(|r| r.unwrap().path().to_string())
            .collect();
        assert_eq!(direct, vec!["aip/p1/a.txt", "aip/p1/sub"]);

        let all: Vec<_> = store
            .list_under(&path("aip/p1"), true)
            .unwrap()
            .map(|r| r.unwrap().path().to_string())
            .collect();
        assert_eq!(all, vec!["aip/p1/a.txt", "aip/p1/sub", "aip/p1/sub/b.txt"]);
        assert_eq!(store.open_listings(), 0);
    }

    #[test]
    fn open_listing_is_counted_until_dropped() {
        let store = InMemoryStorage::new();
        store.create_directory(&path("aip")).unwrap();
        let listing = store.list_under(&path("aip"), true).unwrap();
        assert_eq!(store.open_listings(), 1);
        drop(listing);
        assert_eq!(store.open_listings(), 0);
    }

    #[test]
    fn delete_directory_is_recursive() {
        let store = InMemoryStorage::new();
        store.put_bytes(&path("aip/p1/a.txt"), b"a").unwrap();
        store.put_bytes(&path("aip/p1/sub/b.txt"), b"b").unwrap();
        store.delete(&path("aip/p1")).unwrap();
        assert!(!store.exists(&path("aip/p1/sub/b.txt")).unwrap());
        assert_eq!(store.binary_count(), 0);
        assert!(matches!(
            store.delete(&path("aip/p1")),
            Err(StoreError::NotFound(_))
        ));
    }
}
