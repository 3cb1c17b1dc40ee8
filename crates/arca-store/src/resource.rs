use std::fmt;
use std::io::Read;

use crate::error::StoreError;
use crate::path::StoragePath;

/// Streaming payload handed to and returned by the gateway.
pub type ContentStream = Box<dyn Read + Send>;

/// Descriptor of a stored binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryInfo {
    pub path: StoragePath,
    pub size: u64,
    /// Hex BLAKE3 digest of the payload.
    pub digest: String,
}

/// A binary plus an open stream over its content.
pub struct Binary {
    pub info: BinaryInfo,
    pub content: ContentStream,
}

impl Binary {
    /// Drain the stream into memory.
    pub fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.info.size as usize);
        self.content.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binary").field("info", &self.info).finish()
    }
}

/// Entry yielded by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Binary(BinaryInfo),
    Directory(StoragePath),
}

impl Resource {
    pub fn path(&self) -> &StoragePath {
        match self {
            Self::Binary(info) => &info.path,
            Self::Directory(path) => path,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }
}

type BoxedIter<T, E> = Box<dyn Iterator<Item = Result<T, E>> + Send>;
type Release = Box<dyn FnOnce() + Send>;

/// Lazy sequence over a backend resource that must be released.
///
/// Release happens exactly once: on [`close`](Self::close), or on drop if the
/// caller never closed it. After release the iterator yields nothing.
pub struct CloseableIter<T, E = StoreError> {
    inner: Option<BoxedIter<T, E>>,
    release: Option<Release>,
}

impl<T, E> CloseableIter<T, E> {
    pub fn new<I>(inner: I) -> Self
    where
        I: Iterator<Item = Result<T, E>> + Send + 'static,
    {
        Self {
            inner: Some(Box::new(inner)),
            release: None,
        }
    }

    pub fn empty() -> Self
    where
        T: 'static,
        E: 'static,
    {
        Self {
            inner: Some(Box::new(std::iter::empty())),
            release: None,
        }
    }

    /// Register the action that frees the underlying resource.
    pub fn on_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn close(&mut self) {
        self.inner = None;
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Transform and filter items while keeping the release action attached.
    pub fn filter_map_items<U, E2, F>(mut self, mut f: F) -> CloseableIter<U, E2>
    where
        T: 'static,
        E: 'static,
        U: 'static,
        E2: 'static,
        F: FnMut(Result<T, E>) -> Option<Result<U, E2>> + Send + 'static,
    {
        let inner = self.inner.take();
        let release = self.release.take();
        CloseableIter {
            inner: inner.map(|it| Box::new(it.filter_map(move |item| f(item))) as BoxedIter<U, E2>),
            release,
        }
    }
}

impl<T, E> Iterator for CloseableIter<T, E> {
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.as_mut()?.next()
    }
}

impl<T, E> Drop for CloseableIter<T, E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T, E> fmt::Debug for CloseableIter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseableIter")
            .field("closed", &self.is_closed())
            .finish()
    }
}
