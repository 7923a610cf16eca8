//! Source abstractions
//!
//! A [`StreamSource`] is an open file that can serve byte ranges; a
//! [`SourceProvider`] turns a file name from the dataset configuration into
//! one.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SourceError;

/// Random-access byte source with async range reads.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Returns fewer bytes than requested only at the end of the source, and
    /// an empty buffer once `offset` is at or past the end.
    async fn read_range(&self, offset: u64, length: usize) -> Result<Bytes, SourceError>;

    /// Total size of the source in bytes.
    async fn size(&self) -> Result<u64, SourceError>;
}

/// A boxed StreamSource for dynamic dispatch
pub type BoxedSource = Box<dyn StreamSource>;

#[async_trait]
impl StreamSource for BoxedSource {
    async fn read_range(&self, offset: u64, length: usize) -> Result<Bytes, SourceError> {
        (**self).read_range(offset, length).await
    }

    async fn size(&self) -> Result<u64, SourceError> {
        (**self).size().await
    }
}

/// Opens the files named in a dataset configuration.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn open(&self, path: &str) -> Result<BoxedSource, SourceError>;
}
