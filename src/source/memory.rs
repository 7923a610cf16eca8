//! In-memory sources

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{BoxedSource, SourceProvider, StreamSource};
use crate::error::SourceError;

/// A complete file held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl StreamSource for MemorySource {
    async fn read_range(&self, offset: u64, length: usize) -> Result<Bytes, SourceError> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(length).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    async fn size(&self) -> Result<u64, SourceError> {
        Ok(self.data.len() as u64)
    }
}

/// Serves named in-memory files, for tests and for data that is already
/// resident.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    files: Arc<HashMap<String, Bytes>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file under `name`.
    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Arc::make_mut(&mut self.files).insert(name.into(), data.into());
        self
    }
}

#[async_trait]
impl SourceProvider for MemoryProvider {
    async fn open(&self, path: &str) -> Result<BoxedSource, SourceError> {
        let data = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))?;
        Ok(Box::new(MemorySource::new(data)))
    }
}
