//! Local filesystem source implementation

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

use super::traits::{BoxedSource, SourceProvider, StreamSource};
use crate::error::SourceError;

/// A file on local disk, read with tokio's async file I/O.
pub struct LocalSource {
    /// Seek and read must not interleave between callers
    file: Mutex<File>,
    path: PathBuf,
    /// Cached at open time
    file_size: u64,
}

impl LocalSource {
    /// Open a local file for reading.
    ///
    /// # Errors
    /// - `SourceError::NotFound` if the file doesn't exist
    /// - `SourceError::PermissionDenied` if access is denied
    /// - `SourceError::FileSystemError` for other I/O errors
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                SourceError::PermissionDenied(path.display().to_string())
            }
            _ => SourceError::FileSystemError(format!("{}: {}", path.display(), e)),
        })?;

        let file_size = file
            .metadata()
            .await
            .map_err(|e| {
                SourceError::FileSystemError(format!(
                    "Failed to get metadata for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            path,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StreamSource for LocalSource {
    async fn read_range(&self, offset: u64, length: usize) -> Result<Bytes, SourceError> {
        if offset >= self.file_size || length == 0 {
            return Ok(Bytes::new());
        }

        let actual_length = length.min((self.file_size - offset) as usize);
        let mut file = self.file.lock().await;

        file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
            SourceError::FileSystemError(format!(
                "Failed to seek to offset {} in {}: {}",
                offset,
                self.path.display(),
                e
            ))
        })?;

        let mut buffer = vec![0u8; actual_length];
        file.read_exact(&mut buffer).await.map_err(|e| {
            SourceError::FileSystemError(format!(
                "Failed to read {} bytes at offset {} from {}: {}",
                actual_length,
                offset,
                self.path.display(),
                e
            ))
        })?;

        Ok(Bytes::from(buffer))
    }

    async fn size(&self) -> Result<u64, SourceError> {
        Ok(self.file_size)
    }
}

impl std::fmt::Debug for LocalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSource")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .finish()
    }
}

/// Opens dataset file names as paths on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl SourceProvider for LocalFileSystem {
    async fn open(&self, path: &str) -> Result<BoxedSource, SourceError> {
        Ok(Box::new(LocalSource::open(path).await?))
    }
}
