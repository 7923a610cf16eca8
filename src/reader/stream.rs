//! Chunked buffered input over a [`StreamSource`].
//!
//! The block reader consumes a file front to back. Rather than issuing one
//! range request per varint, the stream fetches `chunk_size` bytes at a time
//! and hands them out through a `next`/`backup` interface: `next` yields the
//! unread part of the current chunk, `backup` returns the unused tail of it.

use bytes::Bytes;

use crate::error::{ReaderError, SourceError};
use crate::reader::varint::{zigzag_to_signed, MAX_VARINT_LEN};
use crate::source::StreamSource;

const MAX_PREALLOC: usize = 16 * 1024 * 1024;

pub struct ChunkedStream<S: StreamSource> {
    source: S,
    chunk_size: usize,
    /// File offset of the byte after the current chunk
    fetch_offset: u64,
    chunk: Bytes,
    /// Read position within `chunk`
    cursor: usize,
}

impl<S: StreamSource> ChunkedStream<S> {
    pub fn new(source: S, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            fetch_offset: 0,
            chunk: Bytes::new(),
            cursor: 0,
        }
    }

    /// Total bytes consumed so far, i.e. the file offset of the next byte.
    pub fn byte_count(&self) -> u64 {
        self.fetch_offset - (self.chunk.len() - self.cursor) as u64
    }

    /// Hand out the rest of the current chunk, fetching a new one if it is
    /// exhausted. Returns `None` at end of file.
    pub async fn next(&mut self) -> Result<Option<Bytes>, SourceError> {
        if self.cursor == self.chunk.len() && !self.fill().await? {
            return Ok(None);
        }
        let out = self.chunk.slice(self.cursor..);
        self.cursor = self.chunk.len();
        Ok(Some(out))
    }

    /// Give back the last `count` bytes returned by [`next`](Self::next).
    pub fn backup(&mut self, count: usize) {
        self.cursor -= count.min(self.cursor);
    }

    /// Skip `count` bytes. Returns false if the file ends first.
    pub async fn skip(&mut self, mut count: usize) -> Result<bool, SourceError> {
        while count > 0 {
            let available = self.chunk.len() - self.cursor;
            if available == 0 {
                if !self.fill().await? {
                    return Ok(false);
                }
                continue;
            }
            let step = available.min(count);
            self.cursor += step;
            count -= step;
        }
        Ok(true)
    }

    /// Whether no bytes remain.
    pub async fn at_eof(&mut self) -> Result<bool, SourceError> {
        Ok(self.cursor == self.chunk.len() && !self.fill().await?)
    }

    async fn fill(&mut self) -> Result<bool, SourceError> {
        let chunk = self
            .source
            .read_range(self.fetch_offset, self.chunk_size)
            .await?;
        if chunk.is_empty() {
            return Ok(false);
        }
        self.fetch_offset += chunk.len() as u64;
        self.chunk = chunk;
        self.cursor = 0;
        Ok(true)
    }

    /// Read exactly `len` bytes. End of file yields [`ReaderError::OutOfRange`].
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, ReaderError> {
        // A corrupt length must not turn into a huge up-front allocation.
        let mut out = Vec::with_capacity(len.min(MAX_PREALLOC));
        while out.len() < len {
            let chunk = self.next().await?.ok_or(ReaderError::OutOfRange)?;
            let wanted = (len - out.len()).min(chunk.len());
            out.extend_from_slice(&chunk[..wanted]);
            self.backup(chunk.len() - wanted);
        }
        Ok(out)
    }

    /// Read a fixed-size array such as a magic or sync marker.
    pub async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ReaderError> {
        let bytes = self.read_exact(N).await?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub async fn read_byte(&mut self) -> Result<u8, ReaderError> {
        let chunk = self.next().await?.ok_or(ReaderError::OutOfRange)?;
        self.backup(chunk.len() - 1);
        Ok(chunk[0])
    }

    /// Read a zigzag varint `long`.
    pub async fn read_long(&mut self) -> Result<i64, ReaderError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_byte().await?;
            value |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(zigzag_to_signed(value));
            }
        }
        Err(ReaderError::Parse {
            offset: self.byte_count(),
            message: "Invalid varint encoding".to_string(),
        })
    }

    /// Read a length-prefixed byte string.
    pub async fn read_bytes(&mut self) -> Result<Vec<u8>, ReaderError> {
        let offset = self.byte_count();
        let len = self.read_long().await?;
        let len = usize::try_from(len).map_err(|_| ReaderError::Parse {
            offset,
            message: format!("Negative bytes length: {}", len),
        })?;
        self.read_exact(len).await
    }
}
