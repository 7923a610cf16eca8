//! Avro data blocks
//!
//! Each block in a container file is framed as:
//! - object count (long)
//! - payload size in bytes (long)
//! - payload, compressed with the file codec
//! - 16-byte sync marker equal to the header's
//!
//! [`BlockReader`] yields blocks with their payload still compressed. The
//! payload is decompressed lazily by [`AvroBlock::decompress`], on the decode
//! worker that first touches the block.

use tracing::debug;

use crate::codec::Codec;
use crate::error::{CodecError, ReaderError};
use crate::reader::header::{AvroHeader, SYNC_SIZE};
use crate::reader::stream::ChunkedStream;
use crate::source::StreamSource;

/// One block of records and its decode progress.
///
/// `num_decoded + num_to_decode <= object_count` always holds: records are
/// claimed for a batch by the shuffle handler (`num_to_decode`) and then moved
/// to `num_decoded` by a decode worker.
#[derive(Debug, Clone, Default)]
pub struct AvroBlock {
    /// Records in this block
    pub object_count: usize,
    /// Records claimed for the batch being built
    pub num_to_decode: usize,
    /// Records already decoded in earlier batches
    pub num_decoded: usize,
    /// Length of `content`
    pub byte_count: usize,
    /// Running total of `num_to_decode` over this and all earlier blocks of
    /// the current batch
    pub counts: usize,
    pub content: Vec<u8>,
    pub codec: Codec,
    /// Position in the decompressed content of the first undecoded record
    pub read_offset: usize,
}

impl AvroBlock {
    pub fn new(object_count: usize, content: Vec<u8>, codec: Codec) -> Self {
        Self {
            object_count,
            byte_count: content.len(),
            content,
            codec,
            ..Default::default()
        }
    }

    /// Records not yet decoded.
    pub fn remaining(&self) -> usize {
        self.object_count - self.num_decoded
    }

    /// Records neither decoded nor claimed.
    pub fn unclaimed(&self) -> usize {
        self.object_count - self.num_decoded - self.num_to_decode
    }

    pub fn is_exhausted(&self) -> bool {
        self.num_decoded >= self.object_count
    }

    /// Decompress the payload in place if needed and return the undecoded
    /// tail starting at `read_offset`.
    ///
    /// After the first call the block holds plain bytes with codec `Null`, so
    /// a block decoded across several batches is decompressed only once.
    pub fn decompress(&mut self) -> Result<&[u8], CodecError> {
        if self.codec != Codec::Null {
            self.content = self.codec.decompress(&self.content)?;
            self.byte_count = self.content.len();
            self.codec = Codec::Null;
        }
        self.remaining_content()
    }

    /// Undecoded tail of already decompressed content.
    pub fn remaining_content(&self) -> Result<&[u8], CodecError> {
        self.content.get(self.read_offset..).ok_or_else(|| {
            CodecError::DecompressionError(format!(
                "Read offset {} is past the end of a {} byte block",
                self.read_offset, self.byte_count
            ))
        })
    }
}

/// Reads blocks sequentially from one container file.
pub struct BlockReader<S: StreamSource> {
    stream: ChunkedStream<S>,
    header: AvroHeader,
    block_index: usize,
}

impl<S: StreamSource> BlockReader<S> {
    /// Open a file and parse its header. `buffer_size` is the size of each
    /// range request made against the source.
    pub async fn open(source: S, buffer_size: usize) -> Result<Self, ReaderError> {
        let mut stream = ChunkedStream::new(source, buffer_size);
        let header = AvroHeader::read(&mut stream).await?;
        Ok(Self {
            stream,
            header,
            block_index: 0,
        })
    }

    pub fn header(&self) -> &AvroHeader {
        &self.header
    }

    /// Offset of the next unread byte.
    pub fn current_offset(&self) -> u64 {
        self.stream.byte_count()
    }

    /// Read the next block.
    ///
    /// # Errors
    /// - `ReaderError::OutOfRange` at end of file, including a block cut
    ///   short anywhere before its sync marker
    /// - `ReaderError::SyncMarkerMismatch` if the trailing marker is wrong
    /// - `ReaderError::Parse` for negative counts or sizes
    pub async fn read_block(&mut self) -> Result<AvroBlock, ReaderError> {
        let block_offset = self.stream.byte_count();

        let object_count = self.read_len("object count", block_offset).await?;
        let byte_count = self.read_len("byte count", block_offset).await?;
        let content = self.stream.read_exact(byte_count).await?;

        let sync: [u8; SYNC_SIZE] = self.stream.read_array().await?;
        if sync != self.header.sync_marker {
            return Err(ReaderError::SyncMarkerMismatch {
                block_index: self.block_index,
                offset: self.stream.byte_count() - SYNC_SIZE as u64,
            });
        }

        debug!(
            block_index = self.block_index,
            offset = block_offset,
            object_count,
            byte_count,
            "Read block"
        );
        self.block_index += 1;

        Ok(AvroBlock::new(object_count, content, self.header.codec))
    }

    async fn read_len(&mut self, what: &str, block_offset: u64) -> Result<usize, ReaderError> {
        let value = self.stream.read_long().await?;
        usize::try_from(value).map_err(|_| ReaderError::Parse {
            offset: block_offset,
            message: format!("Invalid negative block {}: {}", what, value),
        })
    }
}
