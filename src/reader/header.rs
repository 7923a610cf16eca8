//! Object container file header
//!
//! An ATDS file starts with the standard Avro header:
//! - Magic bytes (`Obj\x01`)
//! - Metadata map (`avro.schema`, optional `avro.codec`, user entries)
//! - 16-byte sync marker repeated after every block

use std::collections::HashMap;

use crate::codec::Codec;
use crate::error::ReaderError;
use crate::reader::stream::ChunkedStream;
use crate::schema::{parse_schema, AvroSchema};
use crate::source::StreamSource;

/// The Avro magic bytes that identify an Object Container File.
pub const AVRO_MAGIC: [u8; 4] = [b'O', b'b', b'j', 0x01];

/// Length of the sync marker that terminates the header and every block.
pub const SYNC_SIZE: usize = 16;

/// Parsed file header.
#[derive(Debug, Clone)]
pub struct AvroHeader {
    /// Metadata key-value pairs from the header
    pub metadata: HashMap<String, Vec<u8>>,
    pub sync_marker: [u8; SYNC_SIZE],
    /// Writer schema
    pub schema: AvroSchema,
    pub codec: Codec,
    /// Offset where the first block begins
    pub header_size: u64,
}

impl AvroHeader {
    /// Read the header from the front of `stream`.
    ///
    /// # Errors
    /// - `ReaderError::InvalidMagic` if the file does not start with `Obj\x01`
    /// - `ReaderError::MissingSchema` if `avro.schema` is absent
    /// - `ReaderError::Codec` if `avro.codec` names an unknown codec
    /// - `ReaderError::Schema` if the schema JSON cannot be parsed
    /// - `ReaderError::Parse` if the header is truncated or malformed
    pub async fn read<S: StreamSource>(stream: &mut ChunkedStream<S>) -> Result<Self, ReaderError> {
        let magic = stream
            .read_array::<4>()
            .await
            .map_err(|e| truncated(e, 0, "magic"))?;
        if magic != AVRO_MAGIC {
            return Err(ReaderError::InvalidMagic(magic));
        }

        let metadata = Self::read_metadata(stream).await?;

        let schema_bytes = metadata.get("avro.schema").ok_or(ReaderError::MissingSchema)?;
        let codec = match metadata.get("avro.codec") {
            Some(name) => Codec::from_name(&String::from_utf8_lossy(name))?,
            None => Codec::Null,
        };
        let schema_json = std::str::from_utf8(schema_bytes).map_err(|e| ReaderError::Parse {
            offset: 0,
            message: format!("Schema is not valid UTF-8: {}", e),
        })?;
        let schema = parse_schema(schema_json)?;

        let offset = stream.byte_count();
        let sync_marker = stream
            .read_array::<SYNC_SIZE>()
            .await
            .map_err(|e| truncated(e, offset, "sync marker"))?;

        Ok(Self {
            metadata,
            sync_marker,
            schema,
            codec,
            header_size: stream.byte_count(),
        })
    }

    /// The metadata map is a sequence of blocks of (string key, bytes value)
    /// pairs. A negative block count is followed by the block byte size.
    async fn read_metadata<S: StreamSource>(
        stream: &mut ChunkedStream<S>,
    ) -> Result<HashMap<String, Vec<u8>>, ReaderError> {
        let mut metadata = HashMap::new();

        loop {
            let offset = stream.byte_count();
            let count = stream
                .read_long()
                .await
                .map_err(|e| truncated(e, offset, "metadata block count"))?;
            if count == 0 {
                break;
            }
            if count < 0 {
                stream
                    .read_long()
                    .await
                    .map_err(|e| truncated(e, offset, "metadata block size"))?;
            }

            for _ in 0..count.unsigned_abs() {
                let offset = stream.byte_count();
                let key = stream
                    .read_bytes()
                    .await
                    .map_err(|e| truncated(e, offset, "metadata key"))?;
                let value = stream
                    .read_bytes()
                    .await
                    .map_err(|e| truncated(e, offset, "metadata value"))?;
                metadata.insert(String::from_utf8_lossy(&key).into_owned(), value);
            }
        }

        Ok(metadata)
    }

    /// Get a metadata value as a string.
    pub fn get_metadata_string(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// A header cut short is malformed, not a clean end of file.
fn truncated(err: ReaderError, offset: u64, what: &str) -> ReaderError {
    if err.is_out_of_range() {
        ReaderError::Parse {
            offset,
            message: format!("Unexpected end of file while reading {}", what),
        }
    } else {
        err
    }
}
