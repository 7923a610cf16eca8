//! Block compression codecs
//!
//! ATDS files are ordinary Avro object container files, so a block payload is
//! compressed with the codec named by the `avro.codec` header entry. Only the
//! codecs the ATDS writer emits are understood here.

use crate::error::CodecError;

#[cfg(feature = "snappy")]
use snap::raw::Decoder as SnappyDecoder;

#[cfg(feature = "deflate")]
use flate2::read::DeflateDecoder;

#[cfg(feature = "deflate")]
use std::io::Read;

/// Compression codec of the blocks in one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Payload stored as is
    #[default]
    Null,
    /// Raw DEFLATE (RFC 1951), no zlib header
    Deflate,
    /// Snappy with a trailing big-endian CRC32 of the uncompressed payload
    Snappy,
}

impl Codec {
    /// Parse a codec from the `avro.codec` metadata value.
    ///
    /// ```
    /// use atds::codec::Codec;
    ///
    /// assert_eq!(Codec::from_name("deflate").unwrap(), Codec::Deflate);
    /// let err = Codec::from_name("zstandard").unwrap_err();
    /// assert_eq!(err.to_string(), "Unknown codec in data file: zstandard");
    /// ```
    pub fn from_name(name: &str) -> Result<Self, CodecError> {
        match name {
            "null" => Ok(Codec::Null),
            "deflate" => Ok(Codec::Deflate),
            "snappy" => Ok(Codec::Snappy),
            unknown => Err(CodecError::UnknownCodec(unknown.to_string())),
        }
    }

    /// Name as written in the file metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Null => "null",
            Codec::Deflate => "deflate",
            Codec::Snappy => "snappy",
        }
    }

    /// Decompress a whole block payload.
    ///
    /// The null codec copies its input; callers that want to avoid the copy
    /// check for [`Codec::Null`] first.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Null => Ok(data.to_vec()),
            #[cfg(feature = "deflate")]
            Codec::Deflate => decompress_deflate(data),
            #[cfg(not(feature = "deflate"))]
            Codec::Deflate => Err(CodecError::UnsupportedCodec(
                "Deflate codec not enabled. Enable the 'deflate' feature.".to_string(),
            )),
            #[cfg(feature = "snappy")]
            Codec::Snappy => decompress_snappy(data),
            #[cfg(not(feature = "snappy"))]
            Codec::Snappy => Err(CodecError::UnsupportedCodec(
                "Snappy codec not enabled. Enable the 'snappy' feature.".to_string(),
            )),
        }
    }
}

/// Snappy payload layout: `[compressed bytes][crc32 of uncompressed, big endian]`.
///
/// The checksum is plain CRC32 (ISO polynomial), not CRC32C.
#[cfg(feature = "snappy")]
fn decompress_snappy(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    const CRC_SIZE: usize = 4;

    if data.len() < CRC_SIZE {
        return Err(CodecError::DecompressionError(
            "Snappy data too short: missing CRC checksum".to_string(),
        ));
    }

    let (compressed, crc_bytes) = data.split_at(data.len() - CRC_SIZE);
    let expected_crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

    let decompressed = if compressed.is_empty() {
        Vec::new()
    } else {
        SnappyDecoder::new()
            .decompress_vec(compressed)
            .map_err(|e| CodecError::DecompressionError(format!("Snappy decompression failed: {}", e)))?
    };

    let actual_crc = crc32fast::hash(&decompressed);
    if actual_crc != expected_crc {
        return Err(CodecError::DecompressionError(format!(
            "Snappy CRC32 checksum mismatch: expected 0x{:08X}, got 0x{:08X}",
            expected_crc, actual_crc
        )));
    }

    Ok(decompressed)
}

#[cfg(feature = "deflate")]
fn decompress_deflate(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let mut decompressed = Vec::with_capacity(data.len() * 2);
    DeflateDecoder::new(data)
        .read_to_end(&mut decompressed)
        .map_err(|e| CodecError::DecompressionError(format!("Deflate decompression failed: {}", e)))?;

    Ok(decompressed)
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
