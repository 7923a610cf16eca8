//! Avro binary decoding of primitive values.
//!
//! All functions read from a `&mut &[u8]` cursor and advance it past the
//! value they consumed:
//! - `int`/`long` are zigzag varints
//! - `float`/`double` are little-endian IEEE 754
//! - `bytes`/`string` are a long length followed by that many bytes
//! - arrays and maps are a sequence of blocks terminated by a zero count

use bytes::Bytes;

use super::varint::{decode_zigzag, skip_varint};
use crate::error::DecodeError;
use crate::schema::AvroSchema;

/// Avro booleans are a single byte, 0 or 1.
#[inline]
pub fn decode_boolean(data: &mut &[u8]) -> Result<bool, DecodeError> {
    let (&byte, rest) = data.split_first().ok_or(DecodeError::UnexpectedEof)?;
    *data = rest;
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::InvalidData(format!(
            "Invalid boolean value: {}, expected 0 or 1",
            byte
        ))),
    }
}

/// Decode an `int`, rejecting values outside the i32 range.
#[inline]
pub fn decode_int(data: &mut &[u8]) -> Result<i32, DecodeError> {
    let long = decode_long(data)?;
    i32::try_from(long).map_err(|_| {
        DecodeError::InvalidData(format!("Integer overflow: {} does not fit in i32", long))
    })
}

#[inline]
pub fn decode_long(data: &mut &[u8]) -> Result<i64, DecodeError> {
    decode_zigzag(data)
}

#[inline]
pub fn decode_float(data: &mut &[u8]) -> Result<f32, DecodeError> {
    let bytes = take::<4>(data)?;
    Ok(f32::from_le_bytes(bytes))
}

#[inline]
pub fn decode_double(data: &mut &[u8]) -> Result<f64, DecodeError> {
    let bytes = take::<8>(data)?;
    Ok(f64::from_le_bytes(bytes))
}

#[inline]
fn take<const N: usize>(data: &mut &[u8]) -> Result<[u8; N], DecodeError> {
    if data.len() < N {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = data.split_at(N);
    *data = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

/// Decode a length-prefixed byte string without copying.
///
/// Avro `string` shares this encoding; no UTF-8 validation is done since
/// string tensors hold raw bytes.
#[inline]
pub fn decode_bytes_ref<'a>(data: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let len = decode_len(data)?;
    if data.len() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = data.split_at(len);
    *data = rest;
    Ok(bytes)
}

/// Decode a length-prefixed byte string into an owned buffer.
#[inline]
pub fn decode_bytes(data: &mut &[u8]) -> Result<Bytes, DecodeError> {
    decode_bytes_ref(data).map(Bytes::copy_from_slice)
}

#[inline]
fn decode_len(data: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = decode_long(data)?;
    if len < 0 {
        return Err(DecodeError::InvalidData(format!(
            "Negative bytes length: {}",
            len
        )));
    }
    Ok(len as usize)
}

/// Read the item count of the next array or map block.
///
/// A negative count is followed by the block size in bytes, which is read
/// and discarded; the absolute count is returned. Zero ends the sequence.
#[inline]
pub fn decode_block_len(data: &mut &[u8]) -> Result<usize, DecodeError> {
    let count = decode_long(data)?;
    if count < 0 {
        let _byte_size = decode_long(data)?;
        Ok(count.unsigned_abs() as usize)
    } else {
        Ok(count as usize)
    }
}

/// Like [`decode_block_len`], for arrays whose items take at least one byte
/// each. A count larger than the remaining input is reported as
/// [`DecodeError::UnexpectedEof`] before anything is sized from it.
#[inline]
pub fn decode_item_count(data: &mut &[u8]) -> Result<usize, DecodeError> {
    let count = decode_block_len(data)?;
    if count > data.len() {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(count)
}

/// Skip a fixed number of bytes.
#[inline]
pub fn skip_fixed(data: &mut &[u8], size: usize) -> Result<(), DecodeError> {
    if data.len() < size {
        return Err(DecodeError::UnexpectedEof);
    }
    *data = &data[size..];
    Ok(())
}

/// Skip over a bytes or string value.
#[inline]
pub fn skip_bytes(data: &mut &[u8]) -> Result<(), DecodeError> {
    let len = decode_len(data)?;
    skip_fixed(data, len)
}

/// Skip the blocks of an array or map. `skip_item` consumes one element.
fn skip_blocks<F>(data: &mut &[u8], mut skip_item: F) -> Result<(), DecodeError>
where
    F: FnMut(&mut &[u8]) -> Result<(), DecodeError>,
{
    loop {
        let count = decode_long(data)?;
        if count == 0 {
            return Ok(());
        }
        if count < 0 {
            // Sized block: jump over it in one go.
            let byte_size = decode_long(data)?;
            if byte_size < 0 {
                return Err(DecodeError::InvalidData(format!(
                    "Negative block byte size: {}",
                    byte_size
                )));
            }
            skip_fixed(data, byte_size as usize)?;
            continue;
        }
        for _ in 0..count {
            let before = data.len();
            skip_item(data)?;
            // Zero-width items: the rest of the block is empty too.
            if data.len() == before {
                break;
            }
        }
    }
}

/// Skip over any Avro value based on its schema.
pub fn skip_value(data: &mut &[u8], schema: &AvroSchema) -> Result<(), DecodeError> {
    match schema {
        AvroSchema::Null => Ok(()),
        AvroSchema::Boolean => skip_fixed(data, 1),
        AvroSchema::Int | AvroSchema::Long | AvroSchema::Enum(_) => skip_varint(data),
        AvroSchema::Float => skip_fixed(data, 4),
        AvroSchema::Double => skip_fixed(data, 8),
        AvroSchema::Bytes | AvroSchema::String => skip_bytes(data),
        AvroSchema::Fixed(fixed) => skip_fixed(data, fixed.size),
        AvroSchema::Array(items) => skip_blocks(data, |d| skip_value(d, items)),
        AvroSchema::Map(values) => skip_blocks(data, |d| {
            skip_bytes(d)?;
            skip_value(d, values)
        }),
        AvroSchema::Union(variants) => {
            let index = decode_union_index(data, variants.len())?;
            skip_value(data, &variants[index])
        }
        AvroSchema::Record(record) => record
            .fields
            .iter()
            .try_for_each(|field| skip_value(data, &field.schema)),
    }
}

/// Read a union branch index and check it against the number of branches.
#[inline]
pub fn decode_union_index(data: &mut &[u8], num_variants: usize) -> Result<usize, DecodeError> {
    let index = decode_long(data)?;
    if index < 0 || index as usize >= num_variants {
        return Err(DecodeError::InvalidData(format!(
            "Union index {} out of range (0..{})",
            index, num_variants
        )));
    }
    Ok(index as usize)
}

/// A tensor element type that can be read straight from Avro binary.
pub trait AvroDecode: Sized {
    fn decode_avro(data: &mut &[u8]) -> Result<Self, DecodeError>;
}

impl AvroDecode for i32 {
    #[inline]
    fn decode_avro(data: &mut &[u8]) -> Result<Self, DecodeError> {
        decode_int(data)
    }
}

impl AvroDecode for i64 {
    #[inline]
    fn decode_avro(data: &mut &[u8]) -> Result<Self, DecodeError> {
        decode_long(data)
    }
}

impl AvroDecode for f32 {
    #[inline]
    fn decode_avro(data: &mut &[u8]) -> Result<Self, DecodeError> {
        decode_float(data)
    }
}

impl AvroDecode for f64 {
    #[inline]
    fn decode_avro(data: &mut &[u8]) -> Result<Self, DecodeError> {
        decode_double(data)
    }
}

impl AvroDecode for bool {
    #[inline]
    fn decode_avro(data: &mut &[u8]) -> Result<Self, DecodeError> {
        decode_boolean(data)
    }
}

impl AvroDecode for Bytes {
    #[inline]
    fn decode_avro(data: &mut &[u8]) -> Result<Self, DecodeError> {
        decode_bytes(data)
    }
}
