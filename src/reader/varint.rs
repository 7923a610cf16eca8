//! Variable-length integer coding.
//!
//! Avro `int` and `long` values are zigzag mapped and then written as
//! little-endian base-128 varints: seven data bits per byte, high bit set on
//! every byte except the last.

use crate::error::DecodeError;

/// Longest varint that still fits in 64 bits.
pub const MAX_VARINT_LEN: usize = 10;

/// Decode an unsigned varint, advancing `data` past it.
///
/// # Errors
/// - `DecodeError::UnexpectedEof` if the input ends inside the varint
/// - `DecodeError::InvalidVarint` if it runs past ten bytes
#[inline]
pub fn decode_varint(data: &mut &[u8]) -> Result<u64, DecodeError> {
    let mut result: u64 = 0;

    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        result |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            *data = &data[i + 1..];
            return Ok(result);
        }
    }

    if data.len() >= MAX_VARINT_LEN {
        Err(DecodeError::InvalidVarint)
    } else {
        Err(DecodeError::UnexpectedEof)
    }
}

/// Decode a zigzag varint.
#[inline]
pub fn decode_zigzag(data: &mut &[u8]) -> Result<i64, DecodeError> {
    Ok(zigzag_to_signed(decode_varint(data)?))
}

/// Undo the zigzag mapping: `(n >> 1) ^ -(n & 1)`.
#[inline]
pub fn zigzag_to_signed(unsigned: u64) -> i64 {
    ((unsigned >> 1) as i64) ^ (-((unsigned & 1) as i64))
}

/// Advance past one varint without decoding it.
#[inline]
pub fn skip_varint(data: &mut &[u8]) -> Result<(), DecodeError> {
    match data.iter().take(MAX_VARINT_LEN).position(|b| b & 0x80 == 0) {
        Some(last) => {
            *data = &data[last + 1..];
            Ok(())
        }
        None if data.len() >= MAX_VARINT_LEN => Err(DecodeError::InvalidVarint),
        None => Err(DecodeError::UnexpectedEof),
    }
}

/// Append an unsigned varint to `out`.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append a zigzag varint to `out`.
pub fn write_zigzag(out: &mut Vec<u8>, value: i64) {
    write_varint(out, ((value << 1) ^ (value >> 63)) as u64);
}

/// Zigzag varint as a fresh buffer.
pub fn encode_zigzag(value: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    write_zigzag(&mut out, value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_varint_single_and_multi_byte() {
        let mut data: &[u8] = &[0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02];
        assert_eq!(decode_varint(&mut data).unwrap(), 0);
        assert_eq!(decode_varint(&mut data).unwrap(), 127);
        assert_eq!(decode_varint(&mut data).unwrap(), 128);
        assert_eq!(decode_varint(&mut data).unwrap(), 300);
        assert!(data.is_empty());
    }

    #[test]
    fn test_decode_varint_truncated() {
        let mut data: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            decode_varint(&mut data),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_decode_varint_too_long() {
        let mut data: &[u8] = &[0xFF; 11];
        assert!(matches!(
            decode_varint(&mut data),
            Err(DecodeError::InvalidVarint)
        ));
    }

    #[test]
    fn test_zigzag_values() {
        for (value, encoded) in [(0i64, 0u8), (-1, 1), (1, 2), (-2, 3), (2, 4), (-64, 127)] {
            assert_eq!(encode_zigzag(value), vec![encoded]);
            let mut data: &[u8] = &[encoded];
            assert_eq!(decode_zigzag(&mut data).unwrap(), value);
        }
    }

    #[test]
    fn test_zigzag_extremes() {
        for value in [i64::MIN, i64::MAX, i32::MIN as i64, i32::MAX as i64] {
            let encoded = encode_zigzag(value);
            let mut data = encoded.as_slice();
            assert_eq!(decode_zigzag(&mut data).unwrap(), value);
        }
    }

    #[test]
    fn test_skip_varint() {
        let mut data: &[u8] = &[0xAC, 0x02, 0x05];
        skip_varint(&mut data).unwrap();
        assert_eq!(data, &[0x05]);

        let mut truncated: &[u8] = &[0x80];
        assert!(skip_varint(&mut truncated).is_err());
    }
}
