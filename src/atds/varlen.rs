//! Varlen (ragged) column decoding.
//!
//! Walks nested arrays like the dense decoder but emits an index tuple per
//! leaf value. Dimensions declared with a positive size are length checked;
//! `-1` dimensions take whatever length the record has.

use super::dense::{shape_error, validate_nested_arrays, NestingError};
use super::value_buffer::BufferElement;
use super::{SparseMetadata, ValueBuffer};
use crate::error::{DecodeError, SchemaError};
use crate::reader::decode_item_count;
use crate::schema::AvroSchema;
use crate::tensor::{with_dtype, DataType, PartialShape};

#[derive(Debug, Clone)]
pub struct VarlenDecoder {
    dtype: DataType,
    shape: PartialShape,
    indices_index: usize,
    values_index: usize,
}

struct Cursor<'a, T> {
    /// Index tuple of the next leaf: batch offset, then one slot per dimension
    current: Vec<i64>,
    indices: &'a mut Vec<i64>,
    values: &'a mut Vec<T>,
    count: usize,
}

impl VarlenDecoder {
    pub fn new(metadata: &SparseMetadata) -> Self {
        Self {
            dtype: metadata.dtype,
            shape: metadata.shape.clone(),
            indices_index: metadata.indices_index,
            values_index: metadata.values_index,
        }
    }

    pub fn validate(schema: &AvroSchema, metadata: &SparseMetadata) -> Result<(), SchemaError> {
        validate_nested_arrays(schema, &metadata.name, metadata.dtype, metadata.rank()).map_err(
            |e| match e {
                NestingError::NotArray(schema) => SchemaError::InvalidVarlenFeatureSchema {
                    feature: metadata.name.clone(),
                    schema,
                },
                NestingError::Schema(e) => e,
            },
        )
    }

    pub fn decode(
        &self,
        data: &mut &[u8],
        buffer: &mut ValueBuffer,
        offset: usize,
    ) -> Result<(), DecodeError> {
        with_dtype!(self.dtype, T => self.decode_typed::<T>(data, buffer, offset))
    }

    fn decode_typed<T: BufferElement>(
        &self,
        data: &mut &[u8],
        buffer: &mut ValueBuffer,
        offset: usize,
    ) -> Result<(), DecodeError> {
        let mut column = buffer
            .column_mut::<T>(self.indices_index, self.values_index)
            .ok_or_else(|| {
                DecodeError::InvalidData(format!(
                    "Value buffer has no slot for varlen feature {}",
                    self.indices_index
                ))
            })?;

        let mut current = Vec::with_capacity(self.shape.rank() + 1);
        current.push(offset as i64);
        current.resize(self.shape.rank() + 1, 0);
        let mut cursor = Cursor {
            current,
            indices: &mut *column.indices,
            values: &mut *column.values,
            count: 0,
        };

        if self.shape.rank() == 0 {
            cursor.indices.extend_from_slice(&cursor.current);
            cursor.values.push(T::decode_avro(data)?);
            cursor.count = 1;
        } else {
            self.decode_dim(data, &mut cursor, 0)?;
        }

        let count = cursor.count;
        column.finish_record(count);
        Ok(())
    }

    fn decode_dim<T: BufferElement>(
        &self,
        data: &mut &[u8],
        cursor: &mut Cursor<'_, T>,
        dim: usize,
    ) -> Result<(), DecodeError> {
        let size = self.shape.dim(dim);
        let leaf = dim + 1 == self.shape.rank();
        let mut number = 0usize;
        loop {
            let m = decode_item_count(data)?;
            if m == 0 {
                break;
            }
            number += m;
            if size > 0 && number as i64 > size {
                return Err(shape_error(number, dim, &self.shape));
            }
            for _ in 0..m {
                if leaf {
                    cursor.indices.extend_from_slice(&cursor.current);
                    cursor.values.push(T::decode_avro(data)?);
                    cursor.count += 1;
                } else {
                    self.decode_dim(data, cursor, dim + 1)?;
                }
                cursor.current[dim + 1] += 1;
            }
        }
        if size > 0 && number as i64 != size {
            return Err(shape_error(number, dim, &self.shape));
        }
        cursor.current[dim + 1] = 0;
        Ok(())
    }
}
