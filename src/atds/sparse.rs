//! Sparse column decoding.
//!
//! A sparse feature of rank `r` is stored as a record with one array per
//! dimension (`indices0`..`indices{r-1}`) and a `values` array, in any field
//! order. All arrays of a record must have the same length. Decoded index
//! tuples get the record's batch offset prepended.

use super::value_buffer::BufferElement;
use super::{leaf_dtype, SparseMetadata};
use crate::error::{DecodeError, SchemaError};
use crate::reader::{decode_int, decode_item_count, decode_long};
use crate::schema::AvroSchema;
use crate::tensor::{with_dtype, DataType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexType {
    Int,
    Long,
}

#[derive(Debug, Clone)]
pub struct SparseDecoder {
    dtype: DataType,
    rank: usize,
    indices_index: usize,
    values_index: usize,
    /// Target of each record field in schema order: the dimension an indices
    /// column fills, or `rank` for the values column
    decoding_order: Vec<usize>,
    /// Element type of `indices{d}`
    index_types: Vec<IndexType>,
}

impl SparseDecoder {
    /// Validate the sparse record `schema` and build its decoder.
    pub fn new(schema: &AvroSchema, metadata: &SparseMetadata) -> Result<Self, SchemaError> {
        Self::validate(schema, metadata)?;
        let rank = metadata.rank();

        let AvroSchema::Record(record) = schema else {
            return Err(SchemaError::MissingValuesColumn {
                schema: schema.to_json(),
            });
        };
        let mut decoding_order = vec![rank; record.fields.len()];
        let mut index_types = vec![IndexType::Long; rank];
        for (pos, field) in record.fields.iter().enumerate() {
            if let Some(dim) = index_dim(&field.name).filter(|&d| d < rank) {
                decoding_order[pos] = dim;
                if let AvroSchema::Array(items) = &field.schema {
                    if **items == AvroSchema::Int {
                        index_types[dim] = IndexType::Int;
                    }
                }
            }
        }

        Ok(Self {
            dtype: metadata.dtype,
            rank,
            indices_index: metadata.indices_index,
            values_index: metadata.values_index,
            decoding_order,
            index_types,
        })
    }

    /// Check the sparse record layout, in this order: values column present
    /// and an array of the requested dtype, `indices0..indices{rank-1}`
    /// present as arrays of int or long, and no other fields.
    pub fn validate(schema: &AvroSchema, metadata: &SparseMetadata) -> Result<(), SchemaError> {
        let json = || schema.to_json();
        let unsupported_value = || SchemaError::UnsupportedValueType {
            feature: metadata.name.clone(),
            schema: json(),
        };
        let unsupported_indices = || SchemaError::UnsupportedSparseIndicesType {
            feature: metadata.name.clone(),
            schema: json(),
        };

        let record = match schema {
            AvroSchema::Record(record) => record,
            _ => return Err(SchemaError::MissingValuesColumn { schema: json() }),
        };

        let values = record
            .field("values")
            .ok_or_else(|| SchemaError::MissingValuesColumn { schema: json() })?;
        let AvroSchema::Array(items) = &values.schema else {
            return Err(unsupported_value());
        };
        let found = leaf_dtype(items).ok_or_else(unsupported_value)?;
        if found != metadata.dtype {
            return Err(SchemaError::ValueTypeMismatch {
                feature: metadata.name.clone(),
                avro_type: items.type_name().to_string(),
                dtype: metadata.dtype.to_string(),
                schema: json(),
            });
        }

        let rank = metadata.rank();
        for dim in 0..rank {
            let column = record
                .field(&format!("indices{}", dim))
                .ok_or_else(|| SchemaError::NonContiguousIndices { schema: json() })?;
            let AvroSchema::Array(items) = &column.schema else {
                return Err(unsupported_indices());
            };
            if !matches!(**items, AvroSchema::Int | AvroSchema::Long) {
                return Err(unsupported_indices());
            }
        }

        if record.fields.len() != rank + 1 {
            return Err(SchemaError::ExtraField { schema: json() });
        }
        Ok(())
    }

    pub fn decode(
        &self,
        data: &mut &[u8],
        buffer: &mut super::ValueBuffer,
        offset: usize,
    ) -> Result<(), DecodeError> {
        with_dtype!(self.dtype, T => self.decode_typed::<T>(data, buffer, offset))
    }

    fn decode_typed<T: BufferElement>(
        &self,
        data: &mut &[u8],
        buffer: &mut super::ValueBuffer,
        offset: usize,
    ) -> Result<(), DecodeError> {
        let mut column = buffer
            .column_mut::<T>(self.indices_index, self.values_index)
            .ok_or_else(|| {
                DecodeError::InvalidData(format!(
                    "Value buffer has no slot for sparse feature {}",
                    self.indices_index
                ))
            })?;
        let stride = self.rank + 1;
        let indices_start = column.indices.len();

        let mut counts = Vec::with_capacity(self.decoding_order.len());
        for &target in &self.decoding_order {
            let count = if target == self.rank {
                decode_values(data, column.values)?
            } else {
                decode_indices(
                    data,
                    column.indices,
                    indices_start,
                    target,
                    stride,
                    self.index_types[target],
                )?
            };
            counts.push(count);
        }

        let count = counts.first().copied().unwrap_or(0);
        if counts.iter().any(|&c| c != count) {
            return Err(DecodeError::SparseArraysNotEqual {
                names: self
                    .decoding_order
                    .iter()
                    .map(|&target| {
                        if target == self.rank {
                            "values".to_string()
                        } else {
                            format!("indices{}", target)
                        }
                    })
                    .collect(),
                counts,
            });
        }

        column.indices.resize(indices_start + count * stride, 0);
        for slot in column.indices[indices_start..].iter_mut().step_by(stride) {
            *slot = offset as i64;
        }
        column.finish_record(count);
        Ok(())
    }
}

/// `indicesN` -> `N`
fn index_dim(name: &str) -> Option<usize> {
    name.strip_prefix("indices")?.parse().ok()
}

fn decode_values<T: BufferElement>(
    data: &mut &[u8],
    values: &mut Vec<T>,
) -> Result<usize, DecodeError> {
    let mut number = 0;
    loop {
        let m = decode_item_count(data)?;
        if m == 0 {
            return Ok(number);
        }
        for _ in 0..m {
            values.push(T::decode_avro(data)?);
        }
        number += m;
    }
}

/// Write one indices array into slot `dim + 1` of consecutive tuples.
fn decode_indices(
    data: &mut &[u8],
    indices: &mut Vec<i64>,
    start: usize,
    dim: usize,
    stride: usize,
    index_type: IndexType,
) -> Result<usize, DecodeError> {
    let mut number = 0;
    loop {
        let m = decode_item_count(data)?;
        if m == 0 {
            return Ok(number);
        }
        let end = (number + m)
            .checked_mul(stride)
            .and_then(|n| n.checked_add(start))
            .ok_or_else(|| {
                DecodeError::InvalidData(format!("Sparse index count {} overflows", m))
            })?;
        if indices.len() < end {
            indices.resize(end, 0);
        }
        for k in number..number + m {
            indices[start + k * stride + dim + 1] = match index_type {
                IndexType::Int => decode_int(data)? as i64,
                IndexType::Long => decode_long(data)?,
            };
        }
        number += m;
    }
}
