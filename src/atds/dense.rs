//! Dense column decoding.
//!
//! Values go straight into the batch output tensor at
//! `record * size_per_record`; nested array lengths must equal the declared
//! dimension sizes exactly.

use super::{leaf_dtype, DenseMetadata};
use crate::error::{DecodeError, SchemaError};
use crate::reader::decode_item_count;
use crate::schema::AvroSchema;
use crate::tensor::{with_dtype, DataType, Element, PartialShape, TensorSliceMut};

/// Dense output of one decode worker: a slice of every dense tensor covering
/// records `first_record..first_record + num_records` of the batch.
#[derive(Debug)]
pub struct DenseBatch<'a> {
    first_record: usize,
    num_records: usize,
    tensors: Vec<TensorSliceMut<'a>>,
}

impl<'a> DenseBatch<'a> {
    pub fn new(first_record: usize, num_records: usize, tensors: Vec<TensorSliceMut<'a>>) -> Self {
        Self {
            first_record,
            num_records,
            tensors,
        }
    }

    /// A batch for records that have no dense features.
    pub fn empty(first_record: usize, num_records: usize) -> Self {
        Self::new(first_record, num_records, Vec::new())
    }

    pub fn first_record(&self) -> usize {
        self.first_record
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// Elements of the tensor at `position` belonging to batch record
    /// `offset`, which is `size` elements long.
    fn record_mut<T: Element>(
        &mut self,
        position: usize,
        offset: usize,
        size: usize,
    ) -> Result<&mut [T], DecodeError> {
        let local = offset
            .checked_sub(self.first_record)
            .filter(|&r| r < self.num_records)
            .ok_or_else(|| {
                DecodeError::InvalidData(format!(
                    "Record {} is outside the dense output range {}..{}",
                    offset,
                    self.first_record,
                    self.first_record + self.num_records
                ))
            })?;
        let view = self.tensors.get_mut(position).ok_or_else(|| {
            DecodeError::InvalidData(format!("No dense output tensor at position {}", position))
        })?;
        let values = T::view_mut(view).ok_or_else(|| {
            DecodeError::InvalidData(format!("Dense output tensor is not of type {}", T::DTYPE))
        })?;
        values
            .get_mut(local * size..(local + 1) * size)
            .ok_or(DecodeError::UnexpectedEof)
    }
}

#[derive(Debug, Clone)]
pub struct DenseDecoder {
    dtype: DataType,
    shape: PartialShape,
    size_per_record: usize,
    tensor_position: usize,
}

impl DenseDecoder {
    pub fn new(metadata: &DenseMetadata) -> Self {
        Self {
            dtype: metadata.dtype,
            shape: metadata.shape.clone(),
            size_per_record: metadata.shape.num_elements().unwrap_or(0),
            tensor_position: metadata.tensor_position,
        }
    }

    /// Check that `schema` is `rank` levels of non-nullable arrays around a
    /// leaf of the requested dtype.
    pub fn validate(schema: &AvroSchema, metadata: &DenseMetadata) -> Result<(), SchemaError> {
        validate_nested_arrays(schema, &metadata.name, metadata.dtype, metadata.shape.rank())
            .map_err(|e| match e {
                NestingError::NotArray(schema) => SchemaError::InvalidDenseFeatureSchema {
                    feature: metadata.name.clone(),
                    schema,
                },
                NestingError::Schema(e) => e,
            })
    }

    pub fn decode(
        &self,
        data: &mut &[u8],
        dense: &mut DenseBatch<'_>,
        offset: usize,
    ) -> Result<(), DecodeError> {
        with_dtype!(self.dtype, T => self.decode_typed::<T>(data, dense, offset))
    }

    fn decode_typed<T: Element>(
        &self,
        data: &mut &[u8],
        dense: &mut DenseBatch<'_>,
        offset: usize,
    ) -> Result<(), DecodeError> {
        let out = dense.record_mut::<T>(self.tensor_position, offset, self.size_per_record)?;
        if self.shape.rank() == 0 {
            out[0] = T::decode_avro(data)?;
            return Ok(());
        }
        let mut cursor = 0;
        self.decode_dim(data, out, 0, &mut cursor)
    }

    fn decode_dim<T: Element>(
        &self,
        data: &mut &[u8],
        out: &mut [T],
        dim: usize,
        cursor: &mut usize,
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
            if number as i64 > size {
                return Err(shape_error(number, dim, &self.shape));
            }
            for _ in 0..m {
                if leaf {
                    out[*cursor] = T::decode_avro(data)?;
                    *cursor += 1;
                } else {
                    self.decode_dim(data, out, dim + 1, cursor)?;
                }
            }
        }
        if number as i64 != size {
            return Err(shape_error(number, dim, &self.shape));
        }
        Ok(())
    }
}

pub(crate) fn shape_error(number: usize, dim: usize, shape: &PartialShape) -> DecodeError {
    DecodeError::Shape {
        number,
        dim,
        expected: shape.dim(dim),
        shape: shape.to_string(),
    }
}

pub(crate) enum NestingError {
    /// Offending node, as JSON
    NotArray(String),
    Schema(SchemaError),
}

/// Shared by the dense and varlen validators: walk nested arrays, then check
/// the leaf dtype and the nesting depth.
pub(crate) fn validate_nested_arrays(
    schema: &AvroSchema,
    name: &str,
    dtype: DataType,
    rank: usize,
) -> Result<(), NestingError> {
    let mut node = schema;
    let mut avro_rank = 0;
    loop {
        match node {
            AvroSchema::Array(items) => {
                node = items;
                avro_rank += 1;
            }
            AvroSchema::Record(r) if !r.fields.is_empty() => {
                return Err(NestingError::NotArray(node.to_json()))
            }
            AvroSchema::Union(_) | AvroSchema::Map(_) => {
                return Err(NestingError::NotArray(node.to_json()))
            }
            _ => break,
        }
    }

    match leaf_dtype(node) {
        None => {
            return Err(NestingError::Schema(SchemaError::UnsupportedValueType {
                feature: name.to_string(),
                schema: schema.to_json(),
            }))
        }
        Some(found) if found != dtype => {
            return Err(NestingError::Schema(SchemaError::ValueTypeMismatch {
                feature: name.to_string(),
                avro_type: node.type_name().to_string(),
                dtype: dtype.to_string(),
                schema: schema.to_json(),
            }))
        }
        Some(_) => {}
    }

    if avro_rank != rank {
        return Err(NestingError::Schema(SchemaError::RankMismatch {
            feature: name.to_string(),
            schema_rank: avro_rank,
            metadata_rank: rank,
            schema: schema.to_json(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::write_zigzag;
    use crate::tensor::Tensor;
    use bytes::Bytes;

    fn metadata(dtype: DataType, shape: Vec<i64>) -> DenseMetadata {
        DenseMetadata {
            name: "feature".to_string(),
            dtype,
            shape: PartialShape::new(shape),
            tensor_position: 0,
        }
    }

    fn array_of(depth: usize, leaf: AvroSchema) -> AvroSchema {
        (0..depth).fold(leaf, |s, _| AvroSchema::Array(Box::new(s)))
    }

    /// Encode `[[1, 3], [2, 4]]` with the outer array split over two blocks.
    fn long_2d() -> Vec<u8> {
        let mut buf = Vec::new();
        write_zigzag(&mut buf, 1);
        write_zigzag(&mut buf, 2);
        [1i64, 3].iter().for_each(|&v| write_zigzag(&mut buf, v));
        write_zigzag(&mut buf, 0);
        // second row in a sized block
        write_zigzag(&mut buf, -1);
        write_zigzag(&mut buf, 4);
        write_zigzag(&mut buf, 2);
        [2i64, 4].iter().for_each(|&v| write_zigzag(&mut buf, v));
        write_zigzag(&mut buf, 0);
        write_zigzag(&mut buf, 0);
        buf
    }

    fn decode_into(
        decoder: &DenseDecoder,
        tensor: &mut Tensor,
        batch_size: usize,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), DecodeError> {
        let mut dense = DenseBatch::new(0, batch_size, vec![tensor.data_mut().as_slice_mut()]);
        let mut data = bytes;
        decoder.decode(&mut data, &mut dense, offset)
    }

    #[test]
    fn test_decode_2d_long_at_offset() {
        let decoder = DenseDecoder::new(&metadata(DataType::Int64, vec![2, 2]));
        let mut tensor = Tensor::zeros(DataType::Int64, vec![2, 2, 2]);
        decode_into(&decoder, &mut tensor, 2, 1, &long_2d()).unwrap();
        assert_eq!(tensor.as_slice::<i64>().unwrap(), &[0, 0, 0, 0, 1, 3, 2, 4]);
    }

    #[test]
    fn test_decode_scalar_string() {
        let decoder = DenseDecoder::new(&metadata(DataType::String, vec![]));
        let mut tensor = Tensor::zeros(DataType::String, vec![1]);
        let mut buf = Vec::new();
        write_zigzag(&mut buf, 3);
        buf.extend_from_slice(b"abc");
        decode_into(&decoder, &mut tensor, 1, 0, &buf).unwrap();
        assert_eq!(tensor.as_slice::<Bytes>().unwrap(), &[Bytes::from_static(b"abc")]);
    }

    #[test]
    fn test_shape_overflow_and_undershoot() {
        let decoder = DenseDecoder::new(&metadata(DataType::Int32, vec![2]));
        let mut tensor = Tensor::zeros(DataType::Int32, vec![1, 2]);

        let mut three = Vec::new();
        write_zigzag(&mut three, 3);
        (0..3).for_each(|v| write_zigzag(&mut three, v));
        write_zigzag(&mut three, 0);
        let err = decode_into(&decoder, &mut tensor, 1, 0, &three).unwrap_err();
        assert!(matches!(err, DecodeError::Shape { number: 3, dim: 0, .. }));

        let mut one = Vec::new();
        write_zigzag(&mut one, 1);
        write_zigzag(&mut one, 7);
        write_zigzag(&mut one, 0);
        let err = decode_into(&decoder, &mut tensor, 1, 0, &one).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Number of decoded value 1 does not match the expected dimension size 2 \
             at the 1th dimension in user defined shape [2]"
        );
    }

    #[test]
    fn test_oversized_block_count() {
        let decoder = DenseDecoder::new(&metadata(DataType::Int32, vec![4]));
        let mut tensor = Tensor::zeros(DataType::Int32, vec![1, 4]);
        for count in [i64::MAX, 1 << 40, i64::MIN] {
            let mut buf = Vec::new();
            write_zigzag(&mut buf, count);
            if count < 0 {
                write_zigzag(&mut buf, 3);
            }
            buf.extend_from_slice(&[2, 4, 6]);
            let err = decode_into(&decoder, &mut tensor, 1, 0, &buf).unwrap_err();
            assert!(matches!(err, DecodeError::UnexpectedEof), "{:?}", err);
        }
    }

    #[test]
    fn test_inner_dimension_mismatch() {
        let decoder = DenseDecoder::new(&metadata(DataType::Int64, vec![2, 3]));
        let mut tensor = Tensor::zeros(DataType::Int64, vec![1, 6]);
        let err = decode_into(&decoder, &mut tensor, 1, 0, &long_2d()).unwrap_err();
        assert!(matches!(err, DecodeError::Shape { number: 2, dim: 1, .. }));
    }

    #[test]
    fn test_offset_outside_worker_range() {
        let decoder = DenseDecoder::new(&metadata(DataType::Int64, vec![2, 2]));
        let mut tensor = Tensor::zeros(DataType::Int64, vec![1, 2, 2]);
        assert!(decode_into(&decoder, &mut tensor, 1, 1, &long_2d()).is_err());
    }

    #[test]
    fn test_validate() {
        let meta = metadata(DataType::Float, vec![3]);
        assert!(DenseDecoder::validate(&array_of(1, AvroSchema::Float), &meta).is_ok());

        let err = DenseDecoder::validate(&array_of(2, AvroSchema::Float), &meta).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::RankMismatch { schema_rank: 2, metadata_rank: 1, .. }
        ));

        let err = DenseDecoder::validate(&array_of(1, AvroSchema::Double), &meta).unwrap_err();
        assert!(matches!(err, SchemaError::ValueTypeMismatch { .. }));

        let err = DenseDecoder::validate(&array_of(1, AvroSchema::Null), &meta).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedValueType { .. }));

        let nullable_items =
            AvroSchema::Array(Box::new(AvroSchema::Union(vec![AvroSchema::Null, AvroSchema::Float])));
        let err = DenseDecoder::validate(&nullable_items, &meta).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDenseFeatureSchema { .. }));
    }
}
