//! Assembling batch-wide sparse tensors from per-worker buffers.
//!
//! Workers decode disjoint, increasing record ranges, so concatenating their
//! buffers in worker order keeps indices sorted by record.

use crate::atds::{BufferElement, SparseMetadata, ValueBuffer};
use crate::error::ReaderError;
use crate::tensor::{with_dtype, SparseTensor, Tensor, TensorData};

/// Merge the contributions of every worker to each sparse and varlen
/// feature. Output is indexed by `indices_index`.
pub fn merge_sparse(
    features: &[SparseMetadata],
    buffers: &mut [ValueBuffer],
    batch_size: usize,
) -> Result<Vec<SparseTensor>, ReaderError> {
    features
        .iter()
        .map(|feature| merge_feature(feature, buffers, batch_size))
        .collect()
}

fn merge_feature(
    feature: &SparseMetadata,
    buffers: &mut [ValueBuffer],
    batch_size: usize,
) -> Result<SparseTensor, ReaderError> {
    let slot = feature.indices_index;
    let rank = feature.rank() + 1;
    let nnz: usize = buffers.iter().map(|b| b.total_elements(slot)).sum();

    let mut indices = Vec::with_capacity(nnz * rank);
    for buffer in buffers.iter_mut() {
        if let Some(worker_indices) = buffer.indices.get_mut(slot) {
            indices.append(worker_indices);
        }
    }

    let values = with_dtype!(feature.dtype, T => take_values::<T>(buffers, feature.values_index, nnz));

    let mut dense_shape = Vec::with_capacity(rank);
    dense_shape.push(batch_size as i64);
    for (d, &size) in feature.shape.dims().iter().enumerate() {
        if size > 0 {
            dense_shape.push(size);
        } else {
            let max = indices
                .iter()
                .skip(d + 1)
                .step_by(rank)
                .copied()
                .max()
                .unwrap_or(-1);
            dense_shape.push(max + 1);
        }
    }

    if values.len() != nnz || indices.len() != nnz * rank {
        return Err(ReaderError::Internal(format!(
            "Feature {} decoded {} values and {} indices but counted {} elements",
            feature.name,
            values.len(),
            indices.len(),
            nnz
        )));
    }

    Ok(SparseTensor {
        indices: Tensor::new(vec![nnz, rank], TensorData::Int64(indices))?,
        values: Tensor::new(vec![nnz], values)?,
        dense_shape: Tensor::new(vec![rank], TensorData::Int64(dense_shape))?,
    })
}

fn take_values<T: BufferElement>(
    buffers: &mut [ValueBuffer],
    values_index: usize,
    nnz: usize,
) -> TensorData {
    let mut values = Vec::with_capacity(nnz);
    for buffer in buffers.iter_mut() {
        if let Some(worker_values) = T::values_mut(buffer).get_mut(values_index) {
            values.append(worker_values);
        }
    }
    T::into_data(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atds::FeatureType;
    use crate::tensor::{DataType, PartialShape};

    fn feature(feature_type: FeatureType, dtype: DataType, shape: Vec<i64>) -> SparseMetadata {
        SparseMetadata {
            feature_type,
            name: "f".to_string(),
            dtype,
            shape: PartialShape::new(shape),
            indices_index: 0,
            values_index: 0,
        }
    }

    fn push_record(buffer: &mut ValueBuffer, indices: &[i64], values: &[i64]) {
        let mut column = buffer.column_mut::<i64>(0, 0).unwrap();
        column.indices.extend_from_slice(indices);
        column.values.extend_from_slice(values);
        column.finish_record(values.len());
    }

    #[test]
    fn test_concatenates_workers_in_order() {
        let meta = feature(FeatureType::Sparse, DataType::Int64, vec![10]);
        let mut first = ValueBuffer::for_features(std::slice::from_ref(&meta), 2);
        push_record(&mut first, &[0, 1, 0, 7], &[5, 6]);
        push_record(&mut first, &[1, 2], &[8]);
        let mut second = ValueBuffer::for_features(std::slice::from_ref(&meta), 1);
        push_record(&mut second, &[2, 9], &[1]);

        let merged = merge_sparse(&[meta], &mut [first, second], 3).unwrap();
        let tensor = &merged[0];
        assert_eq!(tensor.nnz(), 4);
        assert_eq!(tensor.indices(), &[0, 1, 0, 7, 1, 2, 2, 9]);
        assert_eq!(tensor.values.as_slice::<i64>().unwrap(), &[5, 6, 8, 1]);
        assert_eq!(tensor.dense_shape(), &[3, 10]);
        assert_eq!(tensor.indices.shape(), &[4, 2]);
    }

    #[test]
    fn test_unknown_dims_from_max_index() {
        let meta = feature(FeatureType::Varlen, DataType::Int64, vec![-1, 4, -1]);
        let mut buffer = ValueBuffer::for_features(std::slice::from_ref(&meta), 2);
        push_record(&mut buffer, &[0, 0, 1, 2, 0, 2, 3, 0], &[1, 2]);
        push_record(&mut buffer, &[1, 5, 0, 0], &[3]);

        let merged = merge_sparse(&[meta], &mut [buffer], 2).unwrap();
        assert_eq!(merged[0].dense_shape(), &[2, 6, 4, 3]);
    }

    #[test]
    fn test_empty_feature() {
        let meta = feature(FeatureType::Varlen, DataType::String, vec![-1]);
        let mut buffer = ValueBuffer::for_features(std::slice::from_ref(&meta), 1);
        buffer
            .column_mut::<bytes::Bytes>(0, 0)
            .unwrap()
            .finish_record(0);

        let merged = merge_sparse(&[meta], &mut [buffer], 1).unwrap();
        assert_eq!(merged[0].nnz(), 0);
        assert_eq!(merged[0].dense_shape(), &[1, 0]);
        assert_eq!(merged[0].indices.shape(), &[0, 2]);
    }
}
