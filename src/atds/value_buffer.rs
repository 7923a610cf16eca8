//! Per-worker storage for sparse and varlen output.
//!
//! Values are kept in one vector per (dtype, feature) pair. Indices are kept
//! flattened, `rank + 1` slots per value with the record offset first.
//! `num_of_elements` holds the running total of values after each record.

use bytes::Bytes;

use super::{FeatureType, SparseMetadata};
use crate::tensor::{DataType, Element};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueBuffer {
    pub int_values: Vec<Vec<i32>>,
    pub long_values: Vec<Vec<i64>>,
    pub float_values: Vec<Vec<f32>>,
    pub double_values: Vec<Vec<f64>>,
    pub string_values: Vec<Vec<Bytes>>,
    pub bool_values: Vec<Vec<bool>>,
    /// Flattened index tuples, one vector per sparse/varlen feature
    pub indices: Vec<Vec<i64>>,
    /// Cumulative value counts, one vector per sparse/varlen feature
    pub num_of_elements: Vec<Vec<usize>>,
}

/// Mutable handles to everything one sparse/varlen feature writes.
pub struct SparseColumnMut<'a, T> {
    pub values: &'a mut Vec<T>,
    pub indices: &'a mut Vec<i64>,
    pub num_of_elements: &'a mut Vec<usize>,
}

impl<T> SparseColumnMut<'_, T> {
    /// Record that `count` more values were decoded for one record.
    pub fn finish_record(&mut self, count: usize) {
        let total = self.num_of_elements.last().copied().unwrap_or(0) + count;
        self.num_of_elements.push(total);
    }
}

impl ValueBuffer {
    /// Create a buffer for `features`, reserving room for `records` records.
    pub fn for_features(features: &[SparseMetadata], records: usize) -> Self {
        let mut buffer = Self::default();
        for feature in features {
            buffer.add_feature(feature, records);
        }
        buffer
    }

    fn add_feature(&mut self, feature: &SparseMetadata, records: usize) {
        let estimate = feature.estimated_elements() * records;

        if self.indices.len() <= feature.indices_index {
            self.indices.resize_with(feature.indices_index + 1, Vec::new);
            self.num_of_elements
                .resize_with(feature.indices_index + 1, Vec::new);
        }
        self.indices[feature.indices_index].reserve(estimate * (feature.rank() + 1));
        self.num_of_elements[feature.indices_index].reserve(records);

        crate::tensor::with_dtype!(feature.dtype, T => {
            let values = T::values_mut(self);
            if values.len() <= feature.values_index {
                values.resize_with(feature.values_index + 1, Vec::new);
            }
            values[feature.values_index].reserve(estimate);
        })
    }

    pub fn num_features(&self) -> usize {
        self.indices.len()
    }

    /// Total values decoded so far for the feature at `indices_index`.
    pub fn total_elements(&self, indices_index: usize) -> usize {
        self.num_of_elements
            .get(indices_index)
            .and_then(|n| n.last())
            .copied()
            .unwrap_or(0)
    }

    /// Number of value vectors held for `dtype`.
    pub fn num_values(&self, dtype: DataType) -> usize {
        match dtype {
            DataType::Int32 => self.int_values.len(),
            DataType::Int64 => self.long_values.len(),
            DataType::Float => self.float_values.len(),
            DataType::Double => self.double_values.len(),
            DataType::String => self.string_values.len(),
            DataType::Bool => self.bool_values.len(),
        }
    }

    /// Borrow the value, index and count vectors of one feature together.
    pub fn column_mut<T: BufferElement>(
        &mut self,
        indices_index: usize,
        values_index: usize,
    ) -> Option<SparseColumnMut<'_, T>> {
        let (values, indices, num_of_elements) = T::split_mut(self);
        Some(SparseColumnMut {
            values: values.get_mut(values_index)?,
            indices: indices.get_mut(indices_index)?,
            num_of_elements: num_of_elements.get_mut(indices_index)?,
        })
    }

    /// Drop all decoded data but keep the allocations.
    pub fn clear(&mut self) {
        fn clear_all<T>(vecs: &mut [Vec<T>]) {
            vecs.iter_mut().for_each(Vec::clear);
        }
        clear_all(&mut self.int_values);
        clear_all(&mut self.long_values);
        clear_all(&mut self.float_values);
        clear_all(&mut self.double_values);
        clear_all(&mut self.string_values);
        clear_all(&mut self.bool_values);
        clear_all(&mut self.indices);
        clear_all(&mut self.num_of_elements);
    }
}

/// Element types with a slot in [`ValueBuffer`].
pub trait BufferElement: Element {
    fn values(buffer: &ValueBuffer) -> &Vec<Vec<Self>>;

    fn values_mut(buffer: &mut ValueBuffer) -> &mut Vec<Vec<Self>>;

    /// The value vectors of this type alongside the indices and counts.
    #[allow(clippy::type_complexity)]
    fn split_mut(
        buffer: &mut ValueBuffer,
    ) -> (
        &mut Vec<Vec<Self>>,
        &mut Vec<Vec<i64>>,
        &mut Vec<Vec<usize>>,
    );
}

macro_rules! impl_buffer_element {
    ($t:ty, $field:ident) => {
        impl BufferElement for $t {
            fn values(buffer: &ValueBuffer) -> &Vec<Vec<Self>> {
                &buffer.$field
            }

            fn values_mut(buffer: &mut ValueBuffer) -> &mut Vec<Vec<Self>> {
                &mut buffer.$field
            }

            fn split_mut(
                buffer: &mut ValueBuffer,
            ) -> (
                &mut Vec<Vec<Self>>,
                &mut Vec<Vec<i64>>,
                &mut Vec<Vec<usize>>,
            ) {
                (
                    &mut buffer.$field,
                    &mut buffer.indices,
                    &mut buffer.num_of_elements,
                )
            }
        }
    };
}

impl_buffer_element!(i32, int_values);
impl_buffer_element!(i64, long_values);
impl_buffer_element!(f32, float_values);
impl_buffer_element!(f64, double_values);
impl_buffer_element!(Bytes, string_values);
impl_buffer_element!(bool, bool_values);

/// Assign `indices_index` and `values_index` to sparse and varlen features
/// listed in declaration order.
pub(crate) fn assign_buffer_slots(features: &mut [SparseMetadata]) {
    let mut per_dtype = [0usize; DataType::ALL.len()];
    for (i, feature) in features.iter_mut().enumerate() {
        debug_assert!(matches!(
            feature.feature_type,
            FeatureType::Sparse | FeatureType::Varlen
        ));
        let slot = &mut per_dtype[dtype_ordinal(feature.dtype)];
        feature.indices_index = i;
        feature.values_index = *slot;
        *slot += 1;
    }
}

fn dtype_ordinal(dtype: DataType) -> usize {
    match dtype {
        DataType::Int32 => 0,
        DataType::Int64 => 1,
        DataType::Float => 2,
        DataType::Double => 3,
        DataType::String => 4,
        DataType::Bool => 5,
    }
}
