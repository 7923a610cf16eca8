//! ATDS record decoding.
//!
//! An ATDS file is an Avro container whose top-level record holds one column
//! per feature:
//! - dense: nested arrays whose lengths match a fully known shape
//! - sparse: a record of `indices0..indices{rank-1}` and `values` arrays
//! - varlen: nested arrays whose lengths may vary per record
//!
//! Columns nobody asked for are skipped. [`AtdsDecoder`] is built once from
//! the writer schema and then decodes one record at a time into a shared
//! [`DenseBatch`] and a per-worker [`ValueBuffer`].

mod decoder;
mod dense;
mod opaque;
mod sparse;
mod value_buffer;
mod varlen;

use std::fmt;
use std::str::FromStr;

pub use decoder::{AtdsDecoder, ColumnDecoder, NullableDecoder};
pub use dense::{DenseBatch, DenseDecoder};
pub use opaque::OpaqueDecoder;
pub use sparse::SparseDecoder;
pub use value_buffer::{BufferElement, SparseColumnMut, ValueBuffer};
pub(crate) use value_buffer::assign_buffer_slots;
pub use varlen::VarlenDecoder;

use crate::error::ReaderError;
use crate::schema::AvroSchema;
use crate::tensor::{DataType, PartialShape};

/// Kind of a column in an ATDS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureType {
    Dense,
    Sparse,
    Varlen,
    /// Present in the data but not requested
    OpaqueContextual,
}

impl FeatureType {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureType::Dense => "dense",
            FeatureType::Sparse => "sparse",
            FeatureType::Varlen => "varlen",
            FeatureType::OpaqueContextual => "opaque_contextual",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureType {
    type Err = ReaderError;

    /// Parses the requestable kinds; unused columns are never requested.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dense" => Ok(FeatureType::Dense),
            "sparse" => Ok(FeatureType::Sparse),
            "varlen" => Ok(FeatureType::Varlen),
            other => Err(ReaderError::Configuration(format!(
                "Unknown feature type: {}",
                other
            ))),
        }
    }
}

/// A requested dense feature.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMetadata {
    pub name: String,
    pub dtype: DataType,
    /// Per-record shape, fully defined
    pub shape: PartialShape,
    /// Index of the output tensor among the dense features
    pub tensor_position: usize,
}

/// A requested sparse or varlen feature.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMetadata {
    /// `Sparse` or `Varlen`
    pub feature_type: FeatureType,
    pub name: String,
    pub dtype: DataType,
    /// Per-record shape; varlen dims may be -1
    pub shape: PartialShape,
    /// Slot in [`ValueBuffer::indices`] and [`ValueBuffer::num_of_elements`]
    pub indices_index: usize,
    /// Slot in the value vectors of `dtype`
    pub values_index: usize,
}

impl SparseMetadata {
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Expected values per record, used to size buffers up front.
    pub fn estimated_elements(&self) -> usize {
        match self.feature_type {
            FeatureType::Varlen => self
                .shape
                .dims()
                .iter()
                .filter(|&&d| d > 0)
                .map(|&d| d as usize)
                .product(),
            _ => 1,
        }
    }
}

/// Tensor dtype an Avro leaf type decodes to.
pub(crate) fn leaf_dtype(schema: &AvroSchema) -> Option<DataType> {
    match schema {
        AvroSchema::Int => Some(DataType::Int32),
        AvroSchema::Long => Some(DataType::Int64),
        AvroSchema::Float => Some(DataType::Float),
        AvroSchema::Double => Some(DataType::Double),
        AvroSchema::Bytes | AvroSchema::String => Some(DataType::String),
        AvroSchema::Boolean => Some(DataType::Bool),
        _ => None,
    }
}
