//! Host-memory tensors produced by the dataset.
//!
//! A batch holds one [`FeatureTensor`] per requested feature: a dense
//! [`Tensor`] whose leading dimension is the batch, or a COO
//! [`SparseTensor`] for sparse and varlen features.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::ReaderError;
use crate::reader::AvroDecode;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int32,
    Int64,
    Float,
    Double,
    /// Byte strings; Avro `string` and `bytes` both decode to this.
    String,
    Bool,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Int32,
        DataType::Int64,
        DataType::Float,
        DataType::Double,
        DataType::String,
        DataType::Bool,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float => "float32",
            DataType::Double => "float64",
            DataType::String => "string",
            DataType::Bool => "bool",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "float32" | "float" => Ok(DataType::Float),
            "float64" | "double" => Ok(DataType::Double),
            "string" | "bytes" => Ok(DataType::String),
            "bool" => Ok(DataType::Bool),
            other => Err(ReaderError::Configuration(format!(
                "Data type {} is not supported. Only int32, int64, float32, float64, string, and bool are supported.",
                other
            ))),
        }
    }
}

/// A shape whose dimensions may be unknown (`-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PartialShape(Vec<i64>);

impl PartialShape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Self(dims.into())
    }

    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dim(&self, i: usize) -> i64 {
        self.0[i]
    }

    pub fn is_fully_defined(&self) -> bool {
        self.0.iter().all(|&d| d >= 0)
    }

    /// Element count when every dimension is known.
    pub fn num_elements(&self) -> Option<usize> {
        self.0
            .iter()
            .try_fold(1usize, |acc, &d| usize::try_from(d).ok().map(|d| acc * d))
    }

    /// Drop the leading (batch) dimension.
    pub fn without_batch_dim(&self) -> Self {
        Self(self.0.iter().skip(1).copied().collect())
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if *d < 0 {
                write!(f, "?")?;
            } else {
                write!(f, "{}", d)?;
            }
        }
        write!(f, "]")
    }
}

impl From<Vec<i64>> for PartialShape {
    fn from(dims: Vec<i64>) -> Self {
        Self(dims)
    }
}

/// Flat, row-major tensor storage.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<Bytes>),
    Bool(Vec<bool>),
}

/// Mutable view over a contiguous part of [`TensorData`].
#[derive(Debug)]
pub enum TensorSliceMut<'a> {
    Int32(&'a mut [i32]),
    Int64(&'a mut [i64]),
    Float(&'a mut [f32]),
    Double(&'a mut [f64]),
    String(&'a mut [Bytes]),
    Bool(&'a mut [bool]),
}

macro_rules! for_each_variant {
    ($value:expr, $v:ident => $body:expr) => {
        match $value {
            TensorData::Int32($v) => $body,
            TensorData::Int64($v) => $body,
            TensorData::Float($v) => $body,
            TensorData::Double($v) => $body,
            TensorData::String($v) => $body,
            TensorData::Bool($v) => $body,
        }
    };
}

impl TensorData {
    /// Default-filled storage for `len` elements.
    pub fn zeros(dtype: DataType, len: usize) -> Self {
        match dtype {
            DataType::Int32 => TensorData::Int32(vec![0; len]),
            DataType::Int64 => TensorData::Int64(vec![0; len]),
            DataType::Float => TensorData::Float(vec![0.0; len]),
            DataType::Double => TensorData::Double(vec![0.0; len]),
            DataType::String => TensorData::String(vec![Bytes::new(); len]),
            DataType::Bool => TensorData::Bool(vec![false; len]),
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::Int32(_) => DataType::Int32,
            TensorData::Int64(_) => DataType::Int64,
            TensorData::Float(_) => DataType::Float,
            TensorData::Double(_) => DataType::Double,
            TensorData::String(_) => DataType::String,
            TensorData::Bool(_) => DataType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice_mut(&mut self) -> TensorSliceMut<'_> {
        match self {
            TensorData::Int32(v) => TensorSliceMut::Int32(v),
            TensorData::Int64(v) => TensorSliceMut::Int64(v),
            TensorData::Float(v) => TensorSliceMut::Float(v),
            TensorData::Double(v) => TensorSliceMut::Double(v),
            TensorData::String(v) => TensorSliceMut::String(v),
            TensorData::Bool(v) => TensorSliceMut::Bool(v),
        }
    }
}

impl<'a> TensorSliceMut<'a> {
    pub fn len(&self) -> usize {
        match self {
            TensorSliceMut::Int32(v) => v.len(),
            TensorSliceMut::Int64(v) => v.len(),
            TensorSliceMut::Float(v) => v.len(),
            TensorSliceMut::Double(v) => v.len(),
            TensorSliceMut::String(v) => v.len(),
            TensorSliceMut::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into `[0, mid)` and `[mid, len)`, like `split_at_mut`.
    pub fn split_at(self, mid: usize) -> (Self, Self) {
        match self {
            TensorSliceMut::Int32(v) => {
                let (a, b) = v.split_at_mut(mid);
                (TensorSliceMut::Int32(a), TensorSliceMut::Int32(b))
            }
            TensorSliceMut::Int64(v) => {
                let (a, b) = v.split_at_mut(mid);
                (TensorSliceMut::Int64(a), TensorSliceMut::Int64(b))
            }
            TensorSliceMut::Float(v) => {
                let (a, b) = v.split_at_mut(mid);
                (TensorSliceMut::Float(a), TensorSliceMut::Float(b))
            }
            TensorSliceMut::Double(v) => {
                let (a, b) = v.split_at_mut(mid);
                (TensorSliceMut::Double(a), TensorSliceMut::Double(b))
            }
            TensorSliceMut::String(v) => {
                let (a, b) = v.split_at_mut(mid);
                (TensorSliceMut::String(a), TensorSliceMut::String(b))
            }
            TensorSliceMut::Bool(v) => {
                let (a, b) = v.split_at_mut(mid);
                (TensorSliceMut::Bool(a), TensorSliceMut::Bool(b))
            }
        }
    }
}

/// A scalar type that can live in a tensor.
pub trait Element: AvroDecode + Clone + Default + Send + Sync + 'static {
    const DTYPE: DataType;

    fn slice(data: &TensorData) -> Option<&[Self]>;

    fn view_mut<'b>(view: &'b mut TensorSliceMut<'_>) -> Option<&'b mut [Self]>;

    fn into_data(values: Vec<Self>) -> TensorData;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DataType = DataType::$variant;

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn view_mut<'b>(view: &'b mut TensorSliceMut<'_>) -> Option<&'b mut [Self]> {
                match view {
                    TensorSliceMut::$variant(v) => Some(&mut **v),
                    _ => None,
                }
            }

            fn into_data(values: Vec<Self>) -> TensorData {
                TensorData::$variant(values)
            }
        }
    };
}

impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(f32, Float);
impl_element!(f64, Double);
impl_element!(Bytes, String);
impl_element!(bool, Bool);

/// Run `$body` with `$T` bound to the Rust type of a [`DataType`].
macro_rules! with_dtype {
    ($dtype:expr, $T:ident => $body:expr) => {
        match $dtype {
            $crate::tensor::DataType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::tensor::DataType::Int64 => {
                type $T = i64;
                $body
            }
            $crate::tensor::DataType::Float => {
                type $T = f32;
                $body
            }
            $crate::tensor::DataType::Double => {
                type $T = f64;
                $body
            }
            $crate::tensor::DataType::String => {
                type $T = ::bytes::Bytes;
                $body
            }
            $crate::tensor::DataType::Bool => {
                type $T = bool;
                $body
            }
        }
    };
}
pub(crate) use with_dtype;

/// A dense tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

impl Tensor {
    /// Build a tensor, checking that `data` holds exactly the elements
    /// `shape` describes.
    pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, ReaderError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ReaderError::Internal(format!(
                "Tensor of shape {:?} needs {} elements but {} were given",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: TensorData::zeros(dtype, len),
        }
    }

    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self, ReaderError> {
        Self::new(shape, T::into_data(values))
    }

    pub fn dtype(&self) -> DataType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// Typed view of the elements, `None` on a dtype mismatch.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }
}

/// Sparse tensor in coordinate format.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor {
    /// int64 `[nnz, rank]`
    pub indices: Tensor,
    /// `[nnz]`
    pub values: Tensor,
    /// int64 `[rank]`, batch size first
    pub dense_shape: Tensor,
}

impl SparseTensor {
    pub fn nnz(&self) -> usize {
        self.values.num_elements()
    }

    pub fn indices(&self) -> &[i64] {
        self.indices.as_slice::<i64>().unwrap_or(&[])
    }

    pub fn dense_shape(&self) -> &[i64] {
        self.dense_shape.as_slice::<i64>().unwrap_or(&[])
    }
}

/// Decoded value of one feature for a whole batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureTensor {
    Dense(Tensor),
    Sparse(SparseTensor),
}

impl FeatureTensor {
    pub fn as_dense(&self) -> Option<&Tensor> {
        match self {
            FeatureTensor::Dense(t) => Some(t),
            FeatureTensor::Sparse(_) => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&SparseTensor> {
        match self {
            FeatureTensor::Sparse(t) => Some(t),
            FeatureTensor::Dense(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_parse() {
        assert_eq!("int32".parse::<DataType>().unwrap(), DataType::Int32);
        assert_eq!("float".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("float64".parse::<DataType>().unwrap(), DataType::Double);
        assert!("complex64".parse::<DataType>().is_err());
        for dtype in DataType::ALL {
            assert_eq!(dtype.name().parse::<DataType>().unwrap(), dtype);
        }
    }

    #[test]
    fn test_partial_shape() {
        let shape = PartialShape::new(vec![-1, 3, 4]);
        assert_eq!(shape.rank(), 3);
        assert!(!shape.is_fully_defined());
        assert_eq!(shape.num_elements(), None);
        let inner = shape.without_batch_dim();
        assert_eq!(inner.dims(), &[3, 4]);
        assert_eq!(inner.num_elements(), Some(12));
        assert_eq!(shape.to_string(), "[?,3,4]");
        assert_eq!(PartialShape::scalar().num_elements(), Some(1));
    }

    #[test]
    fn test_tensor_new_checks_len() {
        assert!(Tensor::from_vec(vec![2, 2], vec![1i64, 2, 3]).is_err());
        let t = Tensor::from_vec(vec![2, 2], vec![1i64, 2, 3, 4]).unwrap();
        assert_eq!(t.dtype(), DataType::Int64);
        assert_eq!(t.as_slice::<i64>(), Some(&[1i64, 2, 3, 4][..]));
        assert!(t.as_slice::<i32>().is_none());
    }

    #[test]
    fn test_slice_split_writes_through() {
        let mut t = Tensor::zeros(DataType::Float, vec![4, 2]);
        {
            let (mut a, mut b) = t.data_mut().as_slice_mut().split_at(4);
            assert_eq!(a.len(), 4);
            f32::view_mut(&mut a).unwrap()[0] = 1.0;
            f32::view_mut(&mut b).unwrap()[3] = 2.0;
            assert!(i32::view_mut(&mut b).is_none());
        }
        assert_eq!(
            t.as_slice::<f32>().unwrap(),
            &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_with_dtype_dispatch() {
        fn size_of(dtype: DataType) -> usize {
            with_dtype!(dtype, T => std::mem::size_of::<T>())
        }
        assert_eq!(size_of(DataType::Int32), 4);
        assert_eq!(size_of(DataType::Double), 8);
        assert_eq!(size_of(DataType::Bool), 1);
    }
}
