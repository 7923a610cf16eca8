//! Dataset configuration
//!
//! [`AtdsConfig`] carries the raw options of an ATDS dataset: parallel arrays
//! describing every requested feature plus the batching, buffering and
//! parallelism knobs. Features can also be added one at a time with
//! [`AtdsConfig::with_feature`], which keeps them sorted by name and fills
//! the arrays.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use crate::atds::FeatureType;
use crate::error::ReaderError;
use crate::tensor::{DataType, PartialShape};

/// `num_parallel_calls` value that lets the iterator pick the thread count.
pub const AUTOTUNE: i64 = -1;

/// Default size of each range request made against a file (128 KiB).
pub const DEFAULT_READER_BUFFER_SIZE: i64 = 128 * 1024;

/// A typed feature request.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureSpec {
    /// Fixed shape, every dimension > 0
    Dense { dtype: DataType, shape: Vec<i64> },
    /// Coordinate list with a non-scalar shape; `-1` marks dimensions taken
    /// from the data
    Sparse { dtype: DataType, shape: Vec<i64> },
    /// Nested arrays whose `-1` dimensions vary per record
    Varlen { dtype: DataType, shape: Vec<i64> },
}

impl FeatureSpec {
    pub fn dense(dtype: DataType, shape: impl Into<Vec<i64>>) -> Self {
        FeatureSpec::Dense {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn sparse(dtype: DataType, shape: impl Into<Vec<i64>>) -> Self {
        FeatureSpec::Sparse {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn varlen(dtype: DataType, shape: impl Into<Vec<i64>>) -> Self {
        FeatureSpec::Varlen {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn feature_type(&self) -> FeatureType {
        match self {
            FeatureSpec::Dense { .. } => FeatureType::Dense,
            FeatureSpec::Sparse { .. } => FeatureType::Sparse,
            FeatureSpec::Varlen { .. } => FeatureType::Varlen,
        }
    }

    pub fn dtype(&self) -> DataType {
        match self {
            FeatureSpec::Dense { dtype, .. }
            | FeatureSpec::Sparse { dtype, .. }
            | FeatureSpec::Varlen { dtype, .. } => *dtype,
        }
    }

    /// Per-record shape.
    pub fn shape(&self) -> &[i64] {
        match self {
            FeatureSpec::Dense { shape, .. }
            | FeatureSpec::Sparse { shape, .. }
            | FeatureSpec::Varlen { shape, .. } => shape,
        }
    }

    /// Check the shape against what each kind allows.
    pub fn validate(&self) -> Result<(), ReaderError> {
        let shape = self.shape();
        if shape.contains(&0) {
            return Err(ReaderError::Configuration(format!(
                "Dimension in shape cannot be None or 0 but found {:?}.",
                shape
            )));
        }
        match self {
            FeatureSpec::Dense { .. } if shape.iter().any(|&d| d <= 0) => {
                Err(ReaderError::Configuration(format!(
                    "Each dimension should be greater than 0 in DenseFeature but found {:?}.",
                    shape
                )))
            }
            FeatureSpec::Sparse { .. } if shape.is_empty() => Err(ReaderError::Configuration(
                "SparseFeature cannot be scalar.".to_string(),
            )),
            FeatureSpec::Varlen { .. } if shape.iter().any(|&d| d < -1) => {
                Err(ReaderError::Configuration(format!(
                    "Each dimension should be greater than 0 or -1 in VarlenFeature but found {:?}.",
                    shape
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Options of an ATDS dataset.
///
/// Numeric options are kept signed so out-of-range values are reported by
/// [`validate`](Self::validate) with the value the caller passed.
#[derive(Debug, Clone)]
pub struct AtdsConfig {
    /// Files to read, in order. All must share one writer schema.
    pub filenames: Vec<String>,
    /// Records per batch (must be > 0)
    pub batch_size: i64,
    /// Discard a final batch shorter than `batch_size`
    pub drop_remainder: bool,
    /// Bytes per range request against a file (must be > 0)
    pub reader_buffer_size: i64,
    /// Extra records buffered for shuffling; 0 reads in file order
    pub shuffle_buffer_size: i64,
    /// Decode threads (> 0), or [`AUTOTUNE`]
    pub num_parallel_calls: i64,
    pub feature_keys: Vec<String>,
    /// `dense`, `sparse` or `varlen`, aligned with `feature_keys`
    pub feature_types: Vec<String>,
    /// Dtypes of the sparse and varlen features, in declaration order
    pub sparse_dtypes: Vec<DataType>,
    /// Per-record shapes of the sparse and varlen features
    pub sparse_shapes: Vec<PartialShape>,
    /// Dtype of every feature, aligned with `feature_keys`
    pub output_dtypes: Vec<DataType>,
    /// Batched shape of every feature, aligned with `feature_keys`
    pub output_shapes: Vec<PartialShape>,
    /// Size of the decode thread pool
    pub max_parallelism: usize,
    features: BTreeMap<String, FeatureSpec>,
}

impl Default for AtdsConfig {
    fn default() -> Self {
        Self {
            filenames: Vec::new(),
            batch_size: 1,
            drop_remainder: false,
            reader_buffer_size: DEFAULT_READER_BUFFER_SIZE,
            shuffle_buffer_size: 0,
            num_parallel_calls: 1,
            feature_keys: Vec::new(),
            feature_types: Vec::new(),
            sparse_dtypes: Vec::new(),
            sparse_shapes: Vec::new(),
            output_dtypes: Vec::new(),
            output_shapes: Vec::new(),
            max_parallelism: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            features: BTreeMap::new(),
        }
    }
}

impl AtdsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filenames<I, S>(mut self, filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filenames = filenames.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_drop_remainder(mut self, drop_remainder: bool) -> Self {
        self.drop_remainder = drop_remainder;
        self
    }

    pub fn with_reader_buffer_size(mut self, bytes: i64) -> Self {
        self.reader_buffer_size = bytes;
        self
    }

    pub fn with_shuffle_buffer_size(mut self, records: i64) -> Self {
        self.shuffle_buffer_size = records;
        self
    }

    /// Set the decode thread count, or [`AUTOTUNE`].
    pub fn with_num_parallel_calls(mut self, num_parallel_calls: i64) -> Self {
        self.num_parallel_calls = num_parallel_calls;
        self
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    /// Request a feature by name.
    ///
    /// Features added this way are ordered by name and replace whatever the
    /// feature arrays held before.
    pub fn with_feature(mut self, name: impl Into<String>, spec: FeatureSpec) -> Self {
        self.features.insert(name.into(), spec);
        self.expand_features();
        self
    }

    /// Typed features added with [`with_feature`](Self::with_feature).
    pub fn features(&self) -> impl Iterator<Item = (&str, &FeatureSpec)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn expand_features(&mut self) {
        self.feature_keys.clear();
        self.feature_types.clear();
        self.sparse_dtypes.clear();
        self.sparse_shapes.clear();
        self.output_dtypes.clear();
        self.output_shapes.clear();

        for (name, spec) in &self.features {
            let kind = spec.feature_type();
            self.feature_keys.push(name.clone());
            self.feature_types.push(kind.name().to_string());
            if kind != FeatureType::Dense {
                self.sparse_dtypes.push(spec.dtype());
                self.sparse_shapes.push(PartialShape::new(spec.shape()));
            }
            let mut batched = Vec::with_capacity(spec.shape().len() + 1);
            batched.push(-1);
            batched.extend_from_slice(spec.shape());
            self.output_dtypes.push(spec.dtype());
            self.output_shapes.push(PartialShape::new(batched));
        }
    }

    /// Number of sparse and varlen features.
    pub fn num_sparse(&self) -> usize {
        self.feature_types
            .iter()
            .filter(|t| *t == FeatureType::Sparse.name() || *t == FeatureType::Varlen.name())
            .count()
    }

    /// Check every option, returning the first problem found.
    pub fn validate(&self) -> Result<(), ReaderError> {
        let invalid = |msg: String| Err(ReaderError::Configuration(msg));

        if self.feature_keys.is_empty() {
            return invalid(
                "Features dict cannot be empty and should have at least one feature.".to_string(),
            );
        }
        for spec in self.features.values() {
            spec.validate()?;
        }

        let feature_num = self.feature_keys.len();
        for (name, len) in [
            ("feature_types", self.feature_types.len()),
            ("output_dtypes", self.output_dtypes.len()),
            ("output_shapes", self.output_shapes.len()),
        ] {
            if len != feature_num {
                return invalid(format!(
                    "The length of feature_keys must equal to the length of {}. [{} != {}]",
                    name, feature_num, len
                ));
            }
        }

        for t in &self.feature_types {
            if t.parse::<FeatureType>().is_err() {
                return invalid(format!(
                    "Invalid feature_type, '{}'. Only {}, {}, and {} are supported.",
                    t,
                    FeatureType::Dense,
                    FeatureType::Sparse,
                    FeatureType::Varlen
                ));
            }
        }

        let num_sparse = self.num_sparse();
        for (name, len) in [
            ("sparse_dtypes", self.sparse_dtypes.len()),
            ("sparse_shapes", self.sparse_shapes.len()),
        ] {
            if len != num_sparse {
                return invalid(format!(
                    "The length of {} must equal to the number of sparse features configured in feature_types. [{} != {}]",
                    name, len, num_sparse
                ));
            }
        }

        for ((key, t), shape) in self
            .feature_keys
            .iter()
            .zip(&self.feature_types)
            .zip(&self.output_shapes)
        {
            if t == FeatureType::Dense.name()
                && (shape.rank() == 0 || !shape.without_batch_dim().is_fully_defined())
            {
                return invalid(format!(
                    "Dense feature '{}' must have a fully defined shape after the batch dimension but found {}.",
                    key, shape
                ));
            }
        }

        if self.batch_size <= 0 {
            return invalid(format!(
                "`batch_size` must be greater than 0 but found {}",
                self.batch_size
            ));
        }
        if self.reader_buffer_size <= 0 {
            return invalid(format!(
                "`reader_buffer_size` must be greater than 0 but found {}",
                self.reader_buffer_size
            ));
        }
        if self.shuffle_buffer_size < 0 {
            return invalid(format!(
                "`shuffle_buffer_size` must be greater than or equal to 0 but found {}",
                self.shuffle_buffer_size
            ));
        }
        if self.num_parallel_calls <= 0 && self.num_parallel_calls != AUTOTUNE {
            return invalid(format!(
                "`num_parallel_calls` must be a positive integer or AUTOTUNE, got {}",
                self.num_parallel_calls
            ));
        }
        if self.max_parallelism == 0 {
            return invalid("`max_parallelism` must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Buffered record count at which the prefetch task pauses.
    pub(crate) fn total_buffer_size(&self) -> usize {
        (self.batch_size.max(0) + self.shuffle_buffer_size.max(0)) as usize
    }

    /// Decode pool size: `num_parallel_calls` when it is a usable explicit
    /// count, otherwise `max_parallelism`.
    pub(crate) fn pool_size(&self) -> usize {
        match usize::try_from(self.num_parallel_calls) {
            Ok(n) if n > 0 && n <= self.max_parallelism => n,
            _ => self.max_parallelism,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed() -> AtdsConfig {
        AtdsConfig::new()
            .with_filenames(["a.avro"])
            .with_batch_size(4)
            .with_feature("z_dense", FeatureSpec::dense(DataType::Float, [3]))
            .with_feature("a_sparse", FeatureSpec::sparse(DataType::Int64, [-1, 10]))
            .with_feature("m_varlen", FeatureSpec::varlen(DataType::String, [-1]))
    }

    #[test]
    fn test_features_sorted_and_expanded() {
        let config = mixed();
        assert_eq!(config.feature_keys, vec!["a_sparse", "m_varlen", "z_dense"]);
        assert_eq!(config.feature_types, vec!["sparse", "varlen", "dense"]);
        assert_eq!(config.sparse_dtypes, vec![DataType::Int64, DataType::String]);
        assert_eq!(config.sparse_shapes[0].dims(), &[-1, 10]);
        assert_eq!(config.output_shapes[2].dims(), &[-1, 3]);
        assert_eq!(config.num_sparse(), 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_option_messages() {
        let err = mixed().with_batch_size(0).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: `batch_size` must be greater than 0 but found 0"
        );

        let err = mixed().with_reader_buffer_size(-5).validate().unwrap_err();
        assert!(err.to_string().contains("`reader_buffer_size` must be greater than 0 but found -5"));

        let err = mixed().with_shuffle_buffer_size(-1).validate().unwrap_err();
        assert!(err.to_string().contains("greater than or equal to 0 but found -1"));

        let err = mixed().with_num_parallel_calls(-3).validate().unwrap_err();
        assert!(err.to_string().contains("got -3"));
        mixed().with_num_parallel_calls(AUTOTUNE).validate().unwrap();
    }

    #[test]
    fn test_array_lengths() {
        let mut config = mixed();
        config.output_dtypes.pop();
        let err = config.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("The length of feature_keys must equal to the length of output_dtypes. [3 != 2]"));

        let mut config = mixed();
        config.sparse_shapes.pop();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sparse_shapes must equal to the number of sparse features configured in feature_types. [1 != 2]"));

        let mut config = mixed();
        config.feature_types[0] = "ragged".to_string();
        let err = config.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("Invalid feature_type, 'ragged'. Only dense, sparse, and varlen are supported."));
    }

    #[test]
    fn test_feature_shapes() {
        let err = FeatureSpec::dense(DataType::Int32, [-1, 2]).validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("Each dimension should be greater than 0 in DenseFeature but found [-1, 2]."));

        let err = FeatureSpec::sparse(DataType::Int64, []).validate().unwrap_err();
        assert!(err.to_string().contains("SparseFeature cannot be scalar."));

        let err = FeatureSpec::sparse(DataType::Int64, [3, 0]).validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("Dimension in shape cannot be None or 0 but found [3, 0]."));

        let err = FeatureSpec::varlen(DataType::Int32, [-2, 5]).validate().unwrap_err();
        assert!(err.to_string().contains("greater than 0 or -1 in VarlenFeature"));

        FeatureSpec::varlen(DataType::Int32, [-1, 5]).validate().unwrap();
        FeatureSpec::dense(DataType::Bool, []).validate().unwrap();
    }

    #[test]
    fn test_empty_features() {
        let err = AtdsConfig::new().validate().unwrap_err();
        assert!(err.to_string().contains("Features dict cannot be empty"));
    }

    #[test]
    fn test_dense_shape_must_be_known() {
        let mut config = mixed();
        config.output_shapes[2] = PartialShape::new(vec![-1, -1]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Dense feature 'z_dense'"));
    }

    #[test]
    fn test_pool_size() {
        let config = mixed().with_max_parallelism(8);
        assert_eq!(config.pool_size(), 1);
        assert_eq!(config.clone().with_num_parallel_calls(4).pool_size(), 4);
        assert_eq!(config.clone().with_num_parallel_calls(16).pool_size(), 8);
        assert_eq!(config.with_num_parallel_calls(AUTOTUNE).pool_size(), 8);
    }

    #[test]
    fn test_total_buffer_size() {
        let config = mixed().with_shuffle_buffer_size(100);
        assert_eq!(config.total_buffer_size(), 104);
    }
}
