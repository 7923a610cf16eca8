//! Feature metadata derived from a validated [`AtdsConfig`].

use std::sync::Arc;

use crate::atds::{assign_buffer_slots, DenseMetadata, FeatureType, SparseMetadata, ValueBuffer};
use crate::error::ReaderError;
use crate::tensor::{DataType, Tensor};

use super::config::AtdsConfig;

/// Where a feature's output comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
    /// Index into [`FeatureLayout::dense`]
    Dense(usize),
    /// Index into [`FeatureLayout::sparse`]
    Sparse(usize),
}

/// Requested features split by kind, with their buffer slots assigned and
/// the declaration order kept for output.
#[derive(Debug, Clone)]
pub struct FeatureLayout {
    dense: Vec<DenseMetadata>,
    sparse: Vec<SparseMetadata>,
    outputs: Vec<OutputSlot>,
    keys: Arc<[String]>,
}

impl FeatureLayout {
    /// Validate `config` and lay out its features.
    pub fn from_config(config: &AtdsConfig) -> Result<Self, ReaderError> {
        config.validate()?;

        let mut dense = Vec::new();
        let mut sparse = Vec::new();
        let mut outputs = Vec::with_capacity(config.feature_keys.len());

        for (i, (key, kind)) in config
            .feature_keys
            .iter()
            .zip(&config.feature_types)
            .enumerate()
        {
            match kind.parse::<FeatureType>()? {
                FeatureType::Dense => {
                    outputs.push(OutputSlot::Dense(dense.len()));
                    dense.push(DenseMetadata {
                        name: key.clone(),
                        dtype: config.output_dtypes[i],
                        shape: config.output_shapes[i].without_batch_dim(),
                        tensor_position: dense.len(),
                    });
                }
                feature_type => {
                    let n = sparse.len();
                    outputs.push(OutputSlot::Sparse(n));
                    sparse.push(SparseMetadata {
                        feature_type,
                        name: key.clone(),
                        dtype: config.sparse_dtypes[n],
                        shape: config.sparse_shapes[n].clone(),
                        indices_index: 0,
                        values_index: 0,
                    });
                }
            }
        }
        assign_buffer_slots(&mut sparse);

        Ok(Self {
            dense,
            sparse,
            outputs,
            keys: config.feature_keys.iter().cloned().collect(),
        })
    }

    pub fn dense(&self) -> &[DenseMetadata] {
        &self.dense
    }

    /// Sparse and varlen features in declaration order.
    pub fn sparse(&self) -> &[SparseMetadata] {
        &self.sparse
    }

    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    /// Feature names in output order.
    pub fn keys(&self) -> &Arc<[String]> {
        &self.keys
    }

    /// Sparse and varlen features holding values of `dtype`.
    pub fn num_sparse_of(&self, dtype: DataType) -> usize {
        self.sparse.iter().filter(|f| f.dtype == dtype).count()
    }

    /// An empty value buffer sized for `records` records.
    pub fn value_buffer(&self, records: usize) -> ValueBuffer {
        ValueBuffer::for_features(&self.sparse, records)
    }

    /// Zero-filled dense outputs for a batch of `batch_size` records, indexed
    /// by `tensor_position`.
    pub fn dense_tensors(&self, batch_size: usize) -> Vec<Tensor> {
        self.dense
            .iter()
            .map(|feature| {
                let mut shape = Vec::with_capacity(feature.shape.rank() + 1);
                shape.push(batch_size);
                shape.extend(feature.shape.dims().iter().map(|&d| d.max(0) as usize));
                Tensor::zeros(feature.dtype, shape)
            })
            .collect()
    }
}
