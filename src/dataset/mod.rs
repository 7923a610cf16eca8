//! Batched, optionally shuffled reading of ATDS files.
//!
//! An [`AtdsDataset`] is built from an [`AtdsConfig`]; each call to
//! [`AtdsDataset::iter`] starts an independent pass over the files.
//!
//! # Example
//! ```ignore
//! use atds::dataset::{AtdsConfig, AtdsDataset, FeatureSpec};
//! use atds::tensor::DataType;
//!
//! let config = AtdsConfig::new()
//!     .with_filenames(["part-0.avro", "part-1.avro"])
//!     .with_batch_size(256)
//!     .with_shuffle_buffer_size(4096)
//!     .with_feature("label", FeatureSpec::dense(DataType::Float, []))
//!     .with_feature("tokens", FeatureSpec::varlen(DataType::Int64, [-1]));
//! let dataset = AtdsDataset::new(config)?;
//! let mut batches = dataset.iter()?;
//! while let Some(batch) = batches.next_batch().await? {
//!     println!("{} records", batch.num_records());
//! }
//! ```

mod autotune;
mod batch;
mod config;
mod iterator;
mod layout;
mod merge;
mod prefetch;

use std::sync::Arc;

use tracing::info;

pub use autotune::{BlockCost, CostModel, DecodeStats, TimingCostModel, WorkerStats};
pub use batch::Batch;
pub use config::{AtdsConfig, FeatureSpec, AUTOTUNE, DEFAULT_READER_BUFFER_SIZE};
pub use iterator::AtdsIterator;
pub use layout::{FeatureLayout, OutputSlot};
pub use merge::merge_sparse;

use crate::error::ReaderError;
use crate::shuffle::ShuffleHandler;
use crate::source::{LocalFileSystem, SourceProvider};

use batch::{BatchContext, DecodeState};
use prefetch::{Prefetcher, Shared};

/// A validated dataset configuration bound to a way of opening files.
#[derive(Clone)]
pub struct AtdsDataset {
    config: AtdsConfig,
    layout: Arc<FeatureLayout>,
    provider: Arc<dyn SourceProvider>,
    cost_model: Arc<dyn CostModel>,
}

impl AtdsDataset {
    /// Read files from the local file system.
    pub fn new(config: AtdsConfig) -> Result<Self, ReaderError> {
        Self::with_provider(config, Arc::new(LocalFileSystem))
    }

    /// Read files through `provider`.
    pub fn with_provider(
        config: AtdsConfig,
        provider: Arc<dyn SourceProvider>,
    ) -> Result<Self, ReaderError> {
        let layout = FeatureLayout::from_config(&config)?;
        Ok(Self {
            config,
            layout: Arc::new(layout),
            provider,
            cost_model: Arc::new(TimingCostModel),
        })
    }

    /// Replace the model used to pick thread counts and split blocks.
    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn config(&self) -> &AtdsConfig {
        &self.config
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    /// Start a pass over the files.
    pub fn iter(&self) -> Result<AtdsIterator, ReaderError> {
        self.iter_with_shuffle(ShuffleHandler::new())
    }

    /// Start a pass with a given shuffle handler, e.g. a seeded one.
    pub fn iter_with_shuffle(&self, shuffle: ShuffleHandler) -> Result<AtdsIterator, ReaderError> {
        let config = &self.config;
        let pool_size = config.pool_size();
        if config.num_parallel_calls == AUTOTUNE {
            info!("Thread autotuning enabled");
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .thread_name(|i| format!("atds-decode-{}", i))
            .build()
            .map_err(|e| {
                ReaderError::Internal(format!("Failed to build decode thread pool: {}", e))
            })?;
        info!(threads = pool_size, "Created decode thread pool");

        let batch_size = config.batch_size as usize;
        let shared = Arc::new(Shared::new(config.total_buffer_size()));
        let prefetcher = Prefetcher {
            shared: Arc::clone(&shared),
            provider: Arc::clone(&self.provider),
            filenames: config.filenames.iter().cloned().collect(),
            buffer_size: config.reader_buffer_size as usize,
            layout: Arc::clone(&self.layout),
        };
        let ctx = BatchContext {
            layout: Arc::clone(&self.layout),
            pool,
            cost_model: Arc::clone(&self.cost_model),
            num_parallel_calls: config.num_parallel_calls,
            shuffle: config.shuffle_buffer_size > 0,
        };
        let state = DecodeState::new(shuffle, config.max_parallelism.max(pool_size));

        Ok(AtdsIterator::new(
            shared,
            prefetcher,
            ctx,
            state,
            batch_size,
            config.drop_remainder,
        ))
    }
}

impl std::fmt::Debug for AtdsDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtdsDataset")
            .field("config", &self.config)
            .field("layout", &self.layout)
            .field("cost_model", &self.cost_model)
            .finish()
    }
}
