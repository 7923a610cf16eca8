//! Decoding one batch from the buffered blocks.
//!
//! Records are claimed by the shuffle handler, the claimed blocks are split
//! into contiguous ranges, and each range is decoded by one worker of the
//! decode pool. Dense outputs are written in place: each worker owns the
//! slice of every dense tensor covering its records. Sparse and varlen
//! outputs go to a private [`ValueBuffer`] per worker and are merged once
//! all workers are done.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::debug;

use crate::atds::{AtdsDecoder, DenseBatch, ValueBuffer};
use crate::codec::Codec;
use crate::error::ReaderError;
use crate::reader::AvroBlock;
use crate::shuffle::ShuffleHandler;
use crate::tensor::{FeatureTensor, SparseTensor, Tensor, TensorSliceMut};

use super::autotune::{BlockCost, CostModel, DecodeStats, WorkerStats};
use super::config::AUTOTUNE;
use super::layout::{FeatureLayout, OutputSlot};
use super::merge::merge_sparse;

/// One batch of decoded features, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    keys: Arc<[String]>,
    features: Vec<FeatureTensor>,
    num_records: usize,
}

impl Batch {
    /// Records in this batch. Only the final batch may hold fewer than
    /// `batch_size`.
    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn features(&self) -> &[FeatureTensor] {
        &self.features
    }

    pub fn get(&self, name: &str) -> Option<&FeatureTensor> {
        self.keys
            .iter()
            .position(|k| k == name)
            .and_then(|i| self.features.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureTensor)> {
        self.keys.iter().map(String::as_str).zip(&self.features)
    }

    pub fn into_features(self) -> Vec<FeatureTensor> {
        self.features
    }
}

/// Settings shared by every batch of one iterator.
#[derive(Debug)]
pub(crate) struct BatchContext {
    pub layout: Arc<FeatureLayout>,
    pub pool: rayon::ThreadPool,
    pub cost_model: Arc<dyn CostModel>,
    pub num_parallel_calls: i64,
    pub shuffle: bool,
}

/// Consumer-side state carried from batch to batch.
#[derive(Debug)]
pub(crate) struct DecodeState {
    /// Blocks with undecoded records, in read order
    pub blocks: Vec<AvroBlock>,
    pub shuffle: ShuffleHandler,
    pub stats: DecodeStats,
}

struct WorkerJob<'a> {
    blocks: &'a mut [AvroBlock],
    dense: DenseBatch<'a>,
}

struct WorkerOutput {
    buffer: ValueBuffer,
    stats: WorkerStats,
    result: Result<(), ReaderError>,
}

impl DecodeState {
    pub fn new(shuffle: ShuffleHandler, max_threads: usize) -> Self {
        Self {
            blocks: Vec::new(),
            shuffle,
            stats: DecodeStats::new(max_threads),
        }
    }

    /// Undecoded records across all blocks.
    pub fn remaining(&self) -> usize {
        self.blocks.iter().map(AvroBlock::remaining).sum()
    }

    fn block_costs(&self) -> Vec<BlockCost> {
        self.blocks.iter().map(BlockCost::from).collect()
    }

    fn num_threads(&self, ctx: &BatchContext, batch_size: usize) -> usize {
        let mut num_threads = self.blocks.len().min(ctx.pool.current_num_threads());
        if ctx.num_parallel_calls > 0 {
            num_threads = num_threads.min(ctx.num_parallel_calls as usize);
        } else if ctx.num_parallel_calls == AUTOTUNE {
            num_threads = ctx.cost_model.choose_threads(
                &self.stats,
                &self.block_costs(),
                batch_size,
                num_threads,
            );
        }
        num_threads.max(1)
    }

    /// Decode the next `batch_size` records. `batch_size` must not exceed
    /// [`remaining`](Self::remaining).
    ///
    /// On failure every claim of this batch is released, so the records of
    /// blocks that were not reached stay available.
    pub fn decode_batch(
        &mut self,
        ctx: &BatchContext,
        decoder: &AtdsDecoder,
        batch_size: usize,
    ) -> Result<Batch, ReaderError> {
        let num_threads = self.num_threads(ctx, batch_size);
        self.stats.resize(num_threads);

        let claimed = self
            .shuffle
            .sample_blocks(batch_size, ctx.shuffle, &mut self.blocks);
        let ranges =
            ctx.cost_model
                .block_ranges(&self.stats, &self.block_costs(), batch_size, num_threads);

        let mut dense = ctx.layout.dense_tensors(claimed);
        let outputs = {
            let jobs = split_jobs(&mut self.blocks, &ranges, &mut dense, &ctx.layout);
            let layout = &ctx.layout;
            ctx.pool.install(|| {
                jobs.into_par_iter()
                    .map(|job| job.run(decoder, layout))
                    .collect::<Vec<_>>()
            })
        };

        let worker_stats: Vec<WorkerStats> = outputs.iter().map(|o| o.stats).collect();
        self.stats.record_batch(&worker_stats);

        let mut buffers = Vec::with_capacity(outputs.len());
        for output in outputs {
            if let Err(e) = output.result {
                self.release_claims();
                return Err(e);
            }
            buffers.push(output.buffer);
        }

        let sparse = merge_sparse(ctx.layout.sparse(), &mut buffers, claimed)?;
        let features = assemble(ctx.layout.outputs(), dense, sparse)?;

        debug!(
            records = claimed,
            blocks = self.blocks.len(),
            threads = num_threads,
            "Decoded batch"
        );
        Ok(Batch {
            keys: ctx.layout.keys().clone(),
            features,
            num_records: claimed,
        })
    }

    fn release_claims(&mut self) {
        for block in &mut self.blocks {
            block.num_to_decode = 0;
        }
    }
}

/// Cut the blocks and every dense tensor into one piece per worker range.
fn split_jobs<'a>(
    blocks: &'a mut [AvroBlock],
    ranges: &[usize],
    dense: &'a mut [Tensor],
    layout: &FeatureLayout,
) -> Vec<WorkerJob<'a>> {
    let sizes: Vec<usize> = layout
        .dense()
        .iter()
        .map(|f| f.shape.num_elements().unwrap_or(0))
        .collect();
    let mut views: Vec<TensorSliceMut<'a>> = dense
        .iter_mut()
        .map(|t| t.data_mut().as_slice_mut())
        .collect();

    let num_blocks = blocks.len();
    let mut rest = blocks;
    let mut start = 0;
    let mut first_record = 0;
    let mut jobs = Vec::with_capacity(ranges.len());
    for &end in ranges {
        let end = end.clamp(start, num_blocks);
        let (mine, tail) = std::mem::take(&mut rest).split_at_mut(end - start);
        rest = tail;
        start = end;

        let num_records: usize = mine.iter().map(|b| b.num_to_decode).sum();
        let mut tensors = Vec::with_capacity(views.len());
        views = views
            .into_iter()
            .zip(&sizes)
            .map(|(view, &size)| {
                let (head, tail) = view.split_at(num_records * size);
                tensors.push(head);
                tail
            })
            .collect();

        jobs.push(WorkerJob {
            blocks: mine,
            dense: DenseBatch::new(first_record, num_records, tensors),
        });
        first_record += num_records;
    }
    jobs
}

impl WorkerJob<'_> {
    fn run(mut self, decoder: &AtdsDecoder, layout: &FeatureLayout) -> WorkerOutput {
        let mut stats = WorkerStats::start();
        let mut buffer = layout.value_buffer(self.dense.num_records());
        let mut result = Ok(());
        for block in self.blocks.iter_mut() {
            if block.codec == Codec::Null && block.num_to_decode == 0 {
                continue;
            }
            if let Err(e) = decode_block(block, decoder, &mut self.dense, &mut buffer, &mut stats) {
                result = Err(e);
                break;
            }
        }
        WorkerOutput {
            buffer,
            stats,
            result,
        }
    }
}

/// Decompress `block` if needed and decode its claimed records.
fn decode_block(
    block: &mut AvroBlock,
    decoder: &AtdsDecoder,
    dense: &mut DenseBatch<'_>,
    buffer: &mut ValueBuffer,
    stats: &mut WorkerStats,
) -> Result<(), ReaderError> {
    let mut offset = block.counts - block.num_to_decode;

    if block.codec != Codec::Null {
        let started = Instant::now();
        block.decompress()?;
        stats.decompress_micros += started.elapsed().as_micros() as u64;
        stats.decompressed_objects += block.object_count as u64;
    }

    let content = block.content.get(block.read_offset..).ok_or_else(|| {
        ReaderError::Internal(format!(
            "Read offset {} is past the end of a {} byte block",
            block.read_offset,
            block.content.len()
        ))
    })?;
    let mut data = content;
    while block.num_to_decode > 0 {
        let started = Instant::now();
        if let Err(e) = decoder.decode_datum(&mut data, dense, buffer, offset) {
            block.num_decoded = block.object_count;
            block.num_to_decode = 0;
            return Err(e.into());
        }
        stats.decode_micros += started.elapsed().as_micros() as u64;
        stats.records_parsed += 1;
        offset += 1;
        block.num_decoded += 1;
        block.num_to_decode -= 1;
    }

    let consumed = content.len() - data.len();
    if block.num_decoded < block.object_count {
        block.read_offset += consumed;
    }
    Ok(())
}

/// Put dense and sparse outputs in declaration order.
fn assemble(
    outputs: &[OutputSlot],
    dense: Vec<Tensor>,
    sparse: Vec<SparseTensor>,
) -> Result<Vec<FeatureTensor>, ReaderError> {
    let mut dense: Vec<Option<Tensor>> = dense.into_iter().map(Some).collect();
    let mut sparse: Vec<Option<_>> = sparse.into_iter().map(Some).collect();
    outputs
        .iter()
        .map(|slot| {
            let feature = match *slot {
                OutputSlot::Dense(i) => dense.get_mut(i).and_then(Option::take).map(FeatureTensor::Dense),
                OutputSlot::Sparse(i) => sparse.get_mut(i).and_then(Option::take).map(FeatureTensor::Sparse),
            };
            feature.ok_or_else(|| ReaderError::Internal(format!("No output for slot {:?}", slot)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::autotune::TimingCostModel;
    use crate::dataset::{AtdsConfig, FeatureSpec};
    use crate::reader::write_zigzag;
    use crate::schema::{AvroSchema, FieldSchema, RecordSchema};
    use crate::tensor::DataType;

    fn schema() -> AvroSchema {
        AvroSchema::Record(RecordSchema::new(
            "row",
            vec![
                FieldSchema::new("id", AvroSchema::Long),
                FieldSchema::new("tags", AvroSchema::Array(Box::new(AvroSchema::Long))),
            ],
        ))
    }

    fn config() -> AtdsConfig {
        AtdsConfig::new()
            .with_filenames(["mem.avro"])
            .with_feature("id", FeatureSpec::dense(DataType::Int64, []))
            .with_feature("tags", FeatureSpec::varlen(DataType::Int64, [-1]))
    }

    /// Record `i` has id `i` and `i % 3` tags equal to `i`.
    fn block(ids: std::ops::Range<i64>) -> AvroBlock {
        let mut content = Vec::new();
        for i in ids.clone() {
            write_zigzag(&mut content, i);
            let n = i % 3;
            if n > 0 {
                write_zigzag(&mut content, n);
                for _ in 0..n {
                    write_zigzag(&mut content, i);
                }
            }
            write_zigzag(&mut content, 0);
        }
        AvroBlock::new(ids.count(), content, Codec::Null)
    }

    fn context(threads: usize, num_parallel_calls: i64) -> (BatchContext, AtdsDecoder) {
        let layout = Arc::new(FeatureLayout::from_config(&config()).unwrap());
        let decoder = AtdsDecoder::new(&schema(), layout.dense(), layout.sparse()).unwrap();
        let ctx = BatchContext {
            layout,
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap(),
            cost_model: Arc::new(TimingCostModel),
            num_parallel_calls,
            shuffle: false,
        };
        (ctx, decoder)
    }

    fn ids(batch: &Batch) -> Vec<i64> {
        batch
            .get("id")
            .and_then(FeatureTensor::as_dense)
            .and_then(|t| t.as_slice::<i64>())
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_parallel_batches_keep_order() {
        let (ctx, decoder) = context(3, 3);
        let mut state = DecodeState::new(ShuffleHandler::with_seed(1, 1), 3);
        state.blocks = vec![block(0..4), block(4..9), block(9..12)];

        let first = state.decode_batch(&ctx, &decoder, 6).unwrap();
        assert_eq!(first.num_records(), 6);
        assert_eq!(ids(&first), vec![0, 1, 2, 3, 4, 5]);

        let tags = first.get("tags").and_then(FeatureTensor::as_sparse).unwrap();
        assert_eq!(tags.values.as_slice::<i64>().unwrap(), &[1, 2, 2, 4, 5, 5]);
        assert_eq!(tags.indices(), &[1, 0, 2, 0, 2, 1, 4, 0, 5, 0, 5, 1]);
        assert_eq!(tags.dense_shape(), &[6, 2]);

        // the second block was left half decoded
        assert_eq!(state.blocks[1].num_decoded, 2);
        assert!(state.blocks[1].read_offset > 0);

        state.blocks.retain(|b| !b.is_exhausted());
        let second = state.decode_batch(&ctx, &decoder, 6).unwrap();
        assert_eq!(ids(&second), vec![6, 7, 8, 9, 10, 11]);
        assert_eq!(state.remaining(), 0);
        assert_eq!(state.stats.total_records_parsed(), 12);
    }

    #[test]
    fn test_output_follows_declaration_order() {
        let (ctx, decoder) = context(1, 1);
        let mut state = DecodeState::new(ShuffleHandler::with_seed(1, 1), 1);
        state.blocks = vec![block(0..2)];
        let batch = state.decode_batch(&ctx, &decoder, 2).unwrap();
        assert_eq!(batch.keys(), &["id".to_string(), "tags".to_string()]);
        assert!(matches!(batch.features()[0], FeatureTensor::Dense(_)));
        assert!(matches!(batch.features()[1], FeatureTensor::Sparse(_)));
    }

    #[test]
    fn test_decode_failure_releases_claims() {
        let (ctx, decoder) = context(2, 2);
        let mut state = DecodeState::new(ShuffleHandler::with_seed(1, 1), 2);
        let mut broken = block(0..3);
        broken.content.truncate(3);
        state.blocks = vec![broken, block(3..6)];

        let err = state.decode_batch(&ctx, &decoder, 6).unwrap_err();
        assert!(matches!(err, ReaderError::Decode(_)));
        assert!(state.blocks[0].is_exhausted());
        assert!(state.blocks.iter().all(|b| b.num_to_decode == 0));
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_compressed_block_decompressed_once() {
        let (ctx, decoder) = context(1, 1);
        let mut state = DecodeState::new(ShuffleHandler::with_seed(1, 1), 1);
        let plain = block(0..4);
        let mut compressed = snap::raw::Encoder::new()
            .compress_vec(&plain.content)
            .unwrap();
        compressed.extend_from_slice(&crc32fast::hash(&plain.content).to_be_bytes());
        state.blocks = vec![AvroBlock::new(4, compressed, Codec::Snappy)];
        let batch = state.decode_batch(&ctx, &decoder, 2).unwrap();
        assert_eq!(ids(&batch), vec![0, 1]);
        assert_eq!(state.blocks[0].codec, Codec::Null);
        assert_eq!(state.stats.total_decompressed_objects(), 4);

        let batch = state.decode_batch(&ctx, &decoder, 2).unwrap();
        assert_eq!(ids(&batch), vec![2, 3]);
        assert_eq!(state.stats.total_decompressed_objects(), 4);
    }
}
