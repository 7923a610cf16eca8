//! Decode thread count and block partitioning from timing history.
//!
//! Every batch records how long decoding and decompression took per record
//! and how late each worker started relative to the first one. A
//! [`CostModel`] turns that history into a thread count and a split of the
//! claimed blocks between workers.

use std::fmt;
use std::time::Instant;

use crate::codec::Codec;
use crate::reader::AvroBlock;

/// What the cost model needs to know about one buffered block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCost {
    pub object_count: usize,
    /// Records claimed for the current batch
    pub num_to_decode: usize,
    /// Payload still compressed
    pub compressed: bool,
}

impl From<&AvroBlock> for BlockCost {
    fn from(block: &AvroBlock) -> Self {
        Self {
            object_count: block.object_count,
            num_to_decode: block.num_to_decode,
            compressed: block.codec != Codec::Null,
        }
    }
}

/// Timing of one worker during one batch.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStats {
    pub started: Instant,
    pub records_parsed: u64,
    pub decode_micros: u64,
    pub decompressed_objects: u64,
    pub decompress_micros: u64,
}

impl WorkerStats {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            records_parsed: 0,
            decode_micros: 0,
            decompressed_objects: 0,
            decompress_micros: 0,
        }
    }
}

/// Cumulative per-thread timing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeStats {
    pub records_parsed: Vec<u64>,
    pub decode_micros: Vec<u64>,
    pub decompressed_objects: Vec<u64>,
    pub decompress_micros: Vec<u64>,
    /// Summed start delay of each thread behind the earliest one, in micros
    pub thread_delays: Vec<u64>,
    /// Batches each thread took part in
    pub thread_itrs: Vec<u64>,
}

impl DecodeStats {
    /// Stats for a pool of at most `max_threads` workers.
    pub fn new(max_threads: usize) -> Self {
        Self {
            thread_delays: vec![0; max_threads],
            thread_itrs: vec![0; max_threads],
            ..Default::default()
        }
    }

    /// Size the per-batch counters to `num_threads` workers. Counters of
    /// threads beyond the new count are dropped.
    pub fn resize(&mut self, num_threads: usize) {
        self.records_parsed.resize(num_threads, 0);
        self.decode_micros.resize(num_threads, 0);
        self.decompressed_objects.resize(num_threads, 0);
        self.decompress_micros.resize(num_threads, 0);
        if self.thread_delays.len() < num_threads {
            self.thread_delays.resize(num_threads, 0);
            self.thread_itrs.resize(num_threads, 0);
        }
    }

    /// Fold in the stats of every worker of one batch, in thread order.
    pub fn record_batch(&mut self, workers: &[WorkerStats]) {
        self.resize(self.records_parsed.len().max(workers.len()));
        let Some(earliest) = workers.iter().map(|w| w.started).min() else {
            return;
        };
        for (i, w) in workers.iter().enumerate() {
            self.records_parsed[i] += w.records_parsed;
            self.decode_micros[i] += w.decode_micros;
            self.decompressed_objects[i] += w.decompressed_objects;
            self.decompress_micros[i] += w.decompress_micros;
            self.thread_delays[i] += w.started.duration_since(earliest).as_micros() as u64;
            self.thread_itrs[i] += 1;
        }
    }

    pub fn total_records_parsed(&self) -> u64 {
        self.records_parsed.iter().sum()
    }

    pub fn total_decode_micros(&self) -> u64 {
        self.decode_micros.iter().sum()
    }

    pub fn total_decompressed_objects(&self) -> u64 {
        self.decompressed_objects.iter().sum()
    }

    pub fn total_decompress_micros(&self) -> u64 {
        self.decompress_micros.iter().sum()
    }

    /// Average start delay of thread `i`.
    fn average_delay(&self, i: usize) -> f64 {
        match (self.thread_delays.get(i), self.thread_itrs.get(i)) {
            (Some(&delay), Some(&itrs)) if itrs > 0 => delay as f64 / itrs as f64,
            _ => 0.0,
        }
    }
}

/// Picks the worker count and splits blocks between workers.
pub trait CostModel: fmt::Debug + Send + Sync {
    /// Thread count for the next batch, given `current` usable threads.
    fn choose_threads(
        &self,
        stats: &DecodeStats,
        blocks: &[BlockCost],
        batch_size: usize,
        current: usize,
    ) -> usize;

    /// Exclusive end block of each worker's range. The last entry is always
    /// `blocks.len()`.
    fn block_ranges(
        &self,
        stats: &DecodeStats,
        blocks: &[BlockCost],
        batch_size: usize,
        num_threads: usize,
    ) -> Vec<usize>;
}

/// Cost model driven by measured decode and decompress time per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingCostModel;

/// Per-record costs and the modeled cost of a whole batch.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BatchCost {
    decode_per_record: f64,
    decompress_per_record: f64,
    total: f64,
}

impl TimingCostModel {
    fn batch_cost(stats: &DecodeStats, blocks: &[BlockCost], batch_size: usize) -> BatchCost {
        let records = stats.total_records_parsed();
        let decode_per_record = if records > 0 {
            stats.total_decode_micros() as f64 / records as f64
        } else {
            0.0
        };
        let mut total = decode_per_record * batch_size as f64;

        let mut decompress_per_record = 0.0;
        let objects = stats.total_decompressed_objects();
        if objects > 0 {
            decompress_per_record = stats.total_decompress_micros() as f64 / objects as f64;
            // New blocks are appended, and older ones were decompressed by
            // earlier batches, so only the compressed tail costs anything.
            total += blocks
                .iter()
                .rev()
                .take_while(|b| b.compressed)
                .map(|b| decompress_per_record * b.object_count as f64)
                .sum::<f64>();
        }
        BatchCost {
            decode_per_record,
            decompress_per_record,
            total,
        }
    }

    fn uniform_ranges(num_blocks: usize, num_threads: usize) -> Vec<usize> {
        let per_thread = num_blocks / num_threads;
        let remainder = num_blocks % num_threads;
        let mut end = 0;
        (0..num_threads)
            .map(|i| {
                end += per_thread + usize::from(i < remainder);
                end
            })
            .collect()
    }
}

impl CostModel for TimingCostModel {
    fn choose_threads(
        &self,
        stats: &DecodeStats,
        blocks: &[BlockCost],
        batch_size: usize,
        current: usize,
    ) -> usize {
        if stats.thread_itrs.first().copied().unwrap_or(0) == 0 {
            return current;
        }
        let cost = Self::batch_cost(stats, blocks, batch_size);

        let mut best = current;
        let mut min_cost = f64::MAX;
        let mut max_delay: f64 = 0.0;
        for i in 1..=current {
            max_delay = max_delay.max(stats.average_delay(i - 1));
            let modeled = cost.total / i as f64 + max_delay;
            if modeled < min_cost {
                min_cost = modeled;
                best = i;
            }
        }
        best
    }

    fn block_ranges(
        &self,
        stats: &DecodeStats,
        blocks: &[BlockCost],
        batch_size: usize,
        num_threads: usize,
    ) -> Vec<usize> {
        let num_threads = num_threads.max(1);
        if stats.total_decode_micros() == 0 {
            return Self::uniform_ranges(blocks.len(), num_threads);
        }

        let cost = Self::batch_cost(stats, blocks, batch_size);
        let cost_per_thread = cost.total / num_threads as f64;
        let mut ranges = Vec::with_capacity(num_threads);
        let mut block_idx = 0;
        let mut running = 0.0;
        for thread in 0..num_threads {
            while running < cost_per_thread * (thread + 1) as f64 && block_idx < blocks.len() {
                let block = &blocks[block_idx];
                if block.compressed {
                    running += cost.decompress_per_record * block.object_count as f64;
                }
                running += cost.decode_per_record * block.num_to_decode as f64;
                block_idx += 1;
            }
            ranges.push(block_idx);
        }
        if let Some(last) = ranges.last_mut() {
            *last = blocks.len();
        }
        ranges
    }
}
