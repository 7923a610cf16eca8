//! Choosing which buffered records go into the next batch.
//!
//! Without shuffling, records are taken from the buffered blocks in order.
//! With shuffling, each step picks a random block and claims one record from
//! it, or the whole remainder once little of the block is left, so blocks
//! leave the buffer quickly instead of lingering with a few records.

mod philox;

use rand::{Rng, RngCore};

pub use philox::{philox4x32, Philox4x32};

use crate::reader::AvroBlock;

/// A block whose unclaimed records are at most `object_count / 10` has its
/// whole remainder claimed in one step.
pub const DECODE_ALL_THRESHOLD_DIVISOR: usize = 10;

#[derive(Debug, Clone)]
pub struct ShuffleHandler {
    generator: Philox4x32,
    /// Draws taken since the last reseed
    num_random_samples: u64,
    decode_all_divisor: usize,
    /// Reseeds are drawn from the generator itself instead of OS entropy
    seeded: bool,
}

impl Default for ShuffleHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShuffleHandler {
    /// A handler seeded from OS entropy.
    pub fn new() -> Self {
        let mut handler = Self::with_seed(0, 0);
        handler.seeded = false;
        handler.reset_rngs();
        handler
    }

    /// A handler with a fixed seed, for reproducible sampling. Later
    /// reseeds derive from this seed too.
    pub fn with_seed(seed: u64, seed2: u64) -> Self {
        Self {
            generator: Philox4x32::new(seed, seed2),
            num_random_samples: 0,
            decode_all_divisor: DECODE_ALL_THRESHOLD_DIVISOR,
            seeded: true,
        }
    }

    /// Override the remainder threshold divisor. `0` disables claiming whole
    /// remainders.
    pub fn with_decode_all_divisor(mut self, divisor: usize) -> Self {
        self.decode_all_divisor = divisor;
        self
    }

    pub fn num_random_samples(&self) -> u64 {
        self.num_random_samples
    }

    /// Next 32-bit draw.
    pub fn random(&mut self) -> u32 {
        self.num_random_samples += 1;
        self.generator.next_u32()
    }

    /// Reseed, skipping as many draws as were taken from the previous
    /// generator, and restart the draw count.
    pub fn reset_rngs(&mut self) {
        let (seed, seed2) = if self.seeded {
            (self.generator.next_u64(), self.generator.next_u64())
        } else {
            let mut os = rand::rng();
            (os.random(), os.random())
        };
        self.generator = Philox4x32::new(seed, seed2);
        self.generator.skip(self.num_random_samples);
        self.num_random_samples = 0;
    }

    /// Claim records for a batch of `batch_size` by setting `num_to_decode`
    /// on `blocks`, then store the running total of claims in `counts`.
    ///
    /// Claims `min(batch_size, unclaimed records)` in total, which is
    /// returned.
    pub fn sample_blocks(&mut self, batch_size: usize, shuffle: bool, blocks: &mut [AvroBlock]) -> usize {
        let available: usize = blocks.iter().map(AvroBlock::unclaimed).sum();
        let target = batch_size.min(available);
        let mut claimed = 0;

        if !shuffle {
            let mut j = 0;
            while claimed < target && j < blocks.len() {
                let block = &mut blocks[j];
                let take = block.unclaimed().min(target - claimed);
                block.num_to_decode += take;
                claimed += take;
                j += 1;
            }
        } else {
            while claimed < target {
                let id = self.random() as usize % blocks.len();
                let block = &mut blocks[id];
                let remaining = block.unclaimed();
                if remaining == 0 {
                    continue;
                }
                let threshold = match self.decode_all_divisor {
                    0 => 0,
                    d => block.object_count / d,
                };
                let decode_num = if remaining <= threshold {
                    remaining.min(target - claimed)
                } else {
                    1
                };
                block.num_to_decode += decode_num;
                claimed += decode_num;
            }
        }

        let mut total = 0;
        for block in blocks.iter_mut() {
            total += block.num_to_decode;
            block.counts = total;
        }
        claimed
    }
}
