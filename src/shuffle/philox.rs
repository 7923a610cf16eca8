//! Philox4x32-10 counter-based generator.
//!
//! Each call to the block function maps a 128-bit counter and a 64-bit key to
//! four 32-bit outputs. Skipping ahead is a counter addition, so a stream can
//! be fast-forwarded past any number of draws without generating them.

use rand::RngCore;

const M0: u32 = 0xD251_1F53;
const M1: u32 = 0xCD9E_8D57;
const W0: u32 = 0x9E37_79B9;
const W1: u32 = 0xBB67_AE85;

const ROUNDS: usize = 10;
const BLOCK_LEN: usize = 4;

#[inline]
fn mulhilo(a: u32, b: u32) -> (u32, u32) {
    let product = a as u64 * b as u64;
    ((product >> 32) as u32, product as u32)
}

#[inline]
fn round(ctr: [u32; 4], key: [u32; 2]) -> [u32; 4] {
    let (hi0, lo0) = mulhilo(M0, ctr[0]);
    let (hi1, lo1) = mulhilo(M1, ctr[2]);
    [hi1 ^ ctr[1] ^ key[0], lo1, hi0 ^ ctr[3] ^ key[1], lo0]
}

/// One Philox4x32-10 block.
pub fn philox4x32(counter: [u32; 4], key: [u32; 2]) -> [u32; 4] {
    let mut ctr = counter;
    let mut key = key;
    for i in 0..ROUNDS {
        if i > 0 {
            key[0] = key[0].wrapping_add(W0);
            key[1] = key[1].wrapping_add(W1);
        }
        ctr = round(ctr, key);
    }
    ctr
}

/// Philox stream handing out one 32-bit sample at a time.
#[derive(Debug, Clone)]
pub struct Philox4x32 {
    key: [u32; 2],
    counter: [u32; 4],
    results: [u32; BLOCK_LEN],
    /// Samples of `results` already handed out
    used: usize,
}

impl Philox4x32 {
    /// `seed` forms the key; `seed2` the upper half of the counter.
    pub fn new(seed: u64, seed2: u64) -> Self {
        Self {
            key: [seed as u32, (seed >> 32) as u32],
            counter: [0, 0, seed2 as u32, (seed2 >> 32) as u32],
            results: [0; BLOCK_LEN],
            used: BLOCK_LEN,
        }
    }

    fn counter_add(&mut self, mut n: u64) {
        for word in self.counter.iter_mut() {
            let sum = *word as u64 + (n & 0xFFFF_FFFF);
            *word = sum as u32;
            n = (n >> 32) + (sum >> 32);
            if n == 0 {
                break;
            }
        }
    }

    fn next_block(&mut self) -> [u32; BLOCK_LEN] {
        let out = philox4x32(self.counter, self.key);
        self.counter_add(1);
        out
    }

    /// Discard the next `samples` outputs.
    pub fn skip(&mut self, mut samples: u64) {
        let unused = (BLOCK_LEN - self.used) as u64;
        if samples <= unused {
            self.used += samples as usize;
            return;
        }
        samples -= unused;
        self.used = BLOCK_LEN;
        self.counter_add(samples / BLOCK_LEN as u64);
        let rest = (samples % BLOCK_LEN as u64) as usize;
        if rest > 0 {
            self.results = self.next_block();
            self.used = rest;
        }
    }
}

impl RngCore for Philox4x32 {
    fn next_u32(&mut self) -> u32 {
        if self.used == BLOCK_LEN {
            self.results = self.next_block();
            self.used = 0;
        }
        let out = self.results[self.used];
        self.used += 1;
        out
    }

    fn next_u64(&mut self) -> u64 {
        let lo = self.next_u32() as u64;
        let hi = self.next_u32() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}
