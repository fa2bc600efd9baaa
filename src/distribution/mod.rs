//! Block offset generation
//!
//! Distributions produce block numbers in `[0, num_blocks)`, never byte
//! offsets. The caller multiplies by the block size, so every offset is
//! naturally aligned for direct IO.
//!
//! [`OffsetGenerator`] wraps a distribution for one worker:
//!
//! - **Sequential** (throughput tests): `0, bs, 2·bs, ...`, wrapping to the
//!   start past the end of the device. Worker `i` of `n` starts a fraction
//!   `i/n` into the device so workers stream different regions.
//! - **Random** (IOPS tests): a pool of uniformly drawn offsets is computed
//!   once at startup and cycled, so the hot path never touches the RNG.
//!
//! A device no larger than one block has exactly one legal offset: 0.
//!
//! # Example
//!
//! ```
//! use fourcorners::distribution::{AccessPattern, OffsetGenerator};
//!
//! let mut offsets = OffsetGenerator::with_seed(AccessPattern::Random, 1 << 30, 4096, 0, 1, 42);
//! let offset = offsets.next_offset();
//! assert_eq!(offset % 4096, 0);
//! assert!(offset < 1 << 30);
//! ```

pub mod sequential;
pub mod uniform;

use sequential::SequentialDistribution;
use serde::{Deserialize, Serialize};
use uniform::UniformDistribution;

/// Number of precomputed random offsets per worker
pub const RANDOM_POOL_SIZE: usize = 1000;

/// Source of block numbers
///
/// Each worker owns its own instance, so implementations need no
/// synchronisation.
pub trait Distribution: Send {
    /// Next block number in `[0, num_blocks)`; 0 when `num_blocks` is 0
    fn next_block(&mut self, num_blocks: u64) -> u64;
}

/// Device access pattern of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPattern {
    Sequential,
    Random,
}

enum Source {
    Sequential(SequentialDistribution),
    Pool { offsets: Vec<u64>, next: usize },
}

/// Per-worker generator of aligned byte offsets
pub struct OffsetGenerator {
    source: Source,
    num_blocks: u64,
    block_size: u64,
}

impl OffsetGenerator {
    /// Build a generator for worker `worker_index` of `worker_count`
    pub fn new(
        pattern: AccessPattern,
        device_size: u64,
        block_size: u64,
        worker_index: usize,
        worker_count: usize,
    ) -> Self {
        Self::build(pattern, device_size, block_size, worker_index, worker_count, UniformDistribution::new())
    }

    /// Same as [`OffsetGenerator::new`] with a fixed RNG seed
    pub fn with_seed(
        pattern: AccessPattern,
        device_size: u64,
        block_size: u64,
        worker_index: usize,
        worker_count: usize,
        seed: u64,
    ) -> Self {
        Self::build(
            pattern,
            device_size,
            block_size,
            worker_index,
            worker_count,
            UniformDistribution::with_seed(seed),
        )
    }

    fn build(
        pattern: AccessPattern,
        device_size: u64,
        block_size: u64,
        worker_index: usize,
        worker_count: usize,
        mut uniform: UniformDistribution,
    ) -> Self {
        let block_size = block_size.max(1);
        let num_blocks = device_size / block_size;

        let source = match pattern {
            AccessPattern::Sequential => {
                let start = if num_blocks > 1 && worker_count > 1 {
                    ((worker_index as u128 * num_blocks as u128) / worker_count as u128) as u64
                } else {
                    0
                };
                Source::Sequential(SequentialDistribution::starting_at(start))
            }
            AccessPattern::Random => {
                let offsets = (0..RANDOM_POOL_SIZE)
                    .map(|_| uniform.next_block(num_blocks) * block_size)
                    .collect();
                Source::Pool { offsets, next: 0 }
            }
        };

        Self {
            source,
            num_blocks,
            block_size,
        }
    }

    /// Next byte offset, always a multiple of the block size
    #[inline]
    pub fn next_offset(&mut self) -> u64 {
        if self.num_blocks <= 1 {
            return 0;
        }
        match &mut self.source {
            Source::Sequential(seq) => seq.next_block(self.num_blocks) * self.block_size,
            Source::Pool { offsets, next } => {
                let offset = offsets[*next];
                *next += 1;
                if *next == offsets.len() {
                    *next = 0;
                }
                offset
            }
        }
    }

    /// Number of whole blocks on the device
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BS: u64 = 4096;

    #[test]
    fn test_sequential_offsets_wrap() {
        let mut gen = OffsetGenerator::new(AccessPattern::Sequential, 4 * BS, BS, 0, 1);
        let offsets: Vec<u64> = (0..6).map(|_| gen.next_offset()).collect();
        assert_eq!(offsets, vec![0, BS, 2 * BS, 3 * BS, 0, BS]);
    }

    #[test]
    fn test_sequential_workers_are_staggered() {
        let size = 100 * BS;
        let mut w0 = OffsetGenerator::new(AccessPattern::Sequential, size, BS, 0, 4);
        let mut w1 = OffsetGenerator::new(AccessPattern::Sequential, size, BS, 1, 4);
        let mut w3 = OffsetGenerator::new(AccessPattern::Sequential, size, BS, 3, 4);
        assert_eq!(w0.next_offset(), 0);
        assert_eq!(w1.next_offset(), 25 * BS);
        assert_eq!(w3.next_offset(), 75 * BS);
    }

    #[test]
    fn test_random_offsets_in_range_and_aligned() {
        let size = 1000 * BS + 123;
        let mut gen = OffsetGenerator::with_seed(AccessPattern::Random, size, BS, 0, 1, 7);
        for _ in 0..5000 {
            let offset = gen.next_offset();
            assert_eq!(offset % BS, 0);
            assert!(offset + BS <= size);
        }
    }

    #[test]
    fn test_random_pool_cycles() {
        let mut gen = OffsetGenerator::with_seed(AccessPattern::Random, 1 << 30, BS, 0, 1, 99);
        let first: Vec<u64> = (0..RANDOM_POOL_SIZE).map(|_| gen.next_offset()).collect();
        let second: Vec<u64> = (0..RANDOM_POOL_SIZE).map(|_| gen.next_offset()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_block_device_yields_zero() {
        for pattern in [AccessPattern::Sequential, AccessPattern::Random] {
            let mut gen = OffsetGenerator::new(pattern, BS, BS, 2, 3);
            assert_eq!(gen.num_blocks(), 1);
            for _ in 0..100 {
                assert_eq!(gen.next_offset(), 0);
            }
        }
    }

    #[test]
    fn test_device_smaller_than_block_yields_zero() {
        for pattern in [AccessPattern::Sequential, AccessPattern::Random] {
            let mut gen = OffsetGenerator::new(pattern, 512, BS, 0, 1);
            assert_eq!(gen.num_blocks(), 0);
            assert_eq!(gen.next_offset(), 0);
        }
    }
}
