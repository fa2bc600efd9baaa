//! Sequential block generation
//!
//! Yields consecutive block numbers from a starting block, wrapping back to
//! block 0 at the end of the device.

use crate::distribution::Distribution;

#[derive(Debug, Default)]
pub struct SequentialDistribution {
    current_block: u64,
}

impl SequentialDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the sequence at `block` instead of 0
    pub fn starting_at(block: u64) -> Self {
        Self {
            current_block: block,
        }
    }
}

impl Distribution for SequentialDistribution {
    #[inline]
    fn next_block(&mut self, num_blocks: u64) -> u64 {
        if num_blocks == 0 {
            return 0;
        }
        if self.current_block >= num_blocks {
            self.current_block = 0;
        }

        let block = self.current_block;
        self.current_block += 1;
        block
    }
}
