//! Uniform random block distribution
//!
//! Every block is equally likely. Backed by xoshiro256++, which is fast and
//! statistically sound for non-cryptographic use.

use super::Distribution;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

pub struct UniformDistribution {
    rng: Xoshiro256PlusPlus,
}

impl UniformDistribution {
    /// Seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: Xoshiro256PlusPlus::from_entropy(),
        }
    }

    /// Reproducible sequence for tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }
}

impl Default for UniformDistribution {
    fn default() -> Self {
        Self::new()
    }
}

impl Distribution for UniformDistribution {
    #[inline(always)]
    fn next_block(&mut self, num_blocks: u64) -> u64 {
        if num_blocks == 0 {
            return 0;
        }
        self.rng.gen_range(0..num_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_distribution_basic() {
        let mut dist = UniformDistribution::new();
        for _ in 0..100 {
            assert!(dist.next_block(1000) < 1000);
        }
    }

    #[test]
    fn test_uniform_distribution_degenerate_ranges() {
        let mut dist = UniformDistribution::new();
        assert_eq!(dist.next_block(0), 0);
        assert_eq!(dist.next_block(1), 0);
    }

    #[test]
    fn test_uniform_distribution_seeded() {
        let mut dist1 = UniformDistribution::with_seed(12345);
        let mut dist2 = UniformDistribution::with_seed(12345);
        for _ in 0..10 {
            assert_eq!(dist1.next_block(1000), dist2.next_block(1000));
        }
    }

    #[test]
    fn test_uniform_distribution_coverage() {
        let mut dist = UniformDistribution::with_seed(42);
        let num_blocks = 100u64;
        let mut buckets = [0u32; 10];

        for _ in 0..10000 {
            let block = dist.next_block(num_blocks);
            buckets[(block * 10 / num_blocks) as usize] += 1;
        }

        // Each bucket expects ~1000 hits
        for count in buckets {
            assert!(count > 800 && count < 1200, "bucket count {} out of range", count);
        }
    }
}
