//! Bounded latency reservoir
//!
//! Keeps a uniform random sample of at most `capacity` latencies out of a
//! stream of any length (Vitter's Algorithm R). Percentiles are read from the
//! sorted sample, so memory stays fixed no matter how long a test runs.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Default number of retained samples
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 100_000;

#[derive(Debug)]
pub struct LatencyReservoir {
    samples: Vec<u64>,
    capacity: usize,
    seen: u64,
    min: u64,
    max: u64,
    rng: Xoshiro256PlusPlus,
}

impl LatencyReservoir {
    pub fn new(capacity: usize) -> Self {
        Self::from_rng(capacity, Xoshiro256PlusPlus::from_entropy())
    }

    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::from_rng(capacity, Xoshiro256PlusPlus::seed_from_u64(seed))
    }

    fn from_rng(capacity: usize, rng: Xoshiro256PlusPlus) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            seen: 0,
            min: u64::MAX,
            max: 0,
            rng,
        }
    }

    /// Offer one latency in nanoseconds
    #[inline]
    pub fn offer(&mut self, latency_ns: u64) {
        self.seen += 1;
        self.min = self.min.min(latency_ns);
        self.max = self.max.max(latency_ns);

        if self.samples.len() < self.capacity {
            self.samples.push(latency_ns);
            return;
        }

        // Keep the new value with probability capacity/seen
        let slot = self.rng.gen_range(0..self.seen);
        if slot < self.capacity as u64 {
            self.samples[slot as usize] = latency_ns;
        }
    }

    pub fn offer_all(&mut self, latencies: &[u64]) {
        for &latency in latencies {
            self.offer(latency);
        }
    }

    /// Total samples offered, retained or not
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Smallest latency ever offered
    pub fn min(&self) -> Option<u64> {
        (self.seen > 0).then_some(self.min)
    }

    /// Largest latency ever offered
    pub fn max(&self) -> Option<u64> {
        (self.seen > 0).then_some(self.max)
    }

    /// Percentiles (0.0..=100.0) of the retained sample, in request order
    ///
    /// Uses the lower nearest rank `floor(p/100 * (n-1))` of the sorted
    /// sample. Returns `None` when nothing has been offered.
    pub fn percentiles(&self, ps: &[f64]) -> Option<Vec<u64>> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let last = sorted.len() - 1;

        Some(
            ps.iter()
                .map(|p| {
                    let rank = (p.clamp(0.0, 100.0) / 100.0 * last as f64).floor() as usize;
                    sorted[rank.min(last)]
                })
                .collect(),
        )
    }

    pub fn percentile(&self, p: f64) -> Option<u64> {
        self.percentiles(&[p]).and_then(|v| v.first().copied())
    }
}

impl Default for LatencyReservoir {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVOIR_CAPACITY)
    }
}
