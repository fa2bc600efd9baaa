//! Run metrics
//!
//! One [`Aggregator`] exists per test and device. Workers never touch it per
//! operation: each keeps a [`WorkerAccumulator`] and merges into the shared
//! counters once every [`FLUSH_BATCH`] operations, and once more when it stops.
//!
//! - Counters are cache-line aligned atomics updated with relaxed ordering.
//!   Readers (the progress loop) tolerate slightly stale values.
//! - The latency sum covers every completed operation, so the mean is exact.
//! - Percentiles come from a bounded [`reservoir::LatencyReservoir`] fed
//!   with a 1-in-N subset of latencies.
//!
//! # Example
//!
//! ```
//! use fourcorners::stats::{Aggregator, WorkerAccumulator};
//!
//! let aggregator = Aggregator::new();
//! let mut acc = WorkerAccumulator::new(64);
//! for _ in 0..300 {
//!     if acc.record(4096, 100_000) {
//!         acc.flush_into(&aggregator);
//!     }
//! }
//! acc.flush_into(&aggregator);
//!
//! let snap = aggregator.snapshot();
//! assert_eq!(snap.ops, 300);
//! assert_eq!(snap.bytes, 300 * 4096);
//! ```

pub mod live;
pub mod reservoir;

use reservoir::{LatencyReservoir, DEFAULT_RESERVOIR_CAPACITY};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Operations a worker completes between merges into the aggregator
pub const FLUSH_BATCH: u64 = 256;

/// Cache-line aligned atomic counter
///
/// Each counter owns a full 64-byte line so workers adding to different
/// counters do not invalidate each other's caches.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct AlignedCounter {
    value: AtomicU64,
}

impl AlignedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Cumulative counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub ops: u64,
    pub bytes: u64,
    pub latency_ns_sum: u64,
    pub errors: u64,
}

impl Snapshot {
    /// Counter growth since `earlier`
    pub fn delta(&self, earlier: &Snapshot) -> Snapshot {
        Snapshot {
            ops: self.ops.saturating_sub(earlier.ops),
            bytes: self.bytes.saturating_sub(earlier.bytes),
            latency_ns_sum: self.latency_ns_sum.saturating_sub(earlier.latency_ns_sum),
            errors: self.errors.saturating_sub(earlier.errors),
        }
    }
}

/// Percentile summary of the sampled latencies, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub samples: u64,
}

/// Shared per-test counters plus the latency reservoir
#[derive(Debug)]
pub struct Aggregator {
    ops: AlignedCounter,
    bytes: AlignedCounter,
    latency_ns_sum: AlignedCounter,
    errors: AlignedCounter,
    reservoir: Mutex<LatencyReservoir>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::with_reservoir(LatencyReservoir::new(DEFAULT_RESERVOIR_CAPACITY))
    }

    pub fn with_reservoir(reservoir: LatencyReservoir) -> Self {
        Self {
            ops: AlignedCounter::new(),
            bytes: AlignedCounter::new(),
            latency_ns_sum: AlignedCounter::new(),
            errors: AlignedCounter::new(),
            reservoir: Mutex::new(reservoir),
        }
    }

    /// Merge a batch of completed operations
    #[inline]
    pub fn add(&self, ops: u64, bytes: u64, latency_ns_sum: u64) {
        self.ops.add(ops);
        self.bytes.add(bytes);
        self.latency_ns_sum.add(latency_ns_sum);
    }

    #[inline]
    pub fn add_errors(&self, errors: u64) {
        self.errors.add(errors);
    }

    /// Feed sampled latencies into the reservoir under a single lock
    pub fn offer_samples(&self, latencies_ns: &[u64]) {
        if latencies_ns.is_empty() {
            return;
        }
        self.reservoir().offer_all(latencies_ns);
    }

    /// Current cumulative counters; never blocks producers
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            ops: self.ops.get(),
            bytes: self.bytes.get(),
            latency_ns_sum: self.latency_ns_sum.get(),
            errors: self.errors.get(),
        }
    }

    /// p50/p99 of the sampled latencies, `None` if nothing was sampled
    pub fn latency_summary(&self) -> Option<LatencySummary> {
        let reservoir = self.reservoir();
        let p = reservoir.percentiles(&[50.0, 99.0])?;
        Some(LatencySummary {
            p50_ns: p[0],
            p99_ns: p[1],
            min_ns: reservoir.min()?,
            max_ns: reservoir.max()?,
            samples: reservoir.seen(),
        })
    }

    fn reservoir(&self) -> MutexGuard<'_, LatencyReservoir> {
        // A worker that panicked mid-offer leaves a usable sample behind
        self.reservoir.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-local counters, merged into an [`Aggregator`] in batches
#[derive(Debug)]
pub struct WorkerAccumulator {
    ops: u64,
    bytes: u64,
    latency_ns_sum: u64,
    errors: u64,
    samples: Vec<u64>,
    sample_every: u64,
    completed: u64,
    pending: u64,
}

impl WorkerAccumulator {
    /// `sample_every` = N keeps one latency in N for the reservoir
    pub fn new(sample_every: u64) -> Self {
        let sample_every = sample_every.max(1);
        Self {
            ops: 0,
            bytes: 0,
            latency_ns_sum: 0,
            errors: 0,
            samples: Vec::with_capacity((FLUSH_BATCH / sample_every + 1) as usize),
            sample_every,
            completed: 0,
            pending: 0,
        }
    }

    /// Record a successful operation; returns true when a flush is due
    #[inline]
    pub fn record(&mut self, bytes: u64, latency_ns: u64) -> bool {
        self.ops += 1;
        self.bytes += bytes;
        self.latency_ns_sum += latency_ns;
        if self.completed % self.sample_every == 0 {
            self.samples.push(latency_ns);
        }
        self.completed += 1;
        self.pending += 1;
        self.pending >= FLUSH_BATCH
    }

    /// Record a failed operation; returns true when a flush is due
    #[inline]
    pub fn record_error(&mut self) -> bool {
        self.errors += 1;
        self.pending += 1;
        self.pending >= FLUSH_BATCH
    }

    /// Move everything recorded since the last flush into `aggregator`
    pub fn flush_into(&mut self, aggregator: &Aggregator) {
        if self.ops > 0 {
            aggregator.add(self.ops, self.bytes, self.latency_ns_sum);
        }
        if self.errors > 0 {
            aggregator.add_errors(self.errors);
        }
        aggregator.offer_samples(&self.samples);

        self.ops = 0;
        self.bytes = 0;
        self.latency_ns_sum = 0;
        self.errors = 0;
        self.pending = 0;
        self.samples.clear();
    }

    /// Successful operations recorded over the accumulator's lifetime
    pub fn total_completed(&self) -> u64 {
        self.completed
    }
}
