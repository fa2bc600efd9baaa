//! Live progress from snapshot deltas
//!
//! Once per tick the test runner takes an aggregator [`Snapshot`] and feeds
//! it here. Rates are computed from the growth since the previous tick over
//! the time that actually passed, so a late tick does not inflate them.

use super::Snapshot;
use crate::util::time::{average_latency_ms, calculate_iops, calculate_throughput_mbps};
use std::time::{Duration, Instant};

/// Instantaneous rates over one progress interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    /// Time since the test started
    pub elapsed: Duration,
    pub throughput_mbps: f64,
    pub iops: f64,
    pub avg_latency_ms: f64,
}

impl ProgressSample {
    /// `"  {elapsed}s: {MB/s} MB/s | {iops} IOPS | {latency}ms"`
    pub fn line(&self) -> String {
        format!(
            "  {:.0}s: {:.2} MB/s | {:.0} IOPS | {:.2}ms",
            self.elapsed.as_secs_f64(),
            self.throughput_mbps,
            self.iops,
            self.avg_latency_ms
        )
    }
}

#[derive(Debug)]
pub struct LiveStats {
    test_start: Instant,
    last_tick: Instant,
    last: Snapshot,
}

impl LiveStats {
    pub fn new(test_start: Instant) -> Self {
        Self {
            test_start,
            last_tick: test_start,
            last: Snapshot::default(),
        }
    }

    /// Rates since the previous call
    pub fn tick(&mut self, current: Snapshot) -> ProgressSample {
        self.tick_at(current, Instant::now())
    }

    pub fn tick_at(&mut self, current: Snapshot, now: Instant) -> ProgressSample {
        let interval = now.saturating_duration_since(self.last_tick);
        let delta = current.delta(&self.last);

        self.last = current;
        self.last_tick = now;

        ProgressSample {
            elapsed: now.saturating_duration_since(self.test_start),
            throughput_mbps: calculate_throughput_mbps(delta.bytes, interval),
            iops: calculate_iops(delta.ops, interval),
            avg_latency_ms: average_latency_ms(delta.latency_ns_sum, delta.ops),
        }
    }
}
