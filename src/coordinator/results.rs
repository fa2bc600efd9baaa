//! Test results and cross-device aggregation

use super::test_kind::TestKind;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;

/// Final figures of one test against one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub kind: TestKind,
    /// MB/s with 1 MB = 1024 * 1024 bytes
    pub throughput_mbps: f64,
    pub iops: f64,
    pub latency_avg_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub threads: usize,
    pub duration_secs: u64,
    pub queue_depth: usize,
    pub block_size: usize,
    pub total_ops: u64,
    pub total_bytes: u64,
    /// Operations that failed and were skipped
    pub errors: u64,
    /// Measured wall time, spawn to last worker exit
    pub elapsed_secs: f64,
}

impl TestResult {
    /// `"{test}: {MB/s} MB/s | {IOPS} IOPS | {ms} ms"`
    pub fn summary_line(&self) -> String {
        summary_line(self.kind, self.throughput_mbps, self.iops, self.latency_avg_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceResult {
    pub path: PathBuf,
    pub result: TestResult,
}

/// One test merged across every device it ran on
///
/// Throughput and IOPS are summed. Latencies are the plain mean of the
/// per-device figures, not recomputed from raw samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub kind: TestKind,
    pub throughput_mbps: f64,
    pub iops: f64,
    pub latency_avg_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    /// Per device
    pub threads: usize,
    pub duration_secs: u64,
    pub queue_depth: usize,
    pub block_size: usize,
    pub total_ops: u64,
    pub errors: u64,
    pub devices: Vec<DeviceResult>,
}

impl AggregateResult {
    /// Merge per-device results of `kind`; `None` for an empty set
    pub fn merge(kind: TestKind, devices: Vec<DeviceResult>) -> Option<Self> {
        let first = devices.first()?.result.clone();
        let n = devices.len() as f64;

        let mut merged = AggregateResult {
            kind,
            throughput_mbps: 0.0,
            iops: 0.0,
            latency_avg_ms: 0.0,
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            threads: first.threads,
            duration_secs: first.duration_secs,
            queue_depth: first.queue_depth,
            block_size: first.block_size,
            total_ops: 0,
            errors: 0,
            devices: Vec::new(),
        };

        for device in &devices {
            let r = &device.result;
            merged.throughput_mbps += r.throughput_mbps;
            merged.iops += r.iops;
            merged.latency_avg_ms += r.latency_avg_ms;
            merged.latency_p50_ms += r.latency_p50_ms;
            merged.latency_p99_ms += r.latency_p99_ms;
            merged.total_ops += r.total_ops;
            merged.errors += r.errors;
        }
        merged.latency_avg_ms /= n;
        merged.latency_p50_ms /= n;
        merged.latency_p99_ms /= n;
        merged.devices = devices;

        Some(merged)
    }

    pub fn summary_line(&self) -> String {
        summary_line(self.kind, self.throughput_mbps, self.iops, self.latency_avg_ms)
    }
}

/// Every test of one benchmark run, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResults {
    pub started_at: DateTime<Local>,
    pub devices: Vec<PathBuf>,
    pub results: Vec<AggregateResult>,
}

impl BenchmarkResults {
    pub fn new(devices: Vec<PathBuf>) -> Self {
        Self {
            started_at: Local::now(),
            devices,
            results: Vec::new(),
        }
    }

    /// Store a test's result, replacing an earlier result of the same kind
    pub fn record(&mut self, result: AggregateResult) {
        match self.results.iter_mut().find(|r| r.kind == result.kind) {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
    }

    pub fn get(&self, kind: TestKind) -> Option<&AggregateResult> {
        self.results.iter().find(|r| r.kind == kind)
    }
}

fn summary_line(kind: TestKind, throughput_mbps: f64, iops: f64, latency_ms: f64) -> String {
    format!(
        "{}: {:.2} MB/s | {:.0} IOPS | {:.2} ms",
        kind.name(),
        throughput_mbps,
        iops,
        latency_ms
    )
}
