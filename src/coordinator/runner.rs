//! Test runner
//!
//! Runs one test against one device:
//!
//! ```text
//! Starting ──► Running ──► Completed
//!    │            ├──────► Cancelled
//!    └────────────┴──────► Failed
//! ```
//!
//! - **Starting**: validate the test, spawn one worker per thread and give
//!   them a short grace window to report setup. The first setup error
//!   (access denied, missing device, ...) fails the test right away.
//! - **Running**: wake once per progress interval to report rates, until the
//!   duration elapses or the cancel token fires. A worker that reports a
//!   setup error late still fails the test at the next wake-up.
//! - **Finish**: raise the stop flag, join every worker, then compute the
//!   result from the aggregator. Zero completed operations is a failure
//!   ([`BenchError::NoCompletions`]), never a zero-valued result.

use super::cancel::CancelToken;
use super::results::TestResult;
use super::test_kind::{TestKind, TestSpec};
use super::{ProgressFn, RunOptions};
use crate::error::BenchError;
use crate::stats::live::LiveStats;
use crate::stats::{Aggregator, LatencySummary, Snapshot};
use crate::util::time::{
    average_latency_ms, calculate_iops, calculate_throughput_mbps, format_duration, nanos_to_ms,
};
use crate::worker::{Worker, WorkerConfig, WorkerEvent, WorkerSummary};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Starting,
    Running,
    Completed,
    Cancelled,
    Failed,
}

pub struct TestRunner {
    kind: TestKind,
    spec: TestSpec,
    path: PathBuf,
    options: RunOptions,
    cancel: CancelToken,
    label: Option<String>,
}

type WorkerHandle = JoinHandle<Option<WorkerSummary>>;

impl TestRunner {
    pub fn new(kind: TestKind, spec: TestSpec, path: &Path, options: RunOptions, cancel: CancelToken) -> Self {
        Self {
            kind,
            spec,
            path: path.to_path_buf(),
            options,
            cancel,
            label: None,
        }
    }

    /// Prefix progress lines with `label`
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn run(&self, progress: &ProgressFn<'_>) -> Result<TestResult, BenchError> {
        let mut phase = TestPhase::Starting;
        let result = self.run_phases(progress, &mut phase);
        debug!(test = %self.kind, path = %self.path.display(), ?phase, "test finished");
        result
    }

    fn run_phases(&self, progress: &ProgressFn<'_>, phase: &mut TestPhase) -> Result<TestResult, BenchError> {
        if let Err(e) = self.spec.validate(self.options.direct_io) {
            *phase = TestPhase::Failed;
            return Err(e);
        }

        info!(
            test = %self.kind,
            path = %self.path.display(),
            block_size = self.spec.block_size,
            threads = self.spec.threads,
            queue_depth = self.spec.queue_depth,
            duration = ?self.spec.duration,
            "starting test"
        );

        let aggregator = Arc::new(Aggregator::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (events_tx, events) = unbounded();

        let start = Instant::now();
        let mut handles = Vec::with_capacity(self.spec.threads);
        for id in 0..self.spec.threads {
            let worker = Worker::new(self.worker_config(id), Arc::clone(&aggregator), Arc::clone(&stop));
            match worker.spawn(events_tx.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    *phase = TestPhase::Failed;
                    stop_workers(&stop, handles);
                    return Err(e);
                }
            }
        }
        drop(events_tx);

        if let Err(e) = self.await_setup(&events, start + self.options.setup_grace) {
            *phase = TestPhase::Failed;
            stop_workers(&stop, handles);
            return Err(e);
        }

        *phase = TestPhase::Running;
        debug!(test = %self.kind, "workers running");

        let deadline = start + self.spec.duration;
        let mut live = LiveStats::new(start);
        let mut next_tick = start + self.options.progress_interval;
        let mut cancelled = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.cancel.wait_timeout(next_tick.min(deadline).saturating_duration_since(now)) {
                cancelled = true;
                break;
            }
            if let Some(error) = first_failure(&events) {
                *phase = TestPhase::Failed;
                stop_workers(&stop, handles);
                return Err(error);
            }
            let now = Instant::now();
            if now >= next_tick {
                let sample = live.tick(aggregator.snapshot());
                self.emit(progress, &sample.line());
                while next_tick <= now {
                    next_tick += self.options.progress_interval;
                }
            }
        }

        let summaries = stop_workers(&stop, handles);
        let elapsed = start.elapsed();

        if let Some(error) = first_failure(&events) {
            *phase = TestPhase::Failed;
            return Err(error);
        }
        if summaries.len() < self.spec.threads {
            *phase = TestPhase::Failed;
            return Err(BenchError::Engine(format!(
                "{} of {} workers exited abnormally",
                self.spec.threads - summaries.len(),
                self.spec.threads
            )));
        }

        let snapshot = aggregator.snapshot();
        if cancelled {
            *phase = TestPhase::Cancelled;
            debug!(
                test = %self.kind,
                ops = snapshot.ops,
                bytes = snapshot.bytes,
                elapsed = %format_duration(elapsed),
                "test cancelled, discarding partial results"
            );
            return Err(BenchError::UserCancelled);
        }

        match finalize(self.kind, &self.spec, snapshot, aggregator.latency_summary(), elapsed) {
            Ok(result) => {
                *phase = TestPhase::Completed;
                info!(
                    test = %self.kind,
                    path = %self.path.display(),
                    ops = result.total_ops,
                    errors = result.errors,
                    elapsed = %format_duration(elapsed),
                    "test completed"
                );
                Ok(result)
            }
            Err(e) => {
                *phase = TestPhase::Failed;
                Err(e)
            }
        }
    }

    /// Wait until every worker is ready or the grace window closes
    fn await_setup(&self, events: &Receiver<WorkerEvent>, grace_deadline: Instant) -> Result<(), BenchError> {
        let mut ready = 0;
        while ready < self.spec.threads {
            let remaining = grace_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(test = %self.kind, ready, threads = self.spec.threads, "setup grace window elapsed");
                break;
            }
            match events.recv_timeout(remaining) {
                Ok(WorkerEvent::Ready { .. }) => ready += 1,
                Ok(WorkerEvent::Failed { id, error }) => {
                    debug!(test = %self.kind, worker = id, %error, "worker setup failed");
                    return Err(error);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn worker_config(&self, id: usize) -> WorkerConfig {
        WorkerConfig {
            id,
            worker_count: self.spec.threads,
            path: self.path.clone(),
            op_type: self.spec.direction,
            pattern: self.spec.pattern,
            block_size: self.spec.block_size,
            queue_depth: self.spec.queue_depth,
            sample_every: self.kind.sample_every(),
            engine: self.options.engine,
            direct_io: self.options.direct_io,
            seed: self.options.seed.map(|seed| seed.wrapping_add(id as u64)),
        }
    }

    fn emit(&self, progress: &ProgressFn<'_>, line: &str) {
        match &self.label {
            Some(label) => progress(&format!("[{}] {}", label, line)),
            None => progress(line),
        }
    }
}

/// Compute the final figures of a test
///
/// Rates are taken over the measured `elapsed` time. Percentiles fall back to
/// the mean when no latency was sampled.
pub fn finalize(
    kind: TestKind,
    spec: &TestSpec,
    snapshot: Snapshot,
    latency: Option<LatencySummary>,
    elapsed: Duration,
) -> Result<TestResult, BenchError> {
    if snapshot.ops == 0 {
        return Err(BenchError::NoCompletions {
            test: kind.to_string(),
        });
    }

    let latency_avg_ms = average_latency_ms(snapshot.latency_ns_sum, snapshot.ops);
    let (latency_p50_ms, latency_p99_ms) = match latency {
        Some(summary) => (nanos_to_ms(summary.p50_ns), nanos_to_ms(summary.p99_ns)),
        None => (latency_avg_ms, latency_avg_ms),
    };

    Ok(TestResult {
        kind,
        throughput_mbps: calculate_throughput_mbps(snapshot.bytes, elapsed),
        iops: calculate_iops(snapshot.ops, elapsed),
        latency_avg_ms,
        latency_p50_ms,
        latency_p99_ms,
        threads: spec.threads,
        duration_secs: spec.duration.as_secs(),
        queue_depth: spec.queue_depth,
        block_size: spec.block_size,
        total_ops: snapshot.ops,
        total_bytes: snapshot.bytes,
        errors: snapshot.errors,
        elapsed_secs: elapsed.as_secs_f64(),
    })
}

/// First setup failure reported so far, if any
fn first_failure(events: &Receiver<WorkerEvent>) -> Option<BenchError> {
    events.try_iter().find_map(|event| match event {
        WorkerEvent::Failed { error, .. } => Some(error),
        WorkerEvent::Ready { .. } => None,
    })
}

/// Raise the stop flag and join every worker
fn stop_workers(stop: &AtomicBool, handles: Vec<WorkerHandle>) -> Vec<WorkerSummary> {
    stop.store(true, Ordering::Relaxed);
    handles
        .into_iter()
        .filter_map(|handle| match handle.join() {
            Ok(summary) => summary,
            Err(_) => {
                tracing::error!("worker thread panicked");
                None
            }
        })
        .collect()
}
