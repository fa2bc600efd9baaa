//! Benchmark orchestration
//!
//! A [`Benchmark`] runs the tests of a [`BenchmarkPlan`] one after another,
//! never two at once, in canonical order: read throughput, write throughput,
//! read IOPS, write IOPS. Each test runs on every device of the plan in
//! parallel, one [`runner::TestRunner`] per device, and the per-device
//! results are merged into an [`AggregateResult`].
//!
//! The benchmark owns a [`CancelToken`]. `stop()` signals it: the running
//! test winds down and returns [`BenchError::UserCancelled`], and no further
//! test starts. The token is not re-armed automatically; call `reset()`
//! before running again.
//!
//! # Example
//!
//! ```no_run
//! use fourcorners::config::BenchmarkConfig;
//! use fourcorners::coordinator::Benchmark;
//!
//! let config = BenchmarkConfig::for_devices(vec!["/dev/nvme1n1".into()]);
//! let plan = config.plan()?;
//!
//! let benchmark = Benchmark::new();
//! let results = benchmark.run(&plan, &|line: &str| println!("{}", line))?;
//! for result in &results.results {
//!     println!("{}", result.summary_line());
//! }
//! # Ok::<(), fourcorners::error::BenchError>(())
//! ```

pub mod cancel;
pub mod results;
pub mod runner;
pub mod test_kind;

pub use cancel::CancelToken;
pub use results::{AggregateResult, BenchmarkResults, DeviceResult, TestResult};
pub use runner::TestRunner;
pub use test_kind::{TestKind, TestSpec};

use crate::engine::EngineKind;
use crate::error::BenchError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Sink for human-readable progress lines
pub type ProgressFn<'a> = dyn Fn(&str) + Sync + 'a;

/// How often a multi-device test re-checks the benchmark's token
const CANCEL_RELAY_POLL: Duration = Duration::from_millis(50);

/// Settings shared by every test of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub engine: EngineKind,
    /// Open devices with O_DIRECT
    pub direct_io: bool,
    /// Fixed RNG seed; entropy when `None`
    pub seed: Option<u64>,
    pub progress_interval: Duration,
    /// How long to wait for worker setup errors before the test is Running
    pub setup_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            engine: EngineKind::Auto,
            direct_io: true,
            seed: None,
            progress_interval: Duration::from_secs(1),
            setup_grace: Duration::from_millis(100),
        }
    }
}

/// Validated, typed description of a benchmark run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkPlan {
    pub devices: Vec<PathBuf>,
    /// Executed in this order
    pub tests: Vec<(TestKind, TestSpec)>,
    pub options: RunOptions,
}

#[derive(Debug, Default)]
pub struct Benchmark {
    cancel: CancelToken,
}

impl Benchmark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for stopping the benchmark from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop the current run; idempotent
    pub fn stop(&self) {
        info!("benchmark stop requested");
        self.cancel.signal();
    }

    /// Re-arm after `stop()`
    pub fn reset(&self) {
        self.cancel.reset();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_signalled()
    }

    /// Run every test of `plan` in order
    pub fn run(&self, plan: &BenchmarkPlan, progress: &ProgressFn<'_>) -> Result<BenchmarkResults, BenchError> {
        if plan.devices.is_empty() {
            return Err(BenchError::InvalidConfig("no target devices specified".into()));
        }

        let mut results = BenchmarkResults::new(plan.devices.clone());
        for (kind, spec) in &plan.tests {
            if self.cancel.is_signalled() {
                info!(next = %kind, "benchmark cancelled before test");
                return Err(BenchError::UserCancelled);
            }

            progress(&format!("Running {} test...", kind.name()));
            let result = self.run_test(*kind, spec, &plan.devices, &plan.options, progress)?;
            progress(&result.summary_line());
            results.record(result);
        }

        Ok(results)
    }

    /// Run one test on every device in parallel and merge the results
    pub fn run_test(
        &self,
        kind: TestKind,
        spec: &TestSpec,
        devices: &[PathBuf],
        options: &RunOptions,
        progress: &ProgressFn<'_>,
    ) -> Result<AggregateResult, BenchError> {
        let outcomes = match devices {
            [] => return Err(BenchError::InvalidConfig("no target devices specified".into())),
            [path] => {
                let runner = TestRunner::new(kind, spec.clone(), path, options.clone(), self.cancel.clone());
                vec![(path.clone(), runner.run(progress))]
            }
            _ => self.run_on_devices(kind, spec, devices, options, progress),
        };

        let mut per_device = Vec::with_capacity(outcomes.len());
        let mut failure: Option<BenchError> = None;
        for (path, outcome) in outcomes {
            match outcome {
                Ok(result) => per_device.push(DeviceResult { path, result }),
                Err(e) => {
                    debug!(test = %kind, path = %path.display(), error = %e, "device test failed");
                    // A real failure outranks the cancellations it triggered
                    if failure.as_ref().map_or(true, |f| f.is_cancelled() && !e.is_cancelled()) {
                        failure = Some(e);
                    }
                }
            }
        }

        if self.cancel.is_signalled() {
            return Err(BenchError::UserCancelled);
        }
        if let Some(e) = failure {
            return Err(e);
        }

        AggregateResult::merge(kind, per_device)
            .ok_or_else(|| BenchError::Engine(format!("{} test produced no results", kind)))
    }

    /// One runner per device on scoped threads
    ///
    /// The runners share a per-test token: it follows the benchmark's token,
    /// and a device that fails signals it so the others stop early.
    fn run_on_devices(
        &self,
        kind: TestKind,
        spec: &TestSpec,
        devices: &[PathBuf],
        options: &RunOptions,
        progress: &ProgressFn<'_>,
    ) -> Vec<(PathBuf, Result<TestResult, BenchError>)> {
        let test_cancel = CancelToken::new();
        let finished = AtomicBool::new(false);

        thread::scope(|scope| {
            scope.spawn(|| {
                while !finished.load(Ordering::Acquire) {
                    if self.cancel.wait_timeout(CANCEL_RELAY_POLL) {
                        test_cancel.signal();
                        break;
                    }
                }
            });

            let handles: Vec<_> = devices
                .iter()
                .map(|path| {
                    let test_cancel = test_cancel.clone();
                    let handle = scope.spawn(move || {
                        let runner = TestRunner::new(kind, spec.clone(), path, options.clone(), test_cancel.clone())
                            .with_label(path.display().to_string());
                        let outcome = runner.run(progress);
                        if matches!(&outcome, Err(e) if !e.is_cancelled()) {
                            test_cancel.signal();
                        }
                        outcome
                    });
                    (path, handle)
                })
                .collect();

            let outcomes: Vec<(PathBuf, Result<TestResult, BenchError>)> = handles
                .into_iter()
                .map(|(path, handle)| {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|_| Err(BenchError::Engine(format!("test runner for {} panicked", path.display()))));
                    (path.clone(), outcome)
                })
                .collect();

            finished.store(true, Ordering::Release);
            outcomes
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    fn device(dir: &TempDir, name: &str, len: u64) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap().set_len(len).unwrap();
        path
    }

    fn options() -> RunOptions {
        RunOptions {
            engine: EngineKind::Sync,
            direct_io: false,
            seed: Some(7),
            progress_interval: Duration::from_millis(100),
            setup_grace: Duration::from_millis(100),
        }
    }

    fn plan(devices: Vec<PathBuf>, kinds: &[TestKind], millis: u64) -> BenchmarkPlan {
        BenchmarkPlan {
            devices,
            tests: kinds
                .iter()
                .map(|&kind| (kind, TestSpec::new(kind, 4096, 2, 4, Duration::from_millis(millis))))
                .collect(),
            options: options(),
        }
    }

    fn silent(_: &str) {}

    fn stop_after(benchmark: &Benchmark, delay: Duration) -> thread::JoinHandle<()> {
        let token = benchmark.cancel_token();
        thread::spawn(move || {
            thread::sleep(delay);
            token.signal();
        })
    }

    #[test]
    fn test_runs_tests_in_order() {
        let dir = TempDir::new().unwrap();
        let dev = device(&dir, "a.img", 2 * 1024 * 1024);
        let lines = Mutex::new(Vec::new());
        let progress = |line: &str| lines.lock().unwrap().push(line.to_string());

        let benchmark = Benchmark::new();
        let results = benchmark
            .run(&plan(vec![dev], &[TestKind::ReadThroughput, TestKind::WriteIops], 200), &progress)
            .unwrap();

        let kinds: Vec<TestKind> = results.results.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![TestKind::ReadThroughput, TestKind::WriteIops]);
        assert!(results.get(TestKind::WriteIops).unwrap().iops > 0.0);

        let lines = lines.into_inner().unwrap();
        assert_eq!(lines.first().map(String::as_str), Some("Running Read Throughput test..."));
        assert!(lines.iter().any(|l| l == "Running Write IOPS test..."));
        assert!(lines.iter().any(|l| l.starts_with("Write IOPS: ")));
    }

    #[test]
    fn test_multi_device_results_are_summed() {
        let dir = TempDir::new().unwrap();
        let a = device(&dir, "a.img", 2 * 1024 * 1024);
        let b = device(&dir, "b.img", 2 * 1024 * 1024);

        let benchmark = Benchmark::new();
        let results = benchmark
            .run(&plan(vec![a.clone(), b.clone()], &[TestKind::ReadIops], 250), &silent)
            .unwrap();

        let merged = results.get(TestKind::ReadIops).unwrap();
        assert_eq!(merged.devices.len(), 2);
        let paths: Vec<&Path> = merged.devices.iter().map(|d| d.path.as_path()).collect();
        assert_eq!(paths, vec![a.as_path(), b.as_path()]);

        let sum: f64 = merged.devices.iter().map(|d| d.result.iops).sum();
        assert!((merged.iops - sum).abs() < 1e-6);
        let mean_latency: f64 = merged.devices.iter().map(|d| d.result.latency_avg_ms).sum::<f64>() / 2.0;
        assert!((merged.latency_avg_ms - mean_latency).abs() < 1e-9);
    }

    #[test]
    fn test_multi_device_failure_stops_other_devices() {
        let dir = TempDir::new().unwrap();
        let good = device(&dir, "good.img", 2 * 1024 * 1024);
        let missing = dir.path().join("missing.img");

        let start = Instant::now();
        let err = Benchmark::new()
            .run(&plan(vec![good, missing], &[TestKind::ReadIops], 30_000), &silent)
            .unwrap_err();
        assert!(matches!(err, BenchError::DeviceNotFound { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_stop_mid_run_cancels() {
        let dir = TempDir::new().unwrap();
        let dev = device(&dir, "a.img", 2 * 1024 * 1024);
        let benchmark = Benchmark::new();

        let stopper = stop_after(&benchmark, Duration::from_millis(300));
        let start = Instant::now();
        let err = benchmark
            .run(&plan(vec![dev.clone()], &TestKind::ALL, 30_000), &silent)
            .unwrap_err();
        stopper.join().unwrap();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(benchmark.is_stopped());

        // Still stopped until reset
        assert!(benchmark.run(&plan(vec![dev.clone()], &[TestKind::ReadIops], 100), &silent).unwrap_err().is_cancelled());

        benchmark.reset();
        let results = benchmark.run(&plan(vec![dev], &[TestKind::ReadIops], 150), &silent).unwrap();
        assert_eq!(results.results.len(), 1);
    }

    #[test]
    fn test_stop_mid_run_multi_device() {
        let dir = TempDir::new().unwrap();
        let a = device(&dir, "a.img", 2 * 1024 * 1024);
        let b = device(&dir, "b.img", 2 * 1024 * 1024);
        let benchmark = Benchmark::new();

        let stopper = stop_after(&benchmark, Duration::from_millis(300));
        let start = Instant::now();
        let err = benchmark
            .run(&plan(vec![a, b], &[TestKind::WriteThroughput], 30_000), &silent)
            .unwrap_err();
        stopper.join().unwrap();

        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let benchmark = Benchmark::new();
        benchmark.stop();
        benchmark.stop();
        assert!(benchmark.is_stopped());
        benchmark.reset();
        assert!(!benchmark.is_stopped());
    }

    #[test]
    fn test_no_devices_is_invalid() {
        let err = Benchmark::new().run(&plan(Vec::new(), &[TestKind::ReadIops], 100), &silent).unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));
    }
}
