//! 4Corners - raw storage device benchmark
//!
//! Measures the four corners of a storage device's performance envelope:
//! sequential read and write throughput (MB/s) and random read and write
//! IOPS, each with average, p50 and p99 latency.
//!
//! # Architecture
//!
//! - **Devices**: raw block devices (or plain files) opened with O_DIRECT
//! - **IO engines**: io_uring with real queue depth, or sync pread/pwrite
//! - **Workers**: one thread per configured thread, each keeping up to
//!   `queue_depth` requests in flight
//! - **Stats**: exact operation, byte and latency totals plus a bounded
//!   latency reservoir for percentiles
//! - **Coordinator**: runs the tests in order across every device in
//!   parallel and merges per-device results
//!
//! Write tests destroy the data on the target device.

pub mod config;
pub mod coordinator;
pub mod device;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod stats;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::BenchmarkConfig;
pub use coordinator::{Benchmark, BenchmarkPlan, BenchmarkResults, TestKind};
pub use error::BenchError;

/// Result type used for internal plumbing; public operations return [`BenchError`]
pub type Result<T> = anyhow::Result<T>;
