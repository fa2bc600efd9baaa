//! The four canonical tests and their parameters

use crate::distribution::AccessPattern;
use crate::engine::{OperationType, DEFAULT_QUEUE_DEPTH, MAX_BLOCK_SIZE};
use crate::error::BenchError;
use crate::util::buffer::SECTOR_ALIGNMENT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One corner of the benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestKind {
    #[serde(rename = "read-tp", alias = "read-throughput")]
    ReadThroughput,
    #[serde(rename = "write-tp", alias = "write-throughput")]
    WriteThroughput,
    #[serde(rename = "read-iops")]
    ReadIops,
    #[serde(rename = "write-iops")]
    WriteIops,
}

impl TestKind {
    /// Canonical execution order
    pub const ALL: [TestKind; 4] = [
        TestKind::ReadThroughput,
        TestKind::WriteThroughput,
        TestKind::ReadIops,
        TestKind::WriteIops,
    ];

    pub fn direction(self) -> OperationType {
        match self {
            TestKind::ReadThroughput | TestKind::ReadIops => OperationType::Read,
            TestKind::WriteThroughput | TestKind::WriteIops => OperationType::Write,
        }
    }

    pub fn pattern(self) -> AccessPattern {
        match self {
            TestKind::ReadThroughput | TestKind::WriteThroughput => AccessPattern::Sequential,
            TestKind::ReadIops | TestKind::WriteIops => AccessPattern::Random,
        }
    }

    /// One latency in this many goes to the percentile reservoir
    pub fn sample_every(self) -> u64 {
        match self.pattern() {
            AccessPattern::Sequential => 100,
            AccessPattern::Random => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TestKind::ReadThroughput => "Read Throughput",
            TestKind::WriteThroughput => "Write Throughput",
            TestKind::ReadIops => "Read IOPS",
            TestKind::WriteIops => "Write IOPS",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            TestKind::ReadThroughput => "read-tp",
            TestKind::WriteThroughput => "write-tp",
            TestKind::ReadIops => "read-iops",
            TestKind::WriteIops => "write-iops",
        }
    }

    /// Parse `"all"` or a comma separated list, returned in canonical order
    pub fn parse_list(s: &str) -> Result<Vec<TestKind>, BenchError> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::ALL.to_vec());
        }

        let mut kinds = s
            .split(',')
            .map(|part| part.trim().parse::<TestKind>())
            .collect::<Result<Vec<_>, _>>()?;
        kinds.sort();
        kinds.dedup();
        Ok(kinds)
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read-tp" | "read-throughput" => Ok(TestKind::ReadThroughput),
            "write-tp" | "write-throughput" => Ok(TestKind::WriteThroughput),
            "read-iops" => Ok(TestKind::ReadIops),
            "write-iops" => Ok(TestKind::WriteIops),
            other => Err(BenchError::InvalidConfig(format!(
                "unknown test '{}' (expected read-tp, write-tp, read-iops, write-iops or all)",
                other
            ))),
        }
    }
}

/// Parameters of one test run against one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSpec {
    pub direction: OperationType,
    pub pattern: AccessPattern,
    pub block_size: usize,
    pub threads: usize,
    pub queue_depth: usize,
    pub duration: Duration,
}

impl TestSpec {
    /// Spec for `kind`; a zero queue depth becomes the default of 4
    pub fn new(kind: TestKind, block_size: usize, threads: usize, queue_depth: usize, duration: Duration) -> Self {
        Self {
            direction: kind.direction(),
            pattern: kind.pattern(),
            block_size,
            threads,
            queue_depth: if queue_depth == 0 { DEFAULT_QUEUE_DEPTH } else { queue_depth },
            duration,
        }
    }

    /// Check the invariants a runner depends on
    pub fn validate(&self, direct_io: bool) -> Result<(), BenchError> {
        if self.block_size == 0 {
            return Err(BenchError::InvalidConfig("block size must be greater than 0".into()));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(BenchError::InvalidConfig(format!(
                "block size {} exceeds the maximum of {} bytes",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        if direct_io && self.block_size % SECTOR_ALIGNMENT != 0 {
            return Err(BenchError::InvalidConfig(format!(
                "block size {} is not a multiple of {} bytes, required for direct I/O",
                self.block_size, SECTOR_ALIGNMENT
            )));
        }
        if self.threads == 0 {
            return Err(BenchError::InvalidConfig("thread count must be at least 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(BenchError::InvalidConfig("queue depth must be at least 1".into()));
        }
        if self.duration.is_zero() {
            return Err(BenchError::InvalidConfig("duration must be greater than 0".into()));
        }
        Ok(())
    }
}
