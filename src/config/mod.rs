//! Configuration module
//!
//! A [`BenchmarkConfig`] is built from defaults, an optional TOML file and
//! command-line overrides, then validated and lowered into a typed
//! [`BenchmarkPlan`].
//!
//! ```toml
//! devices = ["/dev/nvme1n1", "/dev/nvme2n1"]
//! tests = ["read-tp", "read-iops"]
//!
//! [engine]
//! kind = "io_uring"
//! direct_io = true
//!
//! [read_iops]
//! block_size = "4k"
//! threads = 64
//! queue_depth = 32
//! duration_secs = 30
//! ```

pub mod size;
pub mod validator;

use crate::coordinator::{BenchmarkPlan, RunOptions, TestKind, TestSpec};
use crate::engine::{EngineKind, DEFAULT_QUEUE_DEPTH};
use crate::error::BenchError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Test duration when none is configured
pub const DEFAULT_DURATION_SECS: u64 = 60;

/// Complete benchmark configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    /// Raw block devices (or files) to test
    #[serde(default)]
    pub devices: Vec<PathBuf>,
    /// Tests to run; all four when absent
    #[serde(default)]
    pub tests: Option<Vec<TestKind>>,
    #[serde(default)]
    pub engine: EngineSettings,
    /// Fixed RNG seed for reproducible offsets and write data
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "TestConfig::read_throughput")]
    pub read_throughput: TestConfig,
    #[serde(default = "TestConfig::write_throughput")]
    pub write_throughput: TestConfig,
    #[serde(default = "TestConfig::read_iops")]
    pub read_iops: TestConfig,
    #[serde(default = "TestConfig::write_iops")]
    pub write_iops: TestConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    #[serde(default)]
    pub kind: EngineKind,
    /// Bypass the page cache with O_DIRECT
    #[serde(default = "default_direct_io")]
    pub direct_io: bool,
}

fn default_direct_io() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kind: EngineKind::Auto,
            direct_io: default_direct_io(),
        }
    }
}

/// Parameters of one of the four tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    /// Size string, e.g. "4k" or "128k"
    pub block_size: String,
    pub threads: usize,
    /// In-flight requests per thread; 4 when unset
    #[serde(default)]
    pub queue_depth: Option<usize>,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
}

fn default_duration_secs() -> u64 {
    DEFAULT_DURATION_SECS
}

impl TestConfig {
    fn with(block_size: &str, threads: usize) -> Self {
        Self {
            block_size: block_size.to_string(),
            threads,
            queue_depth: None,
            duration_secs: DEFAULT_DURATION_SECS,
        }
    }

    pub fn read_throughput() -> Self {
        Self::with("128k", 30)
    }

    pub fn write_throughput() -> Self {
        Self::with("64k", 16)
    }

    pub fn read_iops() -> Self {
        Self::with("4k", 120)
    }

    pub fn write_iops() -> Self {
        Self::with("4k", 120)
    }

    pub fn default_for(kind: TestKind) -> Self {
        match kind {
            TestKind::ReadThroughput => Self::read_throughput(),
            TestKind::WriteThroughput => Self::write_throughput(),
            TestKind::ReadIops => Self::read_iops(),
            TestKind::WriteIops => Self::write_iops(),
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            tests: None,
            engine: EngineSettings::default(),
            seed: None,
            read_throughput: TestConfig::read_throughput(),
            write_throughput: TestConfig::write_throughput(),
            read_iops: TestConfig::read_iops(),
            write_iops: TestConfig::write_iops(),
        }
    }
}

impl BenchmarkConfig {
    /// Default configuration against `devices`
    pub fn for_devices(devices: Vec<PathBuf>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    /// Parse a TOML configuration file
    pub fn load_file(path: &Path) -> Result<Self, BenchError> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))
            .map_err(|e| BenchError::InvalidConfig(format!("{:#}", e)))?;

        Self::parse_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
            .map_err(|e| BenchError::InvalidConfig(format!("{:#}", e)))
    }

    /// Parse TOML configuration from a string
    pub fn from_toml_str(contents: &str) -> Result<Self, BenchError> {
        Self::parse_toml(contents).map_err(|e| BenchError::InvalidConfig(format!("{:#}", e)))
    }

    fn parse_toml(contents: &str) -> crate::Result<Self> {
        let config: BenchmarkConfig = ::toml::from_str(contents).context("Failed to parse TOML configuration")?;
        Ok(config)
    }

    pub fn test_config(&self, kind: TestKind) -> &TestConfig {
        match kind {
            TestKind::ReadThroughput => &self.read_throughput,
            TestKind::WriteThroughput => &self.write_throughput,
            TestKind::ReadIops => &self.read_iops,
            TestKind::WriteIops => &self.write_iops,
        }
    }

    pub fn test_config_mut(&mut self, kind: TestKind) -> &mut TestConfig {
        match kind {
            TestKind::ReadThroughput => &mut self.read_throughput,
            TestKind::WriteThroughput => &mut self.write_throughput,
            TestKind::ReadIops => &mut self.read_iops,
            TestKind::WriteIops => &mut self.write_iops,
        }
    }

    /// Selected tests in canonical order, without duplicates
    pub fn selected_tests(&self) -> Vec<TestKind> {
        match &self.tests {
            None => TestKind::ALL.to_vec(),
            Some(tests) => {
                let mut tests = tests.clone();
                tests.sort();
                tests.dedup();
                tests
            }
        }
    }

    /// Override the duration of every test
    pub fn set_duration(&mut self, secs: u64) {
        for kind in TestKind::ALL {
            self.test_config_mut(kind).duration_secs = secs;
        }
    }

    /// Validate and lower into a runnable plan
    pub fn plan(&self) -> Result<BenchmarkPlan, BenchError> {
        validator::validate_config(self)?;

        let mut tests = Vec::new();
        for kind in self.selected_tests() {
            let test = self.test_config(kind);
            let block_size = validator::validate_test(kind, test, self.engine.direct_io)?;
            let spec = TestSpec::new(
                kind,
                block_size,
                test.threads,
                test.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
                Duration::from_secs(test.duration_secs),
            );
            tests.push((kind, spec));
        }

        Ok(BenchmarkPlan {
            devices: self.devices.clone(),
            tests,
            options: RunOptions {
                engine: self.engine.kind,
                direct_io: self.engine.direct_io,
                seed: self.seed,
                ..RunOptions::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_test_parameters() {
        let cfg = BenchmarkConfig::default();
        assert_eq!(cfg.read_throughput.block_size, "128k");
        assert_eq!(cfg.read_throughput.threads, 30);
        assert_eq!(cfg.write_throughput.block_size, "64k");
        assert_eq!(cfg.write_throughput.threads, 16);
        assert_eq!(cfg.read_iops.threads, 120);
        assert_eq!(cfg.write_iops.block_size, "4k");
        assert_eq!(cfg.write_iops.duration_secs, 60);
        assert!(cfg.engine.direct_io);
        assert_eq!(cfg.engine.kind, EngineKind::Auto);
        assert_eq!(cfg.selected_tests(), TestKind::ALL.to_vec());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let cfg = BenchmarkConfig::from_toml_str(r#"devices = ["/dev/sdb"]"#).unwrap();
        assert_eq!(cfg, BenchmarkConfig::for_devices(vec![PathBuf::from("/dev/sdb")]));
    }

    #[test]
    fn test_parse_full_toml() {
        let cfg = BenchmarkConfig::from_toml_str(
            r#"
            devices = ["/dev/nvme1n1", "/dev/nvme2n1"]
            tests = ["read-iops", "read-tp"]
            seed = 99

            [engine]
            kind = "sync"
            direct_io = false

            [read_iops]
            block_size = "8k"
            threads = 64
            queue_depth = 32
            duration_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(cfg.selected_tests(), vec![TestKind::ReadThroughput, TestKind::ReadIops]);
        assert_eq!(cfg.engine.kind, EngineKind::Sync);
        assert!(!cfg.engine.direct_io);
        assert_eq!(cfg.seed, Some(99));
        assert_eq!(cfg.read_iops.queue_depth, Some(32));
        assert_eq!(cfg.write_iops, TestConfig::write_iops());
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        let err = BenchmarkConfig::from_toml_str("devices = []\nworkers = 4").unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));

        let err = BenchmarkConfig::from_toml_str(r#"tests = ["mixed"]"#).unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "devices = [\"/dev/sdc\"]\n[write_throughput]\nblock_size = \"1m\"\nthreads = 2").unwrap();

        let cfg = BenchmarkConfig::load_file(file.path()).unwrap();
        assert_eq!(cfg.write_throughput.block_size, "1m");
        assert_eq!(cfg.write_throughput.duration_secs, DEFAULT_DURATION_SECS);

        let missing = BenchmarkConfig::load_file(Path::new("/nonexistent/4corners.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_plan_lowers_config() {
        let mut cfg = BenchmarkConfig::for_devices(vec![PathBuf::from("/dev/sdb")]);
        cfg.tests = Some(vec![TestKind::WriteIops, TestKind::ReadThroughput]);
        cfg.write_iops.queue_depth = Some(16);
        cfg.set_duration(5);

        let plan = cfg.plan().unwrap();
        assert_eq!(plan.devices, vec![PathBuf::from("/dev/sdb")]);
        assert_eq!(plan.options.engine, EngineKind::Auto);
        assert!(plan.options.direct_io);

        let kinds: Vec<TestKind> = plan.tests.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![TestKind::ReadThroughput, TestKind::WriteIops]);

        let (_, read_tp) = &plan.tests[0];
        assert_eq!(read_tp.block_size, 128 * 1024);
        assert_eq!(read_tp.threads, 30);
        assert_eq!(read_tp.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(read_tp.duration, Duration::from_secs(5));

        let (_, write_iops) = &plan.tests[1];
        assert_eq!(write_iops.queue_depth, 16);
        assert_eq!(write_iops.block_size, 4096);
    }

    #[test]
    fn test_plan_rejects_invalid() {
        let mut cfg = BenchmarkConfig::for_devices(vec![PathBuf::from("/dev/sdb")]);
        cfg.read_iops.queue_depth = Some(0);
        assert!(matches!(cfg.plan(), Err(BenchError::InvalidConfig(_))));
    }
}
