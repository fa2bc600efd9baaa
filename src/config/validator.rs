//! Configuration validation

use super::size::parse_size;
use super::{BenchmarkConfig, TestConfig};
use crate::coordinator::TestKind;
use crate::engine::MAX_BLOCK_SIZE;
use crate::error::BenchError;
use crate::util::buffer::SECTOR_ALIGNMENT;
use std::collections::HashSet;

macro_rules! invalid {
    ($($arg:tt)*) => {
        return Err(BenchError::InvalidConfig(format!($($arg)*)))
    };
}

/// Validate complete configuration
pub fn validate_config(config: &BenchmarkConfig) -> Result<(), BenchError> {
    validate_devices(config)?;

    let tests = config.selected_tests();
    if tests.is_empty() {
        invalid!("no tests selected");
    }

    for kind in tests {
        validate_test(kind, config.test_config(kind), config.engine.direct_io)?;
    }

    Ok(())
}

fn validate_devices(config: &BenchmarkConfig) -> Result<(), BenchError> {
    if config.devices.is_empty() {
        invalid!("no target devices specified");
    }

    let mut seen = HashSet::new();
    for device in &config.devices {
        if device.as_os_str().is_empty() {
            invalid!("empty device path");
        }
        if !seen.insert(device) {
            invalid!("device {} listed more than once", device.display());
        }
    }

    Ok(())
}

/// Validate one test's parameters; returns the block size in bytes
pub fn validate_test(kind: TestKind, test: &TestConfig, direct_io: bool) -> Result<usize, BenchError> {
    let name = kind.short_name();

    let block_size = parse_size(&test.block_size)
        .map_err(|e| BenchError::InvalidConfig(format!("{}: {}", name, invalid_reason(e))))?;
    if block_size == 0 {
        invalid!("{}: block size must be greater than 0", name);
    }
    if block_size > MAX_BLOCK_SIZE {
        invalid!("{}: block size {} exceeds the maximum of {} bytes", name, block_size, MAX_BLOCK_SIZE);
    }
    if direct_io && block_size % SECTOR_ALIGNMENT != 0 {
        invalid!(
            "{}: block size {} is not a multiple of {} bytes, required for direct I/O",
            name,
            block_size,
            SECTOR_ALIGNMENT
        );
    }

    if test.threads == 0 {
        invalid!("{}: threads must be at least 1", name);
    }
    if test.queue_depth == Some(0) {
        invalid!("{}: queue_depth must be at least 1", name);
    }
    if test.duration_secs == 0 {
        invalid!("{}: duration_secs must be greater than 0", name);
    }

    Ok(block_size)
}

fn invalid_reason(err: BenchError) -> String {
    match err {
        BenchError::InvalidConfig(reason) => reason,
        other => other.to_string(),
    }
}
