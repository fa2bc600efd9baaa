//! Error taxonomy for benchmark runs
//!
//! Setup failures (opening a device, resolving its size, building an IO
//! engine) abort a test immediately and surface as one of these variants.
//! Per-operation IO errors during a running test are counted, not raised.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the benchmark engine
#[derive(Debug, Error)]
pub enum BenchError {
    /// Raw device access requires elevated privileges
    #[error(
        "access denied opening {}: raw device access requires elevated privileges (run as root or add the user to the 'disk' group)",
        path.display()
    )]
    AccessDenied { path: PathBuf },

    /// Device is exclusively held by another process
    #[error("device {} is busy (in use or locked by another process)", path.display())]
    DeviceBusy { path: PathBuf },

    #[error("device not found: {}", path.display())]
    DeviceNotFound { path: PathBuf },

    /// Device reports a capacity of zero bytes
    #[error("device {} reports a size of 0 bytes", path.display())]
    EmptyDevice { path: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The test ran to completion but not a single IO operation completed
    #[error(
        "no I/O operations completed during the {test} test: the device could not be accessed (check privileges and that the device is not mounted)"
    )]
    NoCompletions { test: String },

    /// The run was intentionally stopped
    #[error("benchmark cancelled by user")]
    UserCancelled,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// IO engine setup or completion-queue failure
    #[error("I/O engine failure: {0}")]
    Engine(String),
}

impl BenchError {
    /// Classify an error returned while opening a device
    pub fn from_open_error(path: &Path, err: io::Error) -> Self {
        let path = path.to_path_buf();
        match err.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => BenchError::AccessDenied { path },
            Some(libc::ENOENT) | Some(libc::ENXIO) | Some(libc::ENODEV) => {
                BenchError::DeviceNotFound { path }
            }
            Some(libc::EBUSY) | Some(libc::ETXTBSY) => BenchError::DeviceBusy { path },
            _ => match err.kind() {
                io::ErrorKind::PermissionDenied => BenchError::AccessDenied { path },
                io::ErrorKind::NotFound => BenchError::DeviceNotFound { path },
                _ => BenchError::Io { path, source: err },
            },
        }
    }

    pub fn engine(err: anyhow::Error) -> Self {
        BenchError::Engine(format!("{:#}", err))
    }

    /// True when the run was stopped on request rather than failing
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BenchError::UserCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(errno: i32) -> BenchError {
        BenchError::from_open_error(Path::new("/dev/sdz"), io::Error::from_raw_os_error(errno))
    }

    #[test]
    fn test_open_error_classification() {
        assert!(matches!(classify(libc::EACCES), BenchError::AccessDenied { .. }));
        assert!(matches!(classify(libc::EPERM), BenchError::AccessDenied { .. }));
        assert!(matches!(classify(libc::ENOENT), BenchError::DeviceNotFound { .. }));
        assert!(matches!(classify(libc::ENXIO), BenchError::DeviceNotFound { .. }));
        assert!(matches!(classify(libc::EBUSY), BenchError::DeviceBusy { .. }));
        assert!(matches!(classify(libc::EIO), BenchError::Io { .. }));
    }

    #[test]
    fn test_access_denied_has_remediation() {
        let msg = classify(libc::EACCES).to_string();
        assert!(msg.contains("/dev/sdz"));
        assert!(msg.contains("elevated privileges"));
    }

    #[test]
    fn test_cancelled_is_not_failure() {
        assert!(BenchError::UserCancelled.is_cancelled());
        assert!(!BenchError::InvalidConfig("x".into()).is_cancelled());
    }

    #[test]
    fn test_engine_error_keeps_context_chain() {
        let err = anyhow::anyhow!("ring setup failed").context("creating io_uring");
        let msg = BenchError::engine(err).to_string();
        assert!(msg.contains("creating io_uring"));
        assert!(msg.contains("ring setup failed"));
    }
}
