//! IO engine abstraction
//!
//! Workers depend only on [`AsyncDeviceIo`]. A backend accepts positioned
//! read/write requests tagged with `user_data` and hands back completions in
//! whatever order the kernel finishes them.
//!
//! # Backends
//!
//! - **sync**: `pread`/`pwrite`; each submit completes before it returns.
//!   Always available and used for queue depth 1.
//! - **io_uring**: Linux submission/completion rings; keeps up to
//!   `queue_depth` requests genuinely in flight (cargo feature `io_uring`).
//! - **mock**: no syscalls, for tests.
//!
//! # Lifecycle
//!
//! 1. `init()` with the queue depth
//! 2. `submit()` one request per free slot
//! 3. `poll_completions()` to reap finished requests (waits for at least one
//!    while anything is in flight)
//! 4. `cleanup()` once `in_flight()` is zero
//!
//! Buffers passed in a request must stay valid and untouched until that
//! request's completion has been reaped.
//!
//! Latency runs from just before `submit()` to the completion's
//! `completed_at`, stamped by the backend as soon as it sees the request
//! finish. A backend that does the IO inside `submit()` stamps it there, so
//! the other slots of the round never count against it.

use crate::util::fast_time::FastInstant;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use tracing::{debug, warn};

pub mod mock;
pub mod sync;

#[cfg(all(feature = "io_uring", target_os = "linux"))]
pub mod io_uring;

/// Queue depth used when none (or zero) is configured
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Largest block size a single request may carry (1 GiB)
///
/// io_uring encodes lengths as `u32`, and Linux caps one read or write well
/// below 4 GiB anyway.
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// Asynchronous positioned IO against an open device
pub trait AsyncDeviceIo: Send {
    /// Prepare the engine for up to `config.queue_depth` in-flight requests
    fn init(&mut self, config: &EngineConfig) -> Result<()>;

    /// Queue one request
    ///
    /// An error here means the engine itself is broken (e.g. a full
    /// submission queue), not that the IO failed; IO failures arrive as
    /// completions.
    fn submit(&mut self, op: IoRequest) -> Result<()>;

    /// Append finished requests to `completions`, returning how many
    ///
    /// Blocks until at least one request completes if any are in flight.
    fn poll_completions(&mut self, completions: &mut Vec<IoCompletion>) -> Result<usize>;

    /// Requests submitted but not yet reaped
    fn in_flight(&self) -> usize;

    /// Release kernel resources, waiting out anything still in flight
    fn cleanup(&mut self) -> Result<()>;

    fn capabilities(&self) -> EngineCapabilities;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub queue_depth: usize,
}

impl EngineConfig {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: if queue_depth == 0 { DEFAULT_QUEUE_DEPTH } else { queue_depth },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

/// One positioned transfer
#[derive(Debug)]
pub struct IoRequest {
    pub op_type: OperationType,
    pub target_fd: RawFd,
    pub offset: u64,
    /// Aligned buffer of at least `length` bytes, owned by the caller
    pub buffer: *mut u8,
    pub length: usize,
    /// Returned untouched in the matching completion
    pub user_data: u64,
}

// SAFETY: the raw buffer pointer is only dereferenced by the engine on the
// thread that owns both the engine and the buffer.
unsafe impl Send for IoRequest {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Read,
    Write,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationType::Read => write!(f, "read"),
            OperationType::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug)]
pub struct IoCompletion {
    pub user_data: u64,
    /// Bytes transferred, or the IO error
    pub result: Result<usize>,
    pub op_type: OperationType,
    /// When the engine observed the request finish
    pub completed_at: FastInstant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// Requests really overlap in the kernel
    pub async_io: bool,
    /// Several requests reach the kernel in one syscall
    pub batch_submission: bool,
    pub max_queue_depth: usize,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            async_io: false,
            batch_submission: false,
            max_queue_depth: 1,
        }
    }
}

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// io_uring when compiled in and queue depth > 1, else sync
    #[default]
    Auto,
    Sync,
    IoUring,
}

impl EngineKind {
    /// Concrete backend for a queue depth
    pub fn resolve(self, queue_depth: usize) -> EngineKind {
        match self {
            EngineKind::Auto if io_uring_available() && queue_depth > 1 => EngineKind::IoUring,
            EngineKind::Auto => EngineKind::Sync,
            other => other,
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EngineKind::Auto),
            "sync" => Ok(EngineKind::Sync),
            "io_uring" | "iouring" | "uring" => Ok(EngineKind::IoUring),
            other => anyhow::bail!("unknown engine '{}' (expected auto, sync or io_uring)", other),
        }
    }
}

/// Whether the io_uring backend was compiled in
pub const fn io_uring_available() -> bool {
    cfg!(all(feature = "io_uring", target_os = "linux"))
}

/// Build and initialise the backend for `kind`
///
/// Under [`EngineKind::Auto`] a kernel that refuses io_uring (too old, or
/// blocked by a seccomp policy) degrades to the sync engine with a warning.
/// An explicit io_uring request fails instead.
pub fn create_engine(kind: EngineKind, config: &EngineConfig) -> Result<Box<dyn AsyncDeviceIo>> {
    let resolved = kind.resolve(config.queue_depth);
    let mut engine = match resolved {
        EngineKind::IoUring => new_io_uring_engine()?,
        _ => Box::new(sync::SyncEngine::new()) as Box<dyn AsyncDeviceIo>,
    };

    match engine.init(config) {
        Ok(()) => {
            debug!(engine = ?resolved, queue_depth = config.queue_depth, "IO engine ready");
            Ok(engine)
        }
        Err(e) if kind == EngineKind::Auto && resolved != EngineKind::Sync => {
            warn!(error = %format!("{:#}", e), "io_uring unavailable, falling back to sync engine");
            let mut fallback = sync::SyncEngine::new();
            fallback.init(config)?;
            Ok(Box::new(fallback))
        }
        Err(e) => Err(e),
    }
}

#[cfg(all(feature = "io_uring", target_os = "linux"))]
fn new_io_uring_engine() -> Result<Box<dyn AsyncDeviceIo>> {
    Ok(Box::new(io_uring::IoUringEngine::new()))
}

#[cfg(not(all(feature = "io_uring", target_os = "linux")))]
fn new_io_uring_engine() -> Result<Box<dyn AsyncDeviceIo>> {
    anyhow::bail!("io_uring engine not available in this build")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_zero_queue_depth_defaults() {
        assert_eq!(EngineConfig::new(0).queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(EngineConfig::new(32).queue_depth, 32);
    }

    #[test]
    fn test_engine_kind_resolve() {
        assert_eq!(EngineKind::Auto.resolve(1), EngineKind::Sync);
        assert_eq!(EngineKind::Sync.resolve(64), EngineKind::Sync);
        assert_eq!(EngineKind::IoUring.resolve(1), EngineKind::IoUring);
        let expected = if io_uring_available() { EngineKind::IoUring } else { EngineKind::Sync };
        assert_eq!(EngineKind::Auto.resolve(4), expected);
    }

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("auto".parse::<EngineKind>().unwrap(), EngineKind::Auto);
        assert_eq!("SYNC".parse::<EngineKind>().unwrap(), EngineKind::Sync);
        assert_eq!("io_uring".parse::<EngineKind>().unwrap(), EngineKind::IoUring);
        assert!("libaio".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_create_sync_engine() {
        let engine = create_engine(EngineKind::Sync, &EngineConfig::new(8)).unwrap();
        assert!(!engine.capabilities().async_io);
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn test_create_auto_engine_always_succeeds() {
        // Falls back to sync when the kernel refuses io_uring
        let engine = create_engine(EngineKind::Auto, &EngineConfig::new(8)).unwrap();
        assert_eq!(engine.in_flight(), 0);
    }
}
