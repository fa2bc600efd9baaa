//! Synchronous IO engine
//!
//! Performs each request with a blocking `pread`/`pwrite` at submit time and
//! queues the completion for the next poll. A worker at queue depth N still
//! issues N requests per round, but they reach the device one at a time.
//! Each completion is stamped the moment its syscall returns.
//!
//! # Example
//!
//! ```no_run
//! use fourcorners::engine::{AsyncDeviceIo, EngineConfig, IoRequest, OperationType};
//! use fourcorners::engine::sync::SyncEngine;
//!
//! let mut engine = SyncEngine::new();
//! engine.init(&EngineConfig::default()).unwrap();
//!
//! let mut buf = vec![0u8; 4096];
//! engine.submit(IoRequest {
//!     op_type: OperationType::Read,
//!     target_fd: 3,
//!     offset: 0,
//!     buffer: buf.as_mut_ptr(),
//!     length: buf.len(),
//!     user_data: 1,
//! }).unwrap();
//!
//! let mut completions = Vec::new();
//! assert_eq!(engine.poll_completions(&mut completions).unwrap(), 1);
//! ```

use super::{AsyncDeviceIo, EngineCapabilities, EngineConfig, IoCompletion, IoRequest, OperationType};
use crate::util::fast_time::FastInstant;
use crate::Result;
use anyhow::Context;
use std::collections::VecDeque;

pub struct SyncEngine {
    queue_depth: usize,
    completed: VecDeque<IoCompletion>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            queue_depth: 1,
            completed: VecDeque::new(),
        }
    }

    /// `pread` until `length` bytes arrive or EOF
    #[inline(always)]
    fn do_read(&self, fd: i32, buffer: *mut u8, length: usize, offset: u64) -> Result<usize> {
        let mut total_read = 0;

        while total_read < length {
            let remaining = length - total_read;
            let current_offset = offset + total_read as u64;

            // SAFETY: the caller guarantees buffer is valid for length bytes.
            let result = unsafe {
                libc::pread(
                    fd,
                    buffer.add(total_read) as *mut libc::c_void,
                    remaining,
                    current_offset as libc::off_t,
                )
            };

            if result < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err).with_context(|| {
                    format!("pread failed: fd={}, offset={}, length={}", fd, current_offset, remaining)
                });
            }
            if result == 0 {
                break;
            }
            total_read += result as usize;
        }

        Ok(total_read)
    }

    /// `pwrite` until all `length` bytes are written
    #[inline(always)]
    fn do_write(&self, fd: i32, buffer: *const u8, length: usize, offset: u64) -> Result<usize> {
        let mut total_written = 0;

        while total_written < length {
            let remaining = length - total_written;
            let current_offset = offset + total_written as u64;

            // SAFETY: the caller guarantees buffer is valid for length bytes.
            let result = unsafe {
                libc::pwrite(
                    fd,
                    buffer.add(total_written) as *const libc::c_void,
                    remaining,
                    current_offset as libc::off_t,
                )
            };

            if result < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err).with_context(|| {
                    format!("pwrite failed: fd={}, offset={}, length={}", fd, current_offset, remaining)
                });
            }
            if result == 0 {
                anyhow::bail!("pwrite made no progress: fd={}, offset={}", fd, current_offset);
            }
            total_written += result as usize;
        }

        Ok(total_written)
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncDeviceIo for SyncEngine {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        self.queue_depth = config.queue_depth;
        self.completed = VecDeque::with_capacity(config.queue_depth);
        Ok(())
    }

    fn submit(&mut self, op: IoRequest) -> Result<()> {
        let result = match op.op_type {
            OperationType::Read => self.do_read(op.target_fd, op.buffer, op.length, op.offset),
            OperationType::Write => self.do_write(op.target_fd, op.buffer, op.length, op.offset),
        };

        self.completed.push_back(IoCompletion {
            user_data: op.user_data,
            result,
            op_type: op.op_type,
            completed_at: FastInstant::now(),
        });
        Ok(())
    }

    fn poll_completions(&mut self, completions: &mut Vec<IoCompletion>) -> Result<usize> {
        let count = self.completed.len();
        completions.extend(self.completed.drain(..));
        Ok(count)
    }

    fn in_flight(&self) -> usize {
        self.completed.len()
    }

    fn cleanup(&mut self) -> Result<()> {
        self.completed.clear();
        Ok(())
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            async_io: false,
            batch_submission: false,
            max_queue_depth: self.queue_depth,
        }
    }
}
