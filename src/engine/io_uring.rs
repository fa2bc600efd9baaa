//! io_uring IO engine
//!
//! Keeps up to `queue_depth` reads or writes genuinely in flight through the
//! Linux submission/completion rings (kernel 5.1+). New entries are pushed to
//! the submission queue without a syscall; the next `poll_completions` submits
//! them all and waits for at least one completion in a single
//! `io_uring_enter`.
//!
//! # Example
//!
//! ```no_run
//! use fourcorners::engine::{AsyncDeviceIo, EngineConfig};
//! use fourcorners::engine::io_uring::IoUringEngine;
//!
//! let mut engine = IoUringEngine::new();
//! engine.init(&EngineConfig::new(32)).unwrap();
//!
//! // submit() up to 32 requests, then reap them as they finish
//! let mut completions = Vec::new();
//! engine.poll_completions(&mut completions).unwrap();
//!
//! engine.cleanup().unwrap();
//! ```

use super::{AsyncDeviceIo, EngineCapabilities, EngineConfig, IoCompletion, IoRequest, OperationType};
use crate::util::fast_time::FastInstant;
use crate::Result;
use anyhow::{anyhow, Context};
use io_uring::{opcode, types, IoUring};
use std::collections::HashMap;

pub struct IoUringEngine {
    ring: Option<IoUring>,
    queue_depth: usize,

    /// Operation type of every request not yet reaped, by user_data
    pending_ops: HashMap<u64, OperationType>,
}

impl IoUringEngine {
    pub fn new() -> Self {
        Self {
            ring: None,
            queue_depth: 0,
            pending_ops: HashMap::new(),
        }
    }

    fn reap(&mut self, completions: &mut Vec<IoCompletion>) -> usize {
        let Some(ring) = self.ring.as_mut() else {
            return 0;
        };

        let completed_at = FastInstant::now();
        let mut count = 0;
        for cqe in ring.completion() {
            let user_data = cqe.user_data();
            let result_code = cqe.result();
            let op_type = self.pending_ops.remove(&user_data).unwrap_or(OperationType::Read);

            // Negative result is an errno
            let result = if result_code >= 0 {
                Ok(result_code as usize)
            } else {
                let errno = -result_code;
                Err(std::io::Error::from_raw_os_error(errno))
                    .with_context(|| format!("{} operation failed: errno={}", op_type, errno))
            };

            completions.push(IoCompletion {
                user_data,
                result,
                op_type,
                completed_at,
            });
            count += 1;
        }
        count
    }

    /// Wait out and discard everything still in flight
    fn drain(&mut self) {
        let mut discarded = Vec::new();
        while !self.pending_ops.is_empty() {
            let Some(ring) = self.ring.as_mut() else {
                break;
            };
            if ring.submit_and_wait(1).is_err() {
                break;
            }
            discarded.clear();
            self.reap(&mut discarded);
        }
    }
}

impl Default for IoUringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncDeviceIo for IoUringEngine {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        let entries = config.queue_depth.max(1).next_power_of_two() as u32;
        let ring = IoUring::new(entries).context("failed to create io_uring instance")?;

        self.ring = Some(ring);
        self.queue_depth = config.queue_depth;
        self.pending_ops = HashMap::with_capacity(config.queue_depth);
        Ok(())
    }

    fn submit(&mut self, op: IoRequest) -> Result<()> {
        let ring = self.ring.as_mut().ok_or_else(|| anyhow!("io_uring engine not initialized"))?;

        let length = u32::try_from(op.length)
            .map_err(|_| anyhow!("request length {} exceeds the io_uring limit", op.length))?;
        let entry = match op.op_type {
            OperationType::Read => opcode::Read::new(types::Fd(op.target_fd), op.buffer, length)
                .offset(op.offset)
                .build()
                .user_data(op.user_data),
            OperationType::Write => {
                opcode::Write::new(types::Fd(op.target_fd), op.buffer as *const u8, length)
                    .offset(op.offset)
                    .build()
                    .user_data(op.user_data)
            }
        };

        // SAFETY: the buffer outlives the request; the worker keeps it until
        // the completion is reaped.
        let pushed = unsafe { ring.submission().push(&entry).is_ok() };
        if !pushed {
            // Submission queue full: hand what is queued to the kernel and retry
            ring.submit().context("failed to flush io_uring submission queue")?;
            // SAFETY: as above.
            unsafe {
                ring.submission()
                    .push(&entry)
                    .map_err(|_| anyhow!("io_uring submission queue full"))?;
            }
        }

        self.pending_ops.insert(op.user_data, op.op_type);
        Ok(())
    }

    fn poll_completions(&mut self, completions: &mut Vec<IoCompletion>) -> Result<usize> {
        let ring = self.ring.as_mut().ok_or_else(|| anyhow!("io_uring engine not initialized"))?;

        if !self.pending_ops.is_empty() {
            loop {
                match ring.submit_and_wait(1) {
                    Ok(_) => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e).context("failed to submit and wait for completions"),
                }
            }
        }

        Ok(self.reap(completions))
    }

    fn in_flight(&self) -> usize {
        self.pending_ops.len()
    }

    fn cleanup(&mut self) -> Result<()> {
        self.drain();
        self.ring = None;
        self.pending_ops.clear();
        Ok(())
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            async_io: true,
            batch_submission: true,
            max_queue_depth: self.queue_depth,
        }
    }
}

impl Drop for IoUringEngine {
    fn drop(&mut self) {
        // The kernel may still write into caller buffers until requests finish
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::buffer::AlignedBuffer;
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;
    use tempfile::TempDir;

    /// io_uring may be disabled by the kernel or a seccomp profile
    fn ring_engine(queue_depth: usize) -> Option<IoUringEngine> {
        let mut engine = IoUringEngine::new();
        match engine.init(&EngineConfig::new(queue_depth)) {
            Ok(()) => Some(engine),
            Err(e) => {
                eprintln!("skipping io_uring test: {:#}", e);
                None
            }
        }
    }

    #[test]
    fn test_io_uring_engine_capabilities() {
        let Some(engine) = ring_engine(16) else { return };
        let caps = engine.capabilities();
        assert!(caps.async_io);
        assert!(caps.batch_submission);
        assert_eq!(caps.max_queue_depth, 16);
    }

    #[test]
    fn test_io_uring_submit_requires_init() {
        let mut engine = IoUringEngine::new();
        let mut buf = vec![0u8; 16];
        let op = IoRequest {
            op_type: OperationType::Read,
            target_fd: 0,
            offset: 0,
            buffer: buf.as_mut_ptr(),
            length: buf.len(),
            user_data: 0,
        };
        assert!(engine.submit(op).is_err());
    }

    #[test]
    fn test_io_uring_rejects_oversized_request() {
        let Some(mut engine) = ring_engine(2) else { return };
        let mut buf = vec![0u8; 16];
        let op = IoRequest {
            op_type: OperationType::Write,
            target_fd: 0,
            offset: 0,
            buffer: buf.as_mut_ptr(),
            length: u32::MAX as usize + 1,
            user_data: 0,
        };
        // Refused before it reaches the kernel
        assert!(engine.submit(op).is_err());
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn test_io_uring_engine_queue_depth_round_trip() {
        let Some(mut engine) = ring_engine(8) else { return };

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dev.img");
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path).unwrap();
        file.set_len(8 * 4096).unwrap();
        let fd = file.as_raw_fd();

        let mut buffers: Vec<AlignedBuffer> = (0..8)
            .map(|i| {
                let mut buf = AlignedBuffer::new(4096, 4096).unwrap();
                buf.fill_random(i);
                buf
            })
            .collect();

        for (slot, buf) in buffers.iter_mut().enumerate() {
            engine
                .submit(IoRequest {
                    op_type: OperationType::Write,
                    target_fd: fd,
                    offset: slot as u64 * 4096,
                    buffer: buf.as_mut_ptr(),
                    length: 4096,
                    user_data: slot as u64,
                })
                .unwrap();
        }
        assert_eq!(engine.in_flight(), 8);

        let mut completions = Vec::new();
        while engine.in_flight() > 0 {
            engine.poll_completions(&mut completions).unwrap();
        }
        assert_eq!(completions.len(), 8);
        let mut seen: Vec<u64> = completions.iter().map(|c| c.user_data).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<u64>>());
        assert!(completions.iter().all(|c| *c.result.as_ref().unwrap() == 4096));

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(&on_disk[3 * 4096..4 * 4096], buffers[3].as_slice());

        engine.cleanup().unwrap();
    }

    #[test]
    fn test_io_uring_engine_error_completion() {
        let Some(mut engine) = ring_engine(2) else { return };

        let mut buf = AlignedBuffer::new(4096, 4096).unwrap();
        engine
            .submit(IoRequest {
                op_type: OperationType::Read,
                target_fd: -1,
                offset: 0,
                buffer: buf.as_mut_ptr(),
                length: 4096,
                user_data: 9,
            })
            .unwrap();

        let mut completions = Vec::new();
        engine.poll_completions(&mut completions).unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].user_data, 9);
        assert!(completions[0].result.is_err());
    }
}
