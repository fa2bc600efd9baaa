//! Benchmark worker
//!
//! A worker is one thread driving one device handle. It keeps `queue_depth`
//! requests in flight: every slot has its own aligned buffer, and as soon as
//! a slot's request completes the slot is refilled with the next offset.
//!
//! # Lifecycle
//!
//! 1. **Setup**: open the handle, resolve the device size, allocate buffers,
//!    build the IO engine. Any failure here is returned (and reported to the
//!    runner) instead of silently contributing zero throughput.
//! 2. **Ready**: a [`WorkerEvent::Ready`] tells the runner setup succeeded.
//! 3. **Steady state**: reap completions, record them in a local
//!    [`WorkerAccumulator`], flush it every [`crate::stats::FLUSH_BATCH`]
//!    operations, reissue the slot.
//! 4. **Stop**: the stop flag is checked once per `queue_depth` completions.
//!    Once set, no slot is reissued; in-flight requests drain and the
//!    accumulator is flushed one last time.
//!
//! A single failed request is counted and skipped. The only mid-run errors
//! that end a worker are failures of the engine itself.

use crate::device::{AccessMode, DeviceHandle};
use crate::distribution::{AccessPattern, OffsetGenerator};
use crate::engine::{create_engine, AsyncDeviceIo, EngineConfig, EngineKind, IoRequest, OperationType};
use crate::error::BenchError;
use crate::stats::{Aggregator, WorkerAccumulator};
use crate::util::buffer::{AlignedBuffer, SECTOR_ALIGNMENT};
use crate::util::fast_time::FastInstant;
use crossbeam::channel::Sender;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Everything one worker needs to know about its share of a test
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: usize,
    /// Workers running against the same device in this test
    pub worker_count: usize,
    pub path: PathBuf,
    pub op_type: OperationType,
    pub pattern: AccessPattern,
    pub block_size: usize,
    pub queue_depth: usize,
    /// Keep one latency sample in this many completions
    pub sample_every: u64,
    pub engine: EngineKind,
    pub direct_io: bool,
    /// Fixed RNG seed for offsets and write data; entropy when `None`
    pub seed: Option<u64>,
}

/// Setup outcome reported to the test runner
#[derive(Debug)]
pub enum WorkerEvent {
    Ready { id: usize },
    Failed { id: usize, error: BenchError },
}

/// Per-worker totals returned when the worker exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub id: usize,
    pub ops: u64,
    pub errors: u64,
}

/// Failed operations of one worker, with the first failure kept for the log
#[derive(Debug, Default)]
struct FailureTally {
    count: u64,
    first: Option<String>,
}

impl FailureTally {
    fn note(&mut self, describe: impl FnOnce() -> String) {
        self.count += 1;
        self.first.get_or_insert_with(describe);
    }
}

pub struct Worker {
    config: WorkerConfig,
    aggregator: Arc<Aggregator>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(config: WorkerConfig, aggregator: Arc<Aggregator>, stop: Arc<AtomicBool>) -> Self {
        Self {
            config,
            aggregator,
            stop,
        }
    }

    /// Run on a dedicated thread
    ///
    /// A setup failure is sent as [`WorkerEvent::Failed`] and the thread
    /// yields `None`.
    pub fn spawn(self, events: Sender<WorkerEvent>) -> Result<JoinHandle<Option<WorkerSummary>>, BenchError> {
        let id = self.config.id;
        thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || match self.run(&events) {
                Ok(summary) => Some(summary),
                Err(error) => {
                    debug!(worker = id, %error, "worker failed");
                    let _ = events.send(WorkerEvent::Failed { id, error });
                    None
                }
            })
            .map_err(|e| BenchError::Engine(format!("failed to spawn worker thread {}: {}", id, e)))
    }

    /// Open the device, build the configured engine and run until stopped
    pub fn run(&self, events: &Sender<WorkerEvent>) -> Result<WorkerSummary, BenchError> {
        let config = EngineConfig::new(self.config.queue_depth);
        self.run_with(events, || create_engine(self.config.engine, &config))
    }

    /// Like [`Worker::run`] with a caller-provided engine
    pub fn run_with_engine(
        &self,
        events: &Sender<WorkerEvent>,
        mut engine: Box<dyn AsyncDeviceIo>,
    ) -> Result<WorkerSummary, BenchError> {
        let config = EngineConfig::new(self.config.queue_depth);
        self.run_with(events, move || {
            engine.init(&config)?;
            Ok(engine)
        })
    }

    fn run_with<F>(&self, events: &Sender<WorkerEvent>, make_engine: F) -> Result<WorkerSummary, BenchError>
    where
        F: FnOnce() -> crate::Result<Box<dyn AsyncDeviceIo>>,
    {
        let cfg = &self.config;
        let queue_depth = cfg.queue_depth.max(1);

        let mode = match cfg.op_type {
            OperationType::Read => AccessMode::Read,
            OperationType::Write => AccessMode::ReadWrite,
        };
        let handle = DeviceHandle::open(&cfg.path, mode, cfg.direct_io)?;
        let device_size = handle.size()?;
        if device_size == 0 {
            return Err(BenchError::EmptyDevice {
                path: cfg.path.clone(),
            });
        }

        let mut offsets = match cfg.seed {
            Some(seed) => OffsetGenerator::with_seed(
                cfg.pattern,
                device_size,
                cfg.block_size as u64,
                cfg.id,
                cfg.worker_count,
                seed,
            ),
            None => OffsetGenerator::new(cfg.pattern, device_size, cfg.block_size as u64, cfg.id, cfg.worker_count),
        };

        let mut buffers = Vec::with_capacity(queue_depth);
        for slot in 0..queue_depth {
            let mut buffer = AlignedBuffer::new(cfg.block_size, SECTOR_ALIGNMENT).map_err(BenchError::engine)?;
            if cfg.op_type == OperationType::Write {
                let seed = cfg.seed.unwrap_or_else(rand::random) ^ ((cfg.id as u64) << 32 | slot as u64);
                buffer.fill_random(seed);
            }
            buffers.push(buffer);
        }

        // Declared after the buffers so it drops first, while they are still alive
        let mut engine = make_engine().map_err(BenchError::engine)?;

        debug!(
            worker = cfg.id,
            path = %cfg.path.display(),
            device_size,
            queue_depth,
            direct = handle.is_direct(),
            engine = ?engine.capabilities(),
            "worker ready"
        );
        let _ = events.send(WorkerEvent::Ready { id: cfg.id });

        let result = self.drive(&handle, engine.as_mut(), &mut buffers, &mut offsets, queue_depth);
        if let Err(e) = engine.cleanup() {
            warn!(worker = cfg.id, error = %format!("{:#}", e), "engine cleanup failed");
        }
        result
    }

    fn drive(
        &self,
        handle: &DeviceHandle,
        engine: &mut dyn AsyncDeviceIo,
        buffers: &mut [AlignedBuffer],
        offsets: &mut OffsetGenerator,
        queue_depth: usize,
    ) -> Result<WorkerSummary, BenchError> {
        let cfg = &self.config;
        let mut acc = WorkerAccumulator::new(cfg.sample_every);
        let mut failures = FailureTally::default();

        let outcome = self.pump(handle.fd(), engine, buffers, offsets, queue_depth, &mut acc, &mut failures);
        // Whatever was recorded before an engine failure still counts
        acc.flush_into(&self.aggregator);

        if let Some(first_error) = &failures.first {
            warn!(
                worker = cfg.id,
                path = %cfg.path.display(),
                errors = failures.count,
                first_error = %first_error,
                "I/O operations failed and were skipped"
            );
        }
        outcome?;
        debug!(worker = cfg.id, ops = acc.total_completed(), errors = failures.count, "worker stopped");

        Ok(WorkerSummary {
            id: cfg.id,
            ops: acc.total_completed(),
            errors: failures.count,
        })
    }

    /// Keep every slot busy until stopped, then drain what is in flight
    #[allow(clippy::too_many_arguments)]
    fn pump(
        &self,
        fd: RawFd,
        engine: &mut dyn AsyncDeviceIo,
        buffers: &mut [AlignedBuffer],
        offsets: &mut OffsetGenerator,
        queue_depth: usize,
        acc: &mut WorkerAccumulator,
        failures: &mut FailureTally,
    ) -> Result<(), BenchError> {
        let mut issued_at = vec![FastInstant::now(); queue_depth];
        let mut completions = Vec::with_capacity(queue_depth);
        let mut since_stop_check = 0usize;
        let mut stopping = self.stop.load(Ordering::Relaxed);

        if !stopping {
            for slot in 0..queue_depth {
                self.issue(engine, fd, offsets.next_offset(), &mut buffers[slot], slot, &mut issued_at[slot])?;
            }
        }

        while engine.in_flight() > 0 {
            completions.clear();
            engine.poll_completions(&mut completions).map_err(BenchError::engine)?;

            for completion in completions.drain(..) {
                let slot = completion.user_data as usize;
                let latency_ns = completion.completed_at.nanos_since(issued_at[slot]);

                let flush_due = match completion.result {
                    Ok(bytes) if bytes > 0 => acc.record(bytes as u64, latency_ns),
                    Ok(_) => {
                        failures.note(|| "zero-length transfer".to_string());
                        acc.record_error()
                    }
                    Err(e) => {
                        failures.note(|| format!("{:#}", e));
                        acc.record_error()
                    }
                };
                if flush_due {
                    acc.flush_into(&self.aggregator);
                }

                since_stop_check += 1;
                if since_stop_check >= queue_depth {
                    since_stop_check = 0;
                    stopping = stopping || self.stop.load(Ordering::Relaxed);
                }

                if !stopping {
                    self.issue(engine, fd, offsets.next_offset(), &mut buffers[slot], slot, &mut issued_at[slot])?;
                }
            }
        }

        Ok(())
    }

    #[inline]
    fn issue(
        &self,
        engine: &mut dyn AsyncDeviceIo,
        fd: RawFd,
        offset: u64,
        buffer: &mut AlignedBuffer,
        slot: usize,
        issued_at: &mut FastInstant,
    ) -> Result<(), BenchError> {
        *issued_at = FastInstant::now();
        engine
            .submit(IoRequest {
                op_type: self.config.op_type,
                target_fd: fd,
                offset,
                buffer: buffer.as_mut_ptr(),
                length: self.config.block_size,
                user_data: slot as u64,
            })
            .map_err(BenchError::engine)
    }
}
