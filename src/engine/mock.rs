//! Mock IO engine for testing
//!
//! Completes every request without a syscall. Tests can make requests fail,
//! add a per-request delay, or make `init` itself fail, and inspect what was
//! submitted. Clones share state, so a test can keep a handle while the
//! worker owns the engine.

use super::{AsyncDeviceIo, EngineCapabilities, EngineConfig, IoCompletion, IoRequest, OperationType};
use crate::util::fast_time::FastInstant;
use crate::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Record of a submitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub op_type: OperationType,
    pub offset: u64,
    pub length: usize,
    pub user_data: u64,
}

#[derive(Debug, Default)]
struct MockState {
    should_fail: bool,
    fail_init: bool,
    fail_poll_after: Option<u64>,
    delivered: u64,
    delay: Duration,
    submitted: Vec<OperationRecord>,
}

#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
    pending: VecDeque<(u64, OperationType, usize)>,
    queue_depth: usize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every subsequent request with an error
    pub fn set_should_fail(&self, should_fail: bool) {
        self.state().should_fail = should_fail;
    }

    /// Make `init` fail, as a missing kernel feature would
    pub fn set_fail_init(&self, fail_init: bool) {
        self.state().fail_init = fail_init;
    }

    /// Fail every poll once `completions` requests have been delivered, as a
    /// broken completion queue would
    pub fn set_fail_poll_after(&self, completions: u64) {
        self.state().fail_poll_after = Some(completions);
    }

    /// Sleep this long in every poll that returns completions
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    pub fn submitted(&self) -> Vec<OperationRecord> {
        self.state().submitted.clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.state().submitted.len()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AsyncDeviceIo for MockEngine {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        if self.state().fail_init {
            anyhow::bail!("mock engine init failure");
        }
        self.queue_depth = config.queue_depth;
        Ok(())
    }

    fn submit(&mut self, op: IoRequest) -> Result<()> {
        self.state().submitted.push(OperationRecord {
            op_type: op.op_type,
            offset: op.offset,
            length: op.length,
            user_data: op.user_data,
        });
        self.pending.push_back((op.user_data, op.op_type, op.length));
        Ok(())
    }

    fn poll_completions(&mut self, completions: &mut Vec<IoCompletion>) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let (should_fail, delay) = {
            let mut state = self.state();
            if state.fail_poll_after.is_some_and(|limit| state.delivered >= limit) {
                anyhow::bail!("mock completion queue failure");
            }
            state.delivered += self.pending.len() as u64;
            (state.should_fail, state.delay)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let completed_at = FastInstant::now();
        let count = self.pending.len();
        for (user_data, op_type, length) in self.pending.drain(..) {
            let result = if should_fail {
                Err(anyhow::anyhow!("mock {} failure", op_type))
            } else {
                Ok(length)
            };
            completions.push(IoCompletion {
                user_data,
                result,
                op_type,
                completed_at,
            });
        }
        Ok(count)
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn cleanup(&mut self) -> Result<()> {
        self.pending.clear();
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
