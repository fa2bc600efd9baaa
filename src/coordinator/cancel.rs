//! Re-armable cancellation token
//!
//! One token belongs to a [`super::Benchmark`]. `signal()` wakes every thread
//! blocked in `wait_timeout()` at once; `reset()` re-arms it for the next run.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    stopped: Mutex<bool>,
    signal: Condvar,
}

/// Cloneable handle to a shared stop flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; idempotent
    pub fn signal(&self) {
        *self.lock() = true;
        self.inner.signal.notify_all();
    }

    pub fn is_signalled(&self) -> bool {
        *self.lock()
    }

    /// Block until signalled or `timeout` passes; returns whether signalled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .inner
            .signal
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }

    /// Clear a previous signal so the token can be used again
    pub fn reset(&self) {
        *self.lock() = false;
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner.stopped.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_signal_and_reset() {
        let token = CancelToken::new();
        assert!(!token.is_signalled());

        token.signal();
        token.signal();
        assert!(token.is_signalled());
        assert!(token.clone().is_signalled());

        token.reset();
        assert!(!token.is_signalled());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wait_timeout_wakes_on_signal() {
        let token = CancelToken::new();
        let signaller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal();
        });

        let start = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_already_signalled_returns_immediately() {
        let token = CancelToken::new();
        token.signal();
        assert!(token.wait_timeout(Duration::from_secs(10)));
    }
}
