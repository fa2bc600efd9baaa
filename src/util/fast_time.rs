//! Fast monotonic timestamps for per-operation latency
//!
//! Reads CLOCK_MONOTONIC directly. Every completed operation takes two of
//! these, so the call has to stay cheap.

use std::time::Duration;

/// Nanosecond timestamp from CLOCK_MONOTONIC
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FastInstant {
    nanos: u64,
}

impl FastInstant {
    #[inline(always)]
    pub fn now() -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };

        // SAFETY: ts is a valid out-pointer; CLOCK_MONOTONIC is always supported.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }

        Self {
            nanos: (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64),
        }
    }

    /// Nanoseconds between `earlier` and `self`, saturating at zero
    #[inline(always)]
    pub fn nanos_since(&self, earlier: FastInstant) -> u64 {
        self.nanos.saturating_sub(earlier.nanos)
    }

    #[inline(always)]
    pub fn duration_since(&self, earlier: FastInstant) -> Duration {
        Duration::from_nanos(self.nanos_since(earlier))
    }

    #[inline(always)]
    pub fn elapsed(&self) -> Duration {
        Self::now().duration_since(*self)
    }
}
