//! Rate calculations and duration formatting
//!
//! Throughput is reported in MB/s where 1 MB = 1024 * 1024 bytes.

use std::time::Duration;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Format a duration in human-readable form
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fourcorners::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos < 1_000 {
        format!("{}ns", nanos)
    } else if nanos < 1_000_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", nanos as f64 / 1_000_000_000.0)
    }
}

/// Operations per second over `duration`; zero for an empty interval
pub fn calculate_iops(operations: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        operations as f64 / seconds
    } else {
        0.0
    }
}

/// MB/s over `duration`; zero for an empty interval
pub fn calculate_throughput_mbps(bytes: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        bytes as f64 / seconds / BYTES_PER_MB
    } else {
        0.0
    }
}

/// Mean latency in milliseconds from a nanosecond sum
pub fn average_latency_ms(latency_ns_sum: u64, operations: u64) -> f64 {
    if operations == 0 {
        0.0
    } else {
        latency_ns_sum as f64 / operations as f64 / 1_000_000.0
    }
}

#[inline]
pub fn nanos_to_ms(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}
