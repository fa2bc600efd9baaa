//! Human-readable byte sizes

use crate::error::BenchError;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Parse a size string (e.g., "4k", "128K", "1m", "2G", "512") to bytes
///
/// Suffixes are binary multiples; an optional trailing `b` (`"64kb"`) is
/// accepted.
pub fn parse_size(s: &str) -> Result<usize, BenchError> {
    let lower = s.trim().to_ascii_lowercase();
    let unsuffixed = lower.strip_suffix('b').unwrap_or(&lower);

    let (num_str, multiplier) = if let Some(n) = unsuffixed.strip_suffix('k') {
        (n, KIB)
    } else if let Some(n) = unsuffixed.strip_suffix('m') {
        (n, MIB)
    } else if let Some(n) = unsuffixed.strip_suffix('g') {
        (n, GIB)
    } else {
        (unsuffixed, 1)
    };

    let invalid = || BenchError::InvalidConfig(format!("invalid size '{}' (expected e.g. 4k, 128k, 1m)", s.trim()));

    let num: usize = num_str.trim().parse().map_err(|_| invalid())?;
    num.checked_mul(multiplier).ok_or_else(invalid)
}

/// Shortest exact rendering: `131072` → `"128k"`, `1000` → `"1000"`
pub fn format_size(bytes: usize) -> String {
    match bytes {
        0 => "0".to_string(),
        b if b % GIB == 0 => format!("{}g", b / GIB),
        b if b % MIB == 0 => format!("{}m", b / MIB),
        b if b % KIB == 0 => format!("{}k", b / KIB),
        b => b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("128K").unwrap(), 128 * 1024);
        assert_eq!(parse_size("64kb").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1m").unwrap(), 1024 * 1024);
        assert_eq!(parse_size(" 2G ").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        for bad in ["", "k", "4x", "-4k", "1.5m", "four"] {
            assert!(
                matches!(parse_size(bad), Err(BenchError::InvalidConfig(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_parse_size_overflow() {
        let huge = format!("{}g", usize::MAX);
        assert!(parse_size(&huge).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(4096), "4k");
        assert_eq!(format_size(128 * 1024), "128k");
        assert_eq!(format_size(1024 * 1024), "1m");
        assert_eq!(format_size(1000), "1000");
        assert_eq!(parse_size(&format_size(64 * 1024)).unwrap(), 64 * 1024);
    }
}
