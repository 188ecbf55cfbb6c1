//! Parsing utilities for human-readable configuration values

use std::time::Duration;

/// Parse a duration string (e.g., "30s", "15m", "1h", "2d", "100ms")
///
/// A bare number is read as seconds. Returns `None` when the string is not
/// a recognizable duration so callers can fall back to their own default.
///
/// # Supported formats
/// - `"2d"` - days
/// - `"1h"` - hours
/// - `"15m"` - minutes
/// - `"30s"` or `"30"` - seconds
/// - `"100ms"` - milliseconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();
    let (num_str, millis) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60 * 1000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60 * 1000)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 24 * 60 * 60 * 1000)
    } else {
        (s.as_str(), 1000)
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(millis))
        .map(Duration::from_millis)
}
