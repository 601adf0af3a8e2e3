//! Duration parsing utilities.
//!
//! This module provides parsing for human-readable duration strings
//! like "5s", "30s", "1m", "500ms", "2h".

use std::time::Duration;

/// Parse a duration string like "10s", "30s", "1m", "500ms", "2h".
///
/// Supported formats:
/// - `"Nms"` - N milliseconds (e.g., "500ms")
/// - `"Ns"` - N seconds (e.g., "30s")
/// - `"Nm"` - N minutes (e.g., "5m")
/// - `"Nh"` - N hours (e.g., "1h")
/// - `"N"` - N seconds (no suffix, assumes seconds)
///
/// Returns `None` if the string cannot be parsed.
///
/// # Examples
///
/// ```
/// use beads_dolt::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("5s"), Some(Duration::from_secs(5)));
/// assert_eq!(parse_duration_string("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration_string("1m"), Some(Duration::from_secs(60)));
/// assert_eq!(parse_duration_string("30"), Some(Duration::from_secs(30)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        // Default to seconds if no suffix
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse an optional duration field, falling back to `default` when the
/// value is missing or malformed.
pub(crate) fn duration_or(value: Option<&str>, default: Duration, field: &str) -> Duration {
    match value {
        None => default,
        Some(raw) => parse_duration_string(raw).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid duration '{}' for {}, using default {:?}",
                raw,
                field,
                default
            );
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration_string("5s"), Some(Duration::from_secs(5)));
        assert_eq!(
            parse_duration_string("120s"),
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_parse_duration_minutes_and_hours() {
        assert_eq!(parse_duration_string("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration_string("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration_string("2h"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_duration_milliseconds() {
        assert_eq!(
            parse_duration_string("500ms"),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_parse_duration_no_suffix_and_whitespace() {
        assert_eq!(parse_duration_string("10"), Some(Duration::from_secs(10)));
        assert_eq!(
            parse_duration_string(" 100ms "),
            Some(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration_string(""), None);
        assert_eq!(parse_duration_string("abc"), None);
        assert_eq!(parse_duration_string("5x"), None);
        assert_eq!(parse_duration_string("-5s"), None);
    }

    #[test]
    fn test_duration_or_falls_back() {
        let default = Duration::from_secs(7);
        assert_eq!(duration_or(None, default, "x"), default);
        assert_eq!(duration_or(Some("bogus"), default, "x"), default);
        assert_eq!(
            duration_or(Some("0"), default, "x"),
            Duration::from_secs(0)
        );
    }
}
