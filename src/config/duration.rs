//! # Duration Parsing
//!
//! Handles parsing of duration values in the bootstrapper configuration.
//!
//! Two encodings are accepted, matching what operators already write into the
//! configuration ConfigMap:
//! - a duration string made of `<number><unit>` segments such as `"30s"`,
//!   `"1h30m"` or `"1.5s"` (units: `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`)
//! - a bare integer, interpreted as nanoseconds

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static DURATION_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:\d+(?:\.\d*)?|\.\d+)(?:ns|us|µs|ms|s|m|h))+$")
        .expect("duration format regex is valid")
});

static DURATION_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<whole>\d*)(?:\.(?P<fraction>\d*))?(?P<unit>ns|us|µs|ms|s|m|h)")
        .expect("duration segment regex is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration format '{0}', expected e.g. '30s', '1h30m' or '500ms'")]
    InvalidFormat(String),
    #[error("duration '{0}' is out of range")]
    Overflow(String),
}

fn unit_nanos(unit: &str) -> u128 {
    match unit {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        // "h" is the only remaining unit accepted by the segment regex
        _ => 3600 * 1_000_000_000,
    }
}

/// Parse a duration string into a [`Duration`].
///
/// `"0"` is accepted as a zero duration; any other value must carry a unit on
/// every segment.
pub fn parse_duration(value: &str) -> Result<Duration, DurationParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if !DURATION_FORMAT.is_match(trimmed) {
        return Err(DurationParseError::InvalidFormat(trimmed.to_string()));
    }

    let overflow = || DurationParseError::Overflow(trimmed.to_string());
    let mut total: u128 = 0;
    for captures in DURATION_SEGMENT.captures_iter(trimmed) {
        let unit = unit_nanos(captures.name("unit").map_or("ns", |m| m.as_str()));

        let whole = captures.name("whole").map_or("", |m| m.as_str());
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        total = total
            .checked_add(whole.checked_mul(unit).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;

        if let Some(fraction) = captures.name("fraction").map(|m| m.as_str()) {
            // Digits beyond nanosecond precision are dropped.
            let digits = &fraction[..fraction.len().min(18)];
            if !digits.is_empty() {
                let numerator: u128 = digits.parse().map_err(|_| overflow())?;
                let scale = 10u128.pow(u32::try_from(digits.len()).map_err(|_| overflow())?);
                total = total
                    .checked_add(numerator * unit / scale)
                    .ok_or_else(overflow)?;
            }
        }
    }

    let secs = u64::try_from(total / 1_000_000_000).map_err(|_| overflow())?;
    let nanos = u32::try_from(total % 1_000_000_000).map_err(|_| overflow())?;
    Ok(Duration::new(secs, nanos))
}

/// Format a duration the same way [`parse_duration`] reads it back, e.g. `"1h0m30s"`.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }
    if duration < Duration::from_secs(1) {
        let nanos = duration.subsec_nanos();
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}µs", nanos / 1_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let nanos = duration.subsec_nanos();

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if nanos == 0 {
        out.push_str(&format!("{seconds}s"));
    } else {
        let fraction = format!("{nanos:09}");
        out.push_str(&format!("{seconds}.{}s", fraction.trim_end_matches('0')));
    }
    out
}

/// Duration value as it appears in the configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(try_from = "RawDuration", into = "RawDuration")]
pub struct ConfigDuration(pub Duration);

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum RawDuration {
    Nanos(u64),
    Text(String),
}

impl TryFrom<RawDuration> for ConfigDuration {
    type Error = DurationParseError;

    fn try_from(raw: RawDuration) -> Result<Self, Self::Error> {
        match raw {
            RawDuration::Nanos(nanos) => Ok(Self(Duration::from_nanos(nanos))),
            RawDuration::Text(text) => parse_duration(&text).map(Self),
        }
    }
}

impl From<ConfigDuration> for RawDuration {
    fn from(value: ConfigDuration) -> Self {
        RawDuration::Text(format_duration(value.0))
    }
}

impl From<ConfigDuration> for Duration {
    fn from(value: ConfigDuration) -> Self {
        value.0
    }
}

impl fmt::Display for ConfigDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_unit() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10us"), Ok(Duration::from_micros(10)));
        assert_eq!(parse_duration("10µs"), Ok(Duration::from_micros(10)));
        assert_eq!(parse_duration("7ns"), Ok(Duration::from_nanos(7)));
    }

    #[test]
    fn test_parse_compound_and_fraction() {
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1m0.5s"), Ok(Duration::from_millis(60_500)));
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration(".5s"), Ok(Duration::from_millis(500)));
    }

    #[test]
    fn test_parse_zero_and_whitespace() {
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert_eq!(parse_duration("  15s "), Ok(Duration::from_secs(15)));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert!(matches!(
            parse_duration("10"),
            Err(DurationParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_duration("1d"),
            Err(DurationParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_duration("-5s"),
            Err(DurationParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_duration("5 s"),
            Err(DurationParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_format_matches_parse() {
        for value in ["1h0m0s", "1m30s", "45s", "250ms", "1.5s", "2h15m0s"] {
            let parsed = parse_duration(value).unwrap();
            assert_eq!(format_duration(parsed), value);
        }
    }

    #[test]
    fn test_config_duration_accepts_string_and_nanos() {
        let from_text: ConfigDuration = serde_json::from_str("\"10m\"").unwrap();
        assert_eq!(from_text.0, Duration::from_secs(600));

        let from_nanos: ConfigDuration = serde_json::from_str("1000000000").unwrap();
        assert_eq!(from_nanos.0, Duration::from_secs(1));

        assert!(serde_json::from_str::<ConfigDuration>("\"ten minutes\"").is_err());
        assert!(serde_json::from_str::<ConfigDuration>("true").is_err());
    }
}
