//! Parsing of human-friendly and ISO-8601 durations.
//!
//! Timeouts and poll intervals come from the command line and from YAML
//! config files, so both `30s`/`5 min`/`250` (milliseconds) and the
//! standard `PT30S` form are accepted.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;

const ISO_8601_PATTERN: &str =
    r"(?i)^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:[.,](\d{1,9}))?S)?)?$";

fn iso_8601() -> &'static Regex {
    static ISO: OnceLock<Regex> = OnceLock::new();
    ISO.get_or_init(|| Regex::new(ISO_8601_PATTERN).expect("ISO-8601 duration pattern is valid"))
}

/// Parses a duration in ISO-8601 (`PT1M30S`, `P3D`, `PT0.789S`) or lax
/// (`N[unit]`) syntax.
///
/// Whitespace is ignored in the lax syntax and a missing unit means
/// milliseconds. See [`parse_unit`] for the accepted units.
pub fn parse_duration(definition: &str) -> Result<Duration, ConfigError> {
    let trimmed = definition.trim();
    if trimmed.is_empty() {
        return Err(invalid(definition, "empty duration"));
    }
    if let Some(duration) = parse_iso_8601(trimmed)? {
        return Ok(duration);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let split = compact
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(compact.len());
    let (magnitude, unit) = compact.split_at(split);
    if magnitude.is_empty() {
        return Err(invalid(definition, "expected a number"));
    }
    let magnitude: u64 = magnitude
        .parse()
        .map_err(|e| invalid(definition, &format!("{e}")))?;
    let unit = parse_unit(unit)?;
    Ok(unit.of(magnitude))
}

/// Parses `definition`, or returns `default` when it is absent or empty.
pub fn parse_duration_or(
    definition: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match definition.map(str::trim) {
        Some(d) if !d.is_empty() => parse_duration(d),
        _ => Ok(default),
    }
}

/// Time unit accepted in lax duration syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn of(self, magnitude: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(magnitude),
            TimeUnit::Microseconds => Duration::from_micros(magnitude),
            TimeUnit::Milliseconds => Duration::from_millis(magnitude),
            TimeUnit::Seconds => Duration::from_secs(magnitude),
            TimeUnit::Minutes => Duration::from_secs(magnitude.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(magnitude.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(magnitude.saturating_mul(86_400)),
        }
    }
}

/// Parses a time unit token, case-insensitively. An empty token means
/// milliseconds.
///
/// Accepted: `ms`, `milli`, `millis`, `millisec`, `millisecs`,
/// `milliseconds`, `s`, `sec`, `secs`, `seconds`, `m`, `min`, `mins`,
/// `minutes`, `nanoseconds`, `microseconds`, `h`, `hour`, `hours`, `d`,
/// `day`, `days`.
pub fn parse_unit(token: &str) -> Result<TimeUnit, ConfigError> {
    let unit = match token.to_ascii_lowercase().as_str() {
        "" | "ms" | "milli" | "millis" | "milliseconds" | "millisecs" | "millisec" => {
            TimeUnit::Milliseconds
        }
        "s" | "sec" | "secs" | "seconds" => TimeUnit::Seconds,
        "m" | "min" | "mins" | "minutes" => TimeUnit::Minutes,
        "nanoseconds" => TimeUnit::Nanoseconds,
        "microseconds" => TimeUnit::Microseconds,
        "h" | "hour" | "hours" => TimeUnit::Hours,
        "d" | "day" | "days" => TimeUnit::Days,
        _ => return Err(ConfigError::InvalidUnit(abbreviate(token, 128))),
    };
    Ok(unit)
}

/// Renders a duration in the most compact lax form that round-trips.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis > 0 && millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis > 0 && millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

fn parse_iso_8601(definition: &str) -> Result<Option<Duration>, ConfigError> {
    let Some(caps) = iso_8601().captures(definition) else {
        return Ok(None);
    };
    if caps.iter().skip(1).all(|group| group.is_none()) || definition.ends_with(['T', 't']) {
        return Err(invalid(definition, "ISO-8601 duration has no components"));
    }

    let number = |index: usize| -> Result<u64, ConfigError> {
        caps.get(index)
            .map(|m| m.as_str().parse::<u64>())
            .transpose()
            .map(|n| n.unwrap_or(0))
            .map_err(|e| invalid(definition, &format!("{e}")))
    };
    let days = number(1)?;
    let hours = number(2)?;
    let minutes = number(3)?;
    let seconds = number(4)?;
    let nanos = match caps.get(5) {
        Some(fraction) => {
            let digits = fraction.as_str();
            let padded = format!("{digits:0<9}");
            padded
                .parse::<u32>()
                .map_err(|e| invalid(definition, &format!("{e}")))?
        }
        None => 0,
    };

    let total_secs = days
        .checked_mul(86_400)
        .and_then(|s| s.checked_add(hours.checked_mul(3_600)?))
        .and_then(|s| s.checked_add(minutes.checked_mul(60)?))
        .and_then(|s| s.checked_add(seconds))
        .ok_or_else(|| invalid(definition, "duration overflows"))?;
    Ok(Some(Duration::new(total_secs, nanos)))
}

fn invalid(input: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidDuration {
        input: abbreviate(input, 128),
        reason: reason.to_string(),
    }
}

fn abbreviate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Serde adapter for `Duration` fields written as human durations.
pub mod serde_human {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lax() {
        let cases = [
            ("123ms", Duration::from_millis(123)),
            ("123 ms", Duration::from_millis(123)),
            ("123 milliseconds", Duration::from_millis(123)),
            ("250", Duration::from_millis(250)),
            ("1min", Duration::from_secs(60)),
            ("1 min", Duration::from_secs(60)),
            ("1m", Duration::from_secs(60)),
            ("456sec", Duration::from_secs(456)),
            ("456s", Duration::from_secs(456)),
            ("456seconds", Duration::from_secs(456)),
            ("456 sec", Duration::from_secs(456)),
            ("456 S", Duration::from_secs(456)),
            ("2 hours", Duration::from_secs(7_200)),
            ("3days", Duration::from_secs(259_200)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_duration(input).unwrap(), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_parse_iso_8601() {
        let cases = [
            ("PT0.789S", Duration::from_millis(789)),
            ("PT30S", Duration::from_secs(30)),
            ("PT5M", Duration::from_secs(300)),
            ("PT36H", Duration::from_secs(36 * 3_600)),
            ("PT12H", Duration::from_secs(12 * 3_600)),
            ("P3D", Duration::from_secs(3 * 86_400)),
            ("PT9600H", Duration::from_secs(400 * 86_400)),
            ("P1DT1H1M1.5S", Duration::from_millis(90_061_500)),
            ("pt1m", Duration::from_secs(60)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_duration(input).unwrap(), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("   ").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("P").is_err());
        assert!(matches!(
            parse_duration("10 fortnights"),
            Err(ConfigError::InvalidUnit(_))
        ));
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_parse_duration_or_default() {
        let default = Duration::from_secs(1_800);
        assert_eq!(parse_duration_or(None, default).unwrap(), default);
        assert_eq!(parse_duration_or(Some(""), default).unwrap(), default);
        assert_eq!(
            parse_duration_or(Some("5s"), default).unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_format_duration_round_trips() {
        for duration in [
            Duration::from_millis(250),
            Duration::from_secs(45),
            Duration::from_secs(1_800),
            Duration::ZERO,
        ] {
            let rendered = format_duration(duration);
            assert_eq!(parse_duration(&rendered).unwrap(), duration, "{rendered}");
        }
        assert_eq!(format_duration(Duration::from_secs(1_800)), "30m");
    }

    #[test]
    fn test_parse_unit_default_is_millis() {
        assert_eq!(parse_unit("").unwrap(), TimeUnit::Milliseconds);
        assert_eq!(parse_unit("MINUTES").unwrap(), TimeUnit::Minutes);
    }

    #[test]
    fn test_parse_short_hour_and_day_units() {
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse_duration("1 hour").unwrap(), Duration::from_secs(3_600));
        assert_eq!(parse_duration("3d").unwrap(), Duration::from_secs(259_200));
        assert_eq!(parse_duration("1 DAY").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_unit("H").unwrap(), TimeUnit::Hours);
        assert_eq!(parse_unit("d").unwrap(), TimeUnit::Days);
    }
}
