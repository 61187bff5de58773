//! Time unit conversion and timestamp parsing/rendering.
//!
//! Formats may be given as chrono `strftime` patterns (anything containing
//! `%`) or as Java-style date patterns such as `yyyy-MM-dd HH:mm:ss.SSS`,
//! which are translated to the chrono equivalent first.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fmt::{self, Write};
use std::str::FromStr;

/// Units a numeric time value may be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnits {
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnits {
    fn nanos(self) -> i128 {
        match self {
            TimeUnits::Days => 86_400_000_000_000,
            TimeUnits::Hours => 3_600_000_000_000,
            TimeUnits::Minutes => 60_000_000_000,
            TimeUnits::Seconds => 1_000_000_000,
            TimeUnits::Milliseconds => 1_000_000,
            TimeUnits::Microseconds => 1_000,
            TimeUnits::Nanoseconds => 1,
        }
    }

    /// Convert `value` expressed in `self` into `target` units, truncating.
    pub fn convert(self, value: i64, target: TimeUnits) -> i64 {
        let nanos = value as i128 * self.nanos();
        let converted = nanos / target.nanos();
        converted.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn to_micros(self, value: i64) -> i64 {
        self.convert(value, TimeUnits::Microseconds)
    }

    pub fn to_micros_f64(self, value: f64) -> f64 {
        value * self.nanos() as f64 / 1_000.0
    }
}

impl FromStr for TimeUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "days" | "day" => Ok(TimeUnits::Days),
            "hours" | "hour" => Ok(TimeUnits::Hours),
            "minutes" | "minute" => Ok(TimeUnits::Minutes),
            "seconds" | "second" | "sec" => Ok(TimeUnits::Seconds),
            "milliseconds" | "millisecond" | "millis" | "ms" => Ok(TimeUnits::Milliseconds),
            "microseconds" | "microsecond" | "micros" | "us" => Ok(TimeUnits::Microseconds),
            "nanoseconds" | "nanosecond" | "nanos" | "ns" => Ok(TimeUnits::Nanoseconds),
            other => Err(format!("unknown time units '{}'", other)),
        }
    }
}

impl fmt::Display for TimeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnits::Days => "Days",
            TimeUnits::Hours => "Hours",
            TimeUnits::Minutes => "Minutes",
            TimeUnits::Seconds => "Seconds",
            TimeUnits::Milliseconds => "Milliseconds",
            TimeUnits::Microseconds => "Microseconds",
            TimeUnits::Nanoseconds => "Nanoseconds",
        };
        write!(f, "{}", name)
    }
}

/// Build a UTC timestamp from an epoch offset in the given units.
pub fn from_epoch(value: i64, units: TimeUnits) -> Result<DateTime<Utc>, String> {
    let micros = units.to_micros(value);
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| format!("epoch value {} {} is out of range", value, units))
}

/// Fractional epoch offset, e.g. seconds with a millisecond part.
pub fn from_epoch_f64(value: f64, units: TimeUnits) -> Result<DateTime<Utc>, String> {
    let micros = units.to_micros_f64(value);
    if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
        return Err(format!("epoch value {} {} is out of range", value, units));
    }
    DateTime::<Utc>::from_timestamp_micros(micros.round() as i64)
        .ok_or_else(|| format!("epoch value {} {} is out of range", value, units))
}

/// Translate a Java `SimpleDateFormat` pattern into a chrono format string.
/// Patterns already containing `%` are returned unchanged.
pub fn to_chrono_pattern(pattern: &str) -> String {
    if pattern.contains('%') {
        return pattern.to_string();
    }

    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // quoted literal, '' is an escaped quote
            i += 1;
            if i < chars.len() && chars[i] == '\'' {
                out.push('\'');
                i += 1;
                continue;
            }
            while i < chars.len() && chars[i] != '\'' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) | ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', _) => "%d",
            ('H', _) => "%H",
            ('h', _) => "%I",
            ('m', _) => "%M",
            ('s', _) => "%S",
            ('S', 1..=3) => "%3f",
            ('S', 4..=6) => "%6f",
            ('S', _) => "%9f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('D', _) => "%j",
            ('Z', _) => "%z",
            ('X', _) | ('x', _) => "%:z",
            ('z', _) => "%Z",
            _ => "",
        };
        if spec.is_empty() {
            for _ in 0..run {
                out.push(c);
            }
        } else {
            out.push_str(spec);
        }
        i += run;
    }
    out
}

/// Parse a timestamp string. Without a format, RFC 3339 and a handful of
/// common layouts are tried, then a plain number is read as epoch
/// milliseconds.
pub fn parse(text: &str, format: Option<&str>) -> Result<DateTime<Utc>, String> {
    let text = text.trim();
    match format {
        Some(fmt) if !fmt.trim().is_empty() => parse_with(text, &to_chrono_pattern(fmt)),
        _ => parse_default(text),
    }
}

fn parse_with(text: &str, pattern: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_str(text, pattern) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, pattern) {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("'{}' does not match timestamp format '{}'", text, pattern))
}

fn parse_default(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for pattern in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d"] {
        if let Ok(ts) = parse_with(text, pattern) {
            return Ok(ts);
        }
    }
    match text.parse::<i64>() {
        Ok(millis) => from_epoch(millis, TimeUnits::Milliseconds),
        Err(_) => Err(format!("'{}' is not a recognized timestamp", text)),
    }
}

/// Render a timestamp with an optional pattern. Defaults to microsecond
/// precision `%Y-%m-%d %H:%M:%S%.6f`.
pub fn format(ts: &DateTime<Utc>, pattern: Option<&str>) -> String {
    const DEFAULT: &str = "%Y-%m-%d %H:%M:%S%.6f";
    if let Some(p) = pattern.filter(|p| !p.trim().is_empty()) {
        let mut out = String::new();
        // chrono reports unknown specifiers as a fmt error
        if write!(out, "{}", ts.format(&to_chrono_pattern(p))).is_ok() {
            return out;
        }
    }
    ts.format(DEFAULT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_unit_conversion() {
        assert_eq!(TimeUnits::Milliseconds.to_micros(150), 150_000);
        assert_eq!(TimeUnits::Seconds.to_micros(2), 2_000_000);
        assert_eq!(TimeUnits::Nanoseconds.to_micros(1_999), 1);
        assert_eq!(TimeUnits::Microseconds.convert(5_000, TimeUnits::Milliseconds), 5);
    }

    #[test]
    fn test_units_from_str() {
        assert_eq!("Milliseconds".parse::<TimeUnits>().unwrap(), TimeUnits::Milliseconds);
        assert_eq!("SECONDS".parse::<TimeUnits>().unwrap(), TimeUnits::Seconds);
        assert!("fortnights".parse::<TimeUnits>().is_err());
    }

    #[test]
    fn test_java_pattern_translation() {
        assert_eq!(to_chrono_pattern("yyyy-MM-dd HH:mm:ss.SSS"), "%Y-%m-%d %H:%M:%S.%3f");
        assert_eq!(to_chrono_pattern("dd/MMM/yyyy:HH:mm:ss Z"), "%d/%b/%Y:%H:%M:%S %z");
        assert_eq!(to_chrono_pattern("yyyy-MM-dd'T'HH:mm"), "%Y-%m-%dT%H:%M");
        assert_eq!(to_chrono_pattern("%Y/%m/%d"), "%Y/%m/%d");
    }

    #[test]
    fn test_parse_with_java_pattern() {
        let ts = parse("2015-03-01 12:30:45.250", Some("yyyy-MM-dd HH:mm:ss.SSS")).unwrap();
        assert_eq!(ts.year(), 2015);
        assert_eq!(ts.minute(), 30);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_apache_log_time() {
        let ts = parse("10/Oct/2000:13:55:36 -0700", Some("dd/MMM/yyyy:HH:mm:ss Z")).unwrap();
        assert_eq!(ts.hour(), 20);
    }

    #[test]
    fn test_parse_defaults() {
        let ts = parse("2020-01-02T03:04:05Z", None).unwrap();
        assert_eq!(ts.day(), 2);

        let epoch = parse("1000", None).unwrap();
        assert_eq!(epoch.timestamp_millis(), 1000);

        assert!(parse("yesterday", None).is_err());
    }

    #[test]
    fn test_format_roundtrip_pattern() {
        let ts = from_epoch(0, TimeUnits::Seconds).unwrap();
        assert_eq!(format(&ts, Some("yyyy-MM-dd")), "1970-01-01");
        assert_eq!(format(&ts, None), "1970-01-01 00:00:00.000000");
    }
}
