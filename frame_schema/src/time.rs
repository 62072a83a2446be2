//! Timestamp helpers shared by manifest parsing and the timeline.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Numeric timestamps above this are taken to be milliseconds.
const MILLIS_THRESHOLD: f64 = 1e12;

const COMPACT_LEN: usize = 15;

/// Parses an RFC 3339 / ISO 8601 string into epoch seconds.
///
/// Strings without an offset are read as UTC.
pub fn parse_iso_seconds(input: &str) -> Option<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.timestamp());
    }
    let normalized = trimmed.trim_end_matches('Z').replacen(' ', "T", 1);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(Utc.from_utc_datetime(&naive).timestamp());
        }
    }
    None
}

/// Converts a numeric timestamp (seconds or milliseconds) into whole seconds.
pub fn numeric_seconds(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let seconds = if value > MILLIS_THRESHOLD {
        value / 1000.0
    } else {
        value
    };
    Some(seconds.floor() as i64)
}

/// Finds a `YYYYMMDDTHHMMSS` stamp anywhere in `text` and reads it as UTC.
pub fn parse_compact_stamp(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    if bytes.len() < COMPACT_LEN {
        return None;
    }
    (0..=bytes.len() - COMPACT_LEN).find_map(|start| {
        let window = &bytes[start..start + COMPACT_LEN];
        let shaped = window.iter().enumerate().all(|(i, b)| {
            if i == 8 {
                *b == b'T'
            } else {
                b.is_ascii_digit()
            }
        });
        if !shaped {
            return None;
        }
        let stamp = std::str::from_utf8(window).ok()?;
        NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
    })
}

pub fn format_iso(seconds: i64) -> String {
    match Utc.timestamp_opt(seconds, 0).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => seconds.to_string(),
    }
}

pub fn format_compact(seconds: i64) -> String {
    match Utc.timestamp_opt(seconds, 0).single() {
        Some(dt) => dt.format("%Y%m%dT%H%M%S").to_string(),
        None => seconds.to_string(),
    }
}
