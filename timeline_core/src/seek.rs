//! Free-form time input for jumping around the archive.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SeekError {
    #[error("Invalid time format")]
    InvalidFormat,
    #[error("No archive frames loaded yet")]
    NoFrames,
    #[error("Time of day needs a current frame to anchor its date")]
    NoReference,
}

/// Parses seek input into epoch milliseconds.
///
/// Accepted forms:
/// - `H:MM` or `H:MM:SS`, on the calendar date of `reference_sec` in `tz`
/// - ISO timestamps ending in `Z`, with `T` or a space between date and time
/// - `YYYY-MM-DD HH:MM[:SS]` or with `T`, read in `tz`
pub fn parse_seek_input<Tz: TimeZone>(
    input: &str,
    reference_sec: Option<i64>,
    tz: &Tz,
) -> Result<i64, SeekError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(SeekError::InvalidFormat);
    }

    if let Some(time) = parse_time_of_day(text) {
        let reference = reference_sec.ok_or(SeekError::NoReference)?;
        let date = tz
            .timestamp_opt(reference, 0)
            .single()
            .ok_or(SeekError::InvalidFormat)?
            .date_naive();
        return local_millis(tz, date.and_time(time));
    }

    if let Some(stripped) = text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        let normalized = stripped.replacen(' ', "T", 1);
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&format!("{normalized}Z")) {
            return Ok(parsed.timestamp_millis());
        }
        return parse_naive(&normalized)
            .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
            .ok_or(SeekError::InvalidFormat);
    }

    let naive = parse_naive(&text.replacen(' ', "T", 1)).ok_or(SeekError::InvalidFormat)?;
    local_millis(tz, naive)
}

fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    let parts: Vec<&str> = text.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let widths_ok = (1..=2).contains(&parts[0].len())
        && parts[1..].iter().all(|part| part.len() == 2)
        && parts.iter().all(|part| part.bytes().all(|b| b.is_ascii_digit()));
    if !widths_ok {
        return None;
    }
    let hour: u32 = parts[0].parse().ok()?;
    let minute: u32 = parts[1].parse().ok()?;
    let second: u32 = match parts.get(2) {
        Some(part) => part.parse().ok()?,
        None => 0,
    };
    NaiveTime::from_hms_opt(hour, minute, second)
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    let (date, time) = text.split_once('T')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = parse_time_of_day(time)?;
    Some(date.and_time(time))
}

fn local_millis<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Result<i64, SeekError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp_millis()),
        LocalResult::None => Err(SeekError::InvalidFormat),
    }
}

/// Signed `+HH:MM:SS` offset of `focus_sec` from `anchor_sec`.
pub fn format_delta(focus_sec: i64, anchor_sec: i64) -> String {
    let delta = focus_sec - anchor_sec;
    let sign = if delta < 0 { '-' } else { '+' };
    let total = delta.unsigned_abs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
}
