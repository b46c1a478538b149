//! Capture-time parsing and canonical formatting
//!
//! Cameras write `YYYY:MM:DD HH:MM:SS`, while hand-edited tables and the
//! flight-log exports use dashes or ISO-8601. All of them land on the same
//! `NaiveDateTime`.

use chrono::{DateTime, NaiveDateTime, Timelike};

/// Format used when writing timestamps back into tables
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse an EXIF-style or dashed timestamp, optionally with fractional seconds
pub fn parse_capture_time(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim().trim_end_matches('\0').trim();
    let (date, time) = trimmed.split_once(' ')?;

    // Colon-separated dates are a camera quirk, not an error
    let date = if date.contains(':') && !date.contains('-') {
        date.replacen(':', "-", 2)
    } else {
        date.to_string()
    };

    NaiveDateTime::parse_from_str(&format!("{} {}", date, time.trim()), "%Y-%m-%d %H:%M:%S%.f").ok()
}

/// Apply an EXIF `SubSecTime*` value to a whole-second timestamp
pub fn with_subsec(timestamp: NaiveDateTime, subsec: &str) -> NaiveDateTime {
    let digits = subsec.trim().trim_end_matches('\0').trim();
    if digits.is_empty() || digits.len() > 9 || timestamp.nanosecond() != 0 {
        return timestamp;
    }

    match digits.parse::<u32>() {
        Ok(value) => {
            // Subsec is a fraction of a second written as its decimal digits
            let nanos = value * 10u32.pow(9 - digits.len() as u32);
            timestamp.with_nanosecond(nanos).unwrap_or(timestamp)
        }
        Err(_) => timestamp,
    }
}

/// Parse a flight-log timestamp: RFC 3339, ISO-8601 without offset, or the capture formats
pub fn parse_track_time(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }

    let without_zone = trimmed.trim_end_matches('Z');
    if let Ok(dt) = NaiveDateTime::parse_from_str(without_zone, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }

    parse_capture_time(trimmed)
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(CANONICAL_FORMAT).to_string()
}
