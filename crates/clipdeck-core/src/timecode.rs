//! Timecode parsing and display helpers.
//!
//! The shell accepts seek targets as `mm:ss`; internally every position is a
//! microsecond offset into the clip.

use thiserror::Error;

/// Microseconds per second.
pub const US_PER_SECOND: u64 = 1_000_000;

/// Microseconds per minute.
pub const US_PER_MINUTE: u64 = 60 * US_PER_SECOND;

/// A `mm:ss` string that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed timecode {input:?}: expected mm:ss with digit fields")]
pub struct MalformedTimecode {
    pub input: String,
}

/// Parse a `mm:ss` timecode into a microsecond offset.
///
/// Both fields must be non-empty runs of ASCII digits separated by a single
/// colon. Seconds are not range-checked: `90:90` is 91.5 minutes.
pub fn parse_timecode(text: &str) -> Result<u64, MalformedTimecode> {
    let malformed = || MalformedTimecode {
        input: text.to_string(),
    };

    let (minutes, seconds) = text.split_once(':').ok_or_else(malformed)?;
    let minutes = parse_field(minutes).ok_or_else(malformed)?;
    let seconds = parse_field(seconds).ok_or_else(malformed)?;

    Ok(minutes
        .saturating_mul(US_PER_MINUTE)
        .saturating_add(seconds.saturating_mul(US_PER_SECOND)))
}

fn parse_field(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Microseconds as fractional minutes, for duration display.
pub fn format_minutes(us: u64) -> f64 {
    us as f64 / US_PER_MINUTE as f64
}
