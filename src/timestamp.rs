//! Platform creation-date parsing.
//!
//! Posts and users carry creation dates like `Wed Oct 10 20:19:24 +0000 2018`.
//! Callers report every timestamp in one caller-chosen offset, whatever offset
//! the platform served.

use chrono::{DateTime, FixedOffset};

use crate::error::{HarvestError, Result};

/// `strftime` layout of platform timestamps.
pub const PLATFORM_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Parse a platform timestamp, keeping the offset it was served with.
///
/// # Errors
///
/// Returns [`HarvestError::MalformedTimestamp`] if `value` does not match
/// [`PLATFORM_TIMESTAMP_FORMAT`].
pub fn parse_platform_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(value.trim(), PLATFORM_TIMESTAMP_FORMAT).map_err(|source| {
        HarvestError::MalformedTimestamp {
            value: value.to_string(),
            source,
        }
    })
}

/// Parse a platform timestamp and express it in the reporting `offset`.
///
/// # Errors
///
/// Returns [`HarvestError::MalformedTimestamp`] on malformed input.
pub fn parse_in_offset(value: &str, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    Ok(parse_platform_timestamp(value)?.with_timezone(&offset))
}

/// Build a reporting offset from whole hours east of UTC.
///
/// # Errors
///
/// Returns [`HarvestError::InvalidOffset`] outside of -23..=23.
pub fn reporting_offset(hours: i32) -> Result<FixedOffset> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or(HarvestError::InvalidOffset(hours))
}
