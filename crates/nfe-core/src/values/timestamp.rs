//! Issue timestamp validation.

use chrono::{DateTime, FixedOffset};

use super::ValueType;
use crate::error::ValueError;

/// strptime-style layout used by NFe `dhEmi` fields.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// A date-time that carries its UTC offset.
pub struct Timestamp;

impl ValueType for Timestamp {
    type Value = DateTime<FixedOffset>;
    const KIND: &'static str = "timestamp";

    fn parse(raw: &str) -> Result<Self::Value, ValueError> {
        let trimmed = raw.trim();
        DateTime::parse_from_rfc3339(trimmed)
            .or_else(|_| DateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT))
            .map_err(|e| ValueError::new(Self::KIND, raw, e.to_string()))
    }
}
