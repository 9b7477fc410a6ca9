// Wall-clock helpers shared by the codec and the handlers.
//
// Participants compare their own clock against timestamps written by other
// accounts, so everything is expressed as seconds since the Unix epoch.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp layout used by message-info `Sent:` and `Received:` lines.
pub const ENVELOPE_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// 9999.12.31 23:59:59 UTC, the last instant a four-digit year can show.
const MAX_ENVELOPE_SECS: i64 = 253_402_300_799;

/// Current time as fractional seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// A `Sent:`/`Received:` timestamp.
///
/// The wire layout has whole-second precision, so the value is whole Unix
/// seconds between the epoch and the end of year 9999. Anything that can be
/// constructed can be written and read back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvelopeTime(i64);

impl EnvelopeTime {
    pub const MIN: EnvelopeTime = EnvelopeTime(0);
    pub const MAX: EnvelopeTime = EnvelopeTime(MAX_ENVELOPE_SECS);

    /// `None` outside the representable range.
    pub fn from_unix(secs: i64) -> Option<Self> {
        (0..=MAX_ENVELOPE_SECS).contains(&secs).then_some(Self(secs))
    }

    /// Drops the fractional part. `None` for NaN, infinities and out of range values.
    pub fn from_unix_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() {
            return None;
        }
        Self::from_unix(secs.floor() as i64)
    }

    pub fn now() -> Self {
        Self::from_unix_f64(unix_now()).unwrap_or(Self::MIN)
    }

    pub fn unix(self) -> i64 {
        self.0
    }

    /// Parse a `YYYY.MM.DD HH:MM:SS` timestamp (UTC).
    pub fn parse(text: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(text.trim(), ENVELOPE_TIME_FORMAT)
            .ok()
            .and_then(|dt| Self::from_unix(dt.and_utc().timestamp()))
    }

    /// Seconds from `self` to `later`; negative when `later` is earlier.
    pub fn seconds_until(self, later: EnvelopeTime) -> f64 {
        (later.0 - self.0) as f64
    }
}

impl fmt::Display for EnvelopeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.0, 0) {
            Some(dt) => write!(f, "{}", dt.format(ENVELOPE_TIME_FORMAT)),
            None => write!(f, "{}", self.0),
        }
    }
}
