//! Core utility types.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Health check response from the station /health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthInfo {
    pub status: String,
    pub service: String,
    pub timestamp: u64,
}

/// Error parsing a timestamp from a query parameter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimestampParseError {
    #[error("timestamp '{0}' is neither unix seconds nor RFC 3339")]
    Unrecognized(String),
    #[error("timestamp '{0}' is before the unix epoch")]
    BeforeEpoch(String),
    #[error("timestamp '{0}' is out of range")]
    OutOfRange(String),
    #[error("nanoseconds component {0} is not below one second")]
    InvalidNanos(u64),
}

/// Wall-clock timestamp as seconds and nanoseconds since the Unix epoch.
///
/// Ordering is chronological (seconds first, then nanoseconds), which holds
/// as long as `nanos` stays below one second. `new` carries excess nanoseconds
/// into `seconds` and deserializing rejects them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "RawTimestamp")]
pub struct Timestamp {
    /// Seconds component
    pub seconds: u64,
    /// Nanoseconds component (0-999,999,999)
    pub nanos: u64,
}

#[derive(Deserialize)]
struct RawTimestamp {
    seconds: u64,
    nanos: u64,
}

impl TryFrom<RawTimestamp> for Timestamp {
    type Error = TimestampParseError;

    fn try_from(raw: RawTimestamp) -> Result<Self, Self::Error> {
        if raw.nanos >= NANOS_PER_SEC as u64 {
            return Err(TimestampParseError::InvalidNanos(raw.nanos));
        }
        Ok(Self {
            seconds: raw.seconds,
            nanos: raw.nanos,
        })
    }
}

impl Timestamp {
    /// Create a new timestamp, carrying whole seconds out of `nanos`.
    pub fn new(seconds: u64, nanos: u64) -> Self {
        let per_sec = NANOS_PER_SEC as u64;
        Self {
            seconds: seconds.saturating_add(nanos / per_sec),
            nanos: nanos % per_sec,
        }
    }

    /// Current wall-clock time.
    ///
    /// A system clock set before 1970 reads as the epoch.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::from_duration)
            .unwrap_or_default()
    }

    /// Create a timestamp from a Duration since epoch
    pub fn from_duration(duration: Duration) -> Self {
        Self::from_nanos(duration.as_nanos())
    }

    /// Convert to Duration
    pub fn to_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos as u32)
    }

    /// Total nanoseconds since the epoch.
    pub fn as_nanos(&self) -> u128 {
        self.seconds as u128 * NANOS_PER_SEC + self.nanos as u128
    }

    /// Build a timestamp from total nanoseconds since the epoch.
    pub fn from_nanos(total_nanos: u128) -> Self {
        Self {
            seconds: (total_nanos / NANOS_PER_SEC) as u64,
            nanos: (total_nanos % NANOS_PER_SEC) as u64,
        }
    }

    /// Fractional seconds since the epoch.
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.nanos as f64 / 1e9
    }

    /// Build a timestamp from fractional seconds. Negative, non-finite or
    /// too large input returns None.
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        Duration::try_from_secs_f64(secs)
            .ok()
            .map(Self::from_duration)
    }

    /// Offset this timestamp forward by a duration.
    pub fn offset_by(&self, duration: Duration) -> Self {
        Self::from_nanos(self.as_nanos() + duration.as_nanos())
    }

    /// Parse a query parameter: unix seconds (`1717200000`, `1717200000.25`)
    /// or an RFC 3339 date-time (`2025-06-01T00:00:00Z`).
    pub fn parse_param(raw: &str) -> Result<Self, TimestampParseError> {
        let raw = raw.trim();

        if let Some(ts) = Self::parse_decimal_seconds(raw) {
            return Ok(ts);
        }

        if let Ok(secs) = raw.parse::<f64>() {
            return Self::from_secs_f64(secs).ok_or_else(|| {
                if secs < 0.0 {
                    TimestampParseError::BeforeEpoch(raw.to_string())
                } else {
                    TimestampParseError::OutOfRange(raw.to_string())
                }
            });
        }

        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|_| TimestampParseError::Unrecognized(raw.to_string()))?;
        let seconds = u64::try_from(parsed.timestamp())
            .map_err(|_| TimestampParseError::BeforeEpoch(raw.to_string()))?;
        Ok(Self::new(seconds, parsed.timestamp_subsec_nanos() as u64))
    }

    /// Exact parse of `<seconds>[.<fraction>]`, the form `Display` produces.
    /// Fraction digits beyond nanoseconds are truncated.
    fn parse_decimal_seconds(raw: &str) -> Option<Self> {
        let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(frac) {
            return None;
        }

        let seconds = whole.parse::<u64>().ok()?;
        let mut nanos = 0u64;
        for digit in frac.bytes().chain(std::iter::repeat(b'0')).take(9) {
            nanos = nanos * 10 + (digit - b'0') as u64;
        }
        Some(Self::new(seconds, nanos))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}
