//! Log timestamps.
//!
//! Written as `<secs>.<micros>s` with a six digit fraction, so for the next
//! few centuries string order equals time order. Parsing accepts any
//! fraction length (other writers use more or fewer digits) and comparison
//! is always numeric.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::{JournalError, Result};

const NANOS_PER_MICRO: u32 = 1_000;
const NANOS_PER_SEC: u32 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: u64,
    nanos: u32,
}

impl Timestamp {
    pub fn new(secs: u64, nanos: u32) -> Self {
        Self {
            secs: secs + u64::from(nanos / NANOS_PER_SEC),
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    pub fn from_micros(micros: u64) -> Self {
        Self::new(micros / 1_000_000, (micros % 1_000_000) as u32 * NANOS_PER_MICRO)
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Smallest timestamp strictly after `self` at microsecond resolution.
    pub fn next_micro(&self) -> Self {
        let micros = self.nanos / NANOS_PER_MICRO + 1;
        Self::new(self.secs, micros * NANOS_PER_MICRO)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp().max(0) as u64;
        Self::new(secs, dt.timestamp_subsec_micros() * NANOS_PER_MICRO)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.secs).ok()?, self.nanos)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || JournalError::MalformedTimestamp(s.to_string());
        let body = s.strip_suffix('s').unwrap_or(s);
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        if !frac.chars().all(|c| c.is_ascii_digit()) || (body.contains('.') && frac.is_empty()) {
            return Err(malformed());
        }
        let secs: u64 = whole.parse().map_err(|_| malformed())?;

        let mut nanos = 0u32;
        for (i, c) in frac.chars().take(9).enumerate() {
            let digit = c.to_digit(10).ok_or_else(malformed)?;
            nanos += digit * 10u32.pow(8 - i as u32);
        }
        Ok(Self { secs, nanos })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos % NANOS_PER_MICRO == 0 {
            write!(f, "{}.{:06}s", self.secs, self.nanos / NANOS_PER_MICRO)
        } else {
            write!(f, "{}.{:09}s", self.secs, self.nanos)
        }
    }
}

impl FromStr for Timestamp {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Wall clock that never hands out the same timestamp twice.
///
/// Owned by the repository context; two calls within the same microsecond
/// still produce strictly increasing values.
#[derive(Debug, Default)]
pub struct Clock {
    last: Option<Timestamp>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&mut self) -> Timestamp {
        let mut ts = Timestamp::from_datetime(Utc::now());
        if let Some(last) = self.last {
            if ts <= last {
                ts = last.next_micro();
            }
        }
        self.last = Some(ts);
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_fixed_width_micros() {
        let ts = Timestamp::new(1526200000, 42_000);
        assert_eq!(ts.to_string(), "1526200000.000042s");
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            Timestamp::parse("1526200000.123456s").unwrap(),
            Timestamp::new(1526200000, 123_456_000)
        );
        assert_eq!(
            Timestamp::parse("1526200000.5").unwrap(),
            Timestamp::new(1526200000, 500_000_000)
        );
        assert_eq!(
            Timestamp::parse("1526200000s").unwrap(),
            Timestamp::new(1526200000, 0)
        );
        // Beyond nanoseconds is truncated.
        assert_eq!(
            Timestamp::parse("1.1234567891234s").unwrap(),
            Timestamp::new(1, 123_456_789)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "s", "abc", "12.s", "12.3x", "-5.0s", "1.2.3s"] {
            assert!(Timestamp::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_numeric_order_beats_string_order() {
        let short = Timestamp::parse("100.9s").unwrap();
        let long = Timestamp::parse("100.10s").unwrap();
        assert!(short > long);
    }

    #[test]
    fn test_clock_is_strictly_monotonic() {
        let mut clock = Clock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            assert!(next.to_string() > prev.to_string());
            prev = next;
        }
    }

    #[test]
    fn test_next_micro_carries_into_seconds() {
        let ts = Timestamp::new(7, 999_999_000);
        assert_eq!(ts.next_micro(), Timestamp::new(8, 0));
    }
}
