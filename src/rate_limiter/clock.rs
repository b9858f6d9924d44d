//! # Time Sources
//!
//! Buckets refill against a monotonic [`Instant`]; daily quotas are bucketed
//! by a UTC calendar day. Both come from a [`Clock`] so the coordinator can
//! run against real time in production and a [`MockClock`] in tests.
//!
//! ```text
//!     Clock
//!     ├─ now()      ──► Instant        (refill, waits, housekeeping)
//!     ├─ utc_now()  ──► DateTime<Utc>  (last request timestamps)
//!     └─ day_key()  ──► DayKey         (daily counter bucketing)
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic instant used for refill arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock time in UTC.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Calendar day, in UTC, that daily counters are charged against.
    fn day_key(&self) -> DayKey {
        DayKey::from(self.utc_now())
    }
}

/// Production clock.
///
/// The monotonic part reads tokio's clock, which is the system clock unless
/// a test runtime has paused time, in which case sleeps advance it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
struct MockTime {
    instant: Instant,
    utc: DateTime<Utc>,
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same time, so advancing one advances all of them.
///
/// ```
/// use sourcegate::{Clock, MockClock};
/// use std::time::Duration;
///
/// let clock = MockClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    time: Arc<Mutex<MockTime>>,
}

impl MockClock {
    /// Create a mock clock frozen at the current real time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create a mock clock whose wall-clock reading starts at `utc`.
    pub fn starting_at(utc: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(MockTime {
                instant: Instant::now(),
                utc,
            })),
        }
    }

    /// Move both the monotonic and the wall-clock reading forward.
    pub fn advance(&self, duration: Duration) {
        let mut time = self.time.lock();
        time.instant += duration;
        let delta = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        time.utc = time.utc.checked_add_signed(delta).unwrap_or(time.utc);
    }

    /// Move forward by a number of milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.time.lock().instant
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.time.lock().utc
    }
}

/// A UTC calendar day, e.g. `2024-12-13`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// The underlying calendar date.
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<DateTime<Utc>> for DayKey {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at.date_naive())
    }
}

impl From<NaiveDate> for DayKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 > t1);
    }

    #[test]
    fn test_mock_clock_shared_between_clones() {
        let clock = MockClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.advance_ms(250);
        assert_eq!(clock.now(), start + Duration::from_millis(250));
    }

    #[test]
    fn test_day_key_rolls_over_at_utc_midnight() {
        let before = Utc.with_ymd_and_hms(2024, 12, 13, 23, 59, 0).unwrap();
        let clock = MockClock::starting_at(before);
        let today = clock.day_key();
        assert_eq!(today.to_string(), "2024-12-13");

        clock.advance(Duration::from_secs(120));
        let tomorrow = clock.day_key();
        assert_eq!(tomorrow.to_string(), "2024-12-14");
        assert!(tomorrow > today);
    }
}
