//! Wall-clock abstraction.
//!
//! The engine and the sync worker resolve "now" and "today" through
//! [`ClockSource`] so that tests can pin time. Production uses
//! [`SystemClock`].

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDate};

/// Source of wall-clock time, millis since the Unix epoch.
pub trait ClockSource: Send + Sync {
    fn now_millis(&self) -> i64;

    /// The UTC calendar date at `now_millis`.
    fn today(&self) -> NaiveDate {
        date_of_millis(self.now_millis())
    }
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_millis(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
            Err(e) => {
                tracing::warn!("system clock reads before the Unix epoch: {e}");
                0
            }
        }
    }
}

/// Deterministic clock pinned to a fixed instant. Intended for tests and
/// replay tooling.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    millis: i64,
}

impl FixedClock {
    #[must_use]
    pub fn at_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Pins the clock to midnight UTC of the given date.
    #[must_use]
    pub fn at_date(date: NaiveDate) -> Self {
        let millis = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0);
        Self { millis }
    }
}

impl ClockSource for FixedClock {
    fn now_millis(&self) -> i64 {
        self.millis
    }
}

/// Converts epoch millis to the UTC calendar date.
#[must_use]
pub fn date_of_millis(millis: i64) -> NaiveDate {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}
