//! Time source for the attendance core.
//!
//! Everything that needs "now" takes a [`Clock`] so tests can drive time
//! explicitly; production uses [`SystemClock`].

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

pub trait Clock: Send + Sync {
    /// Current UTC instant. Never earlier than any previously returned value
    /// within the same process run.
    fn now(&self) -> DateTime<Utc>;
}

/// The UTC calendar day a timestamp falls on. Both uniqueness invariants and
/// the present-count derive their day through this single function.
pub fn utc_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Wall clock clamped to be monotonic: if the system clock steps backwards,
/// the last returned instant is repeated until real time catches up.
pub struct SystemClock {
    last: Mutex<DateTime<Utc>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Utc::now()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().max(*last);
        *last = now;
        now
    }
}

#[cfg(test)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn system_clock_is_non_decreasing() {
        let clock = SystemClock::new();
        let mut prev = clock.now();
        for _ in 0..100 {
            let next = clock.now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn utc_day_is_date_of_timestamp() {
        let late = Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap();
        assert_eq!(utc_day(late), late.date_naive());

        let next = late + chrono::Duration::seconds(1);
        assert_ne!(utc_day(late), utc_day(next));
    }

    #[test]
    fn manual_clock_advances() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let clock = ManualClock::starting_at(t0);
        assert_eq!(clock.now(), t0);

        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(clock.now(), t0 + chrono::Duration::seconds(301));
    }
}
