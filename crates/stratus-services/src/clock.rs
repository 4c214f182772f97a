//! Clock implementations
//!
//! The billing engine never reads system time directly; it takes a
//! `Clock` so month-boundary and proration behavior is testable against
//! any date, including leap years and year boundaries.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use stratus_core::traits::Clock;

/// Production clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Move the clock to a new instant
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_is_settable() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();

        let clock = FixedClock::at(t1);
        assert_eq!(clock.now(), t1);
        assert_eq!(clock.today(), t1.date_naive());

        clock.set(t2);
        assert_eq!(clock.now(), t2);
    }
}
