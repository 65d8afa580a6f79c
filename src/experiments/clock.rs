//! Clock abstraction for the time-dependent parts of winner declaration.
//!
//! `SystemClock` delegates to `chrono::Utc::now()`; `ManualClock` lets tests
//! and replay tooling pin "now" to a chosen instant.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn from_millis(ms: i64) -> Self {
        Self::new(DateTime::from_timestamp_millis(ms).unwrap_or_default())
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_returns_time() {
        // after 2020-01-01
        assert!(SystemClock.now().timestamp() > 1_577_836_800);
    }

    #[test]
    fn manual_clock_returns_fixed_time() {
        let fixed = Utc::now();
        let clock = ManualClock::new(fixed);
        assert_eq!(clock.now(), fixed);
        assert_eq!(clock.now_ms(), fixed.timestamp_millis());
    }

    #[test]
    fn manual_clock_advance() {
        let clock = ManualClock::from_millis(1_700_000_000_000);
        clock.advance(Duration::days(2));
        assert_eq!(clock.now_ms(), 1_700_000_000_000 + 2 * 86_400_000);
    }
}
