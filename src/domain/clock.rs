use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of current time for deadline checks.
///
/// The ledger reads the clock exactly once per funding or claim call; nothing
/// is scheduled. Production uses [`SystemClock`]; tests drive a [`ManualClock`]
/// to simulate the passage of time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by the given number of seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs);
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
