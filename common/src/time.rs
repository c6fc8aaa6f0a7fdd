//! Time utilities and constants for RateWatch.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Reference timing values.
pub mod constants {
    use std::time::Duration;

    /// Age after which an institution is due for refresh.
    pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(10 * 60);

    /// Cadence of the scheduling trigger.
    pub const TICK_INTERVAL: Duration = Duration::from_secs(20 * 60);
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check whether `timestamp` is at least `age` old at `at`.
///
/// A missing timestamp is older than anything.
pub fn is_older_than(timestamp: Option<Timestamp>, age: Duration, at: Timestamp) -> bool {
    match timestamp {
        Some(ts) => at - ts >= age,
        None => true,
    }
}

/// Source of the current time.
///
/// The engine reads time only through this trait so that staleness can be
/// driven deterministically in tests and simulations.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock stopped at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current = *current + by;
    }

}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}
