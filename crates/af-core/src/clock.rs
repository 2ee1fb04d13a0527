//! Time sources
//!
//! Everything that reads the time goes through a [`Clock`] handed in with the
//! filter context, so tests and scenario replays can drive time by hand.

use std::cell::Cell;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time.
pub trait Clock {
    /// Monotonic time, used for attribution windows and timers.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for the reporting start of aggregate counters.
    fn wall_time(&self) -> SystemTime;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    wall_base: SystemTime,
    offset: Cell<Duration>,
}

impl ManualClock {
    /// Start at the current instant, with wall time at the given unix second.
    pub fn new(wall_secs: u64) -> Self {
        Self {
            base: Instant::now(),
            wall_base: UNIX_EPOCH + Duration::from_secs(wall_secs),
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn wall_time(&self) -> SystemTime {
        self.wall_base + self.offset.get()
    }
}
