use chrono::{DateTime, Duration, Utc};
use std::cell::Cell;
use std::time::Instant;

/// Source of both timestamps the engine needs: wall clock for WPM and the
/// stored time window, monotonic milliseconds for keystroke latency.
pub trait Clock {
    fn wall(&self) -> DateTime<Utc>;
    fn monotonic_ms(&self) -> f64;
}

/// Production clock. Monotonic time is measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-advanced clock for headless runs and tests. Both readings move
/// together unless `skew_wall` is used.
#[derive(Debug, Clone)]
pub struct ManualClock {
    wall: Cell<DateTime<Utc>>,
    monotonic_ms: Cell<f64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            wall: Cell::new(start),
            monotonic_ms: Cell::new(0.0),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.wall
            .set(self.wall.get() + Duration::milliseconds(ms as i64));
        self.monotonic_ms.set(self.monotonic_ms.get() + ms as f64);
    }

    /// Move only the wall clock, as a system clock adjustment would.
    pub fn skew_wall(&self, ms: i64) {
        self.wall.set(self.wall.get() + Duration::milliseconds(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn wall(&self) -> DateTime<Utc> {
        self.wall.get()
    }

    fn monotonic_ms(&self) -> f64 {
        self.monotonic_ms.get()
    }
}

impl<C: Clock + ?Sized> Clock for std::rc::Rc<C> {
    fn wall(&self) -> DateTime<Utc> {
        (**self).wall()
    }

    fn monotonic_ms(&self) -> f64 {
        (**self).monotonic_ms()
    }
}
