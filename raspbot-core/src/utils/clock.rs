//! Monotonic time source for dwell timers and sensor throttling.

use core::cell::Cell;

use embassy_time::{Duration, Instant};

/// Source of monotonic timestamps.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Clock backed by the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-advanced clock for simulation and tests.
///
/// Starts at zero and only moves when `advance` or `set` is called.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(
        &self,
        by: Duration,
    ) {
        self.ticks.set(self.ticks.get() + by.as_ticks());
    }

    pub fn set(
        &self,
        at: Instant,
    ) {
        self.ticks.set(at.as_ticks());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.get())
    }
}
