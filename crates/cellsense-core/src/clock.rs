//! Monotonic clock abstraction and the non-blocking timer gate.
//!
//! The control loop never sleeps. Anything that would be a blocking wait is
//! a [`TimerGate`] that the loop polls on every iteration instead.

use core::cell::Cell;

use embassy_time::{Duration, Instant};

/// Source of monotonic time.
pub trait Clock {
    /// Current instant. Must never go backwards.
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Clock backed by the embassy time driver.
///
/// On the microcontroller the driver comes from the HAL runtime; on a desktop
/// host it is embassy-time's `std` driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for tests and accelerated simulation.
///
/// Interior mutability lets the clock be advanced while components hold a
/// shared reference to it.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: Cell<u64>,
}

impl ManualClock {
    /// Create a clock reading zero.
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a clock reading `millis` milliseconds.
    pub const fn starting_at(millis: u64) -> Self {
        Self {
            millis: Cell::new(millis),
        }
    }

    /// Jump to an absolute time. Moving backwards is ignored.
    pub fn set_millis(&self, millis: u64) {
        if millis > self.millis.get() {
            self.millis.set(millis);
        }
    }

    pub fn advance(&self, by: Duration) {
        self.advance_millis(by.as_millis());
    }

    pub fn advance_millis(&self, millis: u64) {
        self.millis.set(self.millis.get().saturating_add(millis));
    }

    pub fn millis(&self) -> u64 {
        self.millis.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.millis.get())
    }
}

/// Non-blocking wait interval.
///
/// A gate records when it was started and how long it lasts; callers ask
/// [`is_elapsed`](Self::is_elapsed) each loop iteration instead of sleeping.
/// It is a plain value, so any number of independent gates can exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerGate {
    start: Instant,
    duration: Duration,
}

impl TimerGate {
    /// Start a gate at the current time.
    pub fn start(clock: &impl Clock, duration: Duration) -> Self {
        Self {
            start: clock.now(),
            duration,
        }
    }

    /// Whether `now - start >= duration`.
    pub fn is_elapsed(&self, clock: &impl Clock) -> bool {
        self.elapsed(clock) >= self.duration
    }

    /// Restart the interval from now, optionally with a new duration.
    pub fn reset(&mut self, clock: &impl Clock, duration: Option<Duration>) {
        self.start = clock.now();
        if let Some(duration) = duration {
            self.duration = duration;
        }
    }

    /// Time since the gate was started. Zero if the clock reads earlier.
    pub fn elapsed(&self, clock: &impl Clock) -> Duration {
        clock.now().saturating_duration_since(self.start)
    }

    /// Time left before the gate opens, zero once elapsed.
    pub fn remaining(&self, clock: &impl Clock) -> Duration {
        self.duration
            .checked_sub(self.elapsed(clock))
            .unwrap_or(Duration::from_ticks(0))
    }

    pub const fn duration(&self) -> Duration {
        self.duration
    }

    pub const fn started_at(&self) -> Instant {
        self.start
    }
}
