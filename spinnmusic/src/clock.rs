//! Real-time clock with a shiftable epoch.
//!
//! [`RtClock`] keeps two readings of its [`TimeSource`]: the *origin* (the
//! reading at which elapsed time was zero) and the *grid target* (the next
//! reading at which the main loop should tick). Both move together:
//!
//! - [`stop`](RtClock::stop) subtracts the current reading from both, which
//!   turns them into spans relative to "now" and freezes elapsed time.
//! - [`start`](RtClock::start) adds the current reading back, so elapsed time
//!   resumes exactly where it stopped, however long the clock was stopped.
//!
//! [`reset_and_stop`](RtClock::reset_and_stop) stores the frozen zero state,
//! so the first `start` makes [`time`](RtClock::time) read zero.
//!
//! Event delivery times are expressed as elapsed time since the origin; the
//! comparison helpers translate them onto the source's time axis.

pub mod source;
mod time;

use std::time::Duration;

pub use source::{ManualSource, MonotonicSource, StepSource, TimeSource};
pub use time::TimePoint;

/// Failure to read the underlying time source.
///
/// A monotonic source that cannot be read indicates an environment fault;
/// callers treat this as fatal and do not retry.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// The time source could not be read.
    #[error("time source unavailable: {0}")]
    Unavailable(String),
}

/// Real-time clock pacing a tick loop.
#[derive(Debug, Clone)]
pub struct RtClock<S = MonotonicSource> {
    source: S,
    origin: TimePoint,
    grid: TimePoint,
    interval: TimePoint,
}

impl RtClock<MonotonicSource> {
    /// Creates a stopped clock on the process monotonic clock.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::with_source(interval, MonotonicSource::new())
    }
}

impl<S: TimeSource> RtClock<S> {
    /// Creates a stopped clock reading zero on the given source.
    #[must_use]
    pub fn with_source(interval: Duration, source: S) -> Self {
        Self {
            source,
            origin: TimePoint::ZERO,
            grid: TimePoint::ZERO,
            interval: TimePoint::from(interval),
        }
    }

    /// Returns the time source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Reads the time source.
    ///
    /// # Errors
    ///
    /// Propagates time source failures.
    #[inline]
    pub fn now(&self) -> Result<TimePoint, ClockError> {
        self.source.now()
    }

    /// Restarts elapsed time from zero at the current instant.
    ///
    /// # Errors
    ///
    /// Propagates time source failures.
    pub fn reset(&mut self) -> Result<(), ClockError> {
        self.origin = self.now()?;
        self.grid = self.origin;
        Ok(())
    }

    /// Stores the frozen zero state. The only valid call after this is [`start`](Self::start).
    pub fn reset_and_stop(&mut self) {
        self.origin = TimePoint::ZERO;
        self.grid = TimePoint::ZERO;
    }

    /// Freezes elapsed time at its current value.
    ///
    /// # Errors
    ///
    /// Propagates time source failures; the clock is left untouched.
    pub fn stop(&mut self) -> Result<(), ClockError> {
        let now = self.now()?;
        self.origin -= now;
        self.grid -= now;
        Ok(())
    }

    /// Resumes elapsed time from where [`stop`](Self::stop) froze it.
    ///
    /// # Errors
    ///
    /// Propagates time source failures; the clock is left untouched.
    pub fn start(&mut self) -> Result<(), ClockError> {
        let now = self.now()?;
        self.origin += now;
        self.grid += now;
        Ok(())
    }

    /// Returns elapsed time in seconds.
    ///
    /// # Errors
    ///
    /// Propagates time source failures.
    pub fn time(&self) -> Result<f64, ClockError> {
        Ok(self.elapsed_at(self.now()?).as_secs_f64())
    }

    /// Elapsed time at a previously sampled reading.
    #[inline]
    #[must_use]
    pub fn elapsed_at(&self, now: TimePoint) -> TimePoint {
        now - self.origin
    }

    /// Forces elapsed time to read `t` seconds at the current instant.
    ///
    /// The grid target is not touched.
    ///
    /// # Errors
    ///
    /// Propagates time source failures; the clock is left untouched.
    pub fn set(&mut self, t: f64) -> Result<(), ClockError> {
        let now = self.now()?;
        self.set_at(TimePoint::from_secs_f64(t), now);
        Ok(())
    }

    /// Forces elapsed time to have read `t` at the reading `now`.
    #[inline]
    pub fn set_at(&mut self, t: TimePoint, now: TimePoint) {
        self.origin = now - t;
    }

    /// Adopts another clock's origin and aligns the grid target with it.
    pub fn sync_with<T>(&mut self, other: &RtClock<T>) {
        self.origin = other.origin;
        self.grid = other.origin;
    }

    /// Advances the grid target by one interval.
    #[inline]
    pub fn set_next_target(&mut self) {
        self.grid += self.interval;
    }

    /// Returns `true` once the current reading has reached the grid target.
    ///
    /// # Errors
    ///
    /// Propagates time source failures.
    #[inline]
    pub fn past_target(&self) -> Result<bool, ClockError> {
        Ok(self.past_target_at(self.now()?))
    }

    /// Returns `true` if `now` has reached the grid target.
    #[inline]
    #[must_use]
    pub fn past_target_at(&self, now: TimePoint) -> bool {
        now >= self.grid
    }

    /// Returns `true` if elapsed time `t` falls strictly before the grid target.
    #[inline]
    #[must_use]
    pub fn less_than_target(&self, t: TimePoint) -> bool {
        self.origin + t < self.grid
    }

    /// Returns `true` if elapsed time `t` is not after the reading `now`.
    #[inline]
    #[must_use]
    pub fn less_than_eql(&self, t: TimePoint, now: TimePoint) -> bool {
        self.origin + t <= now
    }

    /// Remaining span from `now` until the grid target (negative once passed).
    #[inline]
    #[must_use]
    pub fn until_target(&self, now: TimePoint) -> TimePoint {
        self.grid - now
    }

    /// Remaining span from `now` until elapsed time `t` is reached.
    #[inline]
    #[must_use]
    pub fn until_elapsed(&self, t: TimePoint, now: TimePoint) -> TimePoint {
        self.origin + t - now
    }

    /// The tick interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval.to_duration()
    }

    /// The grid target as elapsed time since the origin.
    #[must_use]
    pub fn grid_target(&self) -> TimePoint {
        self.grid - self.origin
    }
}
