//! Time sources backing [`RtClock`](super::RtClock).
//!
//! Production code reads [`MonotonicSource`]. The other two sources exist so
//! clock arithmetic and main loops can be driven deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use minstant::Instant;
use parking_lot::Mutex;

use super::{ClockError, TimePoint};

/// A monotonic time source.
///
/// Readings only need to be monotonic relative to each other; the absolute
/// value is meaningless.
pub trait TimeSource: Send + Sync {
    /// Reads the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError`] if the underlying source cannot be read.
    fn now(&self) -> Result<TimePoint, ClockError>;
}

/// TSC-backed monotonic clock.
///
/// Readings are nanoseconds since the source was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicSource {
    base: Instant,
}

impl MonotonicSource {
    /// Creates a source anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Default for MonotonicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicSource {
    #[inline]
    fn now(&self) -> Result<TimePoint, ClockError> {
        Ok(TimePoint::from(self.base.elapsed()))
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: TimePoint,
    failing: bool,
}

/// A source whose time only moves when told to.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    state: Arc<Mutex<ManualState>>,
}

impl ManualSource {
    /// Creates a source reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current reading.
    pub fn set(&self, now: TimePoint) {
        self.state.lock().now = now;
    }

    /// Moves the current reading forward.
    pub fn advance(&self, by: TimePoint) {
        self.state.lock().now += by;
    }

    /// Makes subsequent reads fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }
}

impl TimeSource for ManualSource {
    fn now(&self) -> Result<TimePoint, ClockError> {
        let state = self.state.lock();
        if state.failing {
            return Err(ClockError::Unavailable("manual source set to fail".into()));
        }
        Ok(state.now)
    }
}

/// A source that advances by a fixed step on every read.
///
/// Busy-wait loops driven by this source make progress without any real time
/// passing, which makes tick counts exact. Clones share the same counter.
#[derive(Debug, Clone)]
pub struct StepSource {
    now: Arc<AtomicI64>,
    step: i64,
}

impl StepSource {
    /// Creates a source starting at `start` and advancing `step` per read.
    #[must_use]
    pub fn new(start: TimePoint, step: TimePoint) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start.as_nanos())),
            step: step.as_nanos(),
        }
    }

    /// Returns the next reading without consuming a step.
    #[must_use]
    pub fn peek(&self) -> TimePoint {
        TimePoint::from_nanos(self.now.load(Ordering::Acquire))
    }
}

impl TimeSource for StepSource {
    #[inline]
    fn now(&self) -> Result<TimePoint, ClockError> {
        Ok(TimePoint::from_nanos(
            self.now.fetch_add(self.step, Ordering::AcqRel),
        ))
    }
}
