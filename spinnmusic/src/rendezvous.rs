//! Start/stop handshake between notification threads and the main loop.
//!
//! The main loop owns the [`Phase`] transitions it drives; notification
//! threads drive the others:
//!
//! ```text
//!            signal_start              request_stop
//!  Waiting ───────────────> Running ───────────────> Stopping
//!     ^                        │                        │ acknowledge_stop
//!     │ wait_for_start         │ finish                 v
//!     └──────────────────── Stopped <───────────────────┘
//!                              │
//!   (any) ── finish / close ──> Finished
//! ```
//!
//! Start signals are latched: a start raised before the main loop begins to
//! wait is not lost, even while a stop is still being acknowledged, and
//! repeated starts collapse into one. A stop request
//! while the loop is not running returns immediately. The stop request itself
//! has no timeout: it blocks until the main loop acknowledges or finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::trace::{debug, warn};

/// Main-loop state as seen by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Blocked waiting for a start signal.
    Waiting,
    /// Pacing ticks.
    Running,
    /// A stop was requested and not yet acknowledged.
    Stopping,
    /// The stop was acknowledged; the loop is idle.
    Stopped,
    /// The loop has exited for good.
    Finished,
}

/// Outcome of [`Rendezvous::wait_for_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// A start signal was consumed; the loop is now running.
    Started,
    /// The rendezvous was closed; the loop must exit.
    Closed,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    start_latched: bool,
    woken: bool,
    closed: bool,
}

/// Mutex + condition variable handshake with a lock-free stop flag.
#[derive(Debug)]
pub struct Rendezvous {
    state: Mutex<State>,
    cond: Condvar,
    /// Mirrors `phase == Stopping`; written only under `state`.
    stopping: AtomicBool,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    /// Creates an idle rendezvous.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Stopped,
                start_latched: false,
                woken: false,
                closed: false,
            }),
            cond: Condvar::new(),
            stopping: AtomicBool::new(false),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Lock-free read of the stop flag for busy-wait loops.
    #[inline]
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Raises the start signal.
    ///
    /// A start raised while a stop is still being acknowledged is latched for
    /// the wait that follows. Returns `false` if the signal was ignored because
    /// the loop is running or has finished.
    pub fn signal_start(&self) -> bool {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Running | Phase::Finished => {
                warn!(phase = ?state.phase, "start signal ignored");
                false
            }
            Phase::Waiting | Phase::Stopping | Phase::Stopped => {
                state.start_latched = true;
                self.cond.notify_all();
                true
            }
        }
    }

    /// Blocks until a start signal is available, then enters `Running`.
    pub fn wait_for_start(&self) -> Wait {
        let mut state = self.state.lock();
        if state.phase != Phase::Finished {
            state.phase = Phase::Waiting;
        }
        debug!("waiting for start");
        while !state.start_latched && !state.closed {
            self.cond.wait(&mut state);
        }
        if state.closed {
            state.phase = Phase::Finished;
            self.cond.notify_all();
            return Wait::Closed;
        }
        state.start_latched = false;
        state.phase = Phase::Running;
        Wait::Started
    }

    /// Asks the running loop to stop and blocks until it acknowledges.
    ///
    /// Returns `true` if a running loop acknowledged (or finished while the
    /// request was pending), `false` if there was nothing to stop.
    pub fn request_stop(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Running {
            debug!(phase = ?state.phase, "stop requested while not running");
            return false;
        }
        state.phase = Phase::Stopping;
        self.stopping.store(true, Ordering::Release);
        self.cond.notify_all();
        while state.phase == Phase::Stopping {
            self.cond.wait(&mut state);
        }
        true
    }

    /// Main-loop side of the stop handshake: releases the pending requester.
    pub fn acknowledge_stop(&self) {
        let mut state = self.state.lock();
        if state.phase == Phase::Stopping {
            state.phase = Phase::Stopped;
        }
        self.stopping.store(false, Ordering::Release);
        self.cond.notify_all();
    }

    /// Marks the loop as exited for good, releasing any pending requester.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Finished;
        state.start_latched = false;
        self.stopping.store(false, Ordering::Release);
        self.cond.notify_all();
    }

    /// Releases a loop blocked in [`wait_for_start`](Self::wait_for_start)
    /// and makes every later wait return [`Wait::Closed`].
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    /// Wakes a parked main loop, or makes its next park return at once.
    pub fn wake(&self) {
        let mut state = self.state.lock();
        state.woken = true;
        self.cond.notify_all();
    }

    /// Sleeps for at most `timeout`, waking early on a stop request or a
    /// [`wake`](Self::wake).
    ///
    /// Returns the stop flag after waking.
    pub fn park(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Stopping && !state.woken {
            let _ = self.cond.wait_for(&mut state, timeout);
        }
        state.woken = false;
        state.phase == Phase::Stopping
    }
}
