//! Real-time adapters between the coupled runtime and the remote device.
//!
//! Both adapters own an [`RtClock`] and drive the coupled runtime from a
//! single main-loop thread, ticking it on the clock's grid:
//!
//! - [`InputAdapter`](input::InputAdapter) forwards events produced by the
//!   coupled runtime to the remote device at their real-time instants.
//! - [`OutputAdapter`](output::OutputAdapter) injects spikes received from
//!   the remote device into the coupled runtime.
//!
//! Start and stop notifications reach the main loop through a
//! [`Rendezvous`]; each adapter hands out a listener for the remote
//! connection to call.

pub mod input;
pub mod output;

use std::fmt;
use std::thread;

use crate::clock::{ClockError, RtClock, TimePoint, TimeSource};
use crate::config::{ConfigError, Pacing};
use crate::coupling::CouplingError;
use crate::link::LinkError;
use crate::rendezvous::Rendezvous;

pub use input::{InputAdapter, InputListener};
pub use output::{OutputAdapter, OutputListener};

/// Errors raised while building or running an adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("coupling error: {0}")]
    Coupling(#[from] CouplingError),
    #[error("clock error: {0}")]
    Clock(#[from] ClockError),
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    /// The loop was started without a connection to forward to.
    #[error("started without a remote connection")]
    NoConnection,
}

/// Why a main loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Simulated time reached the configured stop time.
    StopTime,
    /// The remote device stopped the run.
    Stopped,
    /// The listener was closed before (or while) waiting for a start.
    Closed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StopTime => "stop time reached",
            Self::Stopped => "stopped by remote",
            Self::Closed => "closed",
        })
    }
}

/// What a main loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Ticks of the coupled runtime.
    pub ticks: u64,
    /// Events forwarded (input) or received (output).
    pub events: u64,
    /// Pause/resume cycles (output only).
    pub pauses: u64,
    pub exit: ExitReason,
}

impl RunSummary {
    const fn new() -> Self {
        Self {
            ticks: 0,
            events: 0,
            pauses: 0,
            exit: ExitReason::StopTime,
        }
    }
}

/// Result of one busy-wait pass.
enum Sample {
    /// Work was done; sample again immediately.
    Progress,
    /// Nothing to do until the grid target or the given elapsed time.
    Idle(Option<TimePoint>),
}

/// How a wait for the grid target ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waited {
    Reached,
    Stopped,
}

/// Busy-waits until the clock passes its grid target or a stop is requested.
///
/// Each pass checks the stop flag, samples the clock and, while the target
/// is not reached, hands the sample to `on_sample`.
fn wait_for_target<S: TimeSource>(
    clock: &RtClock<S>,
    rendezvous: &Rendezvous,
    pacing: Pacing,
    mut on_sample: impl FnMut(TimePoint) -> Result<Sample, AdapterError>,
) -> Result<Waited, AdapterError> {
    loop {
        if rendezvous.is_stopping() {
            return Ok(Waited::Stopped);
        }
        let now = clock.now()?;
        if clock.past_target_at(now) {
            return Ok(Waited::Reached);
        }
        match on_sample(now)? {
            Sample::Progress => {}
            Sample::Idle(next) => pace(clock, rendezvous, pacing, now, next),
        }
    }
}

fn pace<S: TimeSource>(
    clock: &RtClock<S>,
    rendezvous: &Rendezvous,
    pacing: Pacing,
    now: TimePoint,
    next_event: Option<TimePoint>,
) {
    match pacing {
        Pacing::Spin => thread::yield_now(),
        Pacing::Park { spin_threshold } => {
            let mut remaining = clock.until_target(now);
            if let Some(t) = next_event {
                remaining = remaining.min(clock.until_elapsed(t, now));
            }
            let remaining = remaining.to_duration();
            if remaining > spin_threshold {
                rendezvous.park(remaining - spin_threshold);
            } else {
                thread::yield_now();
            }
        }
    }
}
