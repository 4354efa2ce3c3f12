//! Coupling-layer interface.
//!
//! The coupling layer connects the adapter to the local tick-driven runtime.
//! An adapter publishes one event port on a [`Setup`], maps the population's
//! index range onto it, and then converts the setup into a [`Runtime`] that
//! it ticks from its main loop.
//!
//! - Input direction: the port calls an [`EventHandler`] for every event the
//!   local runtime produces. Handlers usually run inside [`Runtime::tick`]
//!   on the calling thread, but may be invoked from any thread; the input
//!   adapter wakes its parked main loop on every event.
//! - Output direction: the adapter inserts events into an
//!   [`EventOutputPort`]; they are handed to the local runtime on the next tick.
//!
//! Two implementations ship with the crate: [`memory`], an in-process
//! coupling that journals every call, and [`text`], which replays and records
//! `"<time> <id>"` lines.

pub mod memory;
pub mod text;

use std::fmt;
use std::time::Duration;

use crate::queue::UnitId;

/// Callback receiving `(time in seconds, unit)` for each produced event.
pub type EventHandler = Box<dyn FnMut(f64, UnitId) + Send>;

/// A contiguous range of global unit indices `base..base + size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    base: u32,
    size: u32,
}

impl IndexRange {
    /// Creates the range `base..base + size`.
    #[must_use]
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// First index.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Number of indices.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns `true` if `id` lies in the range.
    #[must_use]
    pub fn contains(&self, id: UnitId) -> bool {
        let id = id.get();
        id >= self.base && id - self.base < self.size
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.base, u64::from(self.base) + u64::from(self.size))
    }
}

/// Errors raised by a coupling implementation.
#[derive(Debug, thiserror::Error)]
pub enum CouplingError {
    /// A port could not be published.
    #[error("cannot publish port '{name}': {reason}")]
    Publish { name: String, reason: String },
    /// A port was mapped twice.
    #[error("port '{0}' is already mapped")]
    AlreadyMapped(String),
    /// The process-group barrier failed.
    #[error("barrier failed: {0}")]
    Barrier(String),
    /// An event stream line could not be parsed.
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    /// The runtime was used after finalization.
    #[error("runtime already finalized")]
    Finalized,
    /// I/O failure in a stream-backed coupling.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port receiving events from the local runtime.
pub trait EventInputPort {
    /// Maps `indices` onto this port, delivering events to `handler`.
    ///
    /// `max_buffered` is a backpressure hint in ticks for the coupling layer.
    ///
    /// # Errors
    ///
    /// Returns [`CouplingError::AlreadyMapped`] on a second call.
    fn map(
        &mut self,
        indices: IndexRange,
        handler: EventHandler,
        max_buffered: Option<u32>,
    ) -> Result<(), CouplingError>;
}

/// Port passing events into the local runtime.
pub trait EventOutputPort: Send {
    /// Maps `indices` onto this port using global indexing.
    ///
    /// # Errors
    ///
    /// Returns [`CouplingError::AlreadyMapped`] on a second call.
    fn map(&mut self, indices: IndexRange) -> Result<(), CouplingError>;

    /// Queues an event for the local runtime.
    fn insert_event(&mut self, time: f64, id: UnitId);
}

/// The local runtime after setup.
pub trait Runtime: Send {
    /// Advances the runtime by one timestep, exchanging buffered events.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot advance.
    fn tick(&mut self) -> Result<(), CouplingError>;

    /// Shuts the runtime down. Called exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be shut down cleanly.
    fn finalize(&mut self) -> Result<(), CouplingError>;

    /// Current simulated time in seconds.
    fn time(&self) -> f64;
}

/// Coupling configuration phase.
pub trait Setup {
    /// Input port type.
    type InputPort: EventInputPort;
    /// Output port type.
    type OutputPort: EventOutputPort;
    /// Runtime type produced by [`into_runtime`](Self::into_runtime).
    type Runtime: Runtime;

    /// Publishes an input port under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CouplingError::Publish`] if the port cannot be created.
    fn publish_event_input(&mut self, name: &str) -> Result<Self::InputPort, CouplingError>;

    /// Publishes an output port under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CouplingError::Publish`] if the port cannot be created.
    fn publish_event_output(&mut self, name: &str) -> Result<Self::OutputPort, CouplingError>;

    /// Blocks until every process of the coupled group reaches the barrier.
    ///
    /// # Errors
    ///
    /// Returns [`CouplingError::Barrier`] on failure.
    fn barrier(&mut self) -> Result<(), CouplingError>;

    /// Ends the setup phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be created.
    fn into_runtime(self, timestep: Duration) -> Result<Self::Runtime, CouplingError>;
}
