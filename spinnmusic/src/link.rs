//! Connection to the remote spiking device.
//!
//! The remote device streams spikes and run-control notifications for named
//! populations ("labels"). Adapters register a [`LiveSpikesListener`] per
//! label and talk back through a [`SpikeConnection`].
//!
//! Listener callbacks run on the connection's receive thread. A listener may
//! block (the stop notification does, until the adapter acknowledges); the
//! connection delivers nothing else while it does.

pub mod memory;
pub mod protocol;
pub mod udp;

use std::sync::Arc;

use crate::queue::UnitId;

pub use protocol::ProtocolError;

/// Errors raised by a remote connection.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Nothing to send to: no remote was configured or learned yet.
    #[error("no remote endpoint known")]
    NoRemote,
    /// The receive thread could not be started.
    #[error("failed to spawn receive thread: {0}")]
    Spawn(String),
}

/// Sending half of a remote connection, handed to listeners on start.
pub trait SpikeConnection: Send + Sync {
    /// Sends one spike of population `label`.
    ///
    /// # Errors
    ///
    /// Returns an error if the spike could not be sent.
    fn send_spike(&self, label: &str, id: UnitId) -> Result<(), LinkError>;

    /// Tells a single-stepping remote device to run its next step.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal could not be sent.
    fn continue_run(&self, label: &str) -> Result<(), LinkError>;
}

/// Receiver of notifications for one label.
pub trait LiveSpikesListener: Send + Sync {
    /// The remote device started running.
    fn spikes_start(&self, label: &str, connection: Arc<dyn SpikeConnection>);

    /// The remote device paused or stopped.
    ///
    /// Blocks until the listener's main loop has left its wait.
    fn spikes_stop(&self, label: &str);

    /// A batch of spikes emitted by the remote device at `time_ms`.
    fn receive_spikes(&self, _label: &str, _time_ms: i32, _ids: &[UnitId]) {}
}
