//! Real-time spike bridge between a tick-driven coupled runtime and a live
//! spikes device.
//!
//! Two adapters share one clock model. The [input adapter](adapter::input)
//! forwards events produced by the coupled runtime to the device at their
//! real-time instants; the [output adapter](adapter::output) injects spikes
//! received from the device into the coupled runtime. Both tick the coupled
//! runtime on a fixed real-time grid and follow the device's start and stop
//! notifications.

pub mod adapter;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coupling;
pub mod link;
pub mod net;
pub mod placement;
pub mod queue;
pub mod rendezvous;
mod trace;

pub use adapter::{AdapterError, ExitReason, InputAdapter, OutputAdapter, RunSummary};
pub use config::{InputConfig, OutputConfig, Pacing};
pub use trace::init_tracing;
