//! Output adapter: remote device → coupled runtime.
//!
//! Spike batches arrive on the connection's receive thread and are inserted
//! into the coupled runtime's output port; the main loop ticks the runtime on
//! the clock's grid. Insertion and ticking hold the same lock, so a batch is
//! never split across a tick.
//!
//! A stop from the remote device pauses the run: the clock is stopped, the
//! stop is acknowledged and the loop waits for the next start. On resume the
//! grid target that was pending when the pause began is kept, so no tick is
//! skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{AdapterError, ExitReason, RunSummary, Sample, Waited, wait_for_target};
use crate::clock::{MonotonicSource, RtClock, TimePoint, TimeSource};
use crate::config::OutputConfig;
use crate::coupling::{EventOutputPort, IndexRange, Runtime, Setup};
use crate::link::{LiveSpikesListener, SpikeConnection};
use crate::queue::UnitId;
use crate::rendezvous::{Phase, Rendezvous, Wait};
use crate::trace::{debug, info, trace, warn};

struct Coupled<R, P> {
    runtime: R,
    port: P,
}

/// Elapsed time `t` reported by the remote device at source reading `at`.
#[derive(Debug, Clone, Copy)]
struct Resync {
    at: TimePoint,
    t: TimePoint,
}

struct OutputShared<R, P, S> {
    label: String,
    rendezvous: Rendezvous,
    coupled: Mutex<Coupled<R, P>>,
    source: S,
    resync: Mutex<Option<Resync>>,
    received: AtomicU64,
}

/// Notification handle of an [`OutputAdapter`], registered with the remote
/// connection.
pub struct OutputListener<R, P, S = MonotonicSource> {
    shared: Arc<OutputShared<R, P, S>>,
}

impl<R, P, S> Clone for OutputListener<R, P, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R, P, S> OutputListener<R, P, S> {
    /// Releases a main loop waiting for start; it finalizes and returns
    /// [`ExitReason::Closed`].
    pub fn close(&self) {
        self.shared.rendezvous.close();
    }

    /// Current main-loop phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.rendezvous.phase()
    }
}

impl<R, P, S> LiveSpikesListener for OutputListener<R, P, S>
where
    R: Runtime,
    P: EventOutputPort,
    S: TimeSource,
{
    fn spikes_start(&self, label: &str, _connection: Arc<dyn SpikeConnection>) {
        info!(label, "starting the simulation");
        if self.shared.rendezvous.signal_start() {
            debug!(label, "start signal sent");
        }
    }

    fn spikes_stop(&self, label: &str) {
        info!(label, "stopping the simulation");
        if !self.shared.rendezvous.request_stop() {
            debug!(label, "stop ignored, main loop not running");
        }
    }

    fn receive_spikes(&self, _label: &str, time_ms: i32, ids: &[UnitId]) {
        let t = TimePoint::from_millis(i64::from(time_ms));
        match self.shared.source.now() {
            Ok(at) => *self.shared.resync.lock() = Some(Resync { at, t }),
            Err(_e) => warn!(error = %_e, "cannot resynchronize clock"),
        }

        let secs = f64::from(time_ms) / 1000.0;
        let mut coupled = self.shared.coupled.lock();
        for &id in ids {
            coupled.port.insert_event(secs, id);
        }
        drop(coupled);

        self.shared
            .received
            .fetch_add(ids.len() as u64, Ordering::Relaxed);
        trace!(label = _label, time_ms, count = ids.len(), "spikes inserted");
    }
}

/// Injects spikes from the remote device into the coupled runtime.
pub struct OutputAdapter<R, P, S = MonotonicSource> {
    config: OutputConfig,
    clock: RtClock<S>,
    shared: Arc<OutputShared<R, P, S>>,
}

impl<R: Runtime, P: EventOutputPort> OutputAdapter<R, P> {
    /// Builds the adapter on the process monotonic clock.
    ///
    /// # Errors
    ///
    /// See [`with_source`](Self::with_source).
    pub fn new<U>(setup: U, config: OutputConfig) -> Result<Self, AdapterError>
    where
        U: Setup<Runtime = R, OutputPort = P>,
    {
        Self::with_source(setup, config, MonotonicSource::new())
    }
}

impl<R, P, S> OutputAdapter<R, P, S>
where
    R: Runtime,
    P: EventOutputPort,
    S: TimeSource + Clone,
{
    /// Publishes and maps the output port and ends the coupling setup.
    ///
    /// `source` is shared with the listener, which samples it to timestamp
    /// resynchronizations.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or any coupling failure; no adapter
    /// exists afterwards.
    pub fn with_source<U>(mut setup: U, config: OutputConfig, source: S) -> Result<Self, AdapterError>
    where
        U: Setup<Runtime = R, OutputPort = P>,
    {
        config.validate()?;

        let mut port = setup.publish_event_output(&config.port_name)?;
        port.map(IndexRange::new(0, config.units))?;
        let runtime = setup.into_runtime(config.timestep)?;

        info!(
            label = %config.label,
            units = config.units,
            port = %config.port_name,
            timestep_us = config.timestep.as_micros() as u64,
            "output adapter ready"
        );

        Ok(Self {
            clock: RtClock::with_source(config.timestep, source.clone()),
            shared: Arc::new(OutputShared {
                label: config.label.clone(),
                rendezvous: Rendezvous::new(),
                coupled: Mutex::new(Coupled { runtime, port }),
                source,
                resync: Mutex::new(None),
                received: AtomicU64::new(0),
            }),
            config,
        })
    }

    /// The handle to register with the remote connection.
    #[must_use]
    pub fn listener(&self) -> OutputListener<R, P, S> {
        OutputListener {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Runs until the stop time or a close, pausing on every remote stop,
    /// then finalizes the coupled runtime.
    ///
    /// # Errors
    ///
    /// Clock and coupling failures end the loop. The runtime is still
    /// finalized and pending stop requests are released.
    pub fn main_loop(mut self) -> Result<RunSummary, AdapterError> {
        let outcome = self.run();
        self.shared.rendezvous.finish();
        let finalized = self.shared.coupled.lock().runtime.finalize();

        let mut summary = outcome?;
        finalized?;
        summary.events = self.shared.received.load(Ordering::Relaxed);
        info!(
            label = %self.shared.label,
            ticks = summary.ticks,
            events = summary.events,
            pauses = summary.pauses,
            exit = %summary.exit,
            "output adapter finished"
        );
        Ok(summary)
    }

    /// Applies the latest elapsed time reported by the remote device.
    ///
    /// Only called while the clock runs; the recorded reading keeps the
    /// correction exact however late it is applied.
    fn apply_resync(&mut self) {
        if let Some(Resync { at, t }) = self.shared.resync.lock().take() {
            self.clock.set_at(t, at);
        }
    }

    fn run(&mut self) -> Result<RunSummary, AdapterError> {
        let mut summary = RunSummary::new();
        let shared = Arc::clone(&self.shared);
        let rendezvous = &shared.rendezvous;

        self.clock.reset_and_stop();
        if rendezvous.wait_for_start() == Wait::Closed {
            summary.exit = ExitReason::Closed;
            return Ok(summary);
        }
        // Spikes from before the start carry no usable timing.
        shared.resync.lock().take();
        self.clock.start()?;

        let mut rearm = false;
        loop {
            self.apply_resync();
            if self.clock.time()? >= self.config.stop_time {
                break;
            }
            if rearm {
                rearm = false;
            } else {
                self.clock.set_next_target();
            }

            let waited = wait_for_target(&self.clock, rendezvous, self.config.pacing, |_| {
                Ok(Sample::Idle(None))
            })?;
            match waited {
                Waited::Reached => {
                    shared.coupled.lock().runtime.tick()?;
                    summary.ticks += 1;
                }
                Waited::Stopped => {
                    self.clock.stop()?;
                    rendezvous.acknowledge_stop();
                    summary.pauses += 1;
                    info!(label = %shared.label, "paused");

                    if rendezvous.wait_for_start() == Wait::Closed {
                        summary.exit = ExitReason::Closed;
                        return Ok(summary);
                    }
                    shared.resync.lock().take();
                    self.clock.start()?;
                    rearm = true;
                    info!(label = %shared.label, "resumed");
                }
            }
        }
        Ok(summary)
    }
}

impl<R, P, S> std::fmt::Debug for OutputAdapter<R, P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputAdapter")
            .field("config", &self.config)
            .field("phase", &self.shared.rendezvous.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualSource, StepSource};
    use crate::config::Pacing;
    use crate::coupling::memory::{Journal, MemoryCoupling, Record};
    use crate::link::memory::RecordingConnection;
    use std::time::Duration;

    fn config() -> OutputConfig {
        OutputConfig::new("pop", 8)
            .with_timestep(Duration::from_millis(5))
            .with_stop_time(0.020)
            .with_pacing(Pacing::Spin)
    }

    #[test]
    fn receive_inserts_each_id_at_report_time() {
        let journal = Journal::new();
        let adapter = OutputAdapter::with_source(
            MemoryCoupling::new(journal.clone()),
            config(),
            ManualSource::new(),
        )
        .unwrap();
        adapter
            .listener()
            .receive_spikes("pop", 1000, &[UnitId::new(4), UnitId::new(5)]);

        let inserted: Vec<Record> = journal
            .snapshot()
            .into_iter()
            .filter(|r| matches!(r, Record::Inserted { .. }))
            .collect();
        assert_eq!(
            inserted,
            vec![
                Record::Inserted {
                    time: 1.0,
                    id: UnitId::new(4),
                },
                Record::Inserted {
                    time: 1.0,
                    id: UnitId::new(5),
                },
            ]
        );
    }

    #[test]
    fn runs_to_stop_time() {
        let journal = Journal::new();
        let source = StepSource::new(TimePoint::from_millis(500), TimePoint::from_micros(100));
        let adapter =
            OutputAdapter::with_source(MemoryCoupling::new(journal.clone()), config(), source)
                .unwrap();
        adapter
            .listener()
            .spikes_start("pop", Arc::new(RecordingConnection::default()));
        let summary = adapter.main_loop().unwrap();

        assert_eq!(summary.exit, ExitReason::StopTime);
        assert_eq!(summary.ticks, 4);
        assert_eq!(journal.ticks(), 4);
        assert_eq!(journal.count(|r| *r == Record::Finalized), 1);
    }

    #[test]
    fn resync_moves_elapsed_time_forward() {
        let journal = Journal::new();
        let source = ManualSource::new();
        let mut adapter = OutputAdapter::with_source(
            MemoryCoupling::new(journal),
            config(),
            source.clone(),
        )
        .unwrap();
        adapter.clock.reset_and_stop();
        adapter.clock.start().unwrap();

        source.advance(TimePoint::from_millis(2));
        adapter
            .listener()
            .receive_spikes("pop", 7, &[UnitId::new(1)]);
        source.advance(TimePoint::from_millis(1));
        adapter.apply_resync();

        assert!((adapter.clock.time().unwrap() - 0.008).abs() < 1e-12);
    }
}
