//! Input adapter: coupled runtime → remote device.
//!
//! Events produced by the coupled runtime are queued with the configured
//! delay added, then sent to the remote device once the clock reaches their
//! delivery time. Between sends the loop ticks the coupled runtime on the
//! clock's grid.
//!
//! Two modes, fixed at construction:
//!
//! - free-running: the clock runs continuously and ticks happen on the grid;
//! - lock-step: after each grid target the clock is stopped while the runtime
//!   ticks, and the remote device is told to continue its next step.
//!
//! A stop from the remote device ends the run; there is no resume.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::{AdapterError, ExitReason, RunSummary, Sample, Waited, wait_for_target};
use crate::clock::{MonotonicSource, RtClock, TimeSource};
use crate::config::InputConfig;
use crate::coupling::{EventInputPort, IndexRange, Runtime, Setup};
use crate::link::{LiveSpikesListener, SpikeConnection};
use crate::queue::{EventQueue, TimedEvent};
use crate::rendezvous::{Phase, Rendezvous, Wait};
use crate::trace::{debug, info, warn};

struct InputShared {
    label: String,
    rendezvous: Rendezvous,
    connection: Mutex<Option<Arc<dyn SpikeConnection>>>,
}

/// Notification handle of an [`InputAdapter`], registered with the remote
/// connection.
#[derive(Clone)]
pub struct InputListener {
    shared: Arc<InputShared>,
}

impl InputListener {
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

impl LiveSpikesListener for InputListener {
    fn spikes_start(&self, label: &str, connection: Arc<dyn SpikeConnection>) {
        info!(label, "starting the simulation");
        *self.shared.connection.lock() = Some(connection);
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
}

impl std::fmt::Debug for InputListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputListener")
            .field("label", &self.shared.label)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Forwards events from the coupled runtime to the remote device.
pub struct InputAdapter<R, S = MonotonicSource> {
    config: InputConfig,
    clock: RtClock<S>,
    queue: EventQueue,
    runtime: R,
    shared: Arc<InputShared>,
}

impl<R: Runtime> InputAdapter<R> {
    /// Builds the adapter on the process monotonic clock.
    ///
    /// # Errors
    ///
    /// See [`with_source`](Self::with_source).
    pub fn new<U>(setup: U, config: InputConfig) -> Result<Self, AdapterError>
    where
        U: Setup<Runtime = R>,
    {
        Self::with_source(setup, config, MonotonicSource::new())
    }
}

impl<R: Runtime, S: TimeSource> InputAdapter<R, S> {
    /// Publishes and maps the input port, passes the barrier if configured,
    /// and ends the coupling setup.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or any coupling failure; no adapter
    /// exists afterwards.
    pub fn with_source<U>(mut setup: U, config: InputConfig, source: S) -> Result<Self, AdapterError>
    where
        U: Setup<Runtime = R>,
    {
        config.validate()?;

        let queue = EventQueue::new();
        let shared = Arc::new(InputShared {
            label: config.label.clone(),
            rendezvous: Rendezvous::new(),
            connection: Mutex::new(None),
        });

        let mut port = setup.publish_event_input(&config.port_name)?;
        let sink = queue.clone();
        let waker = Arc::clone(&shared);
        let delay = config.delay;
        port.map(
            IndexRange::new(0, config.units),
            Box::new(move |t, id| {
                sink.push(TimedEvent::from_secs(t + delay, id));
                // Cut a parked wait short; the event may be due before the target.
                waker.rendezvous.wake();
            }),
            config.max_buffered,
        )?;
        if config.use_barrier {
            debug!("waiting at barrier");
            setup.barrier()?;
        }
        let runtime = setup.into_runtime(config.timestep)?;

        info!(
            label = %config.label,
            units = config.units,
            port = %config.port_name,
            timestep_us = config.timestep.as_micros() as u64,
            lock_step = config.is_lock_step(),
            "input adapter ready"
        );

        Ok(Self {
            clock: RtClock::with_source(config.timestep, source),
            queue,
            runtime,
            shared,
            config,
        })
    }

    /// The handle to register with the remote connection.
    #[must_use]
    pub fn listener(&self) -> InputListener {
        InputListener {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Events waiting to be forwarded.
    #[must_use]
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    #[must_use]
    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    /// Runs until the stop time, a remote stop, or a close, then finalizes
    /// the coupled runtime.
    ///
    /// # Errors
    ///
    /// Clock, coupling and link failures end the loop. The runtime is still
    /// finalized and pending stop requests are released.
    pub fn main_loop(mut self) -> Result<RunSummary, AdapterError> {
        let outcome = self.run();
        self.shared.rendezvous.finish();
        let finalized = self.runtime.finalize();

        let summary = outcome?;
        finalized?;
        let undelivered = self.queue.len();
        if undelivered > 0 {
            warn!(undelivered, "events left in queue");
        }
        info!(
            ticks = summary.ticks,
            events = summary.events,
            exit = %summary.exit,
            "input adapter finished"
        );
        Ok(summary)
    }

    fn run(&mut self) -> Result<RunSummary, AdapterError> {
        let mut summary = RunSummary::new();
        let rendezvous = &self.shared.rendezvous;

        self.clock.reset_and_stop();
        if rendezvous.wait_for_start() == Wait::Closed {
            summary.exit = ExitReason::Closed;
            return Ok(summary);
        }
        let connection = self
            .shared
            .connection
            .lock()
            .clone()
            .ok_or(AdapterError::NoConnection)?;
        self.clock.start()?;

        let label = self.config.label.as_str();
        while self.clock.time()? < self.config.stop_time {
            self.clock.set_next_target();

            let clock = &self.clock;
            let queue = &self.queue;
            let events = &mut summary.events;
            let waited = wait_for_target(clock, rendezvous, self.config.pacing, |now| {
                match queue.pop_if(|e| clock.less_than_eql(e.time, now)) {
                    Some(event) => {
                        connection.send_spike(label, event.id)?;
                        *events += 1;
                        Ok(Sample::Progress)
                    }
                    None => Ok(Sample::Idle(queue.peek_time())),
                }
            })?;

            if waited == Waited::Stopped {
                self.clock.stop()?;
                rendezvous.acknowledge_stop();
                info!(label, "stopped");
                summary.exit = ExitReason::Stopped;
                return Ok(summary);
            }

            if self.config.is_lock_step() {
                self.clock.stop()?;
                self.runtime.tick()?;
                thread::sleep(self.config.sync_pause);
                connection.continue_run(label)?;
                self.clock.start()?;
            } else {
                self.runtime.tick()?;
            }
            summary.ticks += 1;
        }
        Ok(summary)
    }
}

impl<R, S> std::fmt::Debug for InputAdapter<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputAdapter")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{StepSource, TimePoint};
    use crate::config::Pacing;
    use crate::coupling::memory::{Journal, MemoryCoupling, Record};
    use crate::link::memory::RecordingConnection;
    use crate::queue::UnitId;
    use std::time::Duration;

    fn step_source() -> StepSource {
        StepSource::new(TimePoint::from_millis(1_000), TimePoint::from_micros(100))
    }

    fn config() -> InputConfig {
        InputConfig::new("pop", 8)
            .with_timestep(Duration::from_millis(5))
            .with_stop_time(0.010)
            .with_pacing(Pacing::Spin)
    }

    #[test]
    fn construction_maps_port_and_passes_barrier() {
        let journal = Journal::new();
        let setup = MemoryCoupling::new(journal.clone());
        let adapter =
            InputAdapter::with_source(setup, config().with_barrier(true), step_source()).unwrap();
        assert_eq!(
            journal.snapshot(),
            vec![
                Record::Mapped {
                    port: "in".into(),
                    range: IndexRange::new(0, 8),
                },
                Record::Barrier,
            ]
        );
        assert_eq!(adapter.listener().phase(), Phase::Stopped);
    }

    #[test]
    fn invalid_config_builds_nothing() {
        let journal = Journal::new();
        let setup = MemoryCoupling::new(journal.clone());
        let result = InputAdapter::with_source(setup, InputConfig::new("pop", 0), step_source());
        assert!(matches!(result, Err(AdapterError::Config(_))));
        assert!(journal.snapshot().is_empty());
    }

    #[test]
    fn handler_adds_delay() {
        let setup = MemoryCoupling::new(Journal::new());
        let injector = setup.clone();
        let adapter =
            InputAdapter::with_source(setup, config().with_delay(0.002), step_source()).unwrap();
        assert!(injector.deliver(0.001, UnitId::new(3)));
        assert!(injector.deliver(0.001, UnitId::new(3)));
        assert!(!injector.deliver(0.001, UnitId::new(8)));
        assert_eq!(adapter.queue().len(), 2);
        assert_eq!(adapter.queue().peek_time(), Some(TimePoint::from_millis(3)));
    }

    #[test]
    fn far_future_event_is_held_back() {
        let journal = Journal::new();
        let setup = MemoryCoupling::new(journal.clone());
        let injector = setup.clone();
        let adapter =
            InputAdapter::with_source(setup, config().with_delay(1.0e10), step_source()).unwrap();
        assert!(adapter.config().validate().is_ok());
        assert!(injector.deliver(0.001, UnitId::new(2)));
        let queue = adapter.queue().clone();

        adapter
            .listener()
            .spikes_start("pop", Arc::new(RecordingConnection::new(journal.clone())));
        let summary = adapter.main_loop().unwrap();

        assert_eq!(summary.exit, ExitReason::StopTime);
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.events, 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(journal.count(|r| matches!(r, Record::Sent { .. })), 0);
    }

    #[test]
    fn close_before_start_finalizes() {
        let journal = Journal::new();
        let adapter =
            InputAdapter::with_source(MemoryCoupling::new(journal.clone()), config(), step_source())
                .unwrap();
        adapter.listener().close();
        let summary = adapter.main_loop().unwrap();
        assert_eq!(summary.exit, ExitReason::Closed);
        assert_eq!(summary.ticks, 0);
        assert_eq!(journal.count(|r| *r == Record::Finalized), 1);
    }

    #[test]
    fn lock_step_stops_clock_around_tick_and_continues_remote() {
        let journal = Journal::new();
        let adapter = InputAdapter::with_source(
            MemoryCoupling::new(journal.clone()),
            config()
                .with_sync_interval(Some(Duration::from_millis(5)))
                .with_sync_pause(Duration::ZERO),
            step_source(),
        )
        .unwrap();
        adapter.listener().spikes_start(
            "pop",
            Arc::new(RecordingConnection::new(journal.clone())),
        );
        let summary = adapter.main_loop().unwrap();

        assert_eq!(summary.ticks, 2);
        let records = journal.snapshot();
        let continues: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| **r == Record::Continue)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(continues.len(), 2);
        for i in continues {
            assert!(matches!(records[i - 1], Record::TickEnd(_)));
        }
    }
}
