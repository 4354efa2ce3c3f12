//! In-process coupling that journals every call.
//!
//! [`MemoryCoupling`] stands in for the coupled runtime in adapter tests.
//! Every port mapping, tick, inserted event and finalization is appended to a
//! shared [`Journal`], so tests can assert on ordering across threads. The
//! remote side can write into the same journal through
//! [`RecordingConnection`](crate::link::memory::RecordingConnection).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    CouplingError, EventHandler, EventInputPort, EventOutputPort, IndexRange, Runtime, Setup,
};
use crate::queue::UnitId;

/// One observable call.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A port was mapped.
    Mapped { port: String, range: IndexRange },
    /// The barrier was passed.
    Barrier,
    /// Tick `n` started.
    TickBegin(u64),
    /// Tick `n` completed.
    TickEnd(u64),
    /// An event reached the output port.
    Inserted { time: f64, id: UnitId },
    /// The runtime was finalized.
    Finalized,
    /// A spike was sent to the remote side.
    Sent { label: String, id: UnitId },
    /// The remote side was told to continue.
    Continue,
}

/// Append-only, shared record of calls.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    records: Arc<Mutex<Vec<Record>>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn push(&self, record: Record) {
        self.records.lock().push(record);
    }

    /// Copy of all records so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Number of records matching `pred`.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&Record) -> bool) -> usize {
        self.records.lock().iter().filter(|r| pred(r)).count()
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> usize {
        self.count(|r| matches!(r, Record::TickEnd(_)))
    }
}

struct MappedInput {
    range: IndexRange,
    handler: EventHandler,
}

#[derive(Default)]
struct Shared {
    input: Mutex<Option<MappedInput>>,
    scheduled: Mutex<Vec<(f64, UnitId)>>,
}

impl Shared {
    fn deliver(&self, time: f64, id: UnitId) -> bool {
        let mut input = self.input.lock();
        match input.as_mut() {
            Some(mapped) if mapped.range.contains(id) => {
                (mapped.handler)(time, id);
                true
            }
            _ => false,
        }
    }

    fn deliver_before(&self, limit: f64) {
        let due = {
            let mut scheduled = self.scheduled.lock();
            let mut due = Vec::new();
            scheduled.retain(|&(t, id)| {
                if t < limit {
                    due.push((t, id));
                    false
                } else {
                    true
                }
            });
            due
        };
        for (t, id) in due {
            self.deliver(t, id);
        }
    }
}

/// Handle to an in-process coupled runtime.
///
/// Clones share ports and journal, so a test can keep one handle for
/// injecting events after the other was consumed by an adapter.
#[derive(Clone)]
pub struct MemoryCoupling {
    journal: Journal,
    tick_hold: Duration,
    shared: Arc<Shared>,
}

impl MemoryCoupling {
    /// Creates a coupling writing into `journal`.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            tick_hold: Duration::ZERO,
            shared: Arc::default(),
        }
    }

    /// Makes every tick sleep for `hold` between its begin and end records.
    #[must_use]
    pub fn with_tick_hold(mut self, hold: Duration) -> Self {
        self.tick_hold = hold;
        self
    }

    /// The shared journal.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Calls the mapped input handler immediately.
    ///
    /// Returns `false` if no handler is mapped or `id` is outside its range.
    pub fn deliver(&self, time: f64, id: UnitId) -> bool {
        self.shared.deliver(time, id)
    }

    /// Queues an event for delivery by the tick whose window contains `time`.
    pub fn schedule(&self, time: f64, id: UnitId) {
        self.shared.scheduled.lock().push((time, id));
    }
}

impl std::fmt::Debug for MemoryCoupling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoupling")
            .field("tick_hold", &self.tick_hold)
            .finish_non_exhaustive()
    }
}

/// Input port of a [`MemoryCoupling`].
pub struct MemoryInputPort {
    name: String,
    journal: Journal,
    shared: Arc<Shared>,
}

impl EventInputPort for MemoryInputPort {
    fn map(
        &mut self,
        indices: IndexRange,
        handler: EventHandler,
        _max_buffered: Option<u32>,
    ) -> Result<(), CouplingError> {
        let mut input = self.shared.input.lock();
        if input.is_some() {
            return Err(CouplingError::AlreadyMapped(self.name.clone()));
        }
        *input = Some(MappedInput {
            range: indices,
            handler,
        });
        self.journal.push(Record::Mapped {
            port: self.name.clone(),
            range: indices,
        });
        Ok(())
    }
}

/// Output port of a [`MemoryCoupling`].
#[derive(Debug)]
pub struct MemoryOutputPort {
    name: String,
    journal: Journal,
    range: Option<IndexRange>,
}

impl EventOutputPort for MemoryOutputPort {
    fn map(&mut self, indices: IndexRange) -> Result<(), CouplingError> {
        if self.range.is_some() {
            return Err(CouplingError::AlreadyMapped(self.name.clone()));
        }
        self.range = Some(indices);
        self.journal.push(Record::Mapped {
            port: self.name.clone(),
            range: indices,
        });
        Ok(())
    }

    fn insert_event(&mut self, time: f64, id: UnitId) {
        if self.range.is_some_and(|r| r.contains(id)) {
            self.journal.push(Record::Inserted { time, id });
        }
    }
}

/// Runtime of a [`MemoryCoupling`].
pub struct MemoryRuntime {
    journal: Journal,
    shared: Arc<Shared>,
    tick_hold: Duration,
    timestep: f64,
    time: f64,
    ticks: u64,
    finalized: bool,
}

impl MemoryRuntime {
    /// Number of completed ticks.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Runtime for MemoryRuntime {
    fn tick(&mut self) -> Result<(), CouplingError> {
        if self.finalized {
            return Err(CouplingError::Finalized);
        }
        let n = self.ticks;
        self.journal.push(Record::TickBegin(n));
        self.shared.deliver_before(self.time + self.timestep);
        if !self.tick_hold.is_zero() {
            std::thread::sleep(self.tick_hold);
        }
        self.time += self.timestep;
        self.ticks += 1;
        self.journal.push(Record::TickEnd(n));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), CouplingError> {
        if self.finalized {
            return Err(CouplingError::Finalized);
        }
        self.finalized = true;
        self.journal.push(Record::Finalized);
        Ok(())
    }

    fn time(&self) -> f64 {
        self.time
    }
}

impl Setup for MemoryCoupling {
    type InputPort = MemoryInputPort;
    type OutputPort = MemoryOutputPort;
    type Runtime = MemoryRuntime;

    fn publish_event_input(&mut self, name: &str) -> Result<MemoryInputPort, CouplingError> {
        Ok(MemoryInputPort {
            name: name.to_owned(),
            journal: self.journal.clone(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn publish_event_output(&mut self, name: &str) -> Result<MemoryOutputPort, CouplingError> {
        Ok(MemoryOutputPort {
            name: name.to_owned(),
            journal: self.journal.clone(),
            range: None,
        })
    }

    fn barrier(&mut self) -> Result<(), CouplingError> {
        self.journal.push(Record::Barrier);
        Ok(())
    }

    fn into_runtime(self, timestep: Duration) -> Result<MemoryRuntime, CouplingError> {
        Ok(MemoryRuntime {
            journal: self.journal,
            shared: self.shared,
            tick_hold: self.tick_hold,
            timestep: timestep.as_secs_f64(),
            time: 0.0,
            ticks: 0,
            finalized: false,
        })
    }
}
