//! In-process connection that records what an adapter sends.

use super::{LinkError, SpikeConnection};
use crate::coupling::memory::{Journal, Record};
use crate::queue::UnitId;

/// Appends every sent spike and continue signal to a [`Journal`].
///
/// Sharing the journal with a [`MemoryCoupling`](crate::coupling::memory::MemoryCoupling)
/// interleaves sends with ticks in call order.
#[derive(Debug, Clone, Default)]
pub struct RecordingConnection {
    journal: Journal,
}

impl RecordingConnection {
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self { journal }
    }

    /// Spikes sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<UnitId> {
        self.journal
            .snapshot()
            .into_iter()
            .filter_map(|r| match r {
                Record::Sent { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl SpikeConnection for RecordingConnection {
    fn send_spike(&self, label: &str, id: UnitId) -> Result<(), LinkError> {
        self.journal.push(Record::Sent {
            label: label.to_owned(),
            id,
        });
        Ok(())
    }

    fn continue_run(&self, _label: &str) -> Result<(), LinkError> {
        self.journal.push(Record::Continue);
        Ok(())
    }
}
