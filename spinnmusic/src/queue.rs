//! Time-ordered buffer of spikes awaiting delivery.
//!
//! [`EventQueue`] is a min-heap on delivery time shared between the coupling
//! layer's event handler (producer) and the adapter main loop (consumer).
//! It carries its own lock so the handler may run on any thread.
//!
//! Events with equal delivery times are all kept; their relative order is
//! unspecified.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::TimePoint;

/// Global index of a unit (neuron) in the bridged population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct UnitId(u32);

impl UnitId {
    /// Creates a unit id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for UnitId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<UnitId> for u32 {
    fn from(id: UnitId) -> Self {
        id.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A spike with its delivery time, expressed as elapsed clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    /// Delivery time.
    pub time: TimePoint,
    /// Target unit.
    pub id: UnitId,
}

impl TimedEvent {
    /// Creates an event.
    #[must_use]
    pub const fn new(time: TimePoint, id: UnitId) -> Self {
        Self { time, id }
    }

    /// Creates an event from a delivery time in seconds.
    #[must_use]
    pub fn from_secs(time: f64, id: UnitId) -> Self {
        Self::new(TimePoint::from_secs_f64(time), id)
    }
}

// Reversed so that `BinaryHeap` (a max-heap) yields the earliest event first.
impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Unbounded, time-ordered, thread-safe event buffer.
///
/// Clones are handles to the same queue.
#[derive(Clone, Default)]
pub struct EventQueue {
    heap: Arc<Mutex<BinaryHeap<TimedEvent>>>,
}

impl EventQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event.
    pub fn push(&self, event: TimedEvent) {
        self.heap.lock().push(event);
    }

    /// Removes and returns the earliest event.
    #[must_use]
    pub fn pop(&self) -> Option<TimedEvent> {
        self.heap.lock().pop()
    }

    /// Removes and returns the earliest event if `due` accepts it.
    ///
    /// The check and the removal happen under one lock acquisition.
    #[must_use]
    pub fn pop_if(&self, due: impl FnOnce(&TimedEvent) -> bool) -> Option<TimedEvent> {
        let mut heap = self.heap.lock();
        if heap.peek().is_some_and(due) {
            heap.pop()
        } else {
            None
        }
    }

    /// Delivery time of the earliest event.
    #[must_use]
    pub fn peek_time(&self) -> Option<TimePoint> {
        self.heap.lock().peek().map(|e| e.time)
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Returns `true` if no events are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Drops all buffered events, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut heap = self.heap.lock();
        let n = heap.len();
        heap.clear();
        n
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ev(ms: i64, id: u32) -> TimedEvent {
        TimedEvent::new(TimePoint::from_millis(ms), UnitId::new(id))
    }

    #[test]
    fn pops_earliest_first() {
        let queue = EventQueue::new();
        queue.push(ev(7, 1));
        queue.push(ev(1, 2));
        queue.push(ev(3, 3));

        assert_eq!(queue.peek_time(), Some(TimePoint::from_millis(1)));
        assert_eq!(queue.pop(), Some(ev(1, 2)));
        assert_eq!(queue.pop(), Some(ev(3, 3)));
        assert_eq!(queue.pop(), Some(ev(7, 1)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn duplicates_are_preserved() {
        let queue = EventQueue::new();
        queue.push(ev(2, 9));
        queue.push(ev(2, 9));
        queue.push(ev(2, 4));
        assert_eq!(queue.len(), 3);

        let ids: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|e| e.id.get()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.iter().filter(|&&id| id == 9).count(), 2);
    }

    #[test]
    fn pop_if_leaves_undue_events() {
        let queue = EventQueue::new();
        queue.push(ev(5, 1));
        let limit = TimePoint::from_millis(4);
        assert_eq!(queue.pop_if(|e| e.time <= limit), None);
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.pop_if(|e| e.time <= TimePoint::from_millis(5)),
            Some(ev(5, 1))
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn clones_share_storage() {
        let queue = EventQueue::new();
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            for i in (0..100).rev() {
                producer.push(ev(i, i as u32));
            }
        });
        handle.join().unwrap();
        assert_eq!(queue.len(), 100);
        assert_eq!(queue.pop(), Some(ev(0, 0)));
        assert_eq!(queue.clear(), 99);
    }

    proptest! {
        #[test]
        fn pops_are_non_decreasing(times in proptest::collection::vec(-1_000i64..1_000, 0..200)) {
            let queue = EventQueue::new();
            for (i, t) in times.iter().enumerate() {
                queue.push(ev(*t, i as u32));
            }
            let mut last = None;
            let mut count = 0;
            while let Some(e) = queue.pop() {
                if let Some(prev) = last {
                    prop_assert!(prev <= e.time);
                }
                last = Some(e.time);
                count += 1;
            }
            prop_assert_eq!(count, times.len());
        }
    }
}
