/// Deterministic event scheduler.
///
/// Uses a `BinaryHeap` with reversed `Ord` on `QueueEntry` to act as a
/// min-heap keyed by `(due, seq)`. Insertion sequence numbers are strictly
/// increasing, so events due at the same instant pop in the order they
/// were scheduled, including events scheduled while that instant is being
/// drained.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::event::EventId;
use crate::time::SimTime;

// ── Queue Entry ───────────────────────────────────────────────────────

/// A scheduled dispatch of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// When the event is due.
    pub due: SimTime,
    /// Insertion order; breaks ties between equal `due` times.
    pub seq: u64,
    /// The event to dispatch.
    pub event: EventId,
}

/// Ordering: smallest `(due, seq)` first.
///
/// `BinaryHeap` is a max-heap, so the natural ordering is reversed here.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────

/// The time-ordered queue of pending dispatches.
///
/// Owned exclusively by the `Simulation`. Cancelled events are not removed
/// eagerly; the simulation discards them when they surface.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    queue: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl Scheduler {
    /// Create a new, empty scheduler.
    pub fn new() -> Self {
        Scheduler {
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `event` for dispatch at `due`. Returns its insertion number.
    pub fn schedule(&mut self, due: SimTime, event: EventId) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueueEntry { due, seq, event });
        seq
    }

    /// Pop the next entry (earliest time, lowest sequence number).
    pub fn pop_next(&mut self) -> Option<QueueEntry> {
        self.queue.pop()
    }

    /// Peek at the next entry without removing it.
    pub fn peek_next(&self) -> Option<&QueueEntry> {
        self.queue.peek()
    }

    /// All scheduled entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.queue.iter()
    }

    /// Returns `true` if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of scheduled entries, including ones for cancelled events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drain all entries in dispatch order.
    pub fn drain_ordered(&mut self) -> Vec<QueueEntry> {
        let mut entries = Vec::with_capacity(self.queue.len());
        while let Some(e) = self.queue.pop() {
            entries.push(e);
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(x: f64) -> SimTime {
        SimTime::new(x)
    }

    #[test]
    fn test_fifo_at_same_time() {
        let mut sched = Scheduler::new();

        sched.schedule(t(10.0), EventId::new(7));
        sched.schedule(t(10.0), EventId::new(3));
        sched.schedule(t(10.0), EventId::new(5));

        let order: Vec<u64> = sched
            .drain_ordered()
            .iter()
            .map(|e| e.event.raw())
            .collect();

        // Same time → insertion order, regardless of event id.
        assert_eq!(order, vec![7, 3, 5]);
    }

    #[test]
    fn test_time_ordering() {
        let mut sched = Scheduler::new();

        sched.schedule(t(30.0), EventId::new(0));
        sched.schedule(t(10.0), EventId::new(1));
        sched.schedule(t(20.5), EventId::new(2));

        assert_eq!(sched.pop_next().unwrap().due, t(10.0));
        assert_eq!(sched.pop_next().unwrap().due, t(20.5));
        assert_eq!(sched.pop_next().unwrap().due, t(30.0));
    }

    #[test]
    fn test_same_instant_insert_during_drain() {
        let mut sched = Scheduler::new();
        sched.schedule(t(5.0), EventId::new(0));
        sched.schedule(t(6.0), EventId::new(1));

        let first = sched.pop_next().unwrap();
        assert_eq!(first.event, EventId::new(0));

        // Scheduled while T=5 is being drained: must beat the T=6 entry.
        sched.schedule(t(5.0), EventId::new(2));
        assert_eq!(sched.pop_next().unwrap().event, EventId::new(2));
        assert_eq!(sched.pop_next().unwrap().event, EventId::new(1));
    }

    #[test]
    fn test_mixed_ordering() {
        let mut sched = Scheduler::new();

        sched.schedule(t(50.0), EventId::new(0));
        sched.schedule(t(10.0), EventId::new(1));
        sched.schedule(t(10.0), EventId::new(2));
        sched.schedule(t(0.0), EventId::new(3));
        sched.schedule(t(10.0), EventId::new(4));

        let entries = sched.drain_ordered();
        for window in entries.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            assert!(
                (a.due, a.seq) <= (b.due, b.seq),
                "Entries out of order: {:?} vs {:?}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_empty_scheduler() {
        let mut sched = Scheduler::new();
        assert!(sched.is_empty());
        assert_eq!(sched.len(), 0);
        assert!(sched.peek_next().is_none());
        assert!(sched.pop_next().is_none());
    }
}
