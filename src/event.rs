/// Event records for the discrete-event kernel.
///
/// Every wait in the kernel is modeled as an `Event`: a timeout, a store
/// request, an interrupt delivery, a process start or a combined wait.
/// Events live in an arena owned by the `Simulation` and are referenced
/// by `EventId`.

use crate::combinator::TieBreak;
use crate::error::{SimError, SimResult};
use crate::process::ProcessId;
use crate::store::StoreId;
use crate::time::SimTime;

// ── Event ID ──────────────────────────────────────────────────────────

/// A unique, strictly increasing event identifier.
///
/// IDs are handed out in creation order and double as indices into the
/// simulation's event arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw u64 into an `EventId`.
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    /// Return the raw value.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

// ── Event Kind ────────────────────────────────────────────────────────

/// What an event waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// First resumption of a freshly spawned process.
    Start,
    /// Fires after a fixed delay.
    Timeout,
    /// Takes an item from a store.
    Get(StoreId),
    /// Adds an item to a store.
    Put(StoreId),
    /// Delivers an interrupt cause to a suspended process.
    Interrupt,
    /// Resolves with the first of its children.
    AnyOf,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Start => write!(f, "Start"),
            EventKind::Timeout => write!(f, "Timeout"),
            EventKind::Get(store) => write!(f, "Get({})", store),
            EventKind::Put(store) => write!(f, "Put({})", store),
            EventKind::Interrupt => write!(f, "Interrupt"),
            EventKind::AnyOf => write!(f, "AnyOf"),
        }
    }
}

// ── Event Status ──────────────────────────────────────────────────────

/// Lifecycle of an event.
///
/// Transitions are monotonic: `Pending → {Triggered | Cancelled}`, and
/// `Triggered → Consumed` once the value has been handed over. An event is
/// never triggered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EventStatus {
    Pending,
    Triggered,
    Cancelled,
    Consumed,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventStatus::Pending => "pending",
            EventStatus::Triggered => "triggered",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Consumed => "consumed",
        };
        f.write_str(s)
    }
}

// ── Outcome ───────────────────────────────────────────────────────────

/// The value an event resolves with.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<V> {
    /// A timeout elapsed.
    Elapsed,
    /// A get request received an item.
    Item(V),
    /// A put request stored its item.
    Stored,
    /// A combined wait resolved; `winner` is the child that won the race.
    First {
        winner: EventId,
        outcome: Box<Outcome<V>>,
    },
}

impl<V> Outcome<V> {
    /// Extract the item of a get, looking through combined waits.
    pub fn into_item(self) -> Option<V> {
        match self {
            Outcome::Item(item) => Some(item),
            Outcome::First { outcome, .. } => outcome.into_item(),
            Outcome::Elapsed | Outcome::Stored => None,
        }
    }

    /// The child that won, for a combined wait.
    pub fn winner(&self) -> Option<EventId> {
        match self {
            Outcome::First { winner, .. } => Some(*winner),
            _ => None,
        }
    }
}

/// What a triggered event carries until it is consumed.
#[derive(Debug)]
pub(crate) enum Payload<V> {
    Start,
    Resolved(Outcome<V>),
    Interrupt(V),
}

// ── Event Record ──────────────────────────────────────────────────────

/// Arena slot for a single event.
pub(crate) struct EventRecord<V> {
    pub kind: EventKind,
    pub status: EventStatus,
    /// Deadline of a timeout, or the instant the event was last queued
    /// for dispatch. Creation time until then.
    pub due: SimTime,
    /// Process suspended on this event, if any.
    pub owner: Option<ProcessId>,
    /// Combined wait this event is racing in, if any.
    pub parent: Option<EventId>,
    /// Children of a combined wait, in the order they were listed.
    pub children: Vec<EventId>,
    pub tie_break: Option<TieBreak>,
    pub payload: Option<Payload<V>>,
    /// Arrival number of the item a triggered get (or a combined wait won
    /// by one) holds; used to put the item back in place if it is retracted.
    pub taken: Option<u64>,
    /// Global resolution order, set when the event triggers.
    pub resolved_seq: Option<u64>,
    /// Whether the scheduler holds a live entry for this event.
    pub queued: bool,
}

impl<V> EventRecord<V> {
    pub fn new(kind: EventKind, created: SimTime) -> Self {
        EventRecord {
            kind,
            status: EventStatus::Pending,
            due: created,
            owner: None,
            parent: None,
            children: Vec::new(),
            tie_break: None,
            payload: None,
            taken: None,
            resolved_seq: None,
            queued: false,
        }
    }

    /// `Pending → Triggered`.
    pub fn trigger(&mut self, id: EventId, payload: Payload<V>, seq: u64) -> SimResult<()> {
        if self.status != EventStatus::Pending {
            return Err(SimError::DoubleResolution { event: id });
        }
        self.status = EventStatus::Triggered;
        self.payload = Some(payload);
        self.resolved_seq = Some(seq);
        Ok(())
    }

    /// `Triggered → Consumed`, handing the payload over.
    pub fn consume(&mut self, id: EventId) -> SimResult<Payload<V>> {
        if self.status != EventStatus::Triggered {
            return Err(SimError::DoubleResolution { event: id });
        }
        self.status = EventStatus::Consumed;
        self.taken = None;
        self.payload
            .take()
            .ok_or(SimError::DoubleResolution { event: id })
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, EventStatus::Pending | EventStatus::Triggered)
    }
}
