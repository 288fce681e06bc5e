//! Processes: resumable actors driven by the scheduler.
//!
//! A process body is an explicit state machine. Each call to
//! [`Process::resume`] runs it from one suspension point to the next and
//! returns the single event it now waits on (or [`Step::Done`]). Whatever
//! the body needs to continue correctly lives in its own fields.

use crate::context::SimulationContext;
use crate::error::SimResult;
use crate::event::{EventId, Outcome};
use crate::time::SimTime;

// ── Process ID ────────────────────────────────────────────────────────

/// Identifies a process within one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessId(u64);

impl ProcessId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        ProcessId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

// ── Status ────────────────────────────────────────────────────────────

/// Where a process is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessStatus {
    /// Spawned but not yet started, or currently executing.
    Runnable,
    /// Waiting on exactly one event.
    Suspended,
    /// Body finished.
    Terminated,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessStatus::Runnable => "runnable",
            ProcessStatus::Suspended => "suspended",
            ProcessStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

// ── Resumption ────────────────────────────────────────────────────────

/// Why a process body is being resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum Wake<V> {
    /// First resumption after spawn.
    Started,
    /// The awaited event resolved normally.
    Resolved { event: EventId, outcome: Outcome<V> },
    /// The wait was abandoned by an interrupt carrying `cause`.
    Interrupted { cause: V },
}

/// What a process body does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Suspend until the event resolves.
    Wait(EventId),
    /// The body is finished.
    Done,
}

// ── Process trait ─────────────────────────────────────────────────────

/// A resumable process body.
///
/// # Contract
///
/// Implementations **must**:
/// - Only suspend by returning [`Step::Wait`]; nothing else may block.
/// - Route all side effects on the simulation through `ctx`.
/// - Be deterministic for equal inputs; draw randomness from `ctx.rng()`.
///
/// An error returned from `resume` aborts the run and is reported to the
/// caller of `Simulation::run*`.
pub trait Process<V> {
    fn resume(&mut self, ctx: &mut SimulationContext<'_, V>, wake: Wake<V>) -> SimResult<Step>;
}

/// A body backed by a closure, useful for tests and one-off scenarios.
impl<V, F> Process<V> for F
where
    F: FnMut(&mut SimulationContext<'_, V>, Wake<V>) -> SimResult<Step>,
{
    fn resume(&mut self, ctx: &mut SimulationContext<'_, V>, wake: Wake<V>) -> SimResult<Step> {
        (self)(ctx, wake)
    }
}

// ── Arena slot ────────────────────────────────────────────────────────

pub(crate) struct ProcessSlot<V> {
    pub name: String,
    pub status: ProcessStatus,
    /// The event this process is suspended on, or its pending start.
    pub waiting: Option<EventId>,
    pub suspended_at: Option<SimTime>,
    /// Taken out while the body runs.
    pub body: Option<Box<dyn Process<V>>>,
}

impl<V> ProcessSlot<V> {
    pub fn new(name: String, body: Box<dyn Process<V>>) -> Self {
        ProcessSlot {
            name,
            status: ProcessStatus::Runnable,
            waiting: None,
            suspended_at: None,
            body: Some(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId::new(4).to_string(), "P4");
        assert_eq!(ProcessStatus::Suspended.to_string(), "suspended");
    }
}
