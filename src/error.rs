//! Structured error types for the simulation kernel.
//!
//! All fallible public APIs return `Result<T, SimError>`. Construction-time
//! misuse (a negative delay, a non-positive weight) is reported to the
//! caller synchronously; kernel invariant violations are fatal and abort
//! the run they occur in.

use thiserror::Error;

use crate::event::EventId;
use crate::process::ProcessId;
use crate::store::StoreId;
use crate::time::SimTime;

/// The top-level error type for the simulation kernel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    // ── Caller misuse ─────────────────────────────────────

    /// A timeout was requested with a negative or non-finite delay.
    #[error("invalid delay {delay}: delays must be finite and non-negative")]
    InvalidDelay { delay: f64 },

    /// A weighted store was handed an item with a non-positive weight.
    #[error("invalid weight {weight}: weights must be finite and positive")]
    InvalidWeight { weight: f64 },

    /// The interrupt target is not suspended on an event.
    #[error("cannot interrupt {process}: {reason}")]
    InvalidInterrupt {
        process: ProcessId,
        reason: &'static str,
    },

    /// `run_until` was given a negative or non-finite horizon.
    #[error("invalid horizon {until}")]
    InvalidHorizon { until: f64 },

    /// A process tried to suspend on an event it may not wait on.
    #[error("{process} cannot wait on {event}: {reason}")]
    InvalidWait {
        process: ProcessId,
        event: EventId,
        reason: &'static str,
    },

    /// An event cannot take part in a combined wait.
    #[error("{event} cannot join a combined wait: {reason}")]
    InvalidAnyOf {
        event: EventId,
        reason: &'static str,
    },

    /// A combined wait was requested over no events.
    #[error("a combined wait needs at least one event")]
    EmptyAnyOf,

    /// The referenced event does not exist.
    #[error("event {0} does not exist")]
    UnknownEvent(EventId),

    /// The referenced process does not exist.
    #[error("process {0} does not exist")]
    UnknownProcess(ProcessId),

    /// The referenced store does not exist.
    #[error("store {0} does not exist")]
    UnknownStore(StoreId),

    // ── Informational ─────────────────────────────────────

    /// Cancel was requested on an event that already resolved. Safe to ignore:
    /// a request may legitimately be cancelled just as it wins a race.
    #[error("{event} already resolved; cancel had no effect")]
    CancelAfterResolve { event: EventId },

    // ── Kernel invariant violations (fatal) ───────────────

    /// An event was resolved or consumed a second time.
    #[error("{event} resolved twice")]
    DoubleResolution { event: EventId },

    /// The scheduler produced an event earlier than the current clock.
    #[error("clock regression: now {now}, event due {due}")]
    ClockRegression { now: SimTime, due: SimTime },

    /// A process was resumed while it was already running.
    #[error("{0} resumed while already running")]
    Reentrant(ProcessId),

    // ── Process bodies ────────────────────────────────────

    /// A process body gave up for a reason of its own domain.
    #[error("{process} failed: {reason}")]
    ProcessFailed { process: ProcessId, reason: String },
}

impl SimError {
    /// Returns `true` for errors that indicate a broken kernel invariant.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimError::DoubleResolution { .. }
                | SimError::ClockRegression { .. }
                | SimError::Reentrant(_)
        )
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
