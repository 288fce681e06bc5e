//! Interrupting suspended processes.
//!
//! An interrupt abandons whatever the target was waiting on and resumes
//! it with a cause instead. The resumption is itself an event, scheduled
//! at the current instant behind everything already due now, so the
//! interrupter always finishes its own step first.

use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::event::{EventId, EventKind, Payload};
use crate::process::{ProcessId, ProcessStatus};
use crate::simulation::Simulation;

impl<V> Simulation<V> {
    /// Interrupt `target` with `cause`.
    ///
    /// The target's pending wait is withdrawn: a pending request is
    /// cancelled, and an item already handed to it goes back into its
    /// store. The target resumes with `Wake::Interrupted { cause }`.
    ///
    /// Fails with [`SimError::InvalidInterrupt`] unless the target is
    /// suspended, and if an interrupt for it is already on its way.
    pub fn interrupt(&mut self, target: ProcessId, cause: V) -> SimResult<EventId> {
        let slot = self
            .processes
            .get(target.index())
            .ok_or(SimError::UnknownProcess(target))?;
        let refuse = |reason| SimError::InvalidInterrupt {
            process: target,
            reason,
        };
        match slot.status {
            ProcessStatus::Suspended => {}
            ProcessStatus::Runnable => {
                // A runnable process is either running right now or has a
                // start event in flight.
                return Err(match slot.waiting {
                    Some(_) => refuse("it has not started"),
                    None => refuse("it is running"),
                });
            }
            ProcessStatus::Terminated => return Err(refuse("it has terminated")),
        }
        let abandoned = slot
            .waiting
            .ok_or(refuse("it is not waiting on an event"))?;
        if self.events[abandoned.index()].kind == EventKind::Interrupt {
            return Err(refuse("an interrupt is already pending"));
        }

        self.events[abandoned.index()].owner = None;
        self.abandon_all(&[abandoned])?;

        let id = self.new_event(EventKind::Interrupt);
        self.events[id.index()].owner = Some(target);
        self.processes[target.index()].waiting = Some(id);
        self.resolve(id, Payload::Interrupt(cause))?;
        debug!(process = %target, abandoned = %abandoned, time = %self.now(), "interrupt scheduled");
        Ok(id)
    }
}
