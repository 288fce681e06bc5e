//! The handle a process body uses to act on the simulation.

use rand_chacha::ChaCha8Rng;

use crate::combinator::TieBreak;
use crate::error::SimResult;
use crate::event::{EventId, EventStatus};
use crate::process::{Process, ProcessId, ProcessStatus, Step, Wake};
use crate::simulation::Simulation;
use crate::store::{Store, StoreId};
use crate::time::SimTime;

/// Borrowed view of the simulation, handed to a process while it runs.
///
/// Everything a body does to the world (scheduling timeouts, store
/// requests, interrupts, spawning) goes through here. The body learns the
/// results of those requests only by waiting on the returned events.
pub struct SimulationContext<'a, V> {
    sim: &'a mut Simulation<V>,
    current: ProcessId,
}

impl<'a, V> SimulationContext<'a, V> {
    pub(crate) fn new(sim: &'a mut Simulation<V>, current: ProcessId) -> Self {
        SimulationContext { sim, current }
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.sim.now()
    }

    /// The process being resumed.
    pub fn current(&self) -> ProcessId {
        self.current
    }

    /// The shared deterministic random source.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        self.sim.rng()
    }

    pub fn schedule_timeout(&mut self, delay: f64) -> SimResult<EventId> {
        self.sim.schedule_timeout(delay)
    }

    pub fn put(&mut self, store: StoreId, item: V) -> SimResult<EventId> {
        self.sim.put(store, item)
    }

    pub fn get(&mut self, store: StoreId) -> SimResult<EventId> {
        self.sim.get(store)
    }

    /// Race `events`; see [`Simulation::any_of`].
    pub fn any_of(&mut self, events: &[EventId], tie_break: TieBreak) -> SimResult<EventId> {
        self.sim.any_of(events, tie_break)
    }

    pub fn cancel(&mut self, event: EventId) -> SimResult<()> {
        self.sim.cancel(event)
    }

    /// Interrupt another process. A process cannot interrupt itself: while
    /// it runs it is not suspended.
    pub fn interrupt(&mut self, target: ProcessId, cause: V) -> SimResult<EventId> {
        self.sim.interrupt(target, cause)
    }

    pub fn spawn<P>(&mut self, name: impl Into<String>, body: P) -> ProcessId
    where
        P: Process<V> + 'static,
    {
        self.sim.spawn(name, body)
    }

    pub fn spawn_fn<F>(&mut self, name: impl Into<String>, body: F) -> ProcessId
    where
        F: FnMut(&mut SimulationContext<'_, V>, Wake<V>) -> SimResult<Step> + 'static,
    {
        self.sim.spawn(name, body)
    }

    pub fn store(&self, id: StoreId) -> Option<&Store<V>> {
        self.sim.store(id)
    }

    pub fn store_mut(&mut self, id: StoreId) -> Option<&mut Store<V>> {
        self.sim.store_mut(id)
    }

    pub fn event_status(&self, id: EventId) -> Option<EventStatus> {
        self.sim.event_status(id)
    }

    pub fn process_status(&self, pid: ProcessId) -> Option<ProcessStatus> {
        self.sim.process_status(pid)
    }

    /// When `pid` last suspended, if it is suspended.
    pub fn suspended_since(&self, pid: ProcessId) -> Option<SimTime> {
        self.sim.suspended_since(pid)
    }
}
