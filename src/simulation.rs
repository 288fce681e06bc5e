/// Simulation execution loop.
///
/// Owns the clock, the scheduler, and the arenas of events, processes and
/// stores. `step` pops the next due entry, advances the clock and
/// dispatches it; dispatching resumes the owning process synchronously,
/// and whatever that process schedules for the same instant is drained
/// before the clock moves again.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::config::SimConfig;
use crate::context::SimulationContext;
use crate::error::{SimError, SimResult};
use crate::event::{EventId, EventKind, EventRecord, EventStatus, Outcome, Payload};
use crate::eventlog::{EventLog, TraceTarget};
use crate::process::{Process, ProcessId, ProcessSlot, ProcessStatus, Step, Wake};
use crate::scheduler::Scheduler;
use crate::store::{Store, StoreId, StorePolicy};
use crate::time::SimTime;

// ── Run summary ───────────────────────────────────────────────────────

/// Why a run call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    /// The next event is due after the horizon.
    Horizon,
    /// Nothing is left to dispatch.
    Exhausted,
    /// The requested number of steps was taken.
    StepLimit,
}

/// The result of a `run*` call.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSummary {
    /// Events dispatched during this call.
    pub dispatched: u64,
    /// Clock value when the call returned.
    pub now: SimTime,
    pub stop: StopReason,
}

// ── Simulation ────────────────────────────────────────────────────────

/// Top-level simulation driver, generic over the payload type `V` carried
/// by store items and interrupt causes.
pub struct Simulation<V> {
    config: SimConfig,
    now: SimTime,
    scheduler: Scheduler,
    /// Every event ever created, indexed by `EventId`. Records are never
    /// reused, so ids stay valid for observers after a run; a finished
    /// record keeps only its fixed-size fields (payload, children and
    /// tie-break are released), so memory grows by one small record per
    /// event.
    pub(crate) events: Vec<EventRecord<V>>,
    pub(crate) processes: Vec<ProcessSlot<V>>,
    pub(crate) stores: Vec<Store<V>>,
    pub(crate) rng: ChaCha8Rng,
    resolutions: u64,
    events_processed: u64,
    log: Option<EventLog>,
}

impl<V> Simulation<V> {
    /// Create a new simulation starting at time zero.
    pub fn new(config: SimConfig) -> Self {
        let log = config.trace.then(EventLog::new);
        Simulation {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            now: SimTime::ZERO,
            scheduler: Scheduler::new(),
            events: Vec::new(),
            processes: Vec::new(),
            stores: Vec::new(),
            resolutions: 0,
            events_processed: 0,
            log,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Total events dispatched so far.
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// The shared deterministic random source.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Start recording dispatched events.
    pub fn enable_trace(&mut self) {
        if self.log.is_none() {
            self.log = Some(EventLog::new());
        }
    }

    /// The dispatch trace, if tracing is enabled.
    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    /// Returns `true` if nothing is left to dispatch.
    pub fn is_finished(&self) -> bool {
        self.scheduler
            .entries()
            .all(|entry| !self.events[entry.event.index()].is_live())
    }

    // ── Stores ────────────────────────────────────────────────────

    /// Create a store with the given selection policy.
    pub fn add_store(&mut self, name: impl Into<String>, policy: StorePolicy<V>) -> StoreId {
        let id = StoreId::new(self.stores.len() as u64);
        self.stores.push(Store::new(id, name, policy));
        id
    }

    pub fn store(&self, id: StoreId) -> Option<&Store<V>> {
        self.stores.get(id.index())
    }

    /// Mutable store access for promotion and discarding of queued items.
    pub fn store_mut(&mut self, id: StoreId) -> Option<&mut Store<V>> {
        self.stores.get_mut(id.index())
    }

    /// Add `item` to a store. The returned put event is already resolved.
    pub fn put(&mut self, store: StoreId, item: V) -> SimResult<EventId> {
        let s = self.store(store).ok_or(SimError::UnknownStore(store))?;
        s.validate(&item)?;

        let id = self.new_event(EventKind::Put(store));
        let arrival = self.stores[store.index()].push(item);
        self.resolve(id, Payload::Resolved(Outcome::Stored))?;
        trace!(event = %id, store = %store, arrival, "put");
        self.feed_getters(store)?;
        Ok(id)
    }

    /// Request an item from a store. Resolves at once if one is available,
    /// otherwise waits behind earlier getters.
    pub fn get(&mut self, store: StoreId) -> SimResult<EventId> {
        if self.store(store).is_none() {
            return Err(SimError::UnknownStore(store));
        }
        let id = self.new_event(EventKind::Get(store));
        self.stores[store.index()].enqueue_getter(id);
        self.feed_getters(store)?;
        Ok(id)
    }

    /// Create an event that fires `delay` after now.
    pub fn schedule_timeout(&mut self, delay: f64) -> SimResult<EventId> {
        let due = self
            .now
            .advance(delay)
            .ok_or(SimError::InvalidDelay { delay })?;
        let id = self.new_event(EventKind::Timeout);
        let rec = &mut self.events[id.index()];
        rec.queued = true;
        rec.due = due;
        self.scheduler.schedule(due, id);
        Ok(id)
    }

    // ── Processes ─────────────────────────────────────────────────

    /// Register a process. It first runs at the current instant, after
    /// everything already scheduled for it.
    pub fn spawn<P>(&mut self, name: impl Into<String>, body: P) -> ProcessId
    where
        P: Process<V> + 'static,
    {
        let pid = ProcessId::new(self.processes.len() as u64);
        let name = name.into();
        debug!(process = %pid, name = %name, time = %self.now, "spawn");
        self.processes.push(ProcessSlot::new(name, Box::new(body)));

        let start = self.new_event(EventKind::Start);
        self.events[start.index()].owner = Some(pid);
        self.processes[pid.index()].waiting = Some(start);
        // A fresh Start record is always pending.
        let seq = self.next_resolution();
        if self.events[start.index()].trigger(start, Payload::Start, seq).is_ok() {
            self.enqueue_now(start);
        }
        pid
    }

    /// Like [`spawn`](Self::spawn), for closure bodies.
    pub fn spawn_fn<F>(&mut self, name: impl Into<String>, body: F) -> ProcessId
    where
        F: FnMut(&mut SimulationContext<'_, V>, Wake<V>) -> SimResult<Step> + 'static,
    {
        self.spawn(name, body)
    }

    pub fn process_status(&self, pid: ProcessId) -> Option<ProcessStatus> {
        self.processes.get(pid.index()).map(|p| p.status)
    }

    pub fn process_name(&self, pid: ProcessId) -> Option<&str> {
        self.processes.get(pid.index()).map(|p| p.name.as_str())
    }

    /// The event a suspended process waits on.
    pub fn waiting_on(&self, pid: ProcessId) -> Option<EventId> {
        let slot = self.processes.get(pid.index())?;
        (slot.status == ProcessStatus::Suspended)
            .then_some(slot.waiting)
            .flatten()
    }

    /// When a suspended process last suspended.
    pub fn suspended_since(&self, pid: ProcessId) -> Option<SimTime> {
        self.processes.get(pid.index())?.suspended_at
    }

    // ── Events ────────────────────────────────────────────────────

    pub fn event_status(&self, id: EventId) -> Option<EventStatus> {
        self.events.get(id.index()).map(|e| e.status)
    }

    pub fn event_kind(&self, id: EventId) -> Option<EventKind> {
        self.events.get(id.index()).map(|e| e.kind)
    }

    /// When the event is scheduled to be dispatched: a timeout's deadline,
    /// or the instant any other event was queued. A pending get reports
    /// its creation time.
    pub fn event_due(&self, id: EventId) -> Option<SimTime> {
        self.events.get(id.index()).map(|e| e.due)
    }

    // ── Execution ─────────────────────────────────────────────────

    /// Pop and dispatch the next live event.
    ///
    /// Entries of cancelled or consumed events are discarded first and
    /// never move the clock. Returns the dispatched event, or `None` when
    /// nothing live is scheduled.
    pub fn step(&mut self) -> SimResult<Option<EventId>> {
        self.discard_dead();
        let Some(entry) = self.scheduler.pop_next() else {
            return Ok(None);
        };
        if entry.due < self.now {
            return Err(SimError::ClockRegression {
                now: self.now,
                due: entry.due,
            });
        }
        self.now = entry.due;
        self.events_processed += 1;
        self.events[entry.event.index()].queued = false;
        self.dispatch(entry.event)?;
        Ok(Some(entry.event))
    }

    /// Run until nothing is left to dispatch.
    pub fn run(&mut self) -> SimResult<RunSummary> {
        let start = self.events_processed;
        while self.step()?.is_some() {}
        Ok(self.summary(start, StopReason::Exhausted))
    }

    /// Run until the next event is due after `until`, or nothing is left.
    ///
    /// Events due exactly at `until` are dispatched. Processes still
    /// suspended at the horizon are abandoned, not failed.
    pub fn run_until(&mut self, until: f64) -> SimResult<RunSummary> {
        if !(until.is_finite() && until >= 0.0) {
            return Err(SimError::InvalidHorizon { until });
        }
        let horizon = SimTime::new(until);
        let start = self.events_processed;
        let stop = loop {
            self.discard_dead();
            match self.scheduler.peek_next() {
                None => break StopReason::Exhausted,
                Some(next) if next.due > horizon => break StopReason::Horizon,
                Some(_) => {}
            }
            self.step()?;
        };
        debug!(time = %self.now, ?stop, "run stopped");
        Ok(self.summary(start, stop))
    }

    /// Dispatch at most `max_steps` events.
    pub fn run_for(&mut self, max_steps: u64) -> SimResult<RunSummary> {
        let start = self.events_processed;
        for _ in 0..max_steps {
            if self.step()?.is_none() {
                return Ok(self.summary(start, StopReason::Exhausted));
            }
        }
        Ok(self.summary(start, StopReason::StepLimit))
    }

    fn summary(&self, start: u64, stop: StopReason) -> RunSummary {
        RunSummary {
            dispatched: self.events_processed - start,
            now: self.now,
            stop,
        }
    }

    // ── Kernel internals ──────────────────────────────────────────

    pub(crate) fn new_event(&mut self, kind: EventKind) -> EventId {
        let id = EventId::new(self.events.len() as u64);
        self.events.push(EventRecord::new(kind, self.now));
        id
    }

    pub(crate) fn record(&self, id: EventId) -> SimResult<&EventRecord<V>> {
        self.events.get(id.index()).ok_or(SimError::UnknownEvent(id))
    }

    pub(crate) fn next_resolution(&mut self) -> u64 {
        let seq = self.resolutions;
        self.resolutions += 1;
        seq
    }

    /// Schedule `id` for dispatch at the current instant, unless it already
    /// has a live scheduler entry.
    pub(crate) fn enqueue_now(&mut self, id: EventId) {
        let rec = &mut self.events[id.index()];
        if !rec.queued {
            rec.queued = true;
            rec.due = self.now;
            self.scheduler.schedule(self.now, id);
        }
    }

    /// Trigger a pending event and route it: a child of a combined wait
    /// wakes its parent, anything else is dispatched at this instant.
    pub(crate) fn resolve(&mut self, id: EventId, payload: Payload<V>) -> SimResult<()> {
        let seq = self.next_resolution();
        let rec = &mut self.events[id.index()];
        rec.trigger(id, payload, seq)?;
        match rec.parent {
            Some(parent) => self.wake_parent(parent),
            None => self.enqueue_now(id),
        }
        Ok(())
    }

    pub(crate) fn wake_parent(&mut self, parent: EventId) {
        if self.events[parent.index()].status == EventStatus::Pending {
            self.enqueue_now(parent);
        }
    }

    /// Hand available items to waiting getters, longest-waiting first,
    /// until one side runs out.
    pub(crate) fn feed_getters(&mut self, store: StoreId) -> SimResult<()> {
        let s = store.index();
        while self.stores[s].has_match() {
            let Some(queued) = self.stores[s].select(&mut self.rng)? else {
                break;
            };
            let Some(getter) = self.stores[s].pop_getter() else {
                self.stores[s].restore(queued.arrival, queued.item);
                break;
            };
            self.events[getter.index()].taken = Some(queued.arrival);
            self.resolve(getter, Payload::Resolved(Outcome::Item(queued.item)))?;
            debug!(store = %store, getter = %getter, arrival = queued.arrival, "item handed to getter");
        }
        Ok(())
    }

    /// Pop leading entries whose event was cancelled or consumed while
    /// queued.
    fn discard_dead(&mut self) {
        while let Some(next) = self.scheduler.peek_next() {
            let event = next.event;
            let rec = &mut self.events[event.index()];
            if rec.is_live() {
                break;
            }
            rec.queued = false;
            trace!(event = %event, status = %rec.status, "skip");
            self.scheduler.pop_next();
        }
    }

    fn dispatch(&mut self, id: EventId) -> SimResult<()> {
        let (kind, status) = {
            let rec = &self.events[id.index()];
            (rec.kind, rec.status)
        };
        match status {
            EventStatus::Cancelled | EventStatus::Consumed => return Ok(()),
            EventStatus::Pending => match kind {
                EventKind::Timeout => {
                    let seq = self.next_resolution();
                    self.events[id.index()].trigger(id, Payload::Resolved(Outcome::Elapsed), seq)?;
                }
                EventKind::AnyOf => self.decide_any_of(id)?,
                _ => return Ok(()),
            },
            EventStatus::Triggered => {}
        }

        let rec = &self.events[id.index()];
        if rec.status != EventStatus::Triggered {
            return Ok(());
        }
        let (parent, owner) = (rec.parent, rec.owner);
        let target = match (parent, owner) {
            (Some(p), _) => TraceTarget::Parent(p),
            (None, Some(pid)) => TraceTarget::Process(pid),
            (None, None) => TraceTarget::Parked,
        };
        trace!(event = %id, %kind, time = %self.now, ?target, "dispatch");
        if let Some(log) = self.log.as_mut() {
            log.record(self.now, id, kind, target);
        }

        match target {
            TraceTarget::Parent(p) => self.wake_parent(p),
            TraceTarget::Process(pid) => self.deliver(id, pid)?,
            // Delivered once somebody waits on it.
            TraceTarget::Parked => {}
        }
        Ok(())
    }

    fn deliver(&mut self, id: EventId, pid: ProcessId) -> SimResult<()> {
        let payload = self.events[id.index()].consume(id)?;
        let slot = &mut self.processes[pid.index()];
        slot.status = ProcessStatus::Runnable;
        slot.waiting = None;
        slot.suspended_at = None;

        let wake = match payload {
            Payload::Start => Wake::Started,
            Payload::Resolved(outcome) => Wake::Resolved { event: id, outcome },
            Payload::Interrupt(cause) => Wake::Interrupted { cause },
        };
        self.resume(pid, wake)
    }

    fn resume(&mut self, pid: ProcessId, wake: Wake<V>) -> SimResult<()> {
        let mut body = self.processes[pid.index()]
            .body
            .take()
            .ok_or(SimError::Reentrant(pid))?;
        let result = {
            let mut ctx = SimulationContext::new(self, pid);
            body.resume(&mut ctx, wake)
        };
        self.processes[pid.index()].body = Some(body);

        match result? {
            Step::Wait(event) => self.suspend(pid, event),
            Step::Done => {
                let slot = &mut self.processes[pid.index()];
                slot.status = ProcessStatus::Terminated;
                slot.body = None;
                debug!(process = %pid, time = %self.now, "terminated");
                Ok(())
            }
        }
    }

    fn suspend(&mut self, pid: ProcessId, event: EventId) -> SimResult<()> {
        let rec = self.record(event)?;
        let refuse = |reason| SimError::InvalidWait {
            process: pid,
            event,
            reason,
        };
        if !rec.is_live() {
            return Err(refuse("it was already cancelled or consumed"));
        }
        if rec.owner.is_some() {
            return Err(refuse("another process is waiting on it"));
        }
        if rec.parent.is_some() {
            return Err(refuse("it is racing in a combined wait"));
        }
        if matches!(rec.kind, EventKind::Start | EventKind::Interrupt) {
            return Err(refuse("it is internal to the kernel"));
        }
        let triggered = rec.status == EventStatus::Triggered;

        self.events[event.index()].owner = Some(pid);
        let slot = &mut self.processes[pid.index()];
        slot.status = ProcessStatus::Suspended;
        slot.waiting = Some(event);
        slot.suspended_at = Some(self.now);
        if triggered {
            self.enqueue_now(event);
        }
        Ok(())
    }
}

impl<V> Default for Simulation<V> {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}
