//! Combined waits and cancellation.
//!
//! A combined wait (`any_of`) races several events and resolves with the
//! first of them. The race is decided when the combined wait is
//! dispatched: every child triggered by then is a candidate, and the
//! [`TieBreak`] picks one. All other children are abandoned. Pending ones
//! are cancelled, triggered ones are retracted, and a retracted get puts
//! its item back where it was in the store.

use tracing::{debug, trace};

use crate::error::{SimError, SimResult};
use crate::event::{EventId, EventKind, EventStatus, Outcome, Payload};
use crate::simulation::Simulation;

// ── Tie-break ─────────────────────────────────────────────────────────

/// Chooses the winner among children that are ready at decision time.
#[derive(Default)]
pub enum TieBreak {
    /// The child listed first.
    #[default]
    ListOrder,
    /// The child that triggered first.
    ResolutionOrder,
    /// Caller-defined: receives the ready children in list order and
    /// returns the index of the winner. Out-of-range picks fall back to
    /// the first ready child.
    Custom(Box<dyn Fn(&[EventId]) -> usize>),
}

impl TieBreak {
    pub fn custom<F>(pick: F) -> Self
    where
        F: Fn(&[EventId]) -> usize + 'static,
    {
        TieBreak::Custom(Box::new(pick))
    }

    /// Pick from `ready` (non-empty, in list order). `resolved` gives each
    /// child's position in global resolution order.
    pub(crate) fn choose<F>(&self, ready: &[EventId], resolved: F) -> Option<EventId>
    where
        F: Fn(EventId) -> u64,
    {
        match self {
            TieBreak::ListOrder => ready.first().copied(),
            TieBreak::ResolutionOrder => ready.iter().copied().min_by_key(|&e| resolved(e)),
            TieBreak::Custom(pick) => ready
                .get(pick(ready))
                .or_else(|| ready.first())
                .copied(),
        }
    }
}

impl std::fmt::Debug for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TieBreak::ListOrder => f.write_str("ListOrder"),
            TieBreak::ResolutionOrder => f.write_str("ResolutionOrder"),
            TieBreak::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// ── Combined wait ─────────────────────────────────────────────────────

impl<V> Simulation<V> {
    /// Create an event that resolves with the first of `events`.
    ///
    /// Children must be live, not waited on by a process, not already in
    /// another combined wait, and not combined waits themselves. Once
    /// listed here they can only be observed through the combined wait.
    pub fn any_of(&mut self, events: &[EventId], tie_break: TieBreak) -> SimResult<EventId> {
        if events.is_empty() {
            return Err(SimError::EmptyAnyOf);
        }
        for (i, &child) in events.iter().enumerate() {
            let rec = self.record(child)?;
            let refuse = |reason| SimError::InvalidAnyOf {
                event: child,
                reason,
            };
            if !rec.is_live() {
                return Err(refuse("it was already cancelled or consumed"));
            }
            if rec.owner.is_some() {
                return Err(refuse("a process is waiting on it"));
            }
            if rec.parent.is_some() {
                return Err(refuse("it already races in a combined wait"));
            }
            match rec.kind {
                EventKind::Start | EventKind::Interrupt => {
                    return Err(refuse("it is internal to the kernel"))
                }
                EventKind::AnyOf => return Err(refuse("combined waits do not nest")),
                _ => {}
            }
            if events[..i].contains(&child) {
                return Err(refuse("it is listed twice"));
            }
        }

        let id = self.new_event(EventKind::AnyOf);
        for &child in events {
            self.events[child.index()].parent = Some(id);
        }
        let rec = &mut self.events[id.index()];
        rec.children = events.to_vec();
        rec.tie_break = Some(tie_break);

        let ready = events
            .iter()
            .any(|c| self.events[c.index()].status == EventStatus::Triggered);
        if ready {
            self.enqueue_now(id);
        }
        trace!(event = %id, children = events.len(), ready, "combined wait");
        Ok(id)
    }

    /// Cancel a pending event.
    ///
    /// A cancelled get leaves its store's waiting line; a cancelled
    /// combined wait abandons all its children. Cancelling twice is a
    /// no-op. Cancelling an event that already triggered returns
    /// [`SimError::CancelAfterResolve`] and changes nothing.
    ///
    /// A process suspended on the cancelled event stays suspended until it
    /// is interrupted.
    pub fn cancel(&mut self, event: EventId) -> SimResult<()> {
        match self.record(event)?.status {
            EventStatus::Pending => {
                self.cancel_pending(event)?;
                debug!(event = %event, "cancelled");
                Ok(())
            }
            EventStatus::Cancelled => Ok(()),
            EventStatus::Triggered | EventStatus::Consumed => {
                Err(SimError::CancelAfterResolve { event })
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Decide a combined wait, if any child is ready.
    pub(crate) fn decide_any_of(&mut self, id: EventId) -> SimResult<()> {
        // Released once the race is decided.
        let rec = &mut self.events[id.index()];
        let children = std::mem::take(&mut rec.children);
        let tie_break = rec.tie_break.take();
        let ready: Vec<EventId> = children
            .iter()
            .copied()
            .filter(|c| self.events[c.index()].status == EventStatus::Triggered)
            .collect();

        let winner = match tie_break.as_ref() {
            Some(tie) => tie.choose(&ready, |c| {
                self.events[c.index()].resolved_seq.unwrap_or(u64::MAX)
            }),
            None => ready.first().copied(),
        };
        let Some(winner) = winner else {
            let rec = &mut self.events[id.index()];
            rec.children = children;
            rec.tie_break = tie_break;
            return Ok(());
        };

        let losers: Vec<EventId> = children.into_iter().filter(|&c| c != winner).collect();
        self.abandon_all(&losers)?;

        let taken = self.events[winner.index()].taken;
        let outcome = match self.events[winner.index()].consume(winner)? {
            Payload::Resolved(outcome) => outcome,
            Payload::Start | Payload::Interrupt(_) => {
                return Err(SimError::InvalidAnyOf {
                    event: winner,
                    reason: "it is internal to the kernel",
                })
            }
        };

        let seq = self.next_resolution();
        let rec = &mut self.events[id.index()];
        rec.trigger(
            id,
            Payload::Resolved(Outcome::First {
                winner,
                outcome: Box::new(outcome),
            }),
            seq,
        )?;
        rec.taken = taken;
        debug!(event = %id, winner = %winner, ready = ready.len(), "combined wait decided");
        Ok(())
    }

    /// Withdraw `events` from whatever they were waiting for.
    ///
    /// Pending events are cancelled before any triggered one is retracted,
    /// so an item put back by a retraction cannot land in a request that is
    /// itself being abandoned.
    pub(crate) fn abandon_all(&mut self, events: &[EventId]) -> SimResult<()> {
        for &e in events {
            if self.events[e.index()].status == EventStatus::Pending {
                self.cancel_pending(e)?;
            }
        }
        for &e in events {
            if self.events[e.index()].status == EventStatus::Triggered {
                self.retract(e)?;
            }
        }
        Ok(())
    }

    fn cancel_pending(&mut self, event: EventId) -> SimResult<()> {
        let rec = &mut self.events[event.index()];
        rec.status = EventStatus::Cancelled;
        match rec.kind {
            EventKind::Get(store) => {
                self.stores[store.index()].remove_getter(event);
            }
            EventKind::AnyOf => {
                let children = std::mem::take(&mut rec.children);
                rec.tie_break = None;
                self.abandon_all(&children)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Consume a triggered event without delivering it. An item it holds
    /// goes back into its store at its original arrival position.
    fn retract(&mut self, event: EventId) -> SimResult<()> {
        let rec = &mut self.events[event.index()];
        let kind = rec.kind;
        let taken = rec.taken;
        let Payload::Resolved(outcome) = rec.consume(event)? else {
            return Ok(());
        };

        let store = match kind {
            EventKind::Get(store) => Some(store),
            EventKind::AnyOf => outcome.winner().and_then(|w| match self.events[w.index()].kind {
                EventKind::Get(store) => Some(store),
                _ => None,
            }),
            _ => None,
        };
        if let (Some(store), Some(arrival), Some(item)) = (store, taken, outcome.into_item()) {
            self.stores[store.index()].restore(arrival, item);
            debug!(event = %event, store = %store, arrival, "item retracted");
            self.feed_getters(store)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Step, Wake};
    use crate::store::{StoreId, StorePolicy};
    use crate::time::SimTime;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct Race {
        children: Vec<EventId>,
        winner: Option<EventId>,
        item: Option<u32>,
        wakes: usize,
    }

    /// Spawn a process that races a get on `a` against a get on `b`, and a
    /// feeder that then puts `20` into `b` followed by `10` into `a`.
    fn race_two_gets(tie: TieBreak) -> (Simulation<u32>, StoreId, StoreId, Rc<RefCell<Race>>) {
        let mut sim: Simulation<u32> = Simulation::default();
        let a = sim.add_store("a", StorePolicy::fifo());
        let b = sim.add_store("b", StorePolicy::fifo());
        let race = Rc::new(RefCell::new(Race::default()));

        let r = race.clone();
        let mut tie = Some(tie);
        sim.spawn_fn("racer", move |ctx, wake| match wake {
            Wake::Started => {
                let ga = ctx.get(a)?;
                let gb = ctx.get(b)?;
                r.borrow_mut().children = vec![ga, gb];
                let tie = tie.take().unwrap_or_default();
                Ok(Step::Wait(ctx.any_of(&[ga, gb], tie)?))
            }
            Wake::Resolved { outcome, .. } => {
                let mut r = r.borrow_mut();
                r.wakes += 1;
                r.winner = outcome.winner();
                r.item = outcome.into_item();
                Ok(Step::Done)
            }
            Wake::Interrupted { .. } => Ok(Step::Done),
        });
        sim.spawn_fn("feeder", move |ctx, _wake| {
            ctx.put(b, 20)?;
            ctx.put(a, 10)?;
            Ok(Step::Done)
        });
        sim.run().unwrap();
        (sim, a, b, race)
    }

    #[test]
    fn test_list_order_picks_first_listed() {
        let (sim, a, b, race) = race_two_gets(TieBreak::ListOrder);
        let race = race.borrow();

        assert_eq!(race.winner, Some(race.children[0]));
        assert_eq!(race.item, Some(10));
        assert_eq!(race.wakes, 1);
        // Loser's item is back in its store.
        assert!(sim.store(a).unwrap().is_empty());
        assert_eq!(sim.store(b).unwrap().items().collect::<Vec<_>>(), vec![&20]);
        assert_eq!(sim.event_status(race.children[1]), Some(EventStatus::Consumed));
    }

    #[test]
    fn test_decided_race_releases_children() {
        let (sim, _a, _b, race) = race_two_gets(TieBreak::custom(|_| 0));
        let race = race.borrow();
        let any = sim.events[race.children[1].index()]
            .parent
            .unwrap();

        assert_eq!(sim.event_status(any), Some(EventStatus::Consumed));
        assert!(sim.events[any.index()].children.is_empty());
        assert!(sim.events[any.index()].tie_break.is_none());
    }

    #[test]
    fn test_resolution_order_picks_first_triggered() {
        let (sim, a, b, race) = race_two_gets(TieBreak::ResolutionOrder);
        let race = race.borrow();

        assert_eq!(race.winner, Some(race.children[1]));
        assert_eq!(race.item, Some(20));
        assert_eq!(sim.store(a).unwrap().items().collect::<Vec<_>>(), vec![&10]);
        assert!(sim.store(b).unwrap().is_empty());
    }

    #[test]
    fn test_custom_tie_break() {
        let (_sim, _a, _b, race) = race_two_gets(TieBreak::custom(|ready| ready.len() - 1));
        let race = race.borrow();
        assert_eq!(race.winner, Some(race.children[1]));
    }

    #[test]
    fn test_pending_loser_is_cancelled() {
        let mut sim: Simulation<u32> = Simulation::default();
        let a = sim.add_store("a", StorePolicy::fifo());
        let race = Rc::new(RefCell::new(Race::default()));

        let r = race.clone();
        sim.spawn_fn("racer", move |ctx, wake| match wake {
            Wake::Started => {
                let get = ctx.get(a)?;
                let timeout = ctx.schedule_timeout(5.0)?;
                r.borrow_mut().children = vec![get, timeout];
                Ok(Step::Wait(ctx.any_of(&[get, timeout], TieBreak::ListOrder)?))
            }
            Wake::Resolved { outcome, .. } => {
                let mut r = r.borrow_mut();
                r.wakes += 1;
                r.winner = outcome.winner();
                r.item = outcome.into_item();
                Ok(Step::Done)
            }
            Wake::Interrupted { .. } => Ok(Step::Done),
        });
        let mut fed = false;
        sim.spawn_fn("feeder", move |ctx, _wake| {
            if fed {
                ctx.put(a, 3)?;
                return Ok(Step::Done);
            }
            fed = true;
            Ok(Step::Wait(ctx.schedule_timeout(2.0)?))
        });
        sim.run().unwrap();

        let race = race.borrow();
        assert_eq!(race.winner, Some(race.children[0]));
        assert_eq!(race.item, Some(3));
        assert_eq!(race.wakes, 1);
        assert_eq!(sim.event_status(race.children[1]), Some(EventStatus::Cancelled));
    }

    #[test]
    fn test_losing_get_leaves_waiting_line() {
        let mut sim: Simulation<u32> = Simulation::default();
        let a = sim.add_store("a", StorePolicy::fifo());

        let get = sim.get(a).unwrap();
        let timeout = sim.schedule_timeout(1.0).unwrap();
        let any = sim.any_of(&[get, timeout], TieBreak::ListOrder).unwrap();
        assert_eq!(sim.store(a).unwrap().waiting(), 1);

        sim.run().unwrap();
        assert_eq!(sim.event_status(any), Some(EventStatus::Triggered));
        assert_eq!(sim.event_status(get), Some(EventStatus::Cancelled));
        assert_eq!(sim.store(a).unwrap().waiting(), 0);

        // A later item stays in the store instead of reaching the dead get.
        sim.put(a, 9).unwrap();
        assert_eq!(sim.store(a).unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_semantics() {
        let mut sim: Simulation<u32> = Simulation::default();
        let a = sim.add_store("a", StorePolicy::fifo());

        let get = sim.get(a).unwrap();
        sim.cancel(get).unwrap();
        assert_eq!(sim.event_status(get), Some(EventStatus::Cancelled));
        assert_eq!(sim.store(a).unwrap().waiting(), 0);
        // Second cancel is a no-op.
        assert_eq!(sim.cancel(get), Ok(()));

        let put = sim.put(a, 1).unwrap();
        assert_eq!(sim.cancel(put), Err(SimError::CancelAfterResolve { event: put }));
        assert_eq!(sim.store(a).unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_timeout_is_skipped() {
        let mut sim: Simulation<u32> = Simulation::default();
        let timeout = sim.schedule_timeout(3.0).unwrap();
        sim.cancel(timeout).unwrap();
        assert!(sim.is_finished());

        let summary = sim.run().unwrap();
        assert_eq!(summary.dispatched, 0);
        assert_eq!(sim.now(), SimTime::ZERO);
        assert_eq!(sim.event_status(timeout), Some(EventStatus::Cancelled));
    }

    #[test]
    fn test_interrupt_returns_item_of_decided_combined_wait() {
        let mut sim: Simulation<u32> = Simulation::default();
        let a = sim.add_store("a", StorePolicy::fifo());
        sim.put(a, 5).unwrap();
        let get = sim.get(a).unwrap();
        let timeout = sim.schedule_timeout(10.0).unwrap();
        let any = sim.any_of(&[get, timeout], TieBreak::ListOrder).unwrap();

        // Decided with nobody waiting: parked, holding the item.
        sim.run().unwrap();
        assert_eq!(sim.event_status(any), Some(EventStatus::Triggered));
        assert_eq!(sim.event_status(timeout), Some(EventStatus::Cancelled));
        assert!(sim.store(a).unwrap().is_empty());

        let interrupted = Rc::new(RefCell::new(false));
        let flag = interrupted.clone();
        let waiter = sim.spawn_fn("waiter", move |_ctx, wake| match wake {
            Wake::Started => Ok(Step::Wait(any)),
            Wake::Interrupted { .. } => {
                *flag.borrow_mut() = true;
                Ok(Step::Done)
            }
            Wake::Resolved { .. } => Ok(Step::Done),
        });
        sim.run_for(1).unwrap();
        assert_eq!(sim.waiting_on(waiter), Some(any));

        sim.interrupt(waiter, 0).unwrap();
        sim.run().unwrap();

        assert!(*interrupted.borrow());
        assert_eq!(sim.event_status(any), Some(EventStatus::Consumed));
        assert_eq!(sim.store(a).unwrap().items().collect::<Vec<_>>(), vec![&5]);
    }

    #[test]
    fn test_any_of_validation() {
        let mut sim: Simulation<u32> = Simulation::default();
        let a = sim.add_store("a", StorePolicy::fifo());

        assert_eq!(sim.any_of(&[], TieBreak::ListOrder), Err(SimError::EmptyAnyOf));

        let get = sim.get(a).unwrap();
        assert!(matches!(
            sim.any_of(&[get, get], TieBreak::ListOrder),
            Err(SimError::InvalidAnyOf { reason: "it is listed twice", .. })
        ));

        let any = sim.any_of(&[get], TieBreak::ListOrder).unwrap();
        assert!(matches!(
            sim.any_of(&[get], TieBreak::ListOrder),
            Err(SimError::InvalidAnyOf { .. })
        ));
        assert!(matches!(
            sim.any_of(&[any], TieBreak::ListOrder),
            Err(SimError::InvalidAnyOf { reason: "combined waits do not nest", .. })
        ));
        assert!(matches!(
            sim.any_of(&[EventId::new(999)], TieBreak::ListOrder),
            Err(SimError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_cancel_any_of_abandons_children() {
        let mut sim: Simulation<u32> = Simulation::default();
        let a = sim.add_store("a", StorePolicy::fifo());

        let get = sim.get(a).unwrap();
        let timeout = sim.schedule_timeout(4.0).unwrap();
        let any = sim.any_of(&[get, timeout], TieBreak::ResolutionOrder).unwrap();
        sim.cancel(any).unwrap();

        assert_eq!(sim.event_status(get), Some(EventStatus::Cancelled));
        assert_eq!(sim.event_status(timeout), Some(EventStatus::Cancelled));
        assert_eq!(sim.store(a).unwrap().waiting(), 0);
    }
}
