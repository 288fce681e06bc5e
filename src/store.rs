//! Stores: queues mediating items between producers and consumers.
//!
//! A store owns its available items and the list of get requests still
//! waiting for one. Which available item a get receives is decided by the
//! store's [`StorePolicy`]. The hand-off itself (resolving the getter's
//! event) is driven by the `Simulation`, which owns the event arena.

use std::cmp::Ordering;
use std::collections::VecDeque;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{SimError, SimResult};
use crate::event::EventId;

// ── Store ID ──────────────────────────────────────────────────────────

/// Identifies a store within one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreId(u64);

impl StoreId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        StoreId(raw)
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

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}

// ── Policy ────────────────────────────────────────────────────────────

/// Comparator used by priority stores. `Less` means "served first".
pub type PriorityFn<V> = Box<dyn Fn(&V, &V) -> Ordering>;

/// Weight function used by weighted stores.
pub type WeightFn<V> = Box<dyn Fn(&V) -> f64>;

/// How a store picks the item a get receives.
pub enum StorePolicy<V> {
    /// Earliest-arrived item first.
    Fifo,
    /// Minimum item under the comparator; ties go to the earliest arrival.
    /// The comparator is evaluated at every get, so items promoted in place
    /// through [`Store::items_mut`] are served in their new order.
    Priority(PriorityFn<V>),
    /// Random draw with probability proportional to weight, using the
    /// simulation's shared random source.
    Weighted(WeightFn<V>),
}

impl<V> StorePolicy<V> {
    pub fn fifo() -> Self {
        StorePolicy::Fifo
    }

    pub fn priority<F>(cmp: F) -> Self
    where
        F: Fn(&V, &V) -> Ordering + 'static,
    {
        StorePolicy::Priority(Box::new(cmp))
    }

    /// Priority by an `Ord` key; smaller keys are served first.
    pub fn priority_by_key<K, F>(key: F) -> Self
    where
        K: Ord,
        F: Fn(&V) -> K + 'static,
    {
        StorePolicy::Priority(Box::new(move |a, b| key(a).cmp(&key(b))))
    }

    pub fn weighted<F>(weight: F) -> Self
    where
        F: Fn(&V) -> f64 + 'static,
    {
        StorePolicy::Weighted(Box::new(weight))
    }

    fn name(&self) -> &'static str {
        match self {
            StorePolicy::Fifo => "fifo",
            StorePolicy::Priority(_) => "priority",
            StorePolicy::Weighted(_) => "weighted",
        }
    }
}

impl<V> std::fmt::Debug for StorePolicy<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn check_weight(weight: f64) -> SimResult<f64> {
    if weight.is_finite() && weight > 0.0 {
        Ok(weight)
    } else {
        Err(SimError::InvalidWeight { weight })
    }
}

// ── Store ─────────────────────────────────────────────────────────────

/// An item together with its arrival number in the store.
#[derive(Debug)]
pub(crate) struct Queued<V> {
    pub arrival: u64,
    pub item: V,
}

/// A queue of items plus the get requests waiting on it.
///
/// Under correct operation at least one of the two is empty between
/// dispatch steps: an item is handed to a waiting getter as soon as both
/// exist.
pub struct Store<V> {
    id: StoreId,
    name: String,
    policy: StorePolicy<V>,
    /// Available items, kept sorted by arrival number.
    items: VecDeque<Queued<V>>,
    /// Pending get requests, longest-waiting first.
    getters: VecDeque<EventId>,
    next_arrival: u64,
}

impl<V> Store<V> {
    pub(crate) fn new(id: StoreId, name: impl Into<String>, policy: StorePolicy<V>) -> Self {
        Store {
            id,
            name: name.into(),
            policy,
            items: VecDeque::new(),
            getters: VecDeque::new(),
            next_arrival: 0,
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &StorePolicy<V> {
        &self.policy
    }

    /// Number of available items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of get requests waiting for an item.
    pub fn waiting(&self) -> usize {
        self.getters.len()
    }

    /// Available items in arrival order.
    pub fn items(&self) -> impl Iterator<Item = &V> {
        self.items.iter().map(|q| &q.item)
    }

    /// Mutable access to available items, in arrival order.
    ///
    /// Used to promote queued work; priority and weighted stores read the
    /// updated values at the next get.
    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.items.iter_mut().map(|q| &mut q.item)
    }

    /// Remove every available item for which `keep` returns `false`.
    /// Returns the removed items in arrival order.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<V>
    where
        F: FnMut(&V) -> bool,
    {
        let mut kept = VecDeque::with_capacity(self.items.len());
        let mut removed = Vec::new();
        for queued in self.items.drain(..) {
            if keep(&queued.item) {
                kept.push_back(queued);
            } else {
                removed.push(queued.item);
            }
        }
        self.items = kept;
        removed
    }

    /// Reject items a weighted store could never draw.
    pub(crate) fn validate(&self, item: &V) -> SimResult<()> {
        if let StorePolicy::Weighted(weight) = &self.policy {
            check_weight(weight(item))?;
        }
        Ok(())
    }

    /// Append a new item. Returns its arrival number.
    pub(crate) fn push(&mut self, item: V) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.items.push_back(Queued { arrival, item });
        arrival
    }

    /// Put back an item that was handed out but never delivered, at its
    /// original arrival position.
    pub(crate) fn restore(&mut self, arrival: u64, item: V) {
        let pos = self.items.partition_point(|q| q.arrival < arrival);
        self.items.insert(pos, Queued { arrival, item });
    }

    pub(crate) fn has_match(&self) -> bool {
        !self.items.is_empty() && !self.getters.is_empty()
    }

    pub(crate) fn enqueue_getter(&mut self, event: EventId) {
        self.getters.push_back(event);
    }

    pub(crate) fn pop_getter(&mut self) -> Option<EventId> {
        self.getters.pop_front()
    }

    /// Drop a pending getter. Returns `false` if it was not waiting here.
    pub(crate) fn remove_getter(&mut self, event: EventId) -> bool {
        match self.getters.iter().position(|g| *g == event) {
            Some(pos) => {
                self.getters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove and return the item the next get receives under this store's
    /// policy, or `None` if nothing is available.
    pub(crate) fn select<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SimResult<Option<Queued<V>>> {
        if self.items.is_empty() {
            return Ok(None);
        }
        let index = match &self.policy {
            StorePolicy::Fifo => 0,
            StorePolicy::Priority(cmp) => {
                let mut best = 0;
                for (i, queued) in self.items.iter().enumerate().skip(1) {
                    // Strictly less: equal keys keep the earlier arrival.
                    if cmp(&queued.item, &self.items[best].item) == Ordering::Less {
                        best = i;
                    }
                }
                best
            }
            StorePolicy::Weighted(weight) => {
                let weights = self
                    .items
                    .iter()
                    .map(|q| check_weight(weight(&q.item)))
                    .collect::<SimResult<Vec<f64>>>()?;
                let dist = WeightedIndex::new(&weights).map_err(|_| SimError::InvalidWeight {
                    weight: weights.iter().sum(),
                })?;
                dist.sample(rng)
            }
        };
        Ok(self.items.remove(index))
    }
}

impl<V> std::fmt::Debug for Store<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("items", &self.items.len())
            .field("getters", &self.getters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[derive(Debug, Clone, PartialEq)]
    struct Ticket {
        name: &'static str,
        priority: u8,
        weight: f64,
    }

    fn ticket(name: &'static str, priority: u8, weight: f64) -> Ticket {
        Ticket { name, priority, weight }
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(12345)
    }

    fn names<V, F: Fn(&V) -> &'static str>(store: &mut Store<V>, name: F) -> Vec<&'static str> {
        let mut rng = rng();
        let mut out = Vec::new();
        while let Some(q) = store.select(&mut rng).unwrap() {
            out.push(name(&q.item));
        }
        out
    }

    #[test]
    fn test_fifo_selects_in_arrival_order() {
        let mut store = Store::new(StoreId::new(0), "code", StorePolicy::fifo());
        store.push("a");
        store.push("b");
        store.push("c");
        assert_eq!(names(&mut store, |s| *s), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_priority_selects_minimum_then_arrival() {
        let mut store = Store::new(
            StoreId::new(0),
            "triage",
            StorePolicy::priority_by_key(|t: &Ticket| t.priority),
        );
        store.push(ticket("low-1", 2, 1.0));
        store.push(ticket("high-1", 0, 1.0));
        store.push(ticket("low-2", 2, 1.0));
        store.push(ticket("high-2", 0, 1.0));

        assert_eq!(
            names(&mut store, |t| t.name),
            vec!["high-1", "high-2", "low-1", "low-2"]
        );
    }

    #[test]
    fn test_priority_promotion_in_place() {
        let mut store = Store::new(
            StoreId::new(0),
            "triage",
            StorePolicy::priority_by_key(|t: &Ticket| t.priority),
        );
        store.push(ticket("a", 1, 1.0));
        store.push(ticket("b", 1, 1.0));
        store.push(ticket("c", 1, 1.0));

        for t in store.items_mut() {
            if t.name == "c" {
                t.priority = 0;
            }
        }

        assert_eq!(names(&mut store, |t| t.name), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_restore_keeps_arrival_position() {
        let mut store = Store::new(StoreId::new(0), "code", StorePolicy::fifo());
        store.push("a");
        store.push("b");
        store.push("c");

        let mut rng = rng();
        let first = store.select(&mut rng).unwrap().unwrap();
        assert_eq!(first.item, "a");
        store.restore(first.arrival, first.item);

        assert_eq!(store.items().copied().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_weighted_rejects_non_positive_weight() {
        let store = Store::new(
            StoreId::new(0),
            "weighted",
            StorePolicy::weighted(|t: &Ticket| t.weight),
        );
        assert_eq!(
            store.validate(&ticket("zero", 0, 0.0)),
            Err(SimError::InvalidWeight { weight: 0.0 })
        );
        assert!(store.validate(&ticket("neg", 0, -2.0)).is_err());
        assert!(store.validate(&ticket("nan", 0, f64::NAN)).is_err());
        assert!(store.validate(&ticket("ok", 0, 0.5)).is_ok());
    }

    #[test]
    fn test_weighted_draw_frequency() {
        let mut store = Store::new(
            StoreId::new(0),
            "weighted",
            StorePolicy::weighted(|t: &Ticket| t.weight),
        );
        store.push(ticket("light", 0, 1.0));
        store.push(ticket("heavy", 0, 3.0));

        let mut rng = rng();
        let draws = 20_000;
        let mut heavy = 0;
        for _ in 0..draws {
            let q = store.select(&mut rng).unwrap().unwrap();
            if q.item.name == "heavy" {
                heavy += 1;
            }
            store.restore(q.arrival, q.item);
        }

        let freq = heavy as f64 / draws as f64;
        assert!((freq - 0.75).abs() < 0.02, "heavy drawn {}", freq);
    }

    #[test]
    fn test_weighted_detects_mutated_weight() {
        let mut store = Store::new(
            StoreId::new(0),
            "weighted",
            StorePolicy::weighted(|t: &Ticket| t.weight),
        );
        store.push(ticket("a", 0, 1.0));
        for t in store.items_mut() {
            t.weight = 0.0;
        }
        assert!(store.select(&mut rng()).is_err());
    }

    #[test]
    fn test_retain_returns_removed() {
        let mut store = Store::new(StoreId::new(0), "code", StorePolicy::fifo());
        for n in 1..=6u32 {
            store.push(n);
        }
        let removed = store.retain(|n| n % 2 == 0);
        assert_eq!(removed, vec![1, 3, 5]);
        assert_eq!(store.items().copied().collect::<Vec<_>>(), vec![2, 4, 6]);
    }

    #[test]
    fn test_getter_bookkeeping() {
        let mut store: Store<u32> = Store::new(StoreId::new(0), "code", StorePolicy::fifo());
        store.enqueue_getter(EventId::new(1));
        store.enqueue_getter(EventId::new(2));
        assert_eq!(store.waiting(), 2);
        assert!(!store.has_match());

        assert!(store.remove_getter(EventId::new(1)));
        assert!(!store.remove_getter(EventId::new(1)));
        store.push(9);
        assert!(store.has_match());
        assert_eq!(store.pop_getter(), Some(EventId::new(2)));
    }
}
