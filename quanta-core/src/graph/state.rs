//! Atom State Table
//!
//! Per-store state for every atom the store has touched: cached outcome,
//! epoch, dependency and dependent edges, and listeners.
//!
//! # Edges
//!
//! Edges are kept in both directions. `dependencies` is the authoritative
//! record of what the last evaluation read (with the epoch it saw);
//! `dependents` is the reverse index used only to fan out invalidation.
//! The table keeps the two consistent: `b` is in `a.dependents` exactly when
//! `a` is in `b.dependencies`.
//!
//! # Outcomes
//!
//! An evaluation either succeeds, and its value is committed, or fails. A
//! failure raised by the atom's own functions is cached like a value, with
//! the reads that led to it, so it is only recomputed when one of those
//! reads changes. A failure raised by the recursion guard is not cached; the
//! entry is marked stale and re-evaluated on its next read. In both cases
//! the previous value and epoch are left alone.
//!
//! # Reachability
//!
//! Entries hold the descriptor weakly. A descriptor that has been dropped
//! everywhere can no longer be read, set or subscribed to, so its entry is
//! unreachable and [`AtomTable::collect_garbage`] removes it.

use std::any::Any;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tracing::trace;

use crate::atom::{AtomId, AtomNode};
use crate::error::{Result, StoreError};

/// A per-store tick stamped on an atom whenever its value changes.
pub type Epoch = u64;

/// Epoch recorded for a dependency whose read failed.
///
/// No successful read ever returns it, so the dependency always counts as
/// changed on the next freshness check.
pub(crate) const UNRESOLVED: Epoch = Epoch::MAX;

/// Identifier of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A type-erased listener callback.
pub(crate) type Listener = Rc<dyn Fn(&dyn Any)>;

/// The recorded reads of one evaluation, in read order.
pub(crate) type Dependencies = IndexMap<AtomId, Epoch>;

/// State of one atom within one store.
pub(crate) struct AtomState {
    /// The descriptor, held weakly.
    node: Weak<dyn AtomNode>,

    /// Result of the last successful evaluation (or the last write).
    value: Option<Rc<dyn Any>>,

    /// Error of the last evaluation, if it failed.
    error: Option<StoreError>,

    /// The last evaluation was aborted by the recursion guard.
    stale: bool,

    /// Stamped whenever `value` changes.
    epoch: Epoch,

    /// Write generation at which the outcome was last known to be fresh.
    validated_at: u64,

    /// Epoch whose value listeners were last handed.
    notified: Epoch,

    /// Atoms read by the last evaluation, with the epoch each had.
    dependencies: Dependencies,

    /// Atoms whose last evaluation read this one.
    dependents: IndexSet<AtomId>,

    /// Subscribed callbacks.
    listeners: IndexMap<ListenerId, Listener>,
}

impl AtomState {
    fn new(node: &Rc<dyn AtomNode>) -> Self {
        Self {
            node: Rc::downgrade(node),
            value: None,
            error: None,
            stale: false,
            epoch: 0,
            validated_at: 0,
            notified: 0,
            dependencies: IndexMap::new(),
            dependents: IndexSet::new(),
            listeners: IndexMap::new(),
        }
    }

    /// Upgrade the weak descriptor handle.
    pub fn node(&self) -> Option<Rc<dyn AtomNode>> {
        self.node.upgrade()
    }

    /// Whether the descriptor is still alive somewhere.
    pub fn is_reachable(&self) -> bool {
        self.node.strong_count() > 0
    }

    /// The cached outcome of the last evaluation.
    ///
    /// `None` when there is nothing usable: the atom was never evaluated, or
    /// its last evaluation was aborted by the recursion guard.
    pub fn outcome(&self) -> Option<Result<(Rc<dyn Any>, Epoch)>> {
        if self.stale {
            return None;
        }
        if let Some(error) = &self.error {
            return Some(Err(error.clone()));
        }
        self.value
            .as_ref()
            .map(|value| Ok((Rc::clone(value), self.epoch)))
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn validated_at(&self) -> u64 {
        self.validated_at
    }

    pub fn notified(&self) -> Epoch {
        self.notified
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn dependents(&self) -> &IndexSet<AtomId> {
        &self.dependents
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub fn listener_ids(&self) -> impl Iterator<Item = ListenerId> + '_ {
        self.listeners.keys().copied()
    }

    pub fn listener(&self, id: ListenerId) -> Option<Listener> {
        self.listeners.get(&id).cloned()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// The atom state table of one store.
pub(crate) struct AtomTable {
    /// All atom states, indexed by atom ID.
    states: HashMap<AtomId, AtomState>,

    /// Source of epochs. Only ever increases.
    clock: Epoch,

    /// Bumped on every primitive value change.
    generation: u64,
}

impl AtomTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            clock: 0,
            generation: 0,
        }
    }

    pub fn get(&self, id: AtomId) -> Option<&AtomState> {
        self.states.get(&id)
    }

    /// The current write generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of atoms with state in this table.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    fn entry(&mut self, node: &Rc<dyn AtomNode>) -> &mut AtomState {
        self.states
            .entry(node.id())
            .or_insert_with(|| AtomState::new(node))
    }

    /// Make sure the atom has an entry, so edges to it can be recorded.
    pub fn touch(&mut self, node: &Rc<dyn AtomNode>) {
        self.entry(node);
    }

    /// Record that a cached outcome was confirmed fresh without recomputing.
    pub fn mark_validated(&mut self, id: AtomId) {
        let generation = self.generation;
        if let Some(state) = self.states.get_mut(&id) {
            state.validated_at = generation;
        }
    }

    /// Record the epoch whose value is being handed to listeners.
    pub fn mark_notified(&mut self, id: AtomId, epoch: Epoch) {
        if let Some(state) = self.states.get_mut(&id) {
            state.notified = epoch;
        }
    }

    /// Store the outcome of a successful evaluation.
    ///
    /// The atom's dependencies are replaced wholesale by `dependencies`. The
    /// epoch only moves when the value actually differs from the cached one.
    ///
    /// Returns the cached value and its epoch.
    pub fn commit(
        &mut self,
        node: &Rc<dyn AtomNode>,
        value: Rc<dyn Any>,
        dependencies: Dependencies,
    ) -> (Rc<dyn Any>, Epoch) {
        let id = node.id();
        let generation = self.generation;
        let state = self
            .states
            .entry(id)
            .or_insert_with(|| AtomState::new(node));

        let current = match state.value.take() {
            Some(previous) if node.same_value(previous.as_ref(), value.as_ref()) => previous,
            _ => {
                self.clock += 1;
                state.epoch = self.clock;
                value
            }
        };
        state.value = Some(Rc::clone(&current));
        state.error = None;
        state.stale = false;
        state.validated_at = generation;
        let epoch = state.epoch;

        let (added, removed) = self.relink(id, dependencies, false);
        trace!(atom = %node.label(), epoch, added, removed, "committed evaluation");

        (current, epoch)
    }

    /// Store the outcome of a failed evaluation.
    ///
    /// Value and epoch are kept. The reads made before the failure become
    /// the atom's dependencies, so a change to any of them reaches it. After
    /// a guard error the previous edges are kept as well, since the
    /// evaluation never got to make all of its reads.
    pub fn record_failure(
        &mut self,
        node: &Rc<dyn AtomNode>,
        dependencies: Dependencies,
        error: &StoreError,
    ) {
        let id = node.id();
        let generation = self.generation;
        let guard = error.is_guard();

        let state = self.entry(node);
        if guard {
            state.error = None;
            state.stale = true;
        } else {
            state.error = Some(error.clone());
            state.stale = false;
            state.validated_at = generation;
        }

        let (added, removed) = self.relink(id, dependencies, guard);
        trace!(atom = %node.label(), guard, added, removed, "recorded failed evaluation");
    }

    /// Replace an atom's dependencies and fix up the reverse edges.
    ///
    /// Returns how many edges were added and removed.
    fn relink(
        &mut self,
        id: AtomId,
        mut dependencies: Dependencies,
        keep_previous: bool,
    ) -> (usize, usize) {
        // An atom never depends on itself; such a read is always a cycle.
        dependencies.shift_remove(&id);

        let Some(state) = self.states.get_mut(&id) else {
            return (0, 0);
        };
        let previous = std::mem::take(&mut state.dependencies);
        if keep_previous {
            for (dep, epoch) in &previous {
                dependencies.entry(*dep).or_insert(*epoch);
            }
        }
        state.dependencies = dependencies;

        let added: SmallVec<[AtomId; 8]> = state
            .dependencies
            .keys()
            .filter(|dep| !previous.contains_key(*dep))
            .copied()
            .collect();
        let removed: SmallVec<[AtomId; 8]> = previous
            .keys()
            .filter(|dep| !state.dependencies.contains_key(*dep))
            .copied()
            .collect();

        for dep in &removed {
            self.remove_dependent(*dep, id);
        }
        for dep in &added {
            if let Some(dep_state) = self.states.get_mut(dep) {
                dep_state.dependents.insert(id);
            }
        }

        (added.len(), removed.len())
    }

    /// Replace a primitive atom's value.
    ///
    /// Returns `false` (and changes nothing) when the new value equals the
    /// current one, which for an atom without state is its initial value.
    pub fn replace(&mut self, node: &Rc<dyn AtomNode>, value: Rc<dyn Any>) -> bool {
        let unchanged = match self.states.get(&node.id()).and_then(|state| state.value.as_ref()) {
            Some(previous) => node.same_value(previous.as_ref(), value.as_ref()),
            None => node
                .initial()
                .is_some_and(|initial| node.same_value(initial.as_ref(), value.as_ref())),
        };
        if unchanged {
            return false;
        }

        self.clock += 1;
        self.generation += 1;
        let (epoch, generation) = (self.clock, self.generation);

        let state = self.entry(node);
        state.value = Some(value);
        state.error = None;
        state.stale = false;
        state.epoch = epoch;
        state.validated_at = generation;
        true
    }

    /// Register a listener, creating the atom's state if needed.
    ///
    /// The first listener starts from the atom's current epoch, so it is
    /// not handed a value that changed before it subscribed.
    pub fn add_listener(&mut self, node: &Rc<dyn AtomNode>, id: ListenerId, listener: Listener) {
        let state = self.entry(node);
        if state.listeners.is_empty() {
            state.notified = state.epoch;
        }
        state.listeners.insert(id, listener);
    }

    /// Remove a listener, handing it back so the caller can drop it
    /// outside any borrow of the table.
    pub fn remove_listener(&mut self, atom: AtomId, id: ListenerId) -> Option<Listener> {
        self.states
            .get_mut(&atom)
            .and_then(|state| state.listeners.shift_remove(&id))
    }

    fn remove_dependent(&mut self, dependency: AtomId, dependent: AtomId) {
        if let Some(state) = self.states.get_mut(&dependency) {
            state.dependents.shift_remove(&dependent);
        }
    }

    /// Remove a single atom's state, unlinking all of its edges.
    pub fn remove(&mut self, id: AtomId) -> bool {
        let Some(state) = self.states.remove(&id) else {
            return false;
        };

        for dep in state.dependencies.keys() {
            self.remove_dependent(*dep, id);
        }
        for dependent in &state.dependents {
            if let Some(dependent_state) = self.states.get_mut(dependent) {
                dependent_state.dependencies.shift_remove(&id);
            }
        }
        true
    }

    /// Remove every entry whose descriptor has been dropped.
    ///
    /// Returns the number of entries removed.
    pub fn collect_garbage(&mut self) -> usize {
        let unreachable: Vec<AtomId> = self
            .states
            .iter()
            .filter(|(_, state)| !state.is_reachable())
            .map(|(id, _)| *id)
            .collect();

        for id in &unreachable {
            self.remove(*id);
        }
        unreachable.len()
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}
