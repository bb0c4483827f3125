//! Store
//!
//! A [`Store`] holds the state of atoms: cached values, dependency edges
//! and listeners. Atoms are only definitions; the same atom read through two
//! stores has two independent values.
//!
//! # How It Works
//!
//! 1. `get` looks up the atom's cached value. If nothing was written since
//!    it was last validated, the cache is returned as is. Otherwise each
//!    recorded dependency is refreshed and its epoch compared with the one
//!    seen last time; only if one moved is `read` run again.
//!
//! 2. `set` runs the atom's write function. Writes to primitive atoms
//!    replace their value and are collected into the current batch; nested
//!    sets issued by write functions join the same batch.
//!
//! 3. When the outermost `set` returns, one propagation pass walks the
//!    dependents of everything that changed, recomputes the atoms someone is
//!    listening to in topological order, and notifies each changed atom's
//!    listeners once.
//!
//! # Threading
//!
//! Stores are single-threaded (`!Send`). Reads, writes and notifications
//! are synchronous; user code may call back into the store freely because
//! no internal borrow is held while it runs.

mod context;
mod evaluate;
mod propagate;
mod subscription;

pub use context::{Getter, Setter};
pub use subscription::Subscription;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use tracing::debug;

use crate::atom::{Atom, AtomId};
use crate::config::{GcPolicy, StoreConfig};
use crate::error::{Result, StoreError};
use crate::graph::{AtomTable, Listener, ListenerId};

use context::BatchGuard;

/// Shared state behind a [`Store`] handle.
pub(crate) struct StoreInner {
    config: StoreConfig,

    /// The atom state table.
    table: RefCell<AtomTable>,

    /// Atoms currently being evaluated, innermost last.
    evaluating: RefCell<Vec<AtomId>>,

    /// Nesting depth of `set` calls.
    batch_depth: Cell<usize>,

    /// Primitive atoms changed in the current batch, in write order.
    changed: RefCell<IndexSet<AtomId>>,

    /// Counter for listener IDs.
    next_listener: Cell<u64>,
}

/// An isolated atom store.
///
/// Cloning a `Store` yields another handle to the same state. Dropping the
/// last handle discards all of it.
///
/// # Example
///
/// ```rust,ignore
/// let store = Store::new();
/// let count = Atom::new(0);
///
/// store.set(&count, 5)?;
/// assert_eq!(store.get(&count)?, 5);
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store with the given configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                config,
                table: RefCell::new(AtomTable::new()),
                evaluating: RefCell::new(Vec::new()),
                batch_depth: Cell::new(0),
                changed: RefCell::new(IndexSet::new()),
                next_listener: Cell::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<StoreInner>) -> Self {
        Self { inner }
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Read an atom's current value.
    ///
    /// Fails with [`StoreError::Unreadable`] for write-only atoms, and with
    /// whatever error the atom's `read` (or one of its dependencies) raised.
    /// A failed read leaves the previously cached value in place.
    pub fn get<V, A, R>(&self, atom: &Atom<V, A, R>) -> Result<V>
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        let (value, _) = self.read_node(&atom.node())?;
        context::downcast(&value, || atom.display_label())
    }

    /// Write to an atom.
    ///
    /// Runs the atom's write function with `args`. Every primitive value
    /// changed by it, directly or through nested sets, is propagated in one
    /// pass once the outermost `set` completes.
    ///
    /// Errors:
    /// - [`StoreError::Unwritable`] if the atom has no write function.
    /// - Any error the write function returns. Writes it made before failing
    ///   are kept and propagated.
    /// - [`StoreError::Listeners`] if listeners panicked during the pass.
    pub fn set<V, A, R>(&self, atom: &Atom<V, A, R>, args: A) -> Result<R>
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        let write = atom
            .write_fn()
            .ok_or_else(|| StoreError::Unwritable(atom.display_label()))?;

        let batch = BatchGuard::enter(&self.inner);
        let outermost = batch.is_outermost();

        let result = {
            let getter = Getter::untracked(self);
            let setter = Setter::new(self);
            write(&getter, &setter, args)
        };
        drop(batch);

        if !outermost {
            return result;
        }

        let pass = self.flush();
        let value = result?;
        pass?;
        Ok(value)
    }

    /// Read-modify-write an atom whose write argument is its value type.
    ///
    /// ```rust,ignore
    /// store.update(&count, |c| c + 1)?;
    /// ```
    pub fn update<V, R, F>(&self, atom: &Atom<V, V, R>, f: F) -> Result<R>
    where
        V: Clone + PartialEq + 'static,
        R: 'static,
        F: FnOnce(&V) -> V,
    {
        let current = self.get(atom)?;
        self.set(atom, f(&current))
    }

    /// Register a callback invoked with the atom's new value whenever a
    /// write changes it.
    ///
    /// Nothing is delivered for the current value. Readable atoms are
    /// evaluated once if they never were, so that their dependencies are
    /// known and later writes reach them; that evaluation does not notify.
    ///
    /// The returned [`Subscription`] unsubscribes when dropped.
    pub fn subscribe<V, A, R, F>(&self, atom: &Atom<V, A, R>, callback: F) -> Result<Subscription>
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
        F: Fn(&V) + 'static,
    {
        let node = atom.node();
        if atom.is_readable() {
            self.read_node(&node)?;
        }

        let listener: Listener = Rc::new(move |value: &dyn Any| {
            if let Some(value) = value.downcast_ref::<V>() {
                callback(value);
            }
        });

        let id = ListenerId::from_raw(self.inner.next_listener.get());
        self.inner.next_listener.set(id.raw() + 1);
        self.inner.table.borrow_mut().add_listener(&node, id, listener);

        debug!(atom = %atom.display_label(), listener = id.raw(), "subscribed");
        Ok(Subscription::new(Rc::downgrade(&self.inner), node, id))
    }

    /// Remove state of atoms whose descriptors have been dropped.
    ///
    /// Returns the number of entries removed. Runs automatically under
    /// [`GcPolicy::Eager`].
    pub fn collect_garbage(&self) -> usize {
        let removed = self.inner.table.borrow_mut().collect_garbage();
        if removed > 0 {
            debug!(removed, "collected unreachable atom state");
        }
        removed
    }

    fn collect_garbage_if_eager(&self) {
        if self.inner.config.gc == GcPolicy::Eager {
            self.collect_garbage();
        }
    }

    /// Number of atoms with state in this store.
    pub fn atom_count(&self) -> usize {
        self.inner.table.borrow().len()
    }

    /// Whether this store has state for the atom.
    pub fn has_state<V, A, R>(&self, atom: &Atom<V, A, R>) -> bool
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        self.inner.table.borrow().get(atom.id()).is_some()
    }

    /// Number of atoms the atom's last evaluation read.
    pub fn dependency_count<V, A, R>(&self, atom: &Atom<V, A, R>) -> usize
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        self.inner
            .table
            .borrow()
            .get(atom.id())
            .map_or(0, |state| state.dependencies().len())
    }

    /// Number of atoms whose last evaluation read this atom.
    pub fn dependent_count<V, A, R>(&self, atom: &Atom<V, A, R>) -> usize
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        self.inner
            .table
            .borrow()
            .get(atom.id())
            .map_or(0, |state| state.dependents().len())
    }

    /// Number of callbacks subscribed to the atom.
    pub fn listener_count<V, A, R>(&self, atom: &Atom<V, A, R>) -> usize
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        self.inner
            .table
            .borrow()
            .get(atom.id())
            .map_or(0, |state| state.listener_count())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("atom_count", &self.atom_count())
            .field("config", &self.inner.config)
            .finish()
    }
}
