//! Evaluation Context
//!
//! The context types handed to user code, and the guards that keep the
//! store's bookkeeping balanced around it.
//!
//! # Getter
//!
//! A [`Getter`] is created per evaluation. Every atom read through it is
//! recorded together with the epoch it had, and when the evaluation
//! finishes the recorded list becomes the atom's dependency set. Because
//! the getter is an explicit parameter rather than ambient state, nested
//! evaluations each record into their own getter.
//!
//! Write functions get an untracked getter: reads inside a write do not
//! create edges.
//!
//! # Guards
//!
//! The store keeps a stack of atoms under evaluation and a batch depth for
//! nested writes. Both are maintained by drop guards, so the stack stays
//! balanced even if user code panics.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use super::{Store, StoreInner};
use crate::atom::{Atom, AtomId, AtomNode};
use crate::error::{AtomLabel, Result, StoreError};
use crate::graph::{Dependencies, Epoch, UNRESOLVED};

/// Reader passed to `read` and `write` functions.
pub struct Getter<'s> {
    store: &'s Store,
    /// Reads recorded so far, `None` for untracked getters.
    recorded: Option<RefCell<SmallVec<[(AtomId, Epoch); 4]>>>,
}

impl<'s> Getter<'s> {
    /// A getter that records every read as a dependency.
    pub(crate) fn tracking(store: &'s Store) -> Self {
        Self {
            store,
            recorded: Some(RefCell::new(SmallVec::new())),
        }
    }

    /// A getter that reads without recording.
    pub(crate) fn untracked(store: &'s Store) -> Self {
        Self {
            store,
            recorded: None,
        }
    }

    /// Read an atom's current value.
    ///
    /// Stale dependencies are brought up to date first. Inside a `read`
    /// function this also records `atom` as a dependency of the atom being
    /// evaluated, whether or not the read succeeds.
    pub fn get<V, A, R>(&self, atom: &Atom<V, A, R>) -> Result<V>
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        let node = atom.node();
        let outcome = self.store.read_node(&node);

        if let Some(recorded) = &self.recorded {
            let epoch = match &outcome {
                Ok((_, epoch)) => *epoch,
                Err(_) => {
                    self.store.inner.table.borrow_mut().touch(&node);
                    UNRESOLVED
                }
            };
            let mut recorded = recorded.borrow_mut();
            if !recorded.iter().any(|(id, _)| *id == node.id()) {
                recorded.push((node.id(), epoch));
            }
        }

        let (value, _) = outcome?;
        downcast(&value, || atom.display_label())
    }

    /// Consume the getter, yielding the recorded reads in read order.
    pub(crate) fn into_dependencies(self) -> Dependencies {
        self.recorded
            .map(|recorded| recorded.into_inner().into_iter().collect())
            .unwrap_or_default()
    }
}

/// Writer passed to `write` functions.
///
/// Sets issued through a setter join the batch of the outermost
/// `Store::set`, so they are propagated together in one pass.
pub struct Setter<'s> {
    store: &'s Store,
}

impl<'s> Setter<'s> {
    pub(crate) fn new(store: &'s Store) -> Self {
        Self { store }
    }

    /// Set another atom (or this one) from inside a write function.
    pub fn set<V, A, R>(&self, atom: &Atom<V, A, R>, args: A) -> Result<R>
    where
        V: Clone + PartialEq + 'static,
        A: 'static,
        R: 'static,
    {
        self.store.set(atom, args)
    }

    /// Read-modify-write an atom whose write argument is its value.
    pub fn update<V, R, F>(&self, atom: &Atom<V, V, R>, f: F) -> Result<R>
    where
        V: Clone + PartialEq + 'static,
        R: 'static,
        F: FnOnce(&V) -> V,
    {
        self.store.update(atom, f)
    }

    /// Replace a primitive atom's stored value.
    pub(crate) fn replace(&self, node: &Rc<dyn AtomNode>, value: Rc<dyn Any>) {
        self.store.replace_primitive(node, value);
    }
}

/// Downcast a cached value to the atom's value type.
pub(crate) fn downcast<V>(value: &Rc<dyn Any>, label: impl FnOnce() -> AtomLabel) -> Result<V>
where
    V: Clone + 'static,
{
    value
        .downcast_ref::<V>()
        .cloned()
        .ok_or_else(|| StoreError::TypeMismatch(label()))
}

/// Guard marking an atom as under evaluation.
///
/// Entering fails if the atom is already on the stack (a cycle) or if the
/// stack is at the configured depth limit.
pub(crate) struct EvaluationFrame<'s> {
    store: &'s StoreInner,
    id: AtomId,
}

impl<'s> EvaluationFrame<'s> {
    pub fn enter(store: &'s StoreInner, node: &dyn AtomNode) -> Result<Self> {
        let id = node.id();
        let mut stack = store.evaluating.borrow_mut();

        if stack.contains(&id) {
            return Err(StoreError::Cycle(node.label()));
        }
        let limit = store.config.max_evaluation_depth;
        if stack.len() >= limit {
            return Err(StoreError::DepthExceeded {
                atom: node.label(),
                limit,
            });
        }

        stack.push(id);
        Ok(Self { store, id })
    }
}

impl Drop for EvaluationFrame<'_> {
    fn drop(&mut self) {
        let popped = self.store.evaluating.borrow_mut().pop();

        // Verify we're popping the right frame.
        debug_assert_eq!(
            popped,
            Some(self.id),
            "EvaluationFrame mismatch: expected {:?}, got {:?}",
            self.id,
            popped
        );
    }
}

/// Guard around a `set` call. Tracks nesting so only the outermost set
/// runs a propagation pass.
pub(crate) struct BatchGuard<'s> {
    store: &'s StoreInner,
}

impl<'s> BatchGuard<'s> {
    pub fn enter(store: &'s StoreInner) -> Self {
        store.batch_depth.set(store.batch_depth.get() + 1);
        Self { store }
    }

    /// Whether this guard is the outermost one.
    pub fn is_outermost(&self) -> bool {
        self.store.batch_depth.get() == 1
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.store
            .batch_depth
            .set(self.store.batch_depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[test]
    fn frames_nest_and_unwind() {
        let store = Store::new();
        let a = Atom::new(1);
        let b = Atom::new(2);

        {
            let _outer = EvaluationFrame::enter(&store.inner, a.node().as_ref()).unwrap();
            {
                let _inner = EvaluationFrame::enter(&store.inner, b.node().as_ref()).unwrap();
                assert_eq!(*store.inner.evaluating.borrow(), vec![a.id(), b.id()]);
            }
            assert_eq!(*store.inner.evaluating.borrow(), vec![a.id()]);
        }

        assert!(store.inner.evaluating.borrow().is_empty());
    }

    #[test]
    fn reentering_a_frame_is_a_cycle() {
        let store = Store::new();
        let a = Atom::new(1);

        let _frame = EvaluationFrame::enter(&store.inner, a.node().as_ref()).unwrap();
        let err = EvaluationFrame::enter(&store.inner, a.node().as_ref()).err();
        assert!(matches!(err, Some(StoreError::Cycle(_))));
    }

    #[test]
    fn frames_respect_depth_limit() {
        let store = Store::with_config(StoreConfig::default().with_max_evaluation_depth(1));
        let a = Atom::new(1);
        let b = Atom::new(2);

        let _frame = EvaluationFrame::enter(&store.inner, a.node().as_ref()).unwrap();
        let err = EvaluationFrame::enter(&store.inner, b.node().as_ref()).err();
        assert!(matches!(err, Some(StoreError::DepthExceeded { limit: 1, .. })));
    }

    #[test]
    fn batch_guards_track_outermost() {
        let store = Store::new();

        let outer = BatchGuard::enter(&store.inner);
        assert!(outer.is_outermost());
        {
            let inner = BatchGuard::enter(&store.inner);
            assert!(!inner.is_outermost());
        }
        assert!(outer.is_outermost());
        drop(outer);
        assert_eq!(store.inner.batch_depth.get(), 0);
    }

    #[test]
    fn tracking_getter_records_each_atom_once() {
        let store = Store::new();
        let a = Atom::new(1);
        let b = Atom::new(2);

        let getter = Getter::tracking(&store);
        assert_eq!(getter.get(&a).unwrap(), 1);
        assert_eq!(getter.get(&b).unwrap(), 2);
        assert_eq!(getter.get(&a).unwrap(), 1);

        let deps = getter.into_dependencies();
        assert_eq!(deps.keys().copied().collect::<Vec<_>>(), vec![a.id(), b.id()]);
    }

    #[test]
    fn untracked_getter_records_nothing() {
        let store = Store::new();
        let a = Atom::new(1);

        let getter = Getter::untracked(&store);
        assert_eq!(getter.get(&a).unwrap(), 1);
        assert!(getter.into_dependencies().is_empty());
    }

    #[test]
    fn failed_reads_are_recorded_as_unresolved() {
        let store = Store::new();
        let ok = Atom::new(1);
        let action: Atom<crate::atom::Unreadable, ()> = Atom::write_only(|_, _, _: ()| Ok(()));

        let getter = Getter::tracking(&store);
        assert!(getter.get(&action).is_err());
        assert_eq!(getter.get(&ok).unwrap(), 1);

        let deps = getter.into_dependencies();
        assert_eq!(deps.get(&action.id()), Some(&UNRESOLVED));
        assert!(store.has_state(&action));
    }
}
