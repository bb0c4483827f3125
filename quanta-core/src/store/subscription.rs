//! Subscriptions
//!
//! A [`Subscription`] is the capability to stop receiving notifications.
//! Dropping it unsubscribes, so a listener lives exactly as long as the
//! handle the caller keeps.

use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::{Store, StoreInner};
use crate::atom::{AtomId, AtomNode};
use crate::graph::ListenerId;

/// Handle to a registered listener.
///
/// Dropping this handle removes the listener from the store. While it is
/// alive it also keeps the subscribed atom alive, so the atom's state cannot
/// be collected under it.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    atom_id: AtomId,
    /// Released before the store sweeps, so the sweep can reclaim it.
    atom: Option<Rc<dyn AtomNode>>,
    listener: ListenerId,
}

impl Subscription {
    pub(crate) fn new(store: Weak<StoreInner>, atom: Rc<dyn AtomNode>, listener: ListenerId) -> Self {
        Self {
            store,
            atom_id: atom.id(),
            atom: Some(atom),
            listener,
        }
    }

    /// The atom this subscription listens to.
    pub fn atom_id(&self) -> AtomId {
        self.atom_id
    }

    /// The listener's ID within its store.
    pub fn listener_id(&self) -> ListenerId {
        self.listener
    }

    /// Stop receiving notifications.
    ///
    /// Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let atom = self.atom.take();

        // The store may already be gone; nothing to clean up then.
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let store = Store::from_inner(inner);

        let removed = store
            .inner
            .table
            .borrow_mut()
            .remove_listener(self.atom_id, self.listener);
        let Some(listener) = removed else {
            return;
        };

        if let Some(atom) = &atom {
            debug!(atom = %atom.label(), listener = self.listener.raw(), "unsubscribed");
        }
        // The callback may own other subscriptions; drop it (and the atom)
        // outside the table borrow, before sweeping.
        drop(listener);
        drop(atom);
        store.collect_garbage_if_eager();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("atom", &self.atom_id)
            .field("listener", &self.listener)
            .field("store_alive", &(self.store.strong_count() > 0))
            .finish()
    }
}
