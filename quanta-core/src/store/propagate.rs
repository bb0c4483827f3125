//! Invalidation and Notification
//!
//! Writes to primitive atoms are collected into the current batch. When the
//! outermost `set` finishes, [`Store::flush`] runs one propagation pass over
//! everything the batch changed.
//!
//! # A Pass
//!
//! 1. Take the batch's changed atoms as seeds and ask the scheduler for the
//!    forward closure in topological order, plus which atoms are mounted.
//! 2. Walk the order, refreshing mounted atoms. Unmounted atoms are skipped;
//!    they were invalidated by the write generation and recompute lazily.
//! 3. Notify every refreshed atom that has listeners, in the same order.
//!
//! # Delivery
//!
//! Each atom remembers the epoch its listeners were last handed. An atom is
//! notified when its current epoch differs from that one, regardless of
//! when the epoch moved: a write function may already have refreshed it by
//! reading it. The value is read at delivery time, and a listener that sets
//! atoms starts a pass of its own; once that pass has delivered a newer
//! epoch, the outer pass stops handing out the older one.
//!
//! Listeners are isolated from each other: a panicking listener is recorded
//! and the pass carries on. The failures are returned together at the end.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, warn};

use super::Store;
use crate::atom::AtomNode;
use crate::error::{ListenerFailure, Result, StoreError};
use crate::graph::ListenerId;

impl Store {
    /// Replace a primitive's value and add it to the batch if it changed.
    pub(crate) fn replace_primitive(&self, node: &Rc<dyn AtomNode>, value: Rc<dyn Any>) {
        let changed = self.inner.table.borrow_mut().replace(node, value);
        if changed {
            self.inner.changed.borrow_mut().insert(node.id());
        }
        debug!(atom = %node.label(), changed, "primitive written");
    }

    /// Run the propagation pass for the current batch.
    pub(crate) fn flush(&self) -> Result<()> {
        let seeds = std::mem::take(&mut *self.inner.changed.borrow_mut());
        if seeds.is_empty() {
            return Ok(());
        }

        let plan = self.inner.table.borrow().plan_pass(&seeds);
        debug!(
            seeds = seeds.len(),
            affected = plan.order.len(),
            mounted = plan.mounted.len(),
            "propagation pass"
        );

        let mut watched: Vec<Rc<dyn AtomNode>> = Vec::new();
        for id in &plan.order {
            if !plan.mounted.contains(id) {
                continue;
            }
            let Some(node) = self.inner.table.borrow().get(*id).and_then(|state| state.node())
            else {
                continue;
            };

            match self.read_node(&node) {
                Ok(_) => {
                    let has_listeners = self
                        .inner
                        .table
                        .borrow()
                        .get(*id)
                        .is_some_and(|state| state.has_listeners());
                    if has_listeners {
                        watched.push(node);
                    }
                }
                Err(err) => {
                    warn!(atom = %node.label(), error = %err, "recomputation failed during propagation");
                }
            }
        }

        let mut failures = Vec::new();
        for node in &watched {
            self.notify(node, &mut failures);
        }

        self.collect_garbage_if_eager();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Listeners(failures))
        }
    }

    /// Hand an atom's current value to its listeners, if they have not
    /// seen it yet. Panics are isolated per listener.
    fn notify(&self, node: &Rc<dyn AtomNode>, failures: &mut Vec<ListenerFailure>) {
        let id = node.id();
        let (value, epoch) = match self.read_node(node) {
            Ok(current) => current,
            Err(err) => {
                warn!(atom = %node.label(), error = %err, "recomputation failed during propagation");
                return;
            }
        };

        let listener_ids: Vec<ListenerId> = {
            let mut table = self.inner.table.borrow_mut();
            let Some(state) = table.get(id) else {
                return;
            };
            if state.notified() == epoch {
                return;
            }
            let listener_ids: Vec<ListenerId> = state.listener_ids().collect();
            table.mark_notified(id, epoch);
            listener_ids
        };

        for listener_id in listener_ids {
            let listener = {
                let table = self.inner.table.borrow();
                let Some(state) = table.get(id) else {
                    return;
                };
                // A nested pass started by an earlier listener has already
                // delivered a newer value to everyone.
                if state.notified() != epoch {
                    return;
                }
                // Earlier listeners may have unsubscribed this one.
                state.listener(listener_id)
            };
            let Some(listener) = listener else {
                continue;
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(value.as_ref()))) {
                let message = panic_message(payload.as_ref());
                warn!(atom = %node.label(), listener = listener_id.raw(), %message, "listener panicked");
                failures.push(ListenerFailure {
                    atom: node.label(),
                    message,
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
