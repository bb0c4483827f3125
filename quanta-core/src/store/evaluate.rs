//! Evaluator
//!
//! Brings an atom's cached outcome up to date.
//!
//! # Freshness
//!
//! A cached outcome (a value, or the error the last evaluation failed with)
//! is fresh when none of the atoms its evaluation read has a newer epoch
//! than the one recorded at read time. Checking that means refreshing each
//! dependency first, recursively. Two shortcuts avoid most of that work:
//!
//! - Primitive atoms have no dependencies and are always fresh.
//! - Each entry remembers the write generation it was last validated at. If
//!   no primitive has changed since, the cache is fresh without looking at
//!   any dependency.
//!
//! The dependency walk runs inside an evaluation frame like recomputation
//! does, so a long chain hits the depth limit instead of the native stack.
//!
//! # Recomputation
//!
//! A stale atom is re-read with a fresh tracking getter. On success the
//! result and the recorded dependencies replace the old ones in one commit.
//! On failure the error and the reads made so far are recorded instead, and
//! the previous value and epoch survive.

use std::any::Any;
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::trace;

use super::context::{EvaluationFrame, Getter};
use super::Store;
use crate::atom::{AtomId, AtomKind, AtomNode};
use crate::error::{Result, StoreError};
use crate::graph::Epoch;

/// What the state table says about an atom before any work is done.
enum Cached {
    /// No usable outcome; the atom must be evaluated.
    Missing,
    /// The cached outcome is known to be fresh.
    Fresh(Result<(Rc<dyn Any>, Epoch)>),
    /// The cached outcome is fresh only if these dependencies are unchanged.
    Check(SmallVec<[(AtomId, Epoch); 8]>),
}

impl Store {
    /// Return an atom's up-to-date value and epoch, creating its state on
    /// first access.
    pub(crate) fn read_node(&self, node: &Rc<dyn AtomNode>) -> Result<(Rc<dyn Any>, Epoch)> {
        let id = node.id();

        let cached = {
            let table = self.inner.table.borrow();
            match table.get(id) {
                Some(state) => match state.outcome() {
                    Some(outcome)
                        if node.kind() == AtomKind::Primitive
                            || state.validated_at() == table.generation() =>
                    {
                        Cached::Fresh(outcome)
                    }
                    Some(_) => Cached::Check(
                        state
                            .dependencies()
                            .iter()
                            .map(|(dep, epoch)| (*dep, *epoch))
                            .collect(),
                    ),
                    None => Cached::Missing,
                },
                None => Cached::Missing,
            }
        };

        match cached {
            Cached::Fresh(outcome) => return outcome,
            Cached::Check(dependencies) => {
                let unchanged = {
                    let _frame = EvaluationFrame::enter(&self.inner, node.as_ref())?;
                    self.dependencies_unchanged(&dependencies)?
                };
                if unchanged {
                    let mut table = self.inner.table.borrow_mut();
                    table.mark_validated(id);
                    if let Some(outcome) = table.get(id).and_then(|state| state.outcome()) {
                        return outcome;
                    }
                }
            }
            Cached::Missing => {}
        }

        self.evaluate(node)
    }

    /// Whether every recorded dependency still has the epoch it was read at.
    ///
    /// Stops at the first changed dependency: the atom's `read` may not
    /// reach the later ones any more. A dependency that can no longer be
    /// refreshed (dropped, or failing) counts as changed; re-running `read`
    /// then decides what happens. Depth errors are passed up unchanged.
    fn dependencies_unchanged(&self, dependencies: &[(AtomId, Epoch)]) -> Result<bool> {
        for (dep, seen) in dependencies {
            let node = self.inner.table.borrow().get(*dep).and_then(|state| state.node());
            let Some(node) = node else {
                return Ok(false);
            };
            match self.read_node(&node) {
                Ok((_, epoch)) if epoch == *seen => {}
                Ok(_) => return Ok(false),
                Err(err @ StoreError::DepthExceeded { .. }) => return Err(err),
                Err(_) => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Run an atom's read function and record the outcome.
    fn evaluate(&self, node: &Rc<dyn AtomNode>) -> Result<(Rc<dyn Any>, Epoch)> {
        let _frame = EvaluationFrame::enter(&self.inner, node.as_ref())?;

        let getter = Getter::tracking(self);
        let outcome = node.evaluate(&getter);
        let dependencies = getter.into_dependencies();

        let mut table = self.inner.table.borrow_mut();
        match outcome {
            Ok(value) => Ok(table.commit(node, value, dependencies)),
            Err(err) => {
                trace!(atom = %node.label(), error = %err, "evaluation failed");
                table.record_failure(node, dependencies, &err);
                Err(err)
            }
        }
    }
}
