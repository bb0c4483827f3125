//! Propagation Scheduler
//!
//! The scheduler decides which atoms a propagation pass visits, and in what
//! order. It only reads the state table; evaluation and notification are the
//! store's job.
//!
//! # Algorithm
//!
//! 1. Start from the atoms whose value changed in the batch (the seeds).
//! 2. Walk `dependents` breadth-first to collect the forward closure. Each
//!    atom appears once, however many paths reach it.
//! 3. Sort the closure topologically (Kahn's algorithm) so an atom is always
//!    visited after every atom it reads within the closure.
//! 4. Work out which atoms are mounted: an atom is mounted when it has
//!    listeners or when something mounted depends on it. Only mounted atoms
//!    are recomputed during the pass; the rest revalidate lazily on their
//!    next read.
//!
//! Ties between atoms at the same depth are broken by insertion order,
//! which follows the order edges were first recorded.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;

use super::state::AtomTable;
use crate::atom::AtomId;

/// The visiting plan for one propagation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PassPlan {
    /// Seeds and their forward closure, in topological order.
    pub order: Vec<AtomId>,

    /// Atoms in `order` that must be recomputed eagerly.
    pub mounted: HashSet<AtomId>,
}

impl AtomTable {
    /// Collect the seeds and everything that transitively depends on them.
    ///
    /// Returned in breadth-first discovery order.
    pub fn forward_closure(&self, seeds: &IndexSet<AtomId>) -> IndexSet<AtomId> {
        let mut visited = IndexSet::new();
        let mut queue: VecDeque<AtomId> = seeds.iter().copied().collect();

        while let Some(atom) = queue.pop_front() {
            if !visited.insert(atom) {
                continue;
            }
            if let Some(state) = self.get(atom) {
                for dependent in state.dependents() {
                    if !visited.contains(dependent) {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        visited
    }

    /// Perform a topological sort of the given atoms.
    ///
    /// Returns atoms in order such that dependencies come before dependents.
    /// Only edges between atoms of the set are considered. Atoms on a cycle
    /// never reach in-degree zero and are left out.
    pub fn topological_sort(&self, atoms: &IndexSet<AtomId>) -> Vec<AtomId> {
        let mut in_degree: HashMap<AtomId, usize> = HashMap::with_capacity(atoms.len());
        let mut result = Vec::with_capacity(atoms.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the set)
        for &atom in atoms {
            let degree = self
                .get(atom)
                .map(|state| {
                    state
                        .dependencies()
                        .keys()
                        .filter(|dep| atoms.contains(*dep))
                        .count()
                })
                .unwrap_or(0);
            in_degree.insert(atom, degree);
            if degree == 0 {
                queue.push_back(atom);
            }
        }

        // Kahn's algorithm
        while let Some(atom) = queue.pop_front() {
            result.push(atom);

            if let Some(state) = self.get(atom) {
                for dependent in state.dependents() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*dependent);
                        }
                    }
                }
            }
        }

        result
    }

    /// Build the plan for a pass seeded by `seeds`.
    pub fn plan_pass(&self, seeds: &IndexSet<AtomId>) -> PassPlan {
        let closure = self.forward_closure(seeds);
        let order = self.topological_sort(&closure);

        // Dependents come later in the order, so walking it backwards sees
        // every dependent before the atoms it reads.
        let mut mounted = HashSet::new();
        for &atom in order.iter().rev() {
            let Some(state) = self.get(atom) else {
                continue;
            };
            let is_mounted = state.has_listeners()
                || state
                    .dependents()
                    .iter()
                    .any(|dependent| mounted.contains(dependent));
            if is_mounted {
                mounted.insert(atom);
            }
        }

        PassPlan { order, mounted }
    }
}
