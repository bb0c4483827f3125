//! Dependency Graph
//!
//! This module implements the per-store dependency graph that tracks
//! relationships between atoms.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (in legitimate use) where:
//!
//! - Nodes are atoms that a store has read, written or subscribed to
//! - Edges are recorded reads: if evaluating B read A, there is an edge from
//!   A to B
//!
//! Edges are not declared up front. They are whatever the last evaluation of
//! an atom actually read, so an atom that reads different atoms depending on
//! some condition only depends on the branch it took last time.
//!
//! # Design Decisions
//!
//! 1. The graph lives in one table per store rather than inside the atoms,
//!    so the same atom can participate in many isolated stores.
//!
//! 2. The table is indexed by atom ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges.
//!    Dependencies drive staleness checks; dependents drive invalidation.

mod scheduler;
mod state;

pub use state::{Epoch, ListenerId};

pub(crate) use state::{AtomTable, Dependencies, Listener, UNRESOLVED};
