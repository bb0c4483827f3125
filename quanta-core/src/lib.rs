//! Quanta Core
//!
//! This crate provides the store engine for the Quanta atomic state library.
//! It implements:
//!
//! - Atom descriptors (primitive, read-only, read-write and write-only)
//! - Automatic dependency tracking through a recording reader
//! - Lazy, epoch-based recomputation of derived atoms
//! - Batched invalidation with exactly-once change notification
//!
//! UI bindings and the mechanism that hands a store to components are built
//! on top of this crate and are not part of it.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `atom`: Atom descriptors and identity
//! - `graph`: The per-store atom state table and the propagation scheduler
//! - `store`: The `Store` façade: evaluation, writes, propagation, subscriptions
//! - `config`: Store configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use quanta_core::{Atom, Store};
//!
//! let count = Atom::new(0);
//! let doubled = Atom::derived({
//!     let count = count.clone();
//!     move |get| Ok(get.get(&count)? * 2)
//! });
//!
//! let store = Store::new();
//! let _subscription = store.subscribe(&doubled, |value| {
//!     println!("Doubled: {}", value);
//! })?;
//!
//! store.set(&count, 5)?;
//! // Prints: "Doubled: 10"
//! assert_eq!(store.get(&doubled)?, 10);
//! ```

pub mod atom;
pub mod config;
pub mod error;
pub mod store;

mod graph;

pub use atom::{Atom, AtomId, AtomKind, Unreadable};
pub use config::{GcPolicy, StoreConfig};
pub use error::{AtomLabel, ListenerFailure, Result, StoreError};
pub use graph::{Epoch, ListenerId};
pub use store::{Getter, Setter, Store, Subscription};
