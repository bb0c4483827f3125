//! Atoms
//!
//! An atom is an identity-keyed unit of state. Primitive atoms hold a value
//! that can be set directly; derived atoms compute their value from other
//! atoms through a `read` function, and may define how writes to them map
//! onto writes to the atoms they are built from.
//!
//! Atoms are descriptors only. All values, dependency edges and listeners
//! live in a [`Store`](crate::store::Store).

mod descriptor;
mod id;

pub use descriptor::{Atom, AtomKind, ReadFn, Unreadable, WriteFn};
pub use id::AtomId;

pub(crate) use descriptor::AtomNode;
