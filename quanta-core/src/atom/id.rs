//! Atom identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an atom descriptor.
///
/// Identity, not structural equality, is the key everywhere in the store:
/// two atoms built from identical arguments get different IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(u64);

impl AtomId {
    /// Generate a new unique atom ID.
    ///
    /// Uses a process-wide atomic counter so IDs never collide, even between
    /// atoms created for different stores.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for AtomId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for AtomId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
