//! Store Errors
//!
//! Every fallible store operation returns [`StoreError`]. Errors raised by
//! user `read`/`write` functions travel through the same type so that `?`
//! works across nested reads.

use std::fmt;

use thiserror::Error;

use crate::atom::AtomId;

/// Human-readable identity of an atom, used in errors and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtomLabel {
    /// The atom's identity.
    pub id: AtomId,
    /// The debug label given with `Atom::with_label`, if any.
    pub name: Option<String>,
}

impl fmt::Display for AtomLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}#{}", name, self.id.raw()),
            None => write!(f, "atom#{}", self.id.raw()),
        }
    }
}

/// A listener that panicked during a propagation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    /// The atom whose listener failed.
    pub atom: AtomLabel,
    /// The panic payload, if it was a string.
    pub message: String,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener of {} panicked: {}", self.atom, self.message)
    }
}

/// Errors produced by the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `set` was called on an atom without a write function.
    #[error("atom {0} is not writable")]
    Unwritable(AtomLabel),

    /// A write-only atom was read where a real value was expected.
    #[error("atom {0} is write-only and has no readable value")]
    Unreadable(AtomLabel),

    /// A `read` or `write` function failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// An atom transitively read itself.
    #[error("dependency cycle detected at atom {0}")]
    Cycle(AtomLabel),

    /// Evaluation nested deeper than the configured limit.
    #[error("evaluation depth limit of {limit} exceeded at atom {atom}")]
    DepthExceeded { atom: AtomLabel, limit: usize },

    /// A cached value did not have the type its descriptor declares.
    #[error("cached value of atom {0} has an unexpected type")]
    TypeMismatch(AtomLabel),

    /// One or more listeners panicked during notification.
    #[error("{} listener(s) failed during notification", .0.len())]
    Listeners(Vec<ListenerFailure>),
}

impl StoreError {
    /// Build an evaluation error from any displayable message.
    ///
    /// This is the way `read` and `write` functions signal failure:
    ///
    /// ```rust,ignore
    /// let parsed = Atom::derived(move |get| {
    ///     get.get(&text)?.parse::<i64>().map_err(StoreError::evaluation)
    /// });
    /// ```
    pub fn evaluation(message: impl fmt::Display) -> Self {
        Self::Evaluation(message.to_string())
    }

    /// Whether the error was raised by the recursion guard rather than by an
    /// atom's own functions.
    ///
    /// Guard errors depend on where a read happened, not on what was read,
    /// so they are never cached as an atom's outcome.
    pub fn is_guard(&self) -> bool {
        matches!(self, Self::Cycle(_) | Self::DepthExceeded { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
