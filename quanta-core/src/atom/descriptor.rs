//! Atom Descriptors
//!
//! An [`Atom`] is an immutable definition of one piece of state. It holds no
//! value itself: values live in a [`Store`](crate::store::Store), keyed by the
//! atom's identity. The same atom can therefore be used with any number of
//! independent stores.
//!
//! # Atom Shapes
//!
//! Every atom is the same tagged structure with optional capabilities:
//!
//! | Shape      | `initial` | `read` | `write` |
//! |------------|-----------|--------|---------|
//! | Primitive  | yes       | -      | yes     |
//! | Read-only  | -         | yes    | -       |
//! | Read-write | -         | yes    | yes     |
//! | Write-only | -         | -      | yes     |
//!
//! The store dispatches on which fields are present. A primitive's write is
//! generated here and simply replaces the stored value; every other write is
//! user code expressed in terms of writes to other atoms.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::error::{AtomLabel, Result, StoreError};
use crate::store::{Getter, Setter};

use super::id::AtomId;

/// The read function of a derived atom.
pub type ReadFn<V> = dyn Fn(&Getter<'_>) -> Result<V>;

/// The write function of a writable atom.
pub type WriteFn<A, R> = dyn Fn(&Getter<'_>, &Setter<'_>, A) -> Result<R>;

/// The value type of write-only atoms.
///
/// It has no values, so a write-only atom can never produce something that
/// looks like real state. Reading one fails with [`StoreError::Unreadable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unreadable {}

/// Which capabilities an atom carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    /// Holds directly settable state.
    Primitive,
    /// Computed from other atoms, cannot be set.
    ReadOnly,
    /// Computed from other atoms, with custom write semantics.
    ReadWrite,
    /// Only writes; has no readable value.
    WriteOnly,
}

/// Shared definition behind an [`Atom`] handle.
pub(crate) struct AtomInner<V, A, R> {
    id: AtomId,
    label: RefCell<Option<String>>,
    initial: Option<V>,
    read: Option<Box<ReadFn<V>>>,
    write: Option<Box<WriteFn<A, R>>>,
}

/// Type-erased view of an atom used by the store.
///
/// The state table stores values as `Rc<dyn Any>`; this trait lets it
/// evaluate and compare them without knowing the atom's value type.
pub(crate) trait AtomNode {
    /// The atom's identity.
    fn id(&self) -> AtomId;

    /// Label for errors and logs.
    fn label(&self) -> AtomLabel;

    /// The atom's shape.
    fn kind(&self) -> AtomKind;

    /// A primitive's initial value, `None` for derived atoms.
    fn initial(&self) -> Option<Rc<dyn Any>>;

    /// Produce the atom's value.
    ///
    /// Primitives return their initial value; derived atoms run `read`.
    fn evaluate(&self, get: &Getter<'_>) -> Result<Rc<dyn Any>>;

    /// Value equality, used to decide whether an epoch must change.
    fn same_value(&self, current: &dyn Any, next: &dyn Any) -> bool;
}

impl<V, A, R> AtomNode for AtomInner<V, A, R>
where
    V: Clone + PartialEq + 'static,
    A: 'static,
    R: 'static,
{
    fn id(&self) -> AtomId {
        self.id
    }

    fn label(&self) -> AtomLabel {
        AtomLabel {
            id: self.id,
            name: self.label.borrow().clone(),
        }
    }

    fn kind(&self) -> AtomKind {
        match (&self.initial, &self.read, &self.write) {
            (Some(_), _, _) => AtomKind::Primitive,
            (None, Some(_), Some(_)) => AtomKind::ReadWrite,
            (None, Some(_), None) => AtomKind::ReadOnly,
            (None, None, _) => AtomKind::WriteOnly,
        }
    }

    fn initial(&self) -> Option<Rc<dyn Any>> {
        self.initial
            .as_ref()
            .map(|initial| Rc::new(initial.clone()) as Rc<dyn Any>)
    }

    fn evaluate(&self, get: &Getter<'_>) -> Result<Rc<dyn Any>> {
        if let Some(initial) = self.initial() {
            return Ok(initial);
        }
        match &self.read {
            Some(read) => Ok(Rc::new(read(get)?)),
            None => Err(StoreError::Unreadable(self.label())),
        }
    }

    fn same_value(&self, current: &dyn Any, next: &dyn Any) -> bool {
        match (current.downcast_ref::<V>(), next.downcast_ref::<V>()) {
            (Some(current), Some(next)) => current == next,
            _ => false,
        }
    }
}

/// A handle to an atom descriptor.
///
/// # Type Parameters
///
/// - `V`: the value the atom reads as.
/// - `A`: the argument its write function takes (defaults to `V`).
/// - `R`: what its write function returns (defaults to `()`).
///
/// Cloning the handle shares identity; it does not create a new atom.
///
/// # Example
///
/// ```rust,ignore
/// let count = Atom::new(0);
/// let doubled = Atom::derived({
///     let count = count.clone();
///     move |get| Ok(get.get(&count)? * 2)
/// });
/// ```
pub struct Atom<V, A = V, R = ()> {
    inner: Rc<AtomInner<V, A, R>>,
}

impl<V> Atom<V>
where
    V: Clone + PartialEq + 'static,
{
    /// Create a primitive atom holding `initial` until it is first set.
    pub fn new(initial: V) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<AtomInner<V, V, ()>>| {
            let this = this.clone();
            let write: Box<WriteFn<V, ()>> = Box::new(
                move |_get: &Getter<'_>, set: &Setter<'_>, value: V| -> Result<()> {
                    let node: Rc<dyn AtomNode> = this.upgrade().ok_or_else(|| {
                        StoreError::evaluation("primitive atom dropped during write")
                    })?;
                    set.replace(&node, Rc::new(value));
                    Ok(())
                },
            );
            AtomInner {
                id: AtomId::new(),
                label: RefCell::new(None),
                initial: Some(initial),
                read: None,
                write: Some(write),
            }
        });
        Self { inner }
    }

    /// Create a read-only derived atom.
    ///
    /// Setting it fails with [`StoreError::Unwritable`].
    pub fn derived<F>(read: F) -> Self
    where
        F: Fn(&Getter<'_>) -> Result<V> + 'static,
    {
        let read: Box<ReadFn<V>> = Box::new(read);
        Self::from_parts(Some(read), None)
    }
}

impl<V, A, R> Atom<V, A, R>
where
    V: Clone + PartialEq + 'static,
    A: 'static,
    R: 'static,
{
    /// Create a derived atom with custom write semantics.
    ///
    /// The write function receives a getter, a setter and the argument
    /// passed to `Store::set`; it expresses the write in terms of sets on
    /// other atoms.
    pub fn read_write<F, W>(read: F, write: W) -> Self
    where
        F: Fn(&Getter<'_>) -> Result<V> + 'static,
        W: Fn(&Getter<'_>, &Setter<'_>, A) -> Result<R> + 'static,
    {
        let read: Box<ReadFn<V>> = Box::new(read);
        let write: Box<WriteFn<A, R>> = Box::new(write);
        Self::from_parts(Some(read), Some(write))
    }

    fn from_parts(read: Option<Box<ReadFn<V>>>, write: Option<Box<WriteFn<A, R>>>) -> Self {
        Self {
            inner: Rc::new(AtomInner {
                id: AtomId::new(),
                label: RefCell::new(None),
                initial: None,
                read,
                write,
            }),
        }
    }

    /// Attach a debug label, shown in errors and logs.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        *self.inner.label.borrow_mut() = Some(label.into());
        self
    }

    /// The atom's identity.
    pub fn id(&self) -> AtomId {
        self.inner.id
    }

    /// The debug label, if one was set.
    pub fn label(&self) -> Option<String> {
        self.inner.label.borrow().clone()
    }

    /// The atom's shape.
    pub fn kind(&self) -> AtomKind {
        self.inner.kind()
    }

    /// Whether reading this atom can produce a value.
    pub fn is_readable(&self) -> bool {
        self.kind() != AtomKind::WriteOnly
    }

    /// Whether `Store::set` is allowed on this atom.
    pub fn is_writable(&self) -> bool {
        self.inner.write.is_some()
    }

    pub(crate) fn node(&self) -> Rc<dyn AtomNode> {
        self.inner.clone()
    }

    pub(crate) fn display_label(&self) -> AtomLabel {
        self.inner.label()
    }

    pub(crate) fn write_fn(&self) -> Option<&WriteFn<A, R>> {
        self.inner.write.as_deref()
    }
}

impl<A, R> Atom<Unreadable, A, R>
where
    A: 'static,
    R: 'static,
{
    /// Create a write-only atom.
    ///
    /// Useful for actions: the atom has no state of its own and reading it
    /// fails with [`StoreError::Unreadable`].
    pub fn write_only<W>(write: W) -> Self
    where
        W: Fn(&Getter<'_>, &Setter<'_>, A) -> Result<R> + 'static,
    {
        let write: Box<WriteFn<A, R>> = Box::new(write);
        Self::from_parts(None, Some(write))
    }
}

impl<V, A, R> Clone for Atom<V, A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V, A, R> PartialEq for Atom<V, A, R> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V, A, R> Eq for Atom<V, A, R> {}

impl<V, A, R> Hash for Atom<V, A, R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<V, A, R> fmt::Debug for Atom<V, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label.borrow())
            .field("has_initial", &self.inner.initial.is_some())
            .field("has_read", &self.inner.read.is_some())
            .field("has_write", &self.inner.write.is_some())
            .finish()
    }
}
