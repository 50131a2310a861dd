//! Equality Policies
//!
//! A cell write or a computed recomputation only propagates when the new
//! value is considered different from the old one. The policy decides what
//! "different" means.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

/// Which comparison strategy a policy uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityKind {
    /// The type's own `PartialEq`. This is the default.
    Strict,

    /// Pointer identity of shared values.
    Reference,

    /// Deep comparison of the values' serialized structure.
    Structural,

    /// Every write counts as a change.
    AlwaysChanged,

    /// A user supplied comparator.
    Custom,
}

/// Comparator deciding whether a new value differs from the current one.
pub struct Equality<T> {
    kind: EqualityKind,
    equals: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T> Equality<T> {
    /// Never suppress propagation.
    pub fn always_changed() -> Self {
        Self {
            kind: EqualityKind::AlwaysChanged,
            equals: Rc::new(|_, _| false),
        }
    }

    /// Use a custom comparator. It must return `true` when both values are
    /// considered equal.
    pub fn custom<F>(equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            kind: EqualityKind::Custom,
            equals: Rc::new(equals),
        }
    }

    /// The strategy this policy uses.
    pub fn kind(&self) -> EqualityKind {
        self.kind
    }

    /// Whether `next` should be treated as a change from `current`.
    pub fn changed(&self, current: &T, next: &T) -> bool {
        !(self.equals)(current, next)
    }
}

impl<T: PartialEq> Equality<T> {
    /// Compare with the type's own `PartialEq`.
    pub fn strict() -> Self {
        Self {
            kind: EqualityKind::Strict,
            equals: Rc::new(|a, b| a == b),
        }
    }
}

impl<T: Serialize> Equality<T> {
    /// Compare the serialized structure of both values.
    ///
    /// Two values that serialize to the same document are equal even if
    /// their types' `PartialEq` (if any) says otherwise. A value that
    /// cannot be serialized always counts as changed.
    pub fn structural() -> Self {
        Self {
            kind: EqualityKind::Structural,
            equals: Rc::new(|a, b| {
                match (serde_json::to_value(a), serde_json::to_value(b)) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }),
        }
    }
}

impl<U: ?Sized> Equality<Rc<U>> {
    /// Compare shared values by pointer identity.
    pub fn reference() -> Self {
        Self {
            kind: EqualityKind::Reference,
            equals: Rc::new(|a, b| Rc::ptr_eq(a, b)),
        }
    }
}

impl<T: PartialEq> Default for Equality<T> {
    fn default() -> Self {
        Self::strict()
    }
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            equals: Rc::clone(&self.equals),
        }
    }
}

impl<T> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Equality").field("kind", &self.kind).finish()
    }
}
