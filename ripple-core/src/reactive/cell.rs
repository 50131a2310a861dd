//! Cell Implementation
//!
//! A Cell is the fundamental piece of observable state. It holds a value
//! and tracks which derivations depend on it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a derivation (computed node or reaction),
//!    the cell registers that derivation as an observer.
//!
//! 2. When a cell is written, the equality policy decides whether the value
//!    really changed. Unchanged writes are no-ops.
//!
//! 3. A real change marks observers stale inside an implicit batch, so a
//!    lone write outside any transaction still settles exactly once.
//!
//! # Listeners
//!
//! Besides derivations, a cell accepts plain change listeners through
//! [`Cell::observe`]. Listeners get the old and new value right after the
//! change, inside the same batch as the write, so writes they make are
//! coalesced with it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::atom::Atom;
use super::equality::Equality;
use super::runtime::Engine;
use crate::error::Result;
use crate::graph::NodeId;

type Listener<T> = Rc<dyn Fn(&T, &T)>;

/// Handle returned by [`Cell::observe`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Options for creating a cell.
pub struct CellOptions<T> {
    name: Option<String>,
    equality: Equality<T>,
}

impl<T: PartialEq> Default for CellOptions<T> {
    fn default() -> Self {
        Self {
            name: None,
            equality: Equality::strict(),
        }
    }
}

impl<T> CellOptions<T> {
    /// Options with an explicit equality policy.
    pub fn with_equality(equality: Equality<T>) -> Self {
        Self {
            name: None,
            equality,
        }
    }

    /// Set the cell's name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the equality policy.
    pub fn equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }
}

/// A trackable cell holding a value of type `T`.
///
/// Clones share the same state.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(&engine, 0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies observers)
/// count.set(5)?;
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

struct CellInner<T> {
    atom: Atom,
    value: RefCell<T>,
    equality: Equality<T>,
    listeners: RefCell<Vec<(ListenerId, Listener<T>)>>,
    next_listener: std::cell::Cell<u64>,
}

impl<T: Clone + 'static> Cell<T> {
    /// Create a new cell compared with `PartialEq`.
    pub fn new(engine: &Engine, value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_options(engine, value, CellOptions::default())
    }

    /// Create a new cell with the given equality policy.
    pub fn with_equality(engine: &Engine, value: T, equality: Equality<T>) -> Self {
        Self::with_options(engine, value, CellOptions::with_equality(equality))
    }

    /// Create a new cell with explicit options.
    pub fn with_options(engine: &Engine, value: T, options: CellOptions<T>) -> Self {
        let atom = Atom::new(engine, options.name.unwrap_or_default());
        Self {
            inner: Rc::new(CellInner {
                atom,
                value: RefCell::new(value),
                equality: options.equality,
                listeners: RefCell::new(Vec::new()),
                next_listener: std::cell::Cell::new(0),
            }),
        }
    }

    /// Get the cell's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.atom.id()
    }

    /// Get the cell's name.
    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    /// The atom backing this cell.
    pub fn atom(&self) -> &Atom {
        &self.inner.atom
    }

    /// Get the current value.
    ///
    /// If called within a derivation, this also registers the derivation
    /// as an observer.
    pub fn get(&self) -> T {
        self.inner.atom.report_observed();
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without cloning it. Tracked like `get`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.atom.report_observed();
        f(&self.inner.value.borrow())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Set a new value.
    ///
    /// Writes that the equality policy considers unchanged do nothing.
    /// Writing from inside a computed derivation is a usage error.
    pub fn set(&self, value: T) -> Result<()> {
        let Some(runtime) = self.inner.atom.runtime() else {
            *self.inner.value.borrow_mut() = value;
            return Ok(());
        };
        runtime.check_write(self.id())?;

        let changed = self
            .inner
            .equality
            .changed(&self.inner.value.borrow(), &value);
        if !changed {
            tracing::trace!(cell = %self.id(), name = self.name(), "write suppressed by equality");
            return Ok(());
        }

        let old = std::mem::replace(&mut *self.inner.value.borrow_mut(), value);
        let _batch = runtime.batch();
        runtime.report_changed(self.id());
        self.notify_listeners(&old);
        Ok(())
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    /// Register a listener called with `(old, new)` after every change.
    pub fn observe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T, &T) + 'static,
    {
        let id = ListenerId(self.inner.next_listener.get());
        self.inner.next_listener.set(id.0 + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unobserve(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    fn notify_listeners(&self, old: &T) {
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let current = self.get_untracked();
        for listener in listeners {
            listener(old, &current);
        }
    }

    /// Get the number of derivations observing this cell.
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Cell<T>
where
    T: Clone + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("value", &self.get_untracked())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    #[test]
    fn cell_get_and_set() {
        let engine = Engine::new();
        let cell = Cell::new(&engine, 0);
        assert_eq!(cell.get(), 0);

        cell.set(42).unwrap();
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update() {
        let engine = Engine::new();
        let cell = Cell::new(&engine, 10);
        cell.update(|v| v + 5).unwrap();
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn cell_notifies_listeners() {
        let engine = Engine::new();
        let cell = Cell::new(&engine, 0);
        let changes = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&changes);
        cell.observe(move |old, new| log.borrow_mut().push((*old, *new)));

        cell.set(1).unwrap();
        cell.set(1).unwrap();
        cell.set(2).unwrap();

        assert_eq!(*changes.borrow(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn cell_unobserve() {
        let engine = Engine::new();
        let cell = Cell::new(&engine, 0);
        let calls = Rc::new(StdCell::new(0));

        let counter = Rc::clone(&calls);
        let id = cell.observe(move |_, _| counter.set(counter.get() + 1));

        cell.set(1).unwrap();
        assert_eq!(calls.get(), 1);

        assert!(cell.unobserve(id));
        assert!(!cell.unobserve(id));
        cell.set(2).unwrap();
        // Should not have been called again
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cell_clone_shares_state() {
        let engine = Engine::new();
        let cell1 = Cell::new(&engine, 0);
        let cell2 = cell1.clone();

        cell1.set(42).unwrap();
        assert_eq!(cell2.get(), 42);

        cell2.set(100).unwrap();
        assert_eq!(cell1.get(), 100);
        assert_eq!(cell1.id(), cell2.id());
    }

    #[test]
    fn cell_ids_are_unique() {
        let engine = Engine::new();
        let c1 = Cell::new(&engine, 0);
        let c2 = Cell::new(&engine, 0);

        assert_ne!(c1.id(), c2.id());
    }

    #[test]
    fn always_changed_cell_propagates_equal_writes() {
        let engine = Engine::new();
        let cell = Cell::with_equality(&engine, 1, Equality::always_changed());
        let runs = Rc::new(StdCell::new(0));

        let counter = Rc::clone(&runs);
        let source = cell.clone();
        let _reaction = engine.autorun(move || {
            source.get();
            counter.set(counter.get() + 1);
            Ok(())
        });

        cell.set(1).unwrap();
        cell.set(1).unwrap();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn cell_outlives_engine() {
        let engine = Engine::new();
        let cell = Cell::new(&engine, 1);
        drop(engine);

        cell.set(2).unwrap();
        assert_eq!(cell.get(), 2);
        assert_eq!(cell.observer_count(), 0);
    }

    #[test]
    fn named_cell() {
        let engine = Engine::new();
        let cell = Cell::with_options(&engine, "x", CellOptions::default().named("label"));
        assert_eq!(cell.name(), "label");
        assert_eq!(engine.dependency_names(cell.id()), Vec::<String>::new());
    }
}
