//! Computed Implementation
//!
//! A Computed node is a cached derived value that re-evaluates only when
//! its dependencies change.
//!
//! # How Computed Nodes Work
//!
//! 1. On first read, the node runs its derivation inside a tracking frame,
//!    caches the result and subscribes to everything it read.
//!
//! 2. When read again with no intervening change, the cached value is
//!    returned and the derivation does not run.
//!
//! 3. When a dependency changes, the node is marked stale (a cell it read
//!    changed) or possibly stale (a computed node it read may change).
//!
//! 4. On the next read, possibly-stale nodes first refresh their computed
//!    dependencies. Only if one of them produced a new value does the node
//!    recompute. If the recomputed value equals the cached one, observers
//!    are left alone.
//!
//! # Failures
//!
//! A derivation that returns an error caches nothing and stays stale; the
//! error goes to the reader and the next read retries. Dependencies read
//! before the failure stay subscribed so a fix upstream is noticed.
//!
//! # Unobserved Nodes
//!
//! When the last observer unsubscribes, the node releases its edges and
//! cached value at the end of the batch (unless `keep_alive` is set). The
//! next read derives from scratch.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::equality::Equality;
use super::runtime::{ComputedNode, Engine, Runtime};
use crate::error::{ReactiveError, Result};
use crate::graph::{DependencyState, Node, NodeId};

type Derive<T> = Box<dyn Fn() -> Result<T>>;

/// Options for creating a computed node.
pub struct ComputedOptions<T> {
    name: Option<String>,
    equality: Equality<T>,
    keep_alive: Option<bool>,
}

impl<T: PartialEq> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self {
            name: None,
            equality: Equality::strict(),
            keep_alive: None,
        }
    }
}

impl<T> ComputedOptions<T> {
    /// Options with an explicit equality policy.
    pub fn with_equality(equality: Equality<T>) -> Self {
        Self {
            name: None,
            equality,
            keep_alive: None,
        }
    }

    /// Set the node's name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the equality policy used for change suppression.
    pub fn equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }

    /// Keep tracking and caching after losing all observers. Defaults to
    /// the engine's `keep_computed_alive` setting.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }
}

/// A cached derivation over cells and other computed nodes.
///
/// Clones share the same node.
///
/// # Example
///
/// ```rust,ignore
/// let count = engine.cell(2);
/// let doubled = Computed::new(&engine, move || count.get() * 2);
/// assert_eq!(doubled.get()?, 4);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    id: NodeId,
    name: String,
    runtime: Weak<Runtime>,
    derive: Derive<T>,
    value: RefCell<Option<T>>,
    equality: Equality<T>,
}

impl<T: Clone + 'static> Computed<T> {
    /// Create a computed node from an infallible derivation.
    ///
    /// The derivation is not run until the first read.
    pub fn new<F>(engine: &Engine, derive: F) -> Self
    where
        T: PartialEq,
        F: Fn() -> T + 'static,
    {
        Self::with_options(engine, ComputedOptions::default(), move || Ok(derive()))
    }

    /// Create a computed node from a derivation that may fail.
    pub fn try_new<F>(engine: &Engine, derive: F) -> Self
    where
        T: PartialEq,
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_options(engine, ComputedOptions::default(), derive)
    }

    /// Create a computed node with explicit options.
    pub fn with_options<F>(engine: &Engine, options: ComputedOptions<T>, derive: F) -> Self
    where
        F: Fn() -> Result<T> + 'static,
    {
        let runtime = engine.runtime();
        let keep_alive = options
            .keep_alive
            .unwrap_or(runtime.config().keep_computed_alive);
        let node = Node::computed(options.name.unwrap_or_default()).with_keep_alive(keep_alive);
        let name = node.name().to_string();
        let id = runtime.add_node(node);

        let inner = Rc::new(ComputedInner {
            id,
            name,
            runtime: engine.downgrade(),
            derive: Box::new(derive),
            value: RefCell::new(None),
            equality: options.equality,
        });
        let erased: Rc<dyn ComputedNode> = inner.clone();
        runtime.register_computed(id, Rc::downgrade(&erased));

        Self { inner }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the node's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a derivation this also registers the node as a dependency.
    /// Re-entering a node that is still computing fails with a cycle error.
    pub fn get(&self) -> Result<T> {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            return (self.inner.derive)();
        };
        if runtime.is_computing(self.inner.id) {
            return Err(runtime.cycle_error(self.inner.id));
        }

        runtime.report_observed(self.inner.id);
        let _batch = runtime.batch();
        self.inner.refresh_in(&runtime)?;

        self.inner.value.borrow().clone().ok_or_else(|| {
            ReactiveError::Consistency(format!(
                "computed `{}` resolved without a cached value",
                self.inner.name
            ))
        })
    }

    /// Get the current value without registering a dependency.
    pub fn peek(&self) -> Result<T> {
        match self.inner.runtime.upgrade() {
            Some(runtime) => {
                let _untracked = runtime.tracker().untracked();
                self.get()
            }
            None => self.get(),
        }
    }

    /// Current dependency state of the node.
    pub fn state(&self) -> DependencyState {
        self.inner
            .runtime
            .upgrade()
            .and_then(|runtime| runtime.state(self.inner.id))
            .unwrap_or(DependencyState::NotTracking)
    }

    /// Check if the node holds a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Get the number of derivations observing this node.
    pub fn observer_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.observer_count(self.inner.id))
    }

    /// Get the number of nodes read during the latest evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.inner.id))
    }
}

impl<T: 'static> ComputedInner<T> {
    fn refresh_in(&self, runtime: &Runtime) -> Result<bool> {
        if runtime.is_computing(self.id) {
            return Err(runtime.cycle_error(self.id));
        }
        let stale = self.value.borrow().is_none() || runtime.should_compute(self.id);
        if !stale {
            return Ok(false);
        }

        let changed = self.recompute(runtime)?;
        if changed {
            runtime.propagate_change_confirmed(self.id);
        }
        Ok(changed)
    }

    fn recompute(&self, runtime: &Runtime) -> Result<bool> {
        tracing::trace!(computed = %self.id, name = %self.name, "recomputing");
        match runtime.track(self.id, || (self.derive)()) {
            Ok(next) => {
                let changed = match self.value.borrow().as_ref() {
                    Some(current) => self.equality.changed(current, &next),
                    None => true,
                };
                if changed {
                    let previous = self.value.borrow_mut().replace(next);
                    drop(previous);
                } else {
                    tracing::trace!(computed = %self.id, "value unchanged, observers untouched");
                }
                Ok(changed)
            }
            Err(error) => {
                let previous = self.value.borrow_mut().take();
                drop(previous);
                runtime.mark_failed(self.id);
                Err(match error {
                    ReactiveError::Derivation(error) => ReactiveError::Derivation(error.at(&self.name)),
                    other => other,
                })
            }
        }
    }
}

impl<T: 'static> ComputedNode for ComputedInner<T> {
    fn refresh(&self) -> Result<bool> {
        let runtime = self.runtime.upgrade().ok_or_else(|| {
            ReactiveError::Consistency(format!("computed `{}` outlived its engine", self.name))
        })?;
        self.refresh_in(&runtime)
    }

    fn release_value(&self) {
        let previous = self.value.borrow_mut().take();
        drop(previous);
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.release_node(self.id);
        }
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: Clone + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
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
    use crate::error::UsageError;
    use std::cell::Cell as StdCell;

    fn counter() -> (Rc<StdCell<usize>>, Rc<StdCell<usize>>) {
        let count = Rc::new(StdCell::new(0));
        (Rc::clone(&count), count)
    }

    fn bump(count: &StdCell<usize>) {
        count.set(count.get() + 1);
    }

    #[test]
    fn computed_runs_on_first_access() {
        let engine = Engine::new();
        let (calls, inner) = counter();
        let computed = Computed::new(&engine, move || {
            bump(&inner);
            42
        });

        // Not computed yet
        assert!(!computed.has_value());
        assert_eq!(calls.get(), 0);
        assert_eq!(computed.state(), DependencyState::NotTracking);

        // First access triggers computation
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(calls.get(), 1);
        assert!(computed.has_value());
        assert_eq!(computed.state(), DependencyState::UpToDate);
    }

    #[test]
    fn computed_caches_value_when_up_to_date() {
        let engine = Engine::new();
        let source = engine.cell(2);
        let (calls, inner) = counter();
        let reader = source.clone();
        let computed = Computed::new(&engine, move || {
            bump(&inner);
            reader.get() * 10
        });

        assert_eq!(computed.get().unwrap(), 20);
        assert_eq!(computed.get().unwrap(), 20);
        assert_eq!(computed.get().unwrap(), 20);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn computed_recomputes_after_dependency_changes() {
        let engine = Engine::new();
        let source = engine.cell(1);
        let (calls, inner) = counter();
        let reader = source.clone();
        let computed = Computed::new(&engine, move || {
            bump(&inner);
            reader.get() + 1
        });

        assert_eq!(computed.get().unwrap(), 2);
        source.set(5).unwrap();
        assert_eq!(computed.state(), DependencyState::Stale);
        assert_eq!(computed.get().unwrap(), 6);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn computed_chain_resolves_possibly_stale() {
        let engine = Engine::new();
        let source = engine.cell(2);
        let reader = source.clone();
        let parity = Computed::new(&engine, move || reader.get() % 2);
        let (calls, inner) = counter();
        let upstream = parity.clone();
        let label = Computed::new(&engine, move || {
            bump(&inner);
            if upstream.get().unwrap() == 0 { "even" } else { "odd" }
        });

        assert_eq!(label.get().unwrap(), "even");
        source.set(4).unwrap();
        assert_eq!(label.state(), DependencyState::PossiblyStale);

        // parity recomputes to the same value, so label does not re-run
        assert_eq!(label.get().unwrap(), "even");
        assert_eq!(calls.get(), 1);
        assert_eq!(label.state(), DependencyState::UpToDate);

        source.set(5).unwrap();
        assert_eq!(label.get().unwrap(), "odd");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn failed_derivation_caches_nothing_and_retries() {
        let engine = Engine::new();
        let divisor = engine.cell(0);
        let reader = divisor.clone();
        let ratio = Computed::try_new(&engine, move || {
            let d = reader.get();
            if d == 0 {
                return Err("division by zero".into());
            }
            Ok(100 / d)
        });

        let err = ratio.get().unwrap_err();
        assert!(err.is_derivation());
        assert!(!ratio.has_value());
        assert_eq!(ratio.state(), DependencyState::Stale);
        // The read before the failure is still tracked
        assert_eq!(ratio.dependency_count(), 1);

        divisor.set(4).unwrap();
        assert_eq!(ratio.get().unwrap(), 25);
    }

    #[test]
    fn derivation_error_names_the_failing_node() {
        let engine = Engine::new();
        let failing = Computed::<i32>::with_options(
            &engine,
            ComputedOptions::default().named("parse"),
            || Err("bad digit".into()),
        );
        match failing.get() {
            Err(ReactiveError::Derivation(error)) => assert_eq!(error.node(), Some("parse")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn writing_inside_derivation_is_rejected() {
        let engine = Engine::new();
        let target = engine.cell(0);
        let writer = target.clone();
        let computed = Computed::try_new(&engine, move || {
            writer.set(1)?;
            Ok(1)
        });

        let err = computed.get().unwrap_err();
        assert!(matches!(
            err,
            ReactiveError::Usage(UsageError::WriteInsideComputed { .. })
        ));
        assert_eq!(target.get(), 0);

        // The engine is still usable afterwards
        target.set(2).unwrap();
        assert_eq!(target.get(), 2);
    }

    #[test]
    fn cycle_is_detected() {
        let engine = Engine::new();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));

        let other = Rc::clone(&slot);
        let a = Computed::try_new(&engine, move || {
            let b = other.borrow().clone();
            match b {
                Some(b) => Ok(b.get()? + 1),
                None => Ok(0),
            }
        });
        let upstream = a.clone();
        let b = Computed::try_new(&engine, move || Ok(upstream.get()? + 1));
        *slot.borrow_mut() = Some(b.clone());

        let err = a.get().unwrap_err();
        assert!(err.is_cycle());
        match err {
            ReactiveError::Usage(UsageError::Cycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // Nothing is left marked as computing
        slot.borrow_mut().take();
        assert_eq!(a.get().unwrap(), 0);
    }

    #[test]
    fn unobserved_computed_is_suspended() {
        let engine = Engine::new();
        let source = engine.cell(1);
        let reader = source.clone();
        let doubled = Computed::new(&engine, move || reader.get() * 2);

        let observed = doubled.clone();
        let reaction = engine.autorun(move || {
            observed.get()?;
            Ok(())
        });
        assert_eq!(doubled.observer_count(), 1);
        assert_eq!(source.observer_count(), 1);

        reaction.dispose();
        assert_eq!(doubled.state(), DependencyState::NotTracking);
        assert!(!doubled.has_value());
        assert_eq!(source.observer_count(), 0);

        // Reading again derives from scratch
        assert_eq!(doubled.get().unwrap(), 2);
        assert_eq!(source.observer_count(), 1);
    }

    #[test]
    fn keep_alive_computed_is_not_suspended() {
        let engine = Engine::new();
        let source = engine.cell(1);
        let reader = source.clone();
        let doubled = Computed::with_options(
            &engine,
            ComputedOptions::default().keep_alive(true),
            move || Ok(reader.get() * 2),
        );

        let observed = doubled.clone();
        let reaction = engine.autorun(move || {
            observed.get()?;
            Ok(())
        });
        reaction.dispose();

        assert!(doubled.has_value());
        assert_eq!(doubled.state(), DependencyState::UpToDate);
    }

    #[test]
    fn peek_does_not_subscribe() {
        let engine = Engine::new();
        let source = engine.cell(3);
        let reader = source.clone();
        let tripled = Computed::new(&engine, move || reader.get() * 3);

        let peeked = tripled.clone();
        let runs = Rc::new(StdCell::new(0));
        let count = Rc::clone(&runs);
        let _reaction = engine.autorun(move || {
            peeked.peek()?;
            bump(&count);
            Ok(())
        });

        assert_eq!(tripled.observer_count(), 0);
        source.set(4).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn dropping_computed_releases_edges() {
        let engine = Engine::new();
        let source = engine.cell(1);
        let reader = source.clone();
        let computed = Computed::new(&engine, move || reader.get());
        computed.get().unwrap();
        assert_eq!(source.observer_count(), 1);

        drop(computed);
        assert_eq!(source.observer_count(), 0);
        assert_eq!(engine.node_count(), 1);
    }
}
