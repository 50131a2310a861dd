//! Reaction Implementation
//!
//! A Reaction is a side-effecting computation that re-runs whenever its
//! dependencies change.
//!
//! # How Reactions Work
//!
//! 1. When created, the reaction is scheduled. Outside a batch it runs
//!    immediately to establish its dependencies; inside a batch it runs
//!    when the outermost batch closes.
//!
//! 2. When a dependency changes, the reaction is queued (once per cycle).
//!
//! 3. Before re-running, every possibly-stale computed dependency is
//!    resolved. If none of them actually changed, the body is skipped.
//!
//! 4. The body runs inside a tracking frame. Reads made during the run
//!    become the new dependency set; writes are allowed and are batched.
//!
//! # Variants
//!
//! - [`Engine::autorun`] tracks the whole body.
//! - [`Engine::reaction`] tracks an expression and runs an untracked effect
//!   only when the expression's value changes.
//! - [`Engine::when`] waits for a predicate to hold, runs an effect once
//!   and disposes itself.
//!
//! # Disposal
//!
//! Dropping a `Reaction` handle does not stop it; call
//! [`Reaction::dispose`]. Disposing from inside the reaction's own body is
//! allowed and takes effect when the body returns.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::equality::Equality;
use super::runtime::{Engine, ErrorHandler, Runtime};
use crate::error::{ReactiveError, Result, UsageError};
use crate::graph::{Node, NodeId};

type Body = Box<dyn FnMut(&ReactionScope<'_>) -> Result<()>>;

/// Lifecycle of a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionStatus {
    /// Waiting for a dependency to change.
    Idle,
    /// Queued to run in the current settle cycle.
    Scheduled,
    /// The body is executing.
    Running,
    /// Disposed. Terminal.
    Disposed,
}

/// Options for creating a reaction.
#[derive(Clone, Default)]
pub struct ReactionOptions {
    name: Option<String>,
    on_error: Option<ErrorHandler>,
    fire_immediately: bool,
}

impl ReactionOptions {
    /// Set the reaction's name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Handle this reaction's errors here instead of the engine handler.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReactiveError) + 'static,
    {
        self.on_error = Some(Rc::new(handler));
        self
    }

    /// For [`Engine::reaction`]: run the effect on the first evaluation too.
    pub fn fire_immediately(mut self, fire: bool) -> Self {
        self.fire_immediately = fire;
        self
    }
}

impl fmt::Debug for ReactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionOptions")
            .field("name", &self.name)
            .field("on_error", &self.on_error.is_some())
            .field("fire_immediately", &self.fire_immediately)
            .finish()
    }
}

/// The shared state of a reaction, owned by the runtime while live.
pub(crate) struct ReactionCore {
    id: NodeId,
    name: String,
    runtime: Weak<Runtime>,
    body: RefCell<Body>,
    on_error: Option<ErrorHandler>,
    scheduled: StdCell<bool>,
    running: StdCell<bool>,
    disposed: StdCell<bool>,
    dispose_requested: StdCell<bool>,
    run_count: StdCell<usize>,
}

impl ReactionCore {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> ReactionStatus {
        if self.disposed.get() {
            ReactionStatus::Disposed
        } else if self.running.get() {
            ReactionStatus::Running
        } else if self.scheduled.get() {
            ReactionStatus::Scheduled
        } else {
            ReactionStatus::Idle
        }
    }

    /// Mark the reaction as queued. Returns false if it already was, or if
    /// it is disposed.
    pub(crate) fn mark_scheduled(&self) -> bool {
        if self.disposed.get() || self.scheduled.get() {
            return false;
        }
        self.scheduled.set(true);
        true
    }

    pub(crate) fn unschedule(&self) {
        self.scheduled.set(false);
    }

    /// Run one settle-cycle step for this reaction.
    pub(crate) fn run(&self, runtime: &Runtime) {
        if self.disposed.get() {
            return;
        }
        self.scheduled.set(false);
        let _batch = runtime.batch();

        if runtime.should_compute(self.id) {
            let result = self.run_body(runtime);
            if let Err(error) = result {
                self.report(runtime, error);
            }
        } else {
            tracing::trace!(reaction = %self.id, "dependencies unchanged, run skipped");
        }

        if self.dispose_requested.get() && !self.disposed.get() {
            self.disposed.set(true);
            runtime.dispose_reaction(self.id);
        }
    }

    fn run_body(&self, runtime: &Runtime) -> Result<()> {
        let Ok(mut body) = self.body.try_borrow_mut() else {
            return Err(ReactiveError::Consistency(format!(
                "reaction `{}` re-entered while running",
                self.name
            )));
        };
        tracing::trace!(reaction = %self.id, name = %self.name, "running reaction");
        let _running = Running::enter(&self.running);
        self.run_count.set(self.run_count.get() + 1);
        let scope = ReactionScope {
            runtime,
            core: self,
        };
        (*body)(&scope)
    }

    fn report(&self, runtime: &Runtime, error: ReactiveError) {
        let error = match error {
            ReactiveError::Derivation(error) => ReactiveError::Derivation(error.at(&self.name)),
            other => other,
        };
        match &self.on_error {
            Some(handler) => {
                tracing::debug!(reaction = %self.id, error = %error, "reaction error handled locally");
                handler(&error);
            }
            None => runtime.report_error(&error),
        }
    }

    fn dispose(&self) {
        if self.disposed.get() {
            return;
        }
        if self.running.get() {
            self.dispose_requested.set(true);
            return;
        }
        self.disposed.set(true);
        self.scheduled.set(false);
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.dispose_reaction(self.id);
        }
    }
}

/// Clears the running flag when the body returns or unwinds.
struct Running<'a> {
    flag: &'a StdCell<bool>,
}

impl<'a> Running<'a> {
    fn enter(flag: &'a StdCell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// What a reaction body sees while it runs.
struct ReactionScope<'a> {
    runtime: &'a Runtime,
    core: &'a ReactionCore,
}

impl ReactionScope<'_> {
    /// Run `f` recording its reads as this reaction's dependencies.
    fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        self.runtime.track(self.core.id, f)
    }

    /// Run `f` without recording reads.
    fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _untracked = self.runtime.tracker().untracked();
        f()
    }

    /// Dispose the reaction once the body returns.
    fn dispose(&self) {
        self.core.dispose();
    }
}

/// A handle to a running reaction.
///
/// Clones refer to the same reaction.
///
/// # Example
///
/// ```rust,ignore
/// let count = engine.cell(0);
///
/// let source = count.clone();
/// let logger = engine.autorun(move || {
///     println!("Count is: {}", source.get());
///     Ok(())
/// });
///
/// count.set(5)?; // Prints: "Count is: 5"
/// logger.dispose();
/// ```
#[derive(Clone)]
pub struct Reaction {
    core: Rc<ReactionCore>,
}

impl Reaction {
    /// Create a reaction that tracks the whole of `effect`.
    pub fn new<F>(engine: &Engine, effect: F) -> Self
    where
        F: FnMut() -> Result<()> + 'static,
    {
        Self::with_options(engine, ReactionOptions::default(), effect)
    }

    /// Create a reaction that tracks the whole of `effect`, with options.
    pub fn with_options<F>(engine: &Engine, options: ReactionOptions, mut effect: F) -> Self
    where
        F: FnMut() -> Result<()> + 'static,
    {
        Self::build(engine, options, move |scope| scope.track(&mut effect))
    }

    /// Track `expr`; run `effect` with its value whenever the value changes
    /// under `equality`. `effect` itself is not tracked.
    pub fn watch<T, E, F>(
        engine: &Engine,
        options: ReactionOptions,
        equality: Equality<T>,
        expr: E,
        mut effect: F,
    ) -> Self
    where
        T: 'static,
        E: Fn() -> Result<T> + 'static,
        F: FnMut(&T) -> Result<()> + 'static,
    {
        let fire_immediately = options.fire_immediately;
        let mut previous: Option<T> = None;
        Self::build(engine, options, move |scope| {
            let value = scope.track(&expr)?;
            let first = previous.is_none();
            let changed = match previous.as_ref() {
                Some(previous) => equality.changed(previous, &value),
                None => true,
            };
            if !changed {
                return Ok(());
            }
            let current: &T = previous.insert(value);
            if first && !fire_immediately {
                return Ok(());
            }
            scope.untracked(|| effect(current))
        })
    }

    /// Wait until `predicate` holds, then run `effect` once and dispose.
    pub fn when<P, F>(engine: &Engine, options: ReactionOptions, predicate: P, effect: F) -> Self
    where
        P: Fn() -> Result<bool> + 'static,
        F: FnOnce() -> Result<()> + 'static,
    {
        let mut effect = Some(effect);
        Self::build(engine, options, move |scope| {
            if !scope.track(&predicate)? {
                return Ok(());
            }
            scope.dispose();
            match effect.take() {
                Some(effect) => scope.untracked(effect),
                None => Ok(()),
            }
        })
    }

    fn build<B>(engine: &Engine, options: ReactionOptions, body: B) -> Self
    where
        B: FnMut(&ReactionScope<'_>) -> Result<()> + 'static,
    {
        let runtime = engine.runtime();
        let node = Node::reaction(options.name.unwrap_or_default());
        let name = node.name().to_string();
        let id = runtime.add_node(node);

        let core = Rc::new(ReactionCore {
            id,
            name,
            runtime: engine.downgrade(),
            body: RefCell::new(Box::new(body)),
            on_error: options.on_error,
            scheduled: StdCell::new(false),
            running: StdCell::new(false),
            disposed: StdCell::new(false),
            dispose_requested: StdCell::new(false),
            run_count: StdCell::new(0),
        });
        runtime.register_reaction(Rc::clone(&core));
        tracing::debug!(reaction = %id, name = %core.name, "reaction created");
        runtime.schedule(id);

        Self { core }
    }

    /// Get the reaction's node ID.
    pub fn id(&self) -> NodeId {
        self.core.id
    }

    /// Get the reaction's name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current lifecycle state.
    pub fn status(&self) -> ReactionStatus {
        self.core.status()
    }

    /// Check if the reaction has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.core.disposed.get()
    }

    /// Get the number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.core.run_count.get()
    }

    /// Get the number of nodes read during the latest run.
    pub fn dependency_count(&self) -> usize {
        self.core
            .runtime
            .upgrade()
            .map_or(0, |runtime| runtime.dependency_count(self.core.id))
    }

    /// Force the reaction to run again, even if nothing it read changed.
    pub fn schedule(&self) -> Result<()> {
        if self.core.disposed.get() {
            return Err(UsageError::Disposed {
                reaction: self.core.name.clone(),
            }
            .into());
        }
        if let Some(runtime) = self.core.runtime.upgrade() {
            runtime.invalidate(self.core.id);
            runtime.schedule(self.core.id);
        }
        Ok(())
    }

    /// Stop the reaction and unsubscribe it from every dependency.
    ///
    /// Safe to call from inside the reaction's own body.
    pub fn dispose(&self) {
        self.core.dispose();
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("status", &self.status())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
