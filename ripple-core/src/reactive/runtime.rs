//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, computed
//! nodes and reactions. It owns the dependency graph, the tracking stack,
//! the batch counter and the queue of scheduled reactions.
//!
//! # How It Works
//!
//! 1. When a derivation reads a cell or computed node, the runtime records
//!    the read in the top tracking frame and adds the observer edge.
//!
//! 2. When a cell changes, the runtime opens a batch and runs the mark
//!    phase on the graph: direct observers become stale, nodes further
//!    downstream become possibly stale, and reached reactions are queued.
//!
//! 3. When the outermost batch closes, queued reactions run in order.
//!    Before a reaction body runs, its dependencies are resolved bottom-up:
//!    possibly-stale computed nodes are refreshed one by one until either
//!    one of them produced a new value (the reaction must run) or all of
//!    them turned out unchanged (the reaction is skipped).
//!
//! 4. Computed nodes that lost their last observer during the batch are
//!    suspended: their edges and cached value are released.
//!
//! # Instances
//!
//! Every [`Engine`] is independent. Handles keep a weak reference to their
//! runtime and the runtime keeps only weak references to computed nodes,
//! so dropping handles releases graph nodes.

use std::any::Any;
use std::cell::{Cell as StdCell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::cell::Cell;
use super::computed::Computed;
use super::context::{FrameGuard, Tracker};
use super::equality::Equality;
use super::reaction::{Reaction, ReactionCore, ReactionOptions};
use crate::config::EngineConfig;
use crate::error::{ReactiveError, Result, UsageError};
use crate::graph::{DependencyGraph, DependencyState, Node, NodeId, NodeKind};

/// Handler invoked with errors raised by reactions.
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

/// Payload of a panic caught while settling.
type PanicPayload = Box<dyn Any + Send + 'static>;

/// A computed node as seen by the runtime, with its value type erased.
pub(crate) trait ComputedNode {
    /// Bring the node up to date. Returns whether its value changed.
    fn refresh(&self) -> Result<bool>;

    /// Drop the cached value after the node was suspended.
    fn release_value(&self);
}

/// Callbacks fired when a node's observer set becomes non-empty or empty.
pub(crate) trait ObservationHooks {
    fn became_observed(&self);
    fn became_unobserved(&self);
}

pub(crate) struct Runtime {
    config: EngineConfig,
    graph: RefCell<DependencyGraph>,
    tracker: Tracker,
    batch_depth: StdCell<usize>,
    running_reactions: StdCell<bool>,
    /// Cleared while a computed node derives its value.
    allow_state_changes: StdCell<bool>,
    pending_reactions: RefCell<VecDeque<NodeId>>,
    pending_unobservations: RefCell<Vec<NodeId>>,
    /// Nodes whose handles were dropped while the graph was busy.
    orphans: RefCell<Vec<NodeId>>,
    computeds: RefCell<HashMap<NodeId, Weak<dyn ComputedNode>>>,
    reactions: RefCell<HashMap<NodeId, Rc<ReactionCore>>>,
    hooks: RefCell<HashMap<NodeId, Weak<dyn ObservationHooks>>>,
    error_handler: RefCell<ErrorHandler>,
}

impl Runtime {
    fn new(config: EngineConfig) -> Rc<Self> {
        Rc::new(Self {
            config,
            graph: RefCell::new(DependencyGraph::new()),
            tracker: Tracker::new(),
            batch_depth: StdCell::new(0),
            running_reactions: StdCell::new(false),
            allow_state_changes: StdCell::new(true),
            pending_reactions: RefCell::new(VecDeque::new()),
            pending_unobservations: RefCell::new(Vec::new()),
            orphans: RefCell::new(Vec::new()),
            computeds: RefCell::new(HashMap::new()),
            reactions: RefCell::new(HashMap::new()),
            hooks: RefCell::new(HashMap::new()),
            error_handler: RefCell::new(default_error_handler()),
        })
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn add_node(&self, node: Node) -> NodeId {
        self.graph.borrow_mut().add_node(node)
    }

    pub(crate) fn register_computed(&self, id: NodeId, node: Weak<dyn ComputedNode>) {
        self.computeds.borrow_mut().insert(id, node);
    }

    pub(crate) fn register_reaction(&self, core: Rc<ReactionCore>) {
        self.reactions.borrow_mut().insert(core.id(), core);
    }

    pub(crate) fn register_hooks(&self, id: NodeId, hooks: Weak<dyn ObservationHooks>) {
        self.hooks.borrow_mut().insert(id, hooks);
    }

    /// Forget a node whose last handle was dropped.
    pub(crate) fn release_node(&self, id: NodeId) {
        if let Ok(mut orphans) = self.orphans.try_borrow_mut() {
            orphans.push(id);
        }
        self.collect_orphans();
    }

    fn collect_orphans(&self) {
        // Retried at the end of the next batch if the graph is busy.
        let Ok(mut graph) = self.graph.try_borrow_mut() else {
            return;
        };
        let ids = match self.orphans.try_borrow_mut() {
            Ok(mut orphans) => std::mem::take(&mut *orphans),
            Err(_) => return,
        };
        if ids.is_empty() {
            return;
        }

        let mut unobserved = Vec::new();
        for id in &ids {
            unobserved.extend(graph.remove_node(*id));
        }
        drop(graph);

        if let Ok(mut computeds) = self.computeds.try_borrow_mut() {
            for id in &ids {
                computeds.remove(id);
            }
        }
        if let Ok(mut hooks) = self.hooks.try_borrow_mut() {
            for id in &ids {
                hooks.remove(id);
            }
        }

        self.queue_unobserved(unobserved);
        if self.batch_depth.get() == 0 {
            self.process_unobservations();
        }
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Record a read of `id` by the derivation on top of the tracking stack.
    pub(crate) fn report_observed(&self, id: NodeId) {
        let Some(owner) = self.tracker.record(id) else {
            return;
        };
        let first_observer = self.graph.borrow_mut().add_edge(id, owner);
        if first_observer {
            self.fire_observed(id);
        }
    }

    /// Fail if writing `id` is not allowed right now.
    pub(crate) fn check_write(&self, id: NodeId) -> Result<()> {
        if !self.allow_state_changes.get() {
            let graph = self.graph.borrow();
            let computed = self
                .tracker
                .owners()
                .into_iter()
                .rev()
                .find(|owner| graph.kind(*owner) == Some(NodeKind::Computed))
                .map(|owner| graph.name(owner))
                .unwrap_or_else(|| "<unknown>".to_string());
            return Err(UsageError::WriteInsideComputed {
                cell: graph.name(id),
                computed,
            }
            .into());
        }

        if self.config.enforce_transactions
            && self.batch_depth.get() == 0
            && self.graph.borrow().observer_count(id) > 0
        {
            return Err(UsageError::OutsideTransaction {
                cell: self.graph.borrow().name(id),
            }
            .into());
        }

        Ok(())
    }

    /// A cell changed: mark downstream nodes and queue reactions.
    pub(crate) fn report_changed(&self, id: NodeId) {
        let _batch = self.batch();
        let scheduled = self.graph.borrow_mut().propagate_changed(id);
        tracing::trace!(node = %id, reactions = scheduled.len(), "change propagated");
        for reaction in scheduled {
            self.schedule(reaction);
        }
    }

    pub(crate) fn propagate_change_confirmed(&self, id: NodeId) {
        self.graph.borrow_mut().propagate_change_confirmed(id);
    }

    pub(crate) fn mark_failed(&self, id: NodeId) {
        if let Some(node) = self.graph.borrow_mut().get_mut(id) {
            node.state = DependencyState::Stale;
            node.failed = true;
        }
    }

    /// Force a derivation to re-run on its next resolution.
    pub(crate) fn invalidate(&self, id: NodeId) {
        self.graph
            .borrow_mut()
            .set_state(id, DependencyState::Stale);
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    /// Open a batch that closes when the guard drops.
    pub(crate) fn batch(&self) -> BatchGuard<'_> {
        self.start_batch();
        BatchGuard { runtime: self }
    }

    pub(crate) fn start_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    pub(crate) fn end_batch(&self) {
        let depth = self.batch_depth.get();
        if depth == 0 {
            tracing::warn!("end_batch called without a matching start_batch");
            return;
        }
        self.batch_depth.set(depth - 1);
        if depth == 1 {
            let panicked = self.run_reactions();
            self.collect_orphans();
            self.process_unobservations();
            if let Some(payload) = panicked {
                panic::resume_unwind(payload);
            }
        }
    }

    /// Close a batch opened around a user closure, settling even when the
    /// closure panicked. The panic resumes once the engine has settled.
    pub(crate) fn close_batch<R>(&self, result: std::thread::Result<R>) -> R {
        self.end_batch();
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub(crate) fn batch_depth(&self) -> usize {
        self.batch_depth.get()
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    /// Queue a reaction and run the queue if no batch is open.
    pub(crate) fn schedule(&self, id: NodeId) {
        let core = self.reactions.borrow().get(&id).cloned();
        let Some(core) = core else {
            return;
        };
        if core.mark_scheduled() {
            self.pending_reactions.borrow_mut().push_back(id);
        }
        if let Some(payload) = self.run_reactions() {
            panic::resume_unwind(payload);
        }
    }

    /// Run queued reactions until the queue is empty.
    ///
    /// A reaction that panics does not stop the others in its pass. The
    /// first panic is handed back once the queue has drained.
    fn run_reactions(&self) -> Option<PanicPayload> {
        if self.batch_depth.get() > 0 || self.running_reactions.get() {
            return None;
        }
        let _running = Restore::set(&self.running_reactions, true);
        let limit = self.config.reaction_iteration_limit.max(1);
        let mut iterations = 0;
        let mut panicked = None;

        loop {
            let pass: Vec<NodeId> = self.pending_reactions.borrow_mut().drain(..).collect();
            if pass.is_empty() {
                break;
            }

            iterations += 1;
            if iterations > limit {
                self.abandon_reactions(limit, pass);
                break;
            }

            tracing::debug!(pass = iterations, reactions = pass.len(), "running reactions");
            for id in pass {
                let core = self.reactions.borrow().get(&id).cloned();
                let Some(core) = core else {
                    continue;
                };
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| core.run(self))) {
                    tracing::error!(reaction = %id, name = %core.name(), "reaction panicked");
                    if panicked.is_none() {
                        panicked = Some(payload);
                    }
                }
            }
        }

        panicked
    }

    fn abandon_reactions(&self, limit: usize, pass: Vec<NodeId>) {
        let mut names = Vec::with_capacity(pass.len());
        for id in pass {
            let core = self.reactions.borrow().get(&id).cloned();
            if let Some(core) = core {
                core.unschedule();
                names.push(core.name().to_string());
            }
        }
        let error = ReactiveError::from(UsageError::NoConvergence {
            limit,
            reactions: names,
        });
        tracing::error!(error = %error, "reaction loop aborted");
        self.report_error(&error);
    }

    pub(crate) fn dispose_reaction(&self, id: NodeId) {
        let _batch = self.batch();
        let unobserved = self.graph.borrow_mut().remove_node(id);
        self.queue_unobserved(unobserved);
        let removed = self.reactions.borrow_mut().remove(&id);
        drop(removed);
        tracing::debug!(node = %id, "reaction disposed");
    }

    pub(crate) fn report_error(&self, error: &ReactiveError) {
        let handler = Rc::clone(&self.error_handler.borrow());
        handler(error);
    }

    // ------------------------------------------------------------------
    // Derivations
    // ------------------------------------------------------------------

    /// Decide whether a derivation must re-run, resolving possibly-stale
    /// computed dependencies bottom-up along the way.
    pub(crate) fn should_compute(&self, id: NodeId) -> bool {
        let dependencies: SmallVec<[NodeId; 8]> = {
            let graph = self.graph.borrow();
            let Some(node) = graph.get(id) else {
                return true;
            };
            match node.state() {
                DependencyState::UpToDate => return node.is_failed(),
                DependencyState::NotTracking | DependencyState::Stale => return true,
                DependencyState::PossiblyStale => node.dependencies().iter().copied().collect(),
            }
        };

        for dep in dependencies {
            let computed = self.computed_node(dep);
            if let Some(computed) = computed {
                // A failing dependency counts as a change so the reader
                // re-runs and sees the error itself.
                if computed.refresh().is_err() {
                    return true;
                }
                if self.graph.borrow().state(id) == Some(DependencyState::Stale) {
                    return true;
                }
            }
        }

        self.graph
            .borrow_mut()
            .set_state(id, DependencyState::UpToDate);
        false
    }

    /// Run `f` as the derivation of `owner`, recording every read and
    /// rebinding the owner's dependencies afterwards.
    pub(crate) fn track<R>(&self, owner: NodeId, f: impl FnOnce() -> R) -> R {
        let kind = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(owner) {
                Some(node) => {
                    node.state = DependencyState::UpToDate;
                    node.failed = false;
                    if node.kind() == NodeKind::Computed {
                        node.computing = true;
                    }
                    Some(node.kind())
                }
                None => None,
            }
        };
        let Some(kind) = kind else {
            let _untracked = self.tracker.untracked();
            return f();
        };

        let computing = kind == NodeKind::Computed;
        let guard = DerivationGuard {
            runtime: self,
            owner,
            computing,
            previous_allow: self.allow_state_changes.replace(!computing),
            frame: Some(self.tracker.enter(owner)),
        };
        let result = f();
        let dependencies = guard.finish();
        self.bind(owner, dependencies);
        result
    }

    fn bind(&self, owner: NodeId, dependencies: IndexSet<NodeId>) {
        let rebind = self.graph.borrow_mut().rebind(owner, dependencies);
        for id in rebind.observed {
            self.fire_observed(id);
        }
        self.queue_unobserved(rebind.unobserved);
    }

    pub(crate) fn is_computing(&self, id: NodeId) -> bool {
        self.graph.borrow().get(id).is_some_and(|node| node.computing)
    }

    /// Build the error for re-entering `id` while it is computing.
    pub(crate) fn cycle_error(&self, id: NodeId) -> ReactiveError {
        let graph = self.graph.borrow();
        let owners = self.tracker.owners();
        let mut path: Vec<String> = match owners.iter().position(|owner| *owner == id) {
            Some(start) => owners[start..].iter().map(|owner| graph.name(*owner)).collect(),
            // Reached without a frame of its own: start from `id` and follow
            // the nodes still computing above it.
            None => std::iter::once(id)
                .chain(
                    owners
                        .into_iter()
                        .filter(|owner| graph.get(*owner).is_some_and(|node| node.computing)),
                )
                .map(|owner| graph.name(owner))
                .collect(),
        };
        path.push(graph.name(id));
        tracing::warn!(node = %id, cycle = ?path, "cycle detected");
        UsageError::Cycle { path }.into()
    }

    fn computed_node(&self, id: NodeId) -> Option<Rc<dyn ComputedNode>> {
        if self.graph.borrow().kind(id) != Some(NodeKind::Computed) {
            return None;
        }
        self.computeds.borrow().get(&id).and_then(Weak::upgrade)
    }

    // ------------------------------------------------------------------
    // Observation bookkeeping
    // ------------------------------------------------------------------

    fn queue_unobserved(&self, ids: Vec<NodeId>) {
        if ids.is_empty() {
            return;
        }
        let mut graph = self.graph.borrow_mut();
        let mut pending = self.pending_unobservations.borrow_mut();
        for id in ids {
            if let Some(node) = graph.get_mut(id) {
                if !node.pending_unobservation {
                    node.pending_unobservation = true;
                    pending.push(id);
                }
            }
        }
    }

    fn process_unobservations(&self) {
        enum Action {
            Suspend,
            Notify,
            Nothing,
        }

        loop {
            let pending = std::mem::take(&mut *self.pending_unobservations.borrow_mut());
            if pending.is_empty() {
                break;
            }

            for id in pending {
                let action = {
                    let mut graph = self.graph.borrow_mut();
                    match graph.get_mut(id) {
                        Some(node) => {
                            node.pending_unobservation = false;
                            if node.is_observed() {
                                Action::Nothing
                            } else {
                                match node.kind() {
                                    NodeKind::Computed
                                        if !node.keep_alive
                                            && node.state() != DependencyState::NotTracking =>
                                    {
                                        Action::Suspend
                                    }
                                    NodeKind::Cell => Action::Notify,
                                    _ => Action::Nothing,
                                }
                            }
                        }
                        None => Action::Nothing,
                    }
                };

                match action {
                    Action::Suspend => {
                        let unobserved = self.graph.borrow_mut().suspend(id);
                        tracing::debug!(node = %id, "computed suspended after losing its observers");
                        let computed = self.computeds.borrow().get(&id).and_then(Weak::upgrade);
                        if let Some(computed) = computed {
                            computed.release_value();
                        }
                        self.queue_unobserved(unobserved);
                    }
                    Action::Notify => self.fire_unobserved(id),
                    Action::Nothing => {}
                }
            }
        }
    }

    fn fire_observed(&self, id: NodeId) {
        let hooks = self.hooks.borrow().get(&id).and_then(Weak::upgrade);
        if let Some(hooks) = hooks {
            hooks.became_observed();
        }
    }

    fn fire_unobserved(&self, id: NodeId) {
        let hooks = self.hooks.borrow().get(&id).and_then(Weak::upgrade);
        if let Some(hooks) = hooks {
            hooks.became_unobserved();
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub(crate) fn observer_count(&self, id: NodeId) -> usize {
        self.graph.borrow().observer_count(id)
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        self.graph.borrow().dependency_count(id)
    }

    pub(crate) fn state(&self, id: NodeId) -> Option<DependencyState> {
        self.graph.borrow().state(id)
    }

    pub(crate) fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.graph.borrow().kind(id)
    }

    fn dependency_names(&self, id: NodeId) -> Vec<String> {
        let graph = self.graph.borrow();
        graph
            .get(id)
            .map(|node| node.dependencies().iter().map(|dep| graph.name(*dep)).collect())
            .unwrap_or_default()
    }

    fn observer_names(&self, id: NodeId) -> Vec<String> {
        let graph = self.graph.borrow();
        graph
            .get(id)
            .map(|node| node.observers().iter().map(|obs| graph.name(*obs)).collect())
            .unwrap_or_default()
    }
}

fn default_error_handler() -> ErrorHandler {
    Rc::new(|error: &ReactiveError| {
        tracing::error!(error = %error, "reaction failed");
    })
}

/// Closes a batch when dropped.
///
/// While unwinding from a panic the batch counter is restored but no
/// reactions run from the destructor. Entry points that run user code in a
/// batch ([`Engine::transaction`], [`Engine::action`]) catch the panic and
/// settle before resuming it.
pub(crate) struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let depth = self.runtime.batch_depth.get();
            self.runtime.batch_depth.set(depth.saturating_sub(1));
        } else {
            self.runtime.end_batch();
        }
    }
}

/// Restores a flag to its previous value when dropped.
struct Restore<'a, T: Copy> {
    cell: &'a StdCell<T>,
    previous: T,
}

impl<'a, T: Copy> Restore<'a, T> {
    fn set(cell: &'a StdCell<T>, value: T) -> Self {
        Self {
            previous: cell.replace(value),
            cell,
        }
    }
}

impl<T: Copy> Drop for Restore<'_, T> {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

/// Undoes the bookkeeping of a running derivation, including on panic.
struct DerivationGuard<'a> {
    runtime: &'a Runtime,
    owner: NodeId,
    computing: bool,
    previous_allow: bool,
    frame: Option<FrameGuard<'a>>,
}

impl DerivationGuard<'_> {
    fn finish(mut self) -> IndexSet<NodeId> {
        self.frame.take().map(FrameGuard::finish).unwrap_or_default()
    }
}

impl Drop for DerivationGuard<'_> {
    fn drop(&mut self) {
        drop(self.frame.take());
        self.runtime.allow_state_changes.set(self.previous_allow);
        if self.computing {
            if let Ok(mut graph) = self.runtime.graph.try_borrow_mut() {
                if let Some(node) = graph.get_mut(self.owner) {
                    node.computing = false;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Public engine handle
// ----------------------------------------------------------------------------

/// A reactive engine instance.
///
/// Cloning an `Engine` is cheap and yields another handle to the same
/// runtime. Engines are single-threaded: all propagation and reaction
/// execution happens synchronously on the calling thread.
///
/// # Example
///
/// ```rust,ignore
/// let engine = Engine::new();
/// let count = engine.cell(0);
/// let double = engine.computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
/// let _logger = engine.autorun(move || {
///     println!("double = {}", double.get()?);
///     Ok(())
/// });
///
/// count.set(5)?; // prints "double = 10"
/// ```
#[derive(Clone)]
pub struct Engine {
    runtime: Rc<Runtime>,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        tracing::debug!(engine = ?config.name, "engine created");
        Self {
            runtime: Runtime::new(config),
        }
    }

    pub(crate) fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub(crate) fn downgrade(&self) -> Weak<Runtime> {
        Rc::downgrade(&self.runtime)
    }

    pub(crate) fn upgrade(runtime: &Weak<Runtime>) -> Option<Self> {
        runtime.upgrade().map(|runtime| Self { runtime })
    }

    /// The configuration this engine was created with.
    pub fn config(&self) -> &EngineConfig {
        self.runtime.config()
    }

    /// Create a cell holding `value`.
    pub fn cell<T>(&self, value: T) -> Cell<T>
    where
        T: Clone + PartialEq + 'static,
    {
        Cell::new(self, value)
    }

    /// Create a computed node from an infallible derivation.
    pub fn computed<T, F>(&self, derive: F) -> Computed<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        Computed::new(self, derive)
    }

    /// Create a reaction that runs `effect` now and whenever anything it
    /// read changes. The returned handle disposes the reaction.
    pub fn autorun<F>(&self, effect: F) -> Reaction
    where
        F: FnMut() -> Result<()> + 'static,
    {
        Reaction::with_options(self, ReactionOptions::default(), effect)
    }

    /// Create a reaction that tracks `expr` and runs `effect` with the new
    /// value whenever it changes. The first value does not fire `effect`.
    pub fn reaction<T, E, F>(&self, expr: E, effect: F) -> Reaction
    where
        T: PartialEq + 'static,
        E: Fn() -> Result<T> + 'static,
        F: FnMut(&T) -> Result<()> + 'static,
    {
        Reaction::watch(self, ReactionOptions::default(), Equality::strict(), expr, effect)
    }

    /// Run `effect` once, as soon as `predicate` holds, then dispose.
    pub fn when<P, F>(&self, predicate: P, effect: F) -> Reaction
    where
        P: Fn() -> Result<bool> + 'static,
        F: FnOnce() -> Result<()> + 'static,
    {
        Reaction::when(self, ReactionOptions::default(), predicate, effect)
    }

    /// Run `f` as one transaction: reactions run once, after `f` returns.
    ///
    /// If `f` panics, reactions queued by the writes it made still run
    /// before the panic continues.
    pub fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        self.runtime.start_batch();
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        self.runtime.close_batch(result)
    }

    /// Run `f` as a transaction whose reads are not tracked.
    pub fn action<R>(&self, f: impl FnOnce() -> R) -> R {
        self.runtime.start_batch();
        let result = {
            let _untracked = self.runtime.tracker().untracked();
            panic::catch_unwind(AssertUnwindSafe(f))
        };
        self.runtime.close_batch(result)
    }

    /// Run `f` without recording any reads as dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _untracked = self.runtime.tracker().untracked();
        f()
    }

    /// Open a batch. Must be paired with [`Engine::end_batch`]; prefer
    /// [`Engine::transaction`] which cannot leak.
    pub fn start_batch(&self) {
        self.runtime.start_batch();
    }

    /// Close a batch. Closing the outermost batch settles the engine.
    pub fn end_batch(&self) {
        self.runtime.end_batch();
    }

    /// Whether a batch is currently open.
    pub fn in_batch(&self) -> bool {
        self.runtime.batch_depth() > 0
    }

    /// Current batch nesting depth.
    pub fn batch_depth(&self) -> usize {
        self.runtime.batch_depth()
    }

    /// Whether a derivation is currently recording reads.
    pub fn is_tracking(&self) -> bool {
        self.runtime.tracker().is_tracking()
    }

    /// Replace the handler used for reaction errors that have no handler
    /// of their own.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ReactiveError) + 'static,
    {
        *self.runtime.error_handler.borrow_mut() = Rc::new(handler);
    }

    /// Number of live nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.runtime.graph.borrow().node_count()
    }

    /// Number of observers of a node.
    pub fn observer_count(&self, id: NodeId) -> usize {
        self.runtime.observer_count(id)
    }

    /// Number of dependencies of a node.
    pub fn dependency_count(&self, id: NodeId) -> usize {
        self.runtime.dependency_count(id)
    }

    /// Dependency state of a node, if it exists.
    pub fn state(&self, id: NodeId) -> Option<DependencyState> {
        self.runtime.state(id)
    }

    /// Kind of a node, if it exists.
    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.runtime.kind(id)
    }

    /// Names of a node's dependencies in first-read order.
    pub fn dependency_names(&self, id: NodeId) -> Vec<String> {
        self.runtime.dependency_names(id)
    }

    /// Names of a node's observers in subscription order.
    pub fn observer_names(&self, id: NodeId) -> Vec<String> {
        self.runtime.observer_names(id)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.runtime.config.name)
            .field("nodes", &self.node_count())
            .field("batch_depth", &self.batch_depth())
            .finish()
    }
}
