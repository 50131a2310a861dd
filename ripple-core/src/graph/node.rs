//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Nodes are untyped: values and user closures live in the typed handles
//! (`Cell<T>`, `Computed<T>`, `Reaction`), the graph only keeps edges and
//! bookkeeping state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A trackable cell. These are the roots of the graph.
    /// They have no dependencies, only observers.
    Cell,

    /// A computed node. These have dependencies and may have observers.
    /// They cache their derived value.
    Computed,

    /// A reaction. These are the leaves of the graph.
    /// They have dependencies but no observers.
    Reaction,
}

impl NodeKind {
    /// Whether nodes of this kind run a tracked derivation.
    pub fn is_derivation(self) -> bool {
        matches!(self, Self::Computed | Self::Reaction)
    }
}

/// How up to date a derivation is relative to its dependencies.
///
/// The ordering matters: a higher state is "more stale".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DependencyState {
    /// Never evaluated, or suspended after losing all observers.
    NotTracking,

    /// The cached value (or last run) reflects current dependency values.
    UpToDate,

    /// Some transitive dependency changed; a direct computed dependency
    /// may or may not produce a new value.
    PossiblyStale,

    /// A direct dependency changed. Must recompute before the next read.
    Stale,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    /// Human readable name used in diagnostics.
    name: String,

    /// Staleness of this node's derivation. Cells stay `UpToDate`.
    pub(crate) state: DependencyState,

    /// Nodes that this node read during its most recent evaluation,
    /// in first-read order.
    pub(crate) dependencies: IndexSet<NodeId>,

    /// Nodes that read this node, in subscription order.
    pub(crate) observers: IndexSet<NodeId>,

    /// Set while the derivation runs. Re-entering a computing node is a cycle.
    pub(crate) computing: bool,

    /// The last derivation returned an error and cached nothing.
    pub(crate) failed: bool,

    /// Do not suspend this computed node when it loses its observers.
    pub(crate) keep_alive: bool,

    /// Queued for an unobservation check at the end of the batch.
    pub(crate) pending_unobservation: bool,
}

impl Node {
    /// Create a new node with the given kind and name.
    ///
    /// An empty name is replaced by the kind and ID, e.g. `Computed#12`.
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        let id = NodeId::new();
        let mut name = name.into();
        if name.is_empty() {
            name = format!("{:?}{}", kind, id);
        }
        Self {
            id,
            kind,
            name,
            state: match kind {
                NodeKind::Cell => DependencyState::UpToDate,
                NodeKind::Computed | NodeKind::Reaction => DependencyState::NotTracking,
            },
            dependencies: IndexSet::new(),
            observers: IndexSet::new(),
            computing: false,
            failed: false,
            keep_alive: false,
            pending_unobservation: false,
        }
    }

    /// Create a new cell node.
    pub fn cell(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Cell, name)
    }

    /// Create a new computed node.
    pub fn computed(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Computed, name)
    }

    /// Create a new reaction node.
    pub fn reaction(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Reaction, name)
    }

    /// Keep a computed node tracking after it loses its observers.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current dependency state.
    pub fn state(&self) -> DependencyState {
        self.state
    }

    /// Whether the last derivation failed.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Get all dependencies.
    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    /// Get all observers.
    pub fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    /// Whether anything currently depends on this node.
    pub fn is_observed(&self) -> bool {
        !self.observers.is_empty()
    }

    /// Whether a change notification should cascade through this node.
    ///
    /// Up-to-date nodes cascade once per cycle. Failed nodes keep
    /// cascading so their observers are re-run and can retry.
    pub(crate) fn should_cascade(&self) -> bool {
        self.state == DependencyState::UpToDate || self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn cell_node_starts_up_to_date() {
        let node = Node::cell("count");
        assert_eq!(node.kind(), NodeKind::Cell);
        assert_eq!(node.state(), DependencyState::UpToDate);
        assert_eq!(node.name(), "count");
    }

    #[test]
    fn empty_name_is_generated() {
        let node = Node::reaction("");
        assert_eq!(node.name(), format!("Reaction{}", node.id()));
    }

    #[test]
    fn derivations_start_not_tracking() {
        assert_eq!(Node::computed("c").state(), DependencyState::NotTracking);
        assert_eq!(Node::reaction("r").state(), DependencyState::NotTracking);
        assert!(NodeKind::Computed.is_derivation());
        assert!(!NodeKind::Cell.is_derivation());
    }

    #[test]
    fn states_are_ordered_by_staleness() {
        assert!(DependencyState::Stale > DependencyState::PossiblyStale);
        assert!(DependencyState::PossiblyStale > DependencyState::UpToDate);
        assert!(DependencyState::UpToDate > DependencyState::NotTracking);
    }

    #[test]
    fn failed_nodes_keep_cascading() {
        let mut node = Node::computed("c");
        node.state = DependencyState::Stale;
        assert!(!node.should_cascade());

        node.failed = true;
        assert!(node.should_cascade());
    }
}
