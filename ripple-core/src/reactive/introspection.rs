//! Introspection
//!
//! A small object-safe view over every trackable handle, so tools and
//! collaborators can inspect nodes without knowing their value type.

use super::atom::Atom;
use super::cell::Cell;
use super::computed::Computed;
use crate::graph::{NodeId, NodeKind};

/// A handle backed by a node in the dependency graph.
pub trait Trackable {
    /// The node's ID.
    fn node_id(&self) -> NodeId;

    /// The node's name.
    fn node_name(&self) -> &str;

    /// The kind of node behind the handle.
    fn node_kind(&self) -> NodeKind;

    /// Number of derivations observing the node.
    fn observer_count(&self) -> usize;
}

/// Check whether a handle is a computed node.
pub fn is_computed(value: &dyn Trackable) -> bool {
    value.node_kind() == NodeKind::Computed
}

impl Trackable for Atom {
    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn node_name(&self) -> &str {
        self.name()
    }

    fn node_kind(&self) -> NodeKind {
        NodeKind::Cell
    }

    fn observer_count(&self) -> usize {
        Atom::observer_count(self)
    }
}

impl<T: Clone + 'static> Trackable for Cell<T> {
    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn node_name(&self) -> &str {
        self.name()
    }

    fn node_kind(&self) -> NodeKind {
        NodeKind::Cell
    }

    fn observer_count(&self) -> usize {
        Cell::observer_count(self)
    }
}

impl<T: Clone + 'static> Trackable for Computed<T> {
    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn node_name(&self) -> &str {
        self.name()
    }

    fn node_kind(&self) -> NodeKind {
        NodeKind::Computed
    }

    fn observer_count(&self) -> usize {
        Computed::observer_count(self)
    }
}
