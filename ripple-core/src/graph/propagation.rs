//! Dependency Graph and Propagation
//!
//! The graph owns every node's edges and dependency state. It implements
//! the mark phase of propagation; the sweep (recomputing and running
//! reactions) is driven by the runtime, which pulls values bottom-up.
//!
//! # Algorithm
//!
//! 1. When a cell changes, every direct observer becomes `Stale`. Its
//!    input definitely changed.
//! 2. A computed node that just left `UpToDate` marks its own observers
//!    `PossiblyStale`, recursively. Whether they are really stale depends
//!    on whether the computed node produces a new value.
//! 3. Reactions reached by either step are returned to the caller to be
//!    scheduled.
//! 4. When a computed node recomputes and its value changed, observers that
//!    are `PossiblyStale` are confirmed `Stale`. If the value did not
//!    change they stay `PossiblyStale` and resolve back to `UpToDate`
//!    without recomputing.
//!
//! Only nodes leaving `UpToDate` cascade, so each node is visited at most
//! once per cycle no matter how many paths reach it.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::{DependencyState, Node, NodeId, NodeKind};

/// Reactions collected during a mark phase, in scheduling order.
pub type Scheduled = SmallVec<[NodeId; 8]>;

/// Edge changes produced by rebinding a derivation's dependencies.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Rebind {
    /// Dependencies whose observer set went from empty to non-empty.
    pub observed: Vec<NodeId>,

    /// Dependencies whose observer set became empty.
    pub unobserved: Vec<NodeId>,
}

/// The dependency graph: every node plus forward and reverse edges.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        tracing::trace!(node = %id, name = node.name(), kind = ?node.kind(), "node added");
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph together with every edge touching it.
    ///
    /// Returns the dependencies that lost their last observer.
    pub fn remove_node(&mut self, node_id: NodeId) -> Vec<NodeId> {
        let mut unobserved = Vec::new();
        let Some(node) = self.nodes.remove(&node_id) else {
            return unobserved;
        };
        tracing::trace!(node = %node_id, name = node.name(), "node removed");

        for dep_id in &node.dependencies {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.observers.shift_remove(&node_id);
                if dep.observers.is_empty() {
                    unobserved.push(*dep_id);
                }
            }
        }

        for observer_id in &node.observers {
            if let Some(observer) = self.nodes.get_mut(observer_id) {
                observer.dependencies.shift_remove(&node_id);
            }
        }

        unobserved
    }

    /// Get a reference to a node.
    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Check whether a node is present.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get a node's dependency state.
    pub fn state(&self, node_id: NodeId) -> Option<DependencyState> {
        self.nodes.get(&node_id).map(Node::state)
    }

    /// Set a node's dependency state.
    pub fn set_state(&mut self, node_id: NodeId, state: DependencyState) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.state = state;
        }
    }

    /// Get a node's kind.
    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    /// Get a node's name, falling back to its ID for unknown nodes.
    pub fn name(&self, node_id: NodeId) -> String {
        self.nodes
            .get(&node_id)
            .map(|node| node.name().to_string())
            .unwrap_or_else(|| node_id.to_string())
    }

    /// Number of observers of a node.
    pub fn observer_count(&self, node_id: NodeId) -> usize {
        self.nodes.get(&node_id).map_or(0, |node| node.observers.len())
    }

    /// Number of dependencies of a node.
    pub fn dependency_count(&self, node_id: NodeId) -> usize {
        self.nodes
            .get(&node_id)
            .map_or(0, |node| node.dependencies.len())
    }

    /// Add an edge: `observer` depends on `dependency`.
    ///
    /// Returns `true` if `dependency` had no observers before.
    pub fn add_edge(&mut self, dependency: NodeId, observer: NodeId) -> bool {
        let mut first_observer = false;
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            first_observer = dep_node.observers.is_empty();
            if !dep_node.observers.insert(observer) {
                first_observer = false;
            }
        }
        if let Some(observer_node) = self.nodes.get_mut(&observer) {
            observer_node.dependencies.insert(dependency);
        }
        tracing::trace!(dependency = %dependency, observer = %observer, "edge added");
        first_observer
    }

    /// Remove an edge.
    ///
    /// Returns `true` if `dependency` has no observers left.
    pub fn remove_edge(&mut self, dependency: NodeId, observer: NodeId) -> bool {
        if let Some(observer_node) = self.nodes.get_mut(&observer) {
            observer_node.dependencies.shift_remove(&dependency);
        }
        match self.nodes.get_mut(&dependency) {
            Some(dep_node) => {
                let removed = dep_node.observers.shift_remove(&observer);
                tracing::trace!(dependency = %dependency, observer = %observer, "edge removed");
                removed && dep_node.observers.is_empty()
            }
            None => false,
        }
    }

    /// Replace a derivation's dependency set with the one recorded during
    /// its latest evaluation, adding and removing observer edges to match.
    pub fn rebind(&mut self, owner: NodeId, next: IndexSet<NodeId>) -> Rebind {
        let mut rebind = Rebind::default();
        let previous = match self.nodes.get_mut(&owner) {
            Some(node) => std::mem::take(&mut node.dependencies),
            None => return rebind,
        };

        for dep in previous.iter().filter(|dep| !next.contains(*dep)) {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                if dep_node.observers.shift_remove(&owner) && dep_node.observers.is_empty() {
                    rebind.unobserved.push(*dep);
                }
                tracing::trace!(dependency = %dep, observer = %owner, "stale edge dropped");
            }
        }

        let mut kept = IndexSet::with_capacity(next.len());
        for dep in next {
            // Nodes dropped mid-derivation no longer exist.
            if let Some(dep_node) = self.nodes.get_mut(&dep) {
                let was_empty = dep_node.observers.is_empty();
                if dep_node.observers.insert(owner) && was_empty {
                    rebind.observed.push(dep);
                }
                kept.insert(dep);
            }
        }

        if let Some(node) = self.nodes.get_mut(&owner) {
            node.dependencies = kept;
        }
        rebind
    }

    /// Drop all of a derivation's dependencies and mark it not tracking.
    ///
    /// Returns the dependencies that lost their last observer.
    pub fn suspend(&mut self, node_id: NodeId) -> Vec<NodeId> {
        let rebind = self.rebind(node_id, IndexSet::new());
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.state = DependencyState::NotTracking;
            node.failed = false;
        }
        rebind.unobserved
    }

    /// Mark phase for a changed cell (or atom).
    ///
    /// Direct observers become `Stale`; the cascade continues through
    /// computed nodes as `PossiblyStale`. Returns the reactions to schedule.
    pub fn propagate_changed(&mut self, origin: NodeId) -> Scheduled {
        let mut scheduled = Scheduled::new();
        let mut visited = HashSet::new();
        let observers = self.observers_snapshot(origin);

        for observer in observers {
            let cascade = match self.nodes.get_mut(&observer) {
                Some(node) => {
                    let cascade = node.should_cascade();
                    node.state = DependencyState::Stale;
                    cascade
                }
                None => false,
            };
            if cascade {
                self.on_become_stale(observer, &mut visited, &mut scheduled);
            }
        }

        scheduled
    }

    /// A computed node recomputed and its value changed: observers that
    /// were only possibly stale are now known to be stale.
    pub fn propagate_change_confirmed(&mut self, origin: NodeId) {
        for observer in self.observers_snapshot(origin) {
            if let Some(node) = self.nodes.get_mut(&observer) {
                if node.state == DependencyState::PossiblyStale {
                    node.state = DependencyState::Stale;
                }
            }
        }
    }

    fn propagate_maybe_changed(
        &mut self,
        origin: NodeId,
        visited: &mut HashSet<NodeId>,
        scheduled: &mut Scheduled,
    ) {
        for observer in self.observers_snapshot(origin) {
            let cascade = match self.nodes.get_mut(&observer) {
                Some(node) if node.state == DependencyState::UpToDate => {
                    node.state = DependencyState::PossiblyStale;
                    true
                }
                Some(node) => node.failed,
                None => false,
            };
            if cascade {
                self.on_become_stale(observer, visited, scheduled);
            }
        }
    }

    fn on_become_stale(
        &mut self,
        node_id: NodeId,
        visited: &mut HashSet<NodeId>,
        scheduled: &mut Scheduled,
    ) {
        if !visited.insert(node_id) {
            return;
        }
        match self.kind(node_id) {
            Some(NodeKind::Computed) => self.propagate_maybe_changed(node_id, visited, scheduled),
            Some(NodeKind::Reaction) => scheduled.push(node_id),
            Some(NodeKind::Cell) | None => {}
        }
    }

    // Propagation iterates a copy; edges may change while callers react.
    fn observers_snapshot(&self, node_id: NodeId) -> SmallVec<[NodeId; 8]> {
        self.nodes
            .get(&node_id)
            .map(|node| node.observers.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up_to_date(graph: &mut DependencyGraph, ids: &[NodeId]) {
        for id in ids {
            graph.set_state(*id, DependencyState::UpToDate);
        }
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = DependencyGraph::new();

        let id1 = graph.add_node(Node::cell("a"));
        let id2 = graph.add_node(Node::computed("b"));

        assert_eq!(graph.node_count(), 2);

        graph.remove_node(id1);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get(id1).is_none());
        assert!(graph.get(id2).is_some());
    }

    #[test]
    fn add_and_remove_edges() {
        let mut graph = DependencyGraph::new();

        let cell = graph.add_node(Node::cell("a"));
        let computed = graph.add_node(Node::computed("b"));

        assert!(graph.add_edge(cell, computed));
        assert!(!graph.add_edge(cell, computed));

        assert!(graph.get(cell).unwrap().observers().contains(&computed));
        assert!(graph.get(computed).unwrap().dependencies().contains(&cell));

        assert!(graph.remove_edge(cell, computed));
        assert_eq!(graph.observer_count(cell), 0);
        assert_eq!(graph.dependency_count(computed), 0);
    }

    #[test]
    fn removing_a_node_reports_orphaned_dependencies() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(Node::cell("a"));
        let b = graph.add_node(Node::cell("b"));
        let r1 = graph.add_node(Node::reaction("r1"));
        let r2 = graph.add_node(Node::reaction("r2"));
        graph.add_edge(a, r1);
        graph.add_edge(b, r1);
        graph.add_edge(b, r2);

        assert_eq!(graph.remove_node(r1), vec![a]);
        assert_eq!(graph.observer_count(b), 1);
    }

    #[test]
    fn rebind_diffs_dependency_sets() {
        let mut graph = DependencyGraph::new();
        let x = graph.add_node(Node::cell("x"));
        let y = graph.add_node(Node::cell("y"));
        let c = graph.add_node(Node::computed("c"));

        let rebind = graph.rebind(c, IndexSet::from([x]));
        assert_eq!(rebind.observed, vec![x]);
        assert!(rebind.unobserved.is_empty());

        let rebind = graph.rebind(c, IndexSet::from([y]));
        assert_eq!(rebind.observed, vec![y]);
        assert_eq!(rebind.unobserved, vec![x]);
        assert_eq!(graph.observer_count(x), 0);
        assert_eq!(graph.get(c).unwrap().dependencies().len(), 1);
    }

    #[test]
    fn changed_cell_marks_chain() {
        let mut graph = DependencyGraph::new();

        // a -> b -> c -> reaction
        let a = graph.add_node(Node::cell("a"));
        let b = graph.add_node(Node::computed("b"));
        let c = graph.add_node(Node::computed("c"));
        let r = graph.add_node(Node::reaction("r"));
        graph.add_edge(a, b);
        graph.add_edge(b, c);
        graph.add_edge(c, r);
        up_to_date(&mut graph, &[b, c, r]);

        let scheduled = graph.propagate_changed(a);

        assert_eq!(scheduled.as_slice(), &[r]);
        assert_eq!(graph.state(b), Some(DependencyState::Stale));
        assert_eq!(graph.state(c), Some(DependencyState::PossiblyStale));
        assert_eq!(graph.state(r), Some(DependencyState::PossiblyStale));
    }

    #[test]
    fn diamond_schedules_reaction_once() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(Node::cell("a"));
        let b = graph.add_node(Node::computed("b"));
        let c = graph.add_node(Node::computed("c"));
        let d = graph.add_node(Node::computed("d"));
        let r = graph.add_node(Node::reaction("r"));
        graph.add_edge(a, b);
        graph.add_edge(a, c);
        graph.add_edge(b, d);
        graph.add_edge(c, d);
        graph.add_edge(d, r);
        up_to_date(&mut graph, &[b, c, d, r]);

        let scheduled = graph.propagate_changed(a);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(graph.state(d), Some(DependencyState::PossiblyStale));
    }

    #[test]
    fn direct_reaction_is_stale_and_scheduled() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(Node::cell("a"));
        let r = graph.add_node(Node::reaction("r"));
        graph.add_edge(a, r);
        up_to_date(&mut graph, &[r]);

        assert_eq!(graph.propagate_changed(a).as_slice(), &[r]);
        assert_eq!(graph.state(r), Some(DependencyState::Stale));

        // Already stale: no second schedule within the same cycle.
        assert!(graph.propagate_changed(a).is_empty());
    }

    #[test]
    fn confirmation_only_upgrades_possibly_stale() {
        let mut graph = DependencyGraph::new();
        let b = graph.add_node(Node::computed("b"));
        let c = graph.add_node(Node::computed("c"));
        let d = graph.add_node(Node::computed("d"));
        graph.add_edge(b, c);
        graph.add_edge(b, d);
        graph.set_state(c, DependencyState::PossiblyStale);
        graph.set_state(d, DependencyState::UpToDate);

        graph.propagate_change_confirmed(b);
        assert_eq!(graph.state(c), Some(DependencyState::Stale));
        assert_eq!(graph.state(d), Some(DependencyState::UpToDate));
    }

    #[test]
    fn suspend_releases_edges() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(Node::cell("a"));
        let c = graph.add_node(Node::computed("c"));
        graph.add_edge(a, c);
        graph.set_state(c, DependencyState::UpToDate);

        assert_eq!(graph.suspend(c), vec![a]);
        assert_eq!(graph.state(c), Some(DependencyState::NotTracking));
        assert_eq!(graph.dependency_count(c), 0);
    }
}
