//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between
//! cells, computed nodes and reactions.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes represent cells (sources), computed nodes or reactions (sinks)
//! - Edges represent dependencies: if A reads B, then A is an observer of B
//!
//! When a cell changes, we walk the observer edges and mark affected
//! nodes stale. The runtime then pulls fresh values bottom-up, so every
//! computed node recomputes at most once per settle cycle.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized and owned by one engine instance rather
//!    than spread across handles, so handles can be dropped freely and
//!    edges never keep a node alive.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. We maintain both forward (dependencies) and reverse (observers)
//!    edges. Observer sets keep insertion order, which fixes the order in
//!    which reactions are scheduled.

mod node;
mod propagation;

pub use node::{DependencyState, Node, NodeId, NodeKind};
pub use propagation::{DependencyGraph, Rebind, Scheduled};
