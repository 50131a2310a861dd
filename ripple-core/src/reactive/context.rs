//! Dependency Tracker
//!
//! The tracker records which nodes a derivation reads while it runs.
//! This enables automatic dependency discovery: when a cell is read, the
//! derivation on top of the stack becomes one of its observers.
//!
//! # Implementation
//!
//! Each engine owns one stack of frames. Entering the evaluation of a
//! computed node or reaction pushes a frame; leaving it pops the frame and
//! hands the recorded reads to the graph for diffing. Untracked scopes push
//! a frame without an owner so reads inside them are not recorded.
//!
//! Nested frames are independent: a computed node read from inside a
//! reaction records its own dependencies, and the reaction only records
//! the computed node.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::graph::NodeId;

/// One level of the tracking stack.
#[derive(Debug)]
struct Frame {
    /// The derivation being evaluated, or `None` for an untracked scope.
    owner: Option<NodeId>,

    /// Nodes read during this evaluation, in first-read order.
    dependencies: IndexSet<NodeId>,
}

/// Stack of active derivation frames for one engine.
#[derive(Debug, Default)]
pub struct Tracker {
    frames: RefCell<Vec<Frame>>,
}

impl Tracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame for the given derivation.
    pub fn enter(&self, owner: NodeId) -> FrameGuard<'_> {
        self.push(Some(owner))
    }

    /// Push an untracked frame. Reads inside it are not recorded.
    pub fn untracked(&self) -> FrameGuard<'_> {
        self.push(None)
    }

    fn push(&self, owner: Option<NodeId>) -> FrameGuard<'_> {
        self.frames.borrow_mut().push(Frame {
            owner,
            dependencies: IndexSet::new(),
        });
        FrameGuard {
            tracker: self,
            owner,
            popped: false,
        }
    }

    /// Check if a tracking frame is on top of the stack.
    pub fn is_tracking(&self) -> bool {
        self.current_owner().is_some()
    }

    /// The derivation whose frame is on top, if it is tracked.
    pub fn current_owner(&self) -> Option<NodeId> {
        self.frames.borrow().last().and_then(|frame| frame.owner)
    }

    /// Number of frames on the stack, tracked or not.
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Record a read of `node` in the top frame.
    ///
    /// Returns the owner if this is the first read of `node` in the frame,
    /// so the caller adds the observer edge exactly once.
    pub fn record(&self, node: NodeId) -> Option<NodeId> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.last_mut()?;
        let owner = frame.owner?;
        if owner == node {
            return None;
        }
        frame.dependencies.insert(node).then_some(owner)
    }

    /// Owners of every tracked frame, bottom first.
    pub fn owners(&self) -> Vec<NodeId> {
        self.frames
            .borrow()
            .iter()
            .filter_map(|frame| frame.owner)
            .collect()
    }

    fn pop(&self, owner: Option<NodeId>) -> IndexSet<NodeId> {
        let popped = self.frames.borrow_mut().pop();
        match popped {
            Some(frame) => {
                debug_assert_eq!(
                    frame.owner, owner,
                    "tracker frame mismatch: expected {:?}, got {:?}",
                    owner, frame.owner
                );
                frame.dependencies
            }
            None => IndexSet::new(),
        }
    }
}

/// Guard that pops its frame when dropped.
///
/// This keeps the stack balanced even if the derivation panics. Call
/// [`FrameGuard::finish`] to pop the frame and collect its reads.
pub struct FrameGuard<'a> {
    tracker: &'a Tracker,
    owner: Option<NodeId>,
    popped: bool,
}

impl FrameGuard<'_> {
    /// Pop the frame and return the dependencies it recorded.
    pub fn finish(mut self) -> IndexSet<NodeId> {
        self.popped = true;
        self.tracker.pop(self.owner)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            self.tracker.pop(self.owner);
        }
    }
}
