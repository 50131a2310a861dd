//! Reactive Primitives
//!
//! This module implements the typed surface of the engine: cells, computed
//! nodes and reactions, plus the runtime that coordinates them.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A Cell is a container for mutable state. When a cell is read within a
//! derivation (a computed node or reaction), the cell registers that
//! derivation as an observer. When the cell's value changes, observers are
//! marked stale.
//!
//! ## Computed Nodes
//!
//! A Computed node is a derived value that caches its result. It
//! re-evaluates only when one of its dependencies actually changed, and it
//! suppresses propagation when the new value equals the old one.
//!
//! ## Reactions
//!
//! A Reaction is a side-effecting computation that runs after state
//! settles, whenever its dependencies changed. Reactions synchronize
//! reactive state with the outside world.
//!
//! ## Batches
//!
//! Writes made inside a transaction are coalesced: reactions run once,
//! when the outermost transaction ends, and never observe intermediate
//! states.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered automatically. Each engine keeps a stack of
//! tracking frames; a read records itself in the top frame, and when the
//! frame is popped the recorded set replaces the derivation's previous
//! dependencies.

mod atom;
mod cell;
mod computed;
mod context;
mod equality;
mod introspection;
mod props;
mod reaction;
mod runtime;

pub use atom::Atom;
pub use cell::{Cell, CellOptions, ListenerId};
pub use computed::{Computed, ComputedOptions};
pub use context::{FrameGuard, Tracker};
pub use equality::{Equality, EqualityKind};
pub use introspection::{is_computed, Trackable};
pub use props::{Extend, PropertyHolder};
pub use reaction::{Reaction, ReactionOptions, ReactionStatus};
pub use runtime::{Engine, ErrorHandler};
