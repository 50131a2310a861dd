//! Ripple Core
//!
//! This crate provides a reactive state-propagation engine. It implements:
//!
//! - Trackable cells holding application state
//! - Cached computed nodes with automatic dependency discovery
//! - Reactions that run after state settles
//! - Batching, so several writes settle as one
//!
//! Propagation is glitch-free: a reaction never sees a mix of old and new
//! values, and every derivation runs at most once per settle cycle.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: untyped dependency graph and the mark phase of propagation
//! - `reactive`: typed primitives, dependency tracking and the runtime
//! - `config`: engine configuration
//! - `error`: error types
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::Engine;
//!
//! let engine = Engine::new();
//!
//! // Create a cell
//! let count = engine.cell(0);
//!
//! // Create a derived value
//! let doubled = engine.computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create a reaction
//! let _logger = engine.autorun({
//!     let count = count.clone();
//!     move || {
//!         println!("Count: {}, Doubled: {}", count.get(), doubled.get()?);
//!         Ok(())
//!     }
//! });
//!
//! // Update the cell
//! count.set(5)?;
//! // The reaction runs again, prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::EngineConfig;
pub use error::{DerivationError, ReactiveError, Result, UsageError};
pub use graph::{DependencyState, NodeId, NodeKind};
pub use reactive::{
    is_computed, Atom, Cell, CellOptions, Computed, ComputedOptions, Engine, Equality,
    EqualityKind, PropertyHolder, Reaction, ReactionOptions, ReactionStatus, Trackable,
};
