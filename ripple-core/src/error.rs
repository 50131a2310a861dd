//! Error types for the reactive engine.
//!
//! Errors fall into three families:
//!
//! - [`UsageError`]: the caller did something the engine forbids (writing
//!   from inside a computed derivation, building a cycle, touching a
//!   disposed reaction). The offending call fails; the graph stays intact.
//! - [`DerivationError`]: user code inside a computed node or reaction
//!   failed. The failing node is isolated from the rest of the graph.
//! - `Consistency`: an internal invariant broke. This is a bug in the
//!   engine and is reported instead of returning stale data.

use std::fmt;

/// Top-level error returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error("graph consistency violated: {0}")]
    Consistency(String),
}

impl ReactiveError {
    /// Check whether this error was caused by user computation code.
    pub fn is_derivation(&self) -> bool {
        matches!(self, Self::Derivation(_))
    }

    /// Check whether this is a cycle detected during derivation.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Usage(UsageError::Cycle { .. }))
    }
}

impl From<&str> for ReactiveError {
    fn from(message: &str) -> Self {
        Self::Derivation(DerivationError::new(message))
    }
}

impl From<String> for ReactiveError {
    fn from(message: String) -> Self {
        Self::Derivation(DerivationError::new(message))
    }
}

/// Misuse of the engine API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("cell `{cell}` was written while computed `{computed}` was deriving; computed values must not change state")]
    WriteInsideComputed { cell: String, computed: String },

    #[error("cycle detected in computation: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("reaction `{reaction}` has been disposed")]
    Disposed { reaction: String },

    #[error("reactions did not converge after {limit} iterations (still pending: {})", .reactions.join(", "))]
    NoConvergence { limit: usize, reactions: Vec<String> },

    #[error("observed cell `{cell}` was written outside of a transaction")]
    OutsideTransaction { cell: String },

    #[error("property `{key}` is not defined")]
    UnknownProperty { key: String },

    #[error("property `{key}` does not hold a value of type `{expected}`")]
    PropertyType { key: String, expected: &'static str },

    #[error("property `{key}` is already defined")]
    DuplicateProperty { key: String },

    #[error("property `{key}` is computed and cannot be written")]
    ReadOnlyProperty { key: String },
}

/// A failure raised by a user-supplied computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationError {
    node: Option<String>,
    message: String,
}

impl DerivationError {
    /// Create a new derivation error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            node: None,
            message: message.into(),
        }
    }

    /// Name of the computed node or reaction that failed, once known.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// The message supplied by user code.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attach the failing node's name if none is attached yet.
    ///
    /// The innermost node wins, so errors bubbling up through several
    /// computed nodes keep naming the origin.
    pub(crate) fn at(mut self, node: &str) -> Self {
        if self.node.is_none() {
            self.node = Some(node.to_string());
        }
        self
    }
}

impl fmt::Display for DerivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "derivation `{}` failed: {}", node, self.message),
            None => write!(f, "derivation failed: {}", self.message),
        }
    }
}

impl std::error::Error for DerivationError {}

impl From<&str> for DerivationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for DerivationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
