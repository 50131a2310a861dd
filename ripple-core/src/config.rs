//! Engine Configuration
//!
//! Tunables for a single [`Engine`](crate::reactive::Engine) instance.
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```rust,ignore
//! let config = EngineConfig::from_json(r#"{ "enforce_transactions": true }"#)?;
//! let engine = Engine::with_config(config);
//! ```

use serde::{Deserialize, Serialize};

/// Maximum number of settle passes before reactions are considered to loop.
pub const DEFAULT_REACTION_ITERATION_LIMIT: usize = 100;

/// Configuration for a reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name used in log output. Purely informational.
    pub name: Option<String>,

    /// How many times the settle loop may re-run reactions that keep
    /// scheduling each other before giving up.
    pub reaction_iteration_limit: usize,

    /// Reject writes to observed cells that happen outside a transaction
    /// or action.
    pub enforce_transactions: bool,

    /// Default for the computed `keep_alive` option. When set, computed
    /// nodes keep their dependency edges and cached value after losing
    /// their last observer.
    pub keep_computed_alive: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: None,
            reaction_iteration_limit: DEFAULT_REACTION_ITERATION_LIMIT,
            enforce_transactions: false,
            keep_computed_alive: false,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set the engine name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the settle-loop iteration limit. A limit of zero is raised to one.
    pub fn with_reaction_iteration_limit(mut self, limit: usize) -> Self {
        self.reaction_iteration_limit = limit.max(1);
        self
    }

    /// Require transactions around writes to observed cells.
    pub fn with_enforced_transactions(mut self, enforce: bool) -> Self {
        self.enforce_transactions = enforce;
        self
    }

    /// Keep computed nodes alive after they lose their observers.
    pub fn with_keep_computed_alive(mut self, keep_alive: bool) -> Self {
        self.keep_computed_alive = keep_alive;
        self
    }
}
