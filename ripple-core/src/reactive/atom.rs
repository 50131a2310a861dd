//! Atom Implementation
//!
//! An Atom is the bare trackable unit: it holds no value, it only reports
//! reads and changes to its engine. Cells are atoms with a value attached;
//! collaborators that keep their state elsewhere (collection wrappers,
//! external resources) can drive an atom directly.
//!
//! # Observation Hooks
//!
//! An atom can be told when it gains its first observer and when it loses
//! its last one. Loss is reported at the end of the batch, so an observer
//! that unsubscribes and resubscribes within one batch causes no churn.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Engine, ObservationHooks, Runtime};
use crate::error::Result;
use crate::graph::{Node, NodeId};

type Hook = Box<dyn FnMut()>;

/// An untyped trackable cell.
#[derive(Clone)]
pub struct Atom {
    core: Rc<AtomCore>,
}

struct AtomCore {
    id: NodeId,
    name: String,
    runtime: Weak<Runtime>,
    on_observed: RefCell<Option<Hook>>,
    on_unobserved: RefCell<Option<Hook>>,
}

impl Atom {
    /// Create a new atom. An empty name gets a generated one.
    pub fn new(engine: &Engine, name: impl Into<String>) -> Self {
        let node = Node::cell(name);
        let name = node.name().to_string();
        let id = engine.runtime().add_node(node);
        Self {
            core: Rc::new(AtomCore {
                id,
                name,
                runtime: engine.downgrade(),
                on_observed: RefCell::new(None),
                on_unobserved: RefCell::new(None),
            }),
        }
    }

    /// Get the atom's node ID.
    pub fn id(&self) -> NodeId {
        self.core.id
    }

    /// Get the atom's name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub(crate) fn runtime(&self) -> Option<Rc<Runtime>> {
        self.core.runtime.upgrade()
    }

    /// Report a read. Returns whether a derivation is tracking it.
    pub fn report_observed(&self) -> bool {
        match self.runtime() {
            Some(runtime) => {
                let tracking = runtime.tracker().is_tracking();
                runtime.report_observed(self.core.id);
                tracking
            }
            None => false,
        }
    }

    /// Report a change. Observers are marked stale and reactions settle
    /// once the outermost batch closes.
    pub fn report_changed(&self) -> Result<()> {
        if let Some(runtime) = self.runtime() {
            runtime.check_write(self.core.id)?;
            runtime.report_changed(self.core.id);
        }
        Ok(())
    }

    /// Call `hook` whenever the atom gains its first observer.
    pub fn on_become_observed<F>(&self, hook: F)
    where
        F: FnMut() + 'static,
    {
        *self.core.on_observed.borrow_mut() = Some(Box::new(hook));
        self.install_hooks();
    }

    /// Call `hook` whenever the atom loses its last observer.
    pub fn on_become_unobserved<F>(&self, hook: F)
    where
        F: FnMut() + 'static,
    {
        *self.core.on_unobserved.borrow_mut() = Some(Box::new(hook));
        self.install_hooks();
    }

    fn install_hooks(&self) {
        if let Some(runtime) = self.runtime() {
            let core: Rc<dyn ObservationHooks> = self.core.clone();
            runtime.register_hooks(self.core.id, Rc::downgrade(&core));
        }
    }

    /// Number of derivations currently observing this atom.
    pub fn observer_count(&self) -> usize {
        self.runtime()
            .map_or(0, |runtime| runtime.observer_count(self.core.id))
    }

    /// Whether any derivation currently observes this atom.
    pub fn is_observed(&self) -> bool {
        self.observer_count() > 0
    }
}

impl AtomCore {
    fn fire(slot: &RefCell<Option<Hook>>) {
        // A hook that triggers itself is not re-entered.
        if let Ok(mut hook) = slot.try_borrow_mut() {
            if let Some(hook) = hook.as_mut() {
                hook();
            }
        }
    }
}

impl ObservationHooks for AtomCore {
    fn became_observed(&self) {
        tracing::trace!(atom = %self.id, name = %self.name, "atom observed");
        Self::fire(&self.on_observed);
    }

    fn became_unobserved(&self) {
        tracing::trace!(atom = %self.id, name = %self.name, "atom unobserved");
        Self::fire(&self.on_unobserved);
    }
}

impl Drop for AtomCore {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.release_node(self.id);
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("observer_count", &self.observer_count())
            .finish()
    }
}
