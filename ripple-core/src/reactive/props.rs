//! Property Holder
//!
//! A string-keyed bag of trackable properties. Each key is backed by a
//! cell or a computed node, so reading a property inside a derivation
//! subscribes to it and writing a property propagates like any cell write.
//!
//! # Extending
//!
//! [`PropertyHolder::extend`] defines several properties at once inside
//! one batch:
//!
//! - a key given more than once takes its last definition;
//! - a key that already holds a plain cell of the same type is assigned;
//! - any other existing key is rejected as a duplicate.

use std::any::{type_name, Any};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::cell::{Cell, CellOptions};
use super::computed::{Computed, ComputedOptions};
use super::equality::Equality;
use super::introspection::Trackable;
use super::runtime::{Engine, Runtime};
use crate::error::{ReactiveError, Result, UsageError};
use crate::graph::NodeKind;

/// A property slot: a typed handle behind a type-erased interface.
trait Slot: Trackable {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Clone + 'static> Slot for Cell<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Clone + 'static> Slot for Computed<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Define = Box<dyn FnOnce(&PropertyHolder, &str) -> Result<()>>;

/// A set of named trackable properties.
///
/// Clones share the same properties.
#[derive(Clone)]
pub struct PropertyHolder {
    inner: Rc<HolderInner>,
}

struct HolderInner {
    name: String,
    runtime: Weak<Runtime>,
    props: std::cell::RefCell<IndexMap<String, Rc<dyn Slot>>>,
}

impl PropertyHolder {
    /// Create an empty holder. Property nodes are named `{name}.{key}`.
    pub fn new(engine: &Engine, name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(HolderInner {
                name: name.into(),
                runtime: engine.downgrade(),
                props: std::cell::RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// The holder's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn engine(&self) -> Result<Engine> {
        Engine::upgrade(&self.inner.runtime).ok_or_else(|| {
            ReactiveError::Consistency(format!(
                "property holder `{}` outlived its engine",
                self.inner.name
            ))
        })
    }

    fn node_name(&self, key: &str) -> String {
        format!("{}.{}", self.inner.name, key)
    }

    fn slot(&self, key: &str) -> Result<Rc<dyn Slot>> {
        self.inner
            .props
            .borrow()
            .get(key)
            .cloned()
            .ok_or_else(|| UsageError::UnknownProperty { key: key.to_string() }.into())
    }

    fn insert(&self, key: &str, slot: Rc<dyn Slot>) -> Result<()> {
        let mut props = self.inner.props.borrow_mut();
        if props.contains_key(key) {
            return Err(UsageError::DuplicateProperty { key: key.to_string() }.into());
        }
        tracing::trace!(holder = %self.inner.name, key, "property defined");
        props.insert(key.to_string(), slot);
        Ok(())
    }

    /// Define a plain value property backed by a new cell.
    pub fn define_property<T>(&self, key: &str, value: T) -> Result<Cell<T>>
    where
        T: Clone + PartialEq + 'static,
    {
        self.define_property_with(key, value, Equality::strict())
    }

    /// Define a plain value property whose writes are compared with
    /// `equality`.
    pub fn define_property_with<T>(&self, key: &str, value: T, equality: Equality<T>) -> Result<Cell<T>>
    where
        T: Clone + 'static,
    {
        if self.has(key) {
            return Err(UsageError::DuplicateProperty { key: key.to_string() }.into());
        }
        let engine = self.engine()?;
        let options = CellOptions::with_equality(equality).named(self.node_name(key));
        let cell = Cell::with_options(&engine, value, options);
        self.insert(key, Rc::new(cell.clone()))?;
        Ok(cell)
    }

    /// Define a derived property backed by a new computed node.
    pub fn define_computed<T, F>(&self, key: &str, derive: F) -> Result<Computed<T>>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        self.define_computed_with(key, derive, Equality::strict())
    }

    /// Define a derived property whose results are compared with `equality`.
    pub fn define_computed_with<T, F>(&self, key: &str, derive: F, equality: Equality<T>) -> Result<Computed<T>>
    where
        T: Clone + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        if self.has(key) {
            return Err(UsageError::DuplicateProperty { key: key.to_string() }.into());
        }
        let engine = self.engine()?;
        let options = ComputedOptions::with_equality(equality).named(self.node_name(key));
        let computed = Computed::with_options(&engine, options, derive);
        self.insert(key, Rc::new(computed.clone()))?;
        Ok(computed)
    }

    /// Read a property. Tracked like the underlying cell or computed node.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Result<T> {
        let slot = self.slot(key)?;
        let any = slot.as_any();
        if let Some(cell) = any.downcast_ref::<Cell<T>>() {
            return Ok(cell.get());
        }
        if let Some(computed) = any.downcast_ref::<Computed<T>>() {
            return computed.get();
        }
        Err(self.type_error::<T>(key))
    }

    /// Write a plain value property.
    pub fn set<T: Clone + 'static>(&self, key: &str, value: T) -> Result<()> {
        let slot = self.slot(key)?;
        let any = slot.as_any();
        if let Some(cell) = any.downcast_ref::<Cell<T>>() {
            return cell.set(value);
        }
        if slot.node_kind() == NodeKind::Computed {
            return Err(UsageError::ReadOnlyProperty { key: key.to_string() }.into());
        }
        Err(self.type_error::<T>(key))
    }

    /// The cell behind a plain value property.
    pub fn cell<T: Clone + 'static>(&self, key: &str) -> Result<Cell<T>> {
        let slot = self.slot(key)?;
        slot.as_any()
            .downcast_ref::<Cell<T>>()
            .cloned()
            .ok_or_else(|| self.type_error::<Cell<T>>(key))
    }

    /// The computed node behind a derived property.
    pub fn computed<T: Clone + 'static>(&self, key: &str) -> Result<Computed<T>> {
        let slot = self.slot(key)?;
        slot.as_any()
            .downcast_ref::<Computed<T>>()
            .cloned()
            .ok_or_else(|| self.type_error::<Computed<T>>(key))
    }

    fn type_error<T>(&self, key: &str) -> ReactiveError {
        UsageError::PropertyType {
            key: key.to_string(),
            expected: type_name::<T>(),
        }
        .into()
    }

    /// Start defining several properties in one batch.
    pub fn extend(&self) -> Extend<'_> {
        Extend {
            holder: self,
            entries: IndexMap::new(),
        }
    }

    /// Check if a key is defined.
    pub fn has(&self, key: &str) -> bool {
        self.inner.props.borrow().contains_key(key)
    }

    /// Check if a key is backed by a computed node.
    pub fn is_computed_prop(&self, key: &str) -> bool {
        self.slot(key)
            .map(|slot| slot.node_kind() == NodeKind::Computed)
            .unwrap_or(false)
    }

    /// Defined keys in definition order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.props.borrow().keys().cloned().collect()
    }

    /// Number of derivations observing a property, if it exists.
    pub fn observer_count(&self, key: &str) -> Option<usize> {
        self.slot(key).ok().map(|slot| slot.observer_count())
    }
}

impl fmt::Debug for PropertyHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyHolder")
            .field("name", &self.inner.name)
            .field("keys", &self.keys())
            .finish()
    }
}

/// Builder returned by [`PropertyHolder::extend`].
#[must_use = "properties are only defined by `apply`"]
pub struct Extend<'a> {
    holder: &'a PropertyHolder,
    entries: IndexMap<String, Define>,
}

impl Extend<'_> {
    /// Add a plain value property, or assign it if the key already holds
    /// a cell of this type.
    pub fn value<T>(self, key: &str, value: T) -> Self
    where
        T: Clone + PartialEq + 'static,
    {
        self.value_with(key, value, Equality::strict())
    }

    /// Like [`Extend::value`], with an equality policy for a newly defined
    /// cell. An existing cell keeps its own policy.
    pub fn value_with<T>(mut self, key: &str, value: T, equality: Equality<T>) -> Self
    where
        T: Clone + 'static,
    {
        let define: Define = Box::new(move |holder: &PropertyHolder, key: &str| {
            match holder.cell::<T>(key) {
                Ok(cell) => cell.set(value),
                Err(_) => holder.define_property_with(key, value, equality).map(drop),
            }
        });
        self.entries.insert(key.to_string(), define);
        self
    }

    /// Add a derived property.
    pub fn computed<T, F>(mut self, key: &str, derive: F) -> Self
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        let define: Define = Box::new(move |holder: &PropertyHolder, key: &str| {
            holder.define_computed(key, derive).map(drop)
        });
        self.entries.insert(key.to_string(), define);
        self
    }

    /// Define everything inside one batch. Stops at the first error;
    /// properties defined before it are kept.
    pub fn apply(self) -> Result<()> {
        let engine = self.holder.engine()?;
        engine.transaction(|| -> Result<()> {
            for (key, define) in self.entries {
                define(self.holder, &key)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    #[test]
    fn defines_and_reads_properties() {
        let engine = Engine::new();
        let person = PropertyHolder::new(&engine, "person");
        person.define_property("age", 36).unwrap();

        let reader = person.clone();
        person
            .define_computed("adult", move || Ok(reader.get::<i32>("age")? >= 18))
            .unwrap();

        assert_eq!(person.get::<i32>("age").unwrap(), 36);
        assert!(person.get::<bool>("adult").unwrap());
        assert_eq!(person.keys(), vec!["age", "adult"]);
        assert_eq!(person.cell::<i32>("age").unwrap().name(), "person.age");
    }

    #[test]
    fn property_errors() {
        let engine = Engine::new();
        let holder = PropertyHolder::new(&engine, "h");
        holder.define_property("n", 1u8).unwrap();
        holder.define_computed("twice", || Ok(2u8)).unwrap();

        assert!(matches!(
            holder.get::<u8>("missing"),
            Err(ReactiveError::Usage(UsageError::UnknownProperty { .. }))
        ));
        assert!(matches!(
            holder.get::<String>("n"),
            Err(ReactiveError::Usage(UsageError::PropertyType { .. }))
        ));
        assert!(matches!(
            holder.set("twice", 3u8),
            Err(ReactiveError::Usage(UsageError::ReadOnlyProperty { .. }))
        ));
        assert!(matches!(
            holder.define_property("n", 2u8),
            Err(ReactiveError::Usage(UsageError::DuplicateProperty { .. }))
        ));
    }

    #[test]
    fn is_computed_prop_inspects_keys() {
        let engine = Engine::new();
        let holder = PropertyHolder::new(&engine, "h");
        holder
            .extend()
            .value("base", 2)
            .computed("square", || Ok(4))
            .apply()
            .unwrap();

        assert!(!holder.is_computed_prop("base"));
        assert!(holder.is_computed_prop("square"));
        assert!(!holder.is_computed_prop("nope"));
    }

    #[test]
    fn extend_runs_in_one_batch() {
        let engine = Engine::new();
        let holder = PropertyHolder::new(&engine, "h");
        holder.define_property("a", 1).unwrap();
        holder.define_property("b", 1).unwrap();

        let runs = Rc::new(StdCell::new(0));
        let counter = Rc::clone(&runs);
        let reader = holder.clone();
        let _reaction = engine.autorun(move || {
            reader.get::<i32>("a")?;
            reader.get::<i32>("b")?;
            counter.set(counter.get() + 1);
            Ok(())
        });

        holder.extend().value("a", 2).value("b", 3).apply().unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(holder.get::<i32>("a").unwrap(), 2);
        assert_eq!(holder.get::<i32>("b").unwrap(), 3);
    }

    #[test]
    fn extend_keeps_last_definition_of_repeated_keys() {
        let engine = Engine::new();
        let holder = PropertyHolder::new(&engine, "h");
        holder
            .extend()
            .value("x", 1)
            .value("y", 0)
            .value("x", 2)
            .apply()
            .unwrap();

        assert_eq!(holder.keys(), vec!["x", "y"]);
        assert_eq!(holder.get::<i32>("x").unwrap(), 2);
    }

    #[test]
    fn extend_rejects_redefining_computed() {
        let engine = Engine::new();
        let holder = PropertyHolder::new(&engine, "h");
        holder.define_computed("c", || Ok(1)).unwrap();

        let err = holder.extend().computed("c", || Ok(2)).apply().unwrap_err();
        assert!(matches!(
            err,
            ReactiveError::Usage(UsageError::DuplicateProperty { .. })
        ));
    }

    #[derive(Clone, serde::Serialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn property_equality_policy_controls_propagation() {
        let engine = Engine::new();
        let shape = PropertyHolder::new(&engine, "shape");
        shape
            .define_property_with("origin", Point { x: 0, y: 0 }, Equality::structural())
            .unwrap();

        let runs = Rc::new(StdCell::new(0));
        let counter = Rc::clone(&runs);
        let reader = shape.clone();
        let _reaction = engine.autorun(move || {
            reader.get::<Point>("origin")?;
            counter.set(counter.get() + 1);
            Ok(())
        });
        assert_eq!(runs.get(), 1);

        shape.set("origin", Point { x: 0, y: 0 }).unwrap();
        assert_eq!(runs.get(), 1);

        shape.set("origin", Point { x: 1, y: 0 }).unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(shape.get::<Point>("origin").unwrap().x, 1);
    }

    #[test]
    fn extend_value_with_always_changed() {
        let engine = Engine::new();
        let holder = PropertyHolder::new(&engine, "h");
        holder
            .extend()
            .value_with("tick", 0u32, Equality::always_changed())
            .apply()
            .unwrap();

        let runs = Rc::new(StdCell::new(0));
        let counter = Rc::clone(&runs);
        let reader = holder.clone();
        let _reaction = engine.autorun(move || {
            reader.get::<u32>("tick")?;
            counter.set(counter.get() + 1);
            Ok(())
        });

        holder.set("tick", 0u32).unwrap();
        holder.set("tick", 0u32).unwrap();
        assert_eq!(runs.get(), 3);
    }
}
