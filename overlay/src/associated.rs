use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{Value, WeakValue};

/// Key under which a value is associated with an object. Keys are static
/// so that unrelated subsystems cannot collide by accident.
///
/// The engine keeps its own per-object state under reserved keys. Those can
/// only be built inside this crate and never equal a key made with
/// [`AssocKey::new`], whatever its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssocKey {
    name: &'static str,
    reserved: bool,
}

impl AssocKey {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            reserved: false,
        }
    }

    pub(crate) const fn reserved(name: &'static str) -> Self {
        Self {
            name,
            reserved: true,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationPolicy {
    /// keep the value alive as long as the object
    Retain,
    /// drop the association once the value is gone elsewhere
    Weak,
}

#[derive(Clone)]
enum Stored {
    Strong(Value),
    Weak(WeakValue),
}

/// Extra per-object storage that does not show up as fields.
#[derive(Default)]
pub struct Associations {
    slots: RwLock<HashMap<AssocKey, Stored>>,
}

impl Stored {
    fn load(&self) -> Option<Value> {
        match self {
            Stored::Strong(value) => Some(value.clone()),
            Stored::Weak(weak) => weak.upgrade(),
        }
    }
}

impl Associations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: AssocKey) -> Option<Value> {
        self.slots.read().get(&key).and_then(Stored::load)
    }

    /// Associate `value` with `key`. Associating nil removes the entry.
    pub fn set(&self, key: AssocKey, value: Value, policy: AssociationPolicy) {
        let mut slots = self.slots.write();
        if value.is_nil() {
            slots.remove(&key);
            return;
        }
        let stored = match policy {
            AssociationPolicy::Retain => Stored::Strong(value),
            AssociationPolicy::Weak => Stored::Weak(value.downgrade()),
        };
        slots.insert(key, stored);
    }

    pub fn remove(&self, key: AssocKey) -> Option<Value> {
        self.slots.write().remove(&key).and_then(|s| s.load())
    }

    /// Load the retained value at `key`, creating it first if absent. The
    /// check and the insert happen under one lock.
    pub fn get_or_insert_with(&self, key: AssocKey, make: impl FnOnce() -> Value) -> Value {
        if let Some(value) = self.get(key) {
            return value;
        }
        let mut slots = self.slots.write();
        if let Some(value) = slots.get(&key).and_then(Stored::load) {
            return value;
        }
        let value = make();
        slots.insert(key, Stored::Strong(value.clone()));
        value
    }

    pub fn keys(&self) -> Vec<AssocKey> {
        self.slots.read().keys().copied().collect()
    }
}

impl std::fmt::Debug for Associations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE: AssocKey = AssocKey::new("test.note");

    #[test]
    fn set_get_and_clear_with_nil() {
        let assoc = Associations::new();
        assoc.set(NOTE, Value::from("hello"), AssociationPolicy::Retain);
        assert_eq!(assoc.get(NOTE), Some(Value::from("hello")));
        assoc.set(NOTE, Value::Nil, AssociationPolicy::Retain);
        assert_eq!(assoc.get(NOTE), None);
        assert!(assoc.keys().is_empty());
    }

    #[test]
    fn weak_association_lapses() {
        let assoc = Associations::new();
        let payload = Value::opaque(1u8);
        assoc.set(NOTE, payload.clone(), AssociationPolicy::Weak);
        assert!(assoc.get(NOTE).is_some());
        drop(payload);
        assert!(assoc.get(NOTE).is_none());
    }

    #[test]
    fn get_or_insert_runs_once() {
        let assoc = Associations::new();
        let first = assoc.get_or_insert_with(NOTE, || Value::opaque(1u8));
        let second = assoc.get_or_insert_with(NOTE, || Value::opaque(2u8));
        assert!(first.same(&second));
    }

    #[test]
    fn reserved_keys_do_not_collide_with_user_keys() {
        let assoc = Associations::new();
        let user = AssocKey::new("overlay.instance");
        let engine = AssocKey::reserved("overlay.instance");
        assoc.set(user, Value::Int(1), AssociationPolicy::Retain);
        assert_eq!(assoc.get(engine), None);
        assert_eq!(user.name(), engine.name());
        assert_ne!(user, engine);
    }
}
