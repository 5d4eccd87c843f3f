use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    Behavior, Class, ClassBuilder, ClassId, ClassTable, ConformanceLedger, MethodKind,
    NotificationCenter, Object, ObjectRef, OverrideError, OverrideRegistry, RuntimeCreateInfo,
    RuntimeSettings, ScopeId, Selector, ShadowTable,
};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeId(pub u64);

pub(crate) struct RuntimeShared {
    pub(crate) id: RuntimeId,
    pub(crate) settings: RuntimeSettings,
    pub(crate) classes: ClassTable,
    pub(crate) shadows: ShadowTable,
    pub(crate) registry: OverrideRegistry,
    pub(crate) ledgers: Mutex<HashMap<ScopeId, ConformanceLedger>>,
    pub(crate) notifications: NotificationCenter,
    // instances whose engine state reset_overrides has to reach
    pub(crate) specialized: Mutex<Vec<Weak<Object>>>,
}

/// Handle to one override engine. Clones share the engine.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) shared: Arc<RuntimeShared>,
}

impl Runtime {
    pub fn new(info: RuntimeCreateInfo) -> Self {
        let settings = RuntimeSettings::from(info);
        let id = RuntimeId(NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed));
        log::debug!("[{}] runtime {id:?} created with {settings:?}", settings.name);
        let shared = RuntimeShared {
            id,
            settings,
            classes: ClassTable::new(),
            shadows: ShadowTable::new(),
            registry: OverrideRegistry::new(),
            ledgers: Mutex::new(HashMap::new()),
            notifications: NotificationCenter::new(),
            specialized: Mutex::new(Vec::new()),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    #[inline]
    pub fn id(&self) -> RuntimeId {
        self.shared.id
    }

    #[inline]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.shared.settings
    }

    #[inline]
    pub fn classes(&self) -> &ClassTable {
        &self.shared.classes
    }

    #[inline]
    pub fn notifications(&self) -> &NotificationCenter {
        &self.shared.notifications
    }

    pub fn define_class(&self, builder: ClassBuilder) -> Result<ClassId, OverrideError> {
        let id = self.classes().define(builder)?;
        log::trace!("[{}] defined class {id:?}", self.settings().name);
        Ok(id)
    }

    /// Add or replace a method a class declares. Stacks created before this
    /// keep the fallback they captured.
    pub fn define_method(
        &self,
        class: ClassId,
        kind: MethodKind,
        selector: impl Into<Selector>,
        behavior: Behavior,
    ) -> Result<(), OverrideError> {
        let descriptor = self.class(class).ok_or(OverrideError::UnknownClass(class))?;
        if descriptor.is_shadow() {
            return Err(OverrideError::SpecializationUnsupported {
                class: descriptor.name().to_owned(),
            });
        }
        descriptor.set_method(kind, selector.into(), behavior);
        Ok(())
    }

    pub fn class(&self, id: ClassId) -> Option<Arc<Class>> {
        self.classes().get(id)
    }

    pub fn instantiate(&self, class: ClassId) -> Result<ObjectRef, OverrideError> {
        let descriptor = self.class(class).ok_or(OverrideError::UnknownClass(class))?;
        if descriptor.is_shadow() {
            return Err(OverrideError::SpecializationUnsupported {
                class: descriptor.name().to_owned(),
            });
        }
        Ok(Object::new(self.id(), class))
    }

    /// Whether `object` was instantiated by this runtime.
    #[inline]
    pub fn owns(&self, object: &Object) -> bool {
        object.owner() == self.id()
    }

    /// The class `object` reports: its original class, even once specialized.
    /// Objects of another runtime report their raw class id, which means
    /// nothing in this runtime's class table.
    pub fn class_of(&self, object: &ObjectRef) -> ClassId {
        let current = object.class_id();
        if !self.owns(object) {
            return current;
        }
        self.classes()
            .get(current)
            .map_or(current, |class| class.logical())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id())
            .field("name", &self.settings().name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtimes_have_distinct_ids() {
        let a = Runtime::new(RuntimeCreateInfo::default());
        let b = Runtime::new(RuntimeCreateInfo::default());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn instantiate_checks_class() {
        let runtime = Runtime::new(RuntimeCreateInfo::default());
        assert_eq!(
            runtime.instantiate(ClassId(7)).err(),
            Some(OverrideError::UnknownClass(ClassId(7)))
        );
        let class = runtime.define_class(ClassBuilder::new("Point")).unwrap();
        let shadow = runtime.shadow_class_for(class).unwrap();
        assert!(matches!(
            runtime.instantiate(shadow),
            Err(OverrideError::SpecializationUnsupported { .. })
        ));
        let point = runtime.instantiate(class).unwrap();
        assert_eq!(runtime.class_of(&point), class);
    }

    #[test]
    fn define_method_after_the_fact() {
        let runtime = Runtime::new(RuntimeCreateInfo::default());
        let class = runtime.define_class(ClassBuilder::new("Point")).unwrap();
        let point = runtime.instantiate(class).unwrap();
        assert!(!runtime.responds_to(&point, "x"));
        runtime
            .define_method(
                class,
                MethodKind::Instance,
                "x",
                Behavior::new(|_| Ok(crate::Value::Int(3))),
            )
            .unwrap();
        assert_eq!(runtime.send(&point, "x", &[]), Ok(crate::Value::Int(3)));
    }
}
