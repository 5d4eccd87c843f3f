use std::{cell::Cell, fmt, sync::Arc};

use parking_lot::{Mutex, ReentrantMutex};

use crate::{
    AssocKey, Behavior, ClassId, ConformanceLedger, Fallback, Installed, MethodKind, Object,
    ObjectId, ObjectRef, OverrideError, OverrideKey, OverrideRecord, Receiver, Runtime, Selector,
    StackTable, Value,
    conformance::release_from,
    notify::{self, Notification},
};

const INSTANCE_STATE: AssocKey = AssocKey::reserved("overlay.instance");

/// Where an override applies.
#[derive(Clone)]
pub enum Scope {
    /// every instance of the class and its subclasses
    Class(ClassId),
    /// class methods of the class and its subclasses
    ClassObject(ClassId),
    /// one object only
    Instance(ObjectRef),
}

/// Hashable identity of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    Class(ClassId),
    ClassObject(ClassId),
    Instance(ObjectId),
}

/// Address of a type-scoped stack.
pub(crate) type TypeAddress = (ClassId, MethodKind, Selector);

/// Type-scoped override stacks, shared by every instance that dispatches
/// through the class.
#[derive(Debug, Default)]
pub struct OverrideRegistry {
    pub(crate) stacks: StackTable<TypeAddress>,
}

/// Engine state carried by a specialized instance. Its presence in the
/// instance's associated storage marks the instance as specialized.
///
/// Lock order: `ledger` before `stacks`.
#[derive(Debug, Default)]
pub(crate) struct InstanceState {
    /// Held across the class identity rewrite; set while it is running.
    pub(crate) rewrite: ReentrantMutex<Cell<bool>>,
    pub(crate) stacks: StackTable<Selector>,
    pub(crate) ledger: Mutex<ConformanceLedger>,
}

impl Scope {
    pub fn id(&self) -> ScopeId {
        match self {
            Scope::Class(class) => ScopeId::Class(*class),
            Scope::ClassObject(class) => ScopeId::ClassObject(*class),
            Scope::Instance(object) => ScopeId::Instance(object.id()),
        }
    }

    #[inline]
    pub fn is_type_scoped(&self) -> bool {
        !matches!(self, Scope::Instance(_))
    }

    #[inline]
    pub fn method_kind(&self) -> MethodKind {
        match self {
            Scope::ClassObject(_) => MethodKind::Class,
            Scope::Class(_) | Scope::Instance(_) => MethodKind::Instance,
        }
    }

    pub(crate) fn receiver(&self) -> Receiver {
        match self {
            Scope::Class(class) | Scope::ClassObject(class) => Receiver::Class(*class),
            Scope::Instance(object) => Receiver::Object(object.clone()),
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.id(), f)
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Scope {}

impl From<ObjectRef> for Scope {
    fn from(value: ObjectRef) -> Self {
        Scope::Instance(value)
    }
}

impl From<&ObjectRef> for Scope {
    fn from(value: &ObjectRef) -> Self {
        Scope::Instance(value.clone())
    }
}

pub(crate) fn instance_state(object: &Object) -> Option<Arc<InstanceState>> {
    object.associations().get(INSTANCE_STATE)?.downcast::<InstanceState>()
}

pub(crate) fn instance_state_or_insert(object: &Object) -> Arc<InstanceState> {
    let value = object
        .associations()
        .get_or_insert_with(INSTANCE_STATE, || Value::opaque(InstanceState::default()));
    match value.downcast::<InstanceState>() {
        Some(state) => state,
        None => unreachable!("foreign value stored under {INSTANCE_STATE:?}"),
    }
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `class` still has an override keyed `key` for any selector.
    pub(crate) fn class_holds(&self, class: ClassId, kind: MethodKind, key: &OverrideKey) -> bool {
        self.stacks
            .any_holds(key, |(c, k, _)| *c == class && *k == kind)
    }
}

impl Runtime {
    /// Install `behavior` for `selector` in `scope` under `key`, or under a
    /// fresh key when `key` is `None`. Returns the key used.
    ///
    /// Reinstalling an existing key replaces that override in place instead
    /// of adding a layer. Installing on an instance specializes it first.
    pub fn install(
        &self,
        scope: impl Into<Scope>,
        selector: impl Into<Selector>,
        key: Option<OverrideKey>,
        behavior: Behavior,
    ) -> Result<OverrideKey, OverrideError> {
        let scope = scope.into();
        let selector = selector.into();
        let key = key.unwrap_or_else(OverrideKey::generate);
        let kind = scope.method_kind();

        let installed = match &scope {
            Scope::Class(class) | Scope::ClassObject(class) => {
                let descriptor = self.classes().get(*class).ok_or(OverrideError::UnknownClass(*class))?;
                if descriptor.is_shadow() {
                    return Err(OverrideError::SpecializationUnsupported {
                        class: descriptor.name().to_owned(),
                    });
                }
                let fallback = match descriptor.method(kind, &selector) {
                    Some(method) => Fallback::Native(method),
                    None => match descriptor.parent() {
                        Some(parent) => Fallback::Inherited(parent),
                        None => Fallback::Unimplemented,
                    },
                };
                let signature = self.signature_at(*class, kind, &selector);
                let record = OverrideRecord::new(
                    selector.clone(),
                    true,
                    key.clone(),
                    behavior.inheriting(signature),
                );
                let _ledgers = self.shared.ledgers.lock();
                self.shared
                    .registry
                    .stacks
                    .install((*class, kind, selector.clone()), record, fallback)
            }
            Scope::Instance(object) => {
                self.specialize(object)?;
                let state = instance_state_or_insert(object);
                let logical = self.class_of(object);
                let signature = self.signature_of(&Receiver::Object(object.clone()), &selector);
                let record = OverrideRecord::new(
                    selector.clone(),
                    false,
                    key.clone(),
                    behavior.inheriting(signature),
                );
                let _ledger = state.ledger.lock();
                state
                    .stacks
                    .install(selector.clone(), record, Fallback::Inherited(logical))
            }
        };

        log::debug!(
            "[{}] {} override {key} for {selector} on {scope:?}",
            self.settings().name,
            match installed {
                Installed::Pushed => "installed",
                Installed::Replaced => "replaced",
            }
        );
        if self.settings().notify_overrides {
            self.notifications().post(
                &Notification::new(notify::DID_INSTALL_OVERRIDE, Some(scope.receiver()))
                    .with(notify::SELECTOR, selector.as_str())
                    .with(notify::OVERRIDE_KEY, key.as_str()),
            );
        }
        Ok(key)
    }

    pub fn has_override(
        &self,
        scope: &Scope,
        selector: impl Into<Selector>,
        key: &OverrideKey,
    ) -> bool {
        self.behavior_for(scope, selector, key).is_some()
    }

    /// The behavior installed under `key`, if any.
    pub fn behavior_for(
        &self,
        scope: &Scope,
        selector: impl Into<Selector>,
        key: &OverrideKey,
    ) -> Option<Behavior> {
        let stack = self.stack_of(scope, &selector.into())?;
        let position = stack.position_of(key)?;
        stack.record(position).map(|r| r.behavior.clone())
    }

    /// Keys installed for `selector` in `scope`, oldest first.
    pub fn override_keys(&self, scope: &Scope, selector: impl Into<Selector>) -> Vec<OverrideKey> {
        self.stack_of(scope, &selector.into())
            .map(|stack| stack.records().iter().map(|r| r.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove the override under `key`. Removing a key that is not installed
    /// does nothing. Returns whether something was removed.
    ///
    /// Once no override in `scope` carries `key` any more, the conformance
    /// that `key` required in `scope` is released as well.
    pub fn remove(&self, scope: &Scope, selector: impl Into<Selector>, key: &OverrideKey) -> bool {
        let selector = selector.into();
        let removed = match scope {
            Scope::Class(class) | Scope::ClassObject(class) => {
                let kind = scope.method_kind();
                let mut ledgers = self.shared.ledgers.lock();
                let removed = self
                    .shared
                    .registry
                    .stacks
                    .remove(&(*class, kind, selector.clone()), key);
                if removed.is_some() && !self.shared.registry.class_holds(*class, kind, key) {
                    let released = release_from(&mut ledgers, scope.id(), key);
                    drop(ledgers);
                    log_released(self, scope, key, &released);
                }
                removed
            }
            Scope::Instance(object) => {
                let Some(state) = self.local_state(object) else {
                    return false;
                };
                let mut ledger = state.ledger.lock();
                let removed = state.stacks.remove(&selector, key);
                if removed.is_some() && !state.stacks.any_holds(key, |_| true) {
                    let released = ledger.release_key(key);
                    drop(ledger);
                    log_released(self, scope, key, &released);
                }
                removed
            }
        };
        let Some(record) = removed else {
            return false;
        };
        debug_assert_eq!(&record.key, key);

        log::debug!(
            "[{}] removed override {key} for {selector} on {scope:?}",
            self.settings().name
        );
        if self.settings().notify_overrides {
            self.notifications().post(
                &Notification::new(notify::DID_REMOVE_OVERRIDE, Some(scope.receiver()))
                    .with(notify::SELECTOR, selector.as_str())
                    .with(notify::OVERRIDE_KEY, key.as_str()),
            );
        }
        true
    }

    /// Remove every override of `selector` in `scope`. Returns how many.
    pub fn remove_all(&self, scope: &Scope, selector: impl Into<Selector>) -> usize {
        let selector = selector.into();
        let mut removed = 0;
        for key in self.override_keys(scope, selector.clone()) {
            if self.remove(scope, selector.clone(), &key) {
                removed += 1;
            }
        }
        removed
    }

    /// Drop every type-scoped override and conformance requirement, plus the
    /// instance-scoped state of every live specialized instance. Shadow
    /// classes and the identities of specialized instances stay.
    pub fn reset_overrides(&self) {
        let dropped = self.shared.registry.stacks.clear();
        self.shared.ledgers.lock().clear();
        let instances: Vec<ObjectRef> = {
            let mut specialized = self.shared.specialized.lock();
            specialized.retain(|weak| weak.strong_count() > 0);
            specialized.iter().filter_map(|weak| weak.upgrade()).collect()
        };
        let mut instance_dropped = 0;
        for object in &instances {
            if let Some(state) = self.local_state(object) {
                let mut ledger = state.ledger.lock();
                instance_dropped += state.stacks.clear();
                *ledger = ConformanceLedger::default();
            }
        }
        log::debug!(
            "[{}] reset: dropped {dropped} type-scoped and {instance_dropped} instance-scoped overrides",
            self.settings().name
        );
    }

    pub(crate) fn stack_of(
        &self,
        scope: &Scope,
        selector: &Selector,
    ) -> Option<Arc<crate::OverrideStack>> {
        match scope {
            Scope::Class(class) | Scope::ClassObject(class) => self
                .shared
                .registry
                .stacks
                .get(&(*class, scope.method_kind(), selector.clone())),
            Scope::Instance(object) => self.local_state(object)?.stacks.get(selector),
        }
    }

    /// Engine state of `object`, if it belongs to this runtime and has any.
    pub(crate) fn local_state(&self, object: &Object) -> Option<Arc<InstanceState>> {
        if !self.owns(object) {
            return None;
        }
        instance_state(object)
    }
}

pub(crate) fn log_released(
    runtime: &Runtime,
    scope: &Scope,
    key: &OverrideKey,
    released: &[crate::Interface],
) {
    if !released.is_empty() {
        log::debug!(
            "[{}] {key} no longer requires {released:?} on {scope:?}",
            runtime.settings().name
        );
    }
}
