use std::{cell::Cell, collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    Class, ClassFlags, ClassId, ClassTable, ObjectRef, OverrideError, Receiver, Runtime,
    notify::{self, Notification},
    registry::instance_state_or_insert,
};

/// Clears the in-progress flag of an identity rewrite, also on unwind.
struct Rewriting<'a>(&'a Cell<bool>);

impl Drop for Rewriting<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Original class -> its shadow class. Entries are never removed.
#[derive(Debug, Default)]
pub struct ShadowTable {
    shadows: Mutex<HashMap<ClassId, ClassId>>,
}

impl ShadowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shadow of `original`, creating it on first use. Creation happens
    /// under the table lock so concurrent callers agree on one shadow.
    pub(crate) fn shadow_for(&self, classes: &ClassTable, original: &Class, suffix: &str) -> ClassId {
        let mut shadows = self.shadows.lock();
        if let Some(shadow) = shadows.get(&original.id()) {
            return *shadow;
        }
        let shadow = classes.define_shadow(original, suffix);
        shadows.insert(original.id(), shadow);
        log::debug!(
            "created shadow class {shadow:?} for {} {:?}",
            original.name(),
            original.id()
        );
        shadow
    }

    pub fn get(&self, original: ClassId) -> Option<ClassId> {
        self.shadows.lock().get(&original).copied()
    }

    pub fn len(&self) -> usize {
        self.shadows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Runtime {
    /// Give `object` a private class identity so instance-scoped overrides
    /// can target it alone. Idempotent; the object's fields and associations
    /// are untouched.
    ///
    /// Posts [`notify::WILL_CHANGE_CLASS`] and [`notify::DID_CHANGE_CLASS`]
    /// around the rewrite. Concurrent callers for the same object wait for
    /// the rewrite to finish, so on return the object carries its shadow
    /// class. The one exception is a class-change handler specializing the
    /// object it is being notified about, which returns before the swap.
    ///
    /// Objects of another runtime, of sealed classes, or of classes this
    /// runtime does not know cannot be specialized.
    pub fn specialize(&self, object: &ObjectRef) -> Result<ClassId, OverrideError> {
        let current = object.class_id();
        let class = match self.classes().get(current) {
            Some(class) if object.owner() == self.id() => class,
            _ => {
                return Err(OverrideError::SpecializationUnsupported {
                    class: format!("{current:?} of a foreign runtime"),
                });
            }
        };
        if class.is_shadow() {
            return Ok(current);
        }
        self.check_specializable(&class)?;

        let shadow = self
            .shared
            .shadows
            .shadow_for(self.classes(), &class, &self.settings().shadow_suffix);
        let state = instance_state_or_insert(object);
        let rewrite = state.rewrite.lock();
        if rewrite.get() || self.is_specialized(object) {
            return Ok(shadow);
        }
        rewrite.set(true);
        let _rewriting = Rewriting(&*rewrite);
        {
            let mut specialized = self.shared.specialized.lock();
            if specialized.len() == specialized.capacity() {
                specialized.retain(|weak| weak.strong_count() > 0);
            }
            specialized.push(Arc::downgrade(object));
        }

        let shadow_name = self
            .classes()
            .get(shadow)
            .map(|c| c.name().to_owned())
            .unwrap_or_default();
        let receiver = Receiver::Object(object.clone());
        self.notifications().post(
            &Notification::new(notify::WILL_CHANGE_CLASS, Some(receiver.clone()))
                .with(notify::OLD_CLASS_NAME, class.name())
                .with(notify::NEW_CLASS_NAME, shadow_name.as_str()),
        );
        let previous = object.replace_class(shadow);
        debug_assert_eq!(previous, current, "class changed during specialization");
        log::debug!(
            "[{}] specialized object {} from {} to {shadow_name}",
            self.settings().name,
            object.id().0,
            class.name()
        );
        self.notifications().post(
            &Notification::new(notify::DID_CHANGE_CLASS, Some(receiver))
                .with(notify::OLD_CLASS_NAME, class.name())
                .with(notify::NEW_CLASS_NAME, shadow_name.as_str()),
        );
        Ok(shadow)
    }

    /// The shadow class standing in for `original`, created if needed.
    pub fn shadow_class_for(&self, original: ClassId) -> Result<ClassId, OverrideError> {
        let class = self
            .classes()
            .get(original)
            .ok_or(OverrideError::UnknownClass(original))?;
        if class.is_shadow() {
            return Ok(original);
        }
        self.check_specializable(&class)?;
        Ok(self
            .shared
            .shadows
            .shadow_for(self.classes(), &class, &self.settings().shadow_suffix))
    }

    /// Whether `object` currently carries a shadow identity.
    pub fn is_specialized(&self, object: &ObjectRef) -> bool {
        self.owns(object)
            && self
                .classes()
                .get(object.class_id())
                .is_some_and(|class| class.is_shadow())
    }

    fn check_specializable(&self, class: &Class) -> Result<(), OverrideError> {
        let sealed = self
            .classes()
            .ancestry(class.id())
            .iter()
            .any(|c| c.flags().contains(ClassFlags::SEALED));
        if sealed {
            return Err(OverrideError::SpecializationUnsupported {
                class: class.name().to_owned(),
            });
        }
        Ok(())
    }
}
