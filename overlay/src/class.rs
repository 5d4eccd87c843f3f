use std::{collections::HashMap, sync::Arc};

use bitflags::bitflags;
use parking_lot::RwLock;

use crate::{Behavior, Interface, OverrideError, Selector};

/// Stable index of a class in its runtime's class arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u8 {
        /// synthesized by specialization, never user defined
        const SHADOW = 1 << 0;
        /// instances refuse specialization
        const SEALED = 1 << 1;
    }
}

/// Which method table of a class a send goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// sent to instances
    Instance,
    /// sent to the class itself
    Class,
}

#[derive(Debug)]
pub struct Class {
    id: ClassId,
    name: Arc<str>,
    parent: Option<ClassId>,
    flags: ClassFlags,
    /// For shadow classes, the class whose instances they stand in for.
    original: Option<ClassId>,
    interfaces: Vec<Interface>,
    instance_methods: RwLock<HashMap<Selector, Behavior>>,
    class_methods: RwLock<HashMap<Selector, Behavior>>,
}

/// Describes a class before it is registered with [`ClassTable::define`].
#[derive(Debug)]
pub struct ClassBuilder {
    name: Arc<str>,
    parent: Option<ClassId>,
    flags: ClassFlags,
    interfaces: Vec<Interface>,
    instance_methods: Vec<(Selector, Behavior)>,
    class_methods: Vec<(Selector, Behavior)>,
}

/// Arena of class descriptors. Classes are never removed, so a [`ClassId`]
/// stays valid for the life of the table.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: RwLock<Vec<Arc<Class>>>,
}

impl Class {
    #[inline]
    pub fn id(&self) -> ClassId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }

    #[inline]
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    #[inline]
    pub fn is_shadow(&self) -> bool {
        self.flags.contains(ClassFlags::SHADOW)
    }

    /// The class this one stands in for, or itself for ordinary classes.
    #[inline]
    pub fn logical(&self) -> ClassId {
        self.original.unwrap_or(self.id)
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    fn table(&self, kind: MethodKind) -> &RwLock<HashMap<Selector, Behavior>> {
        match kind {
            MethodKind::Instance => &self.instance_methods,
            MethodKind::Class => &self.class_methods,
        }
    }

    /// The method declared directly on this class, ignoring parents.
    pub fn method(&self, kind: MethodKind, selector: &Selector) -> Option<Behavior> {
        self.table(kind).read().get(selector).cloned()
    }

    pub fn declares(&self, kind: MethodKind, selector: &Selector) -> bool {
        self.table(kind).read().contains_key(selector)
    }

    pub(crate) fn set_method(&self, kind: MethodKind, selector: Selector, behavior: Behavior) {
        self.table(kind).write().insert(selector, behavior);
    }
}

impl ClassBuilder {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            parent: None,
            flags: ClassFlags::empty(),
            interfaces: Vec::new(),
            instance_methods: Vec::new(),
            class_methods: Vec::new(),
        }
    }

    pub fn parent(mut self, parent: ClassId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Instances of a sealed class cannot receive instance-scoped overrides.
    pub fn sealed(mut self) -> Self {
        self.flags |= ClassFlags::SEALED;
        self
    }

    pub fn interface(mut self, interface: impl Into<Interface>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn method(mut self, selector: impl Into<Selector>, behavior: Behavior) -> Self {
        self.instance_methods.push((selector.into(), behavior));
        self
    }

    pub fn class_method(mut self, selector: impl Into<Selector>, behavior: Behavior) -> Self {
        self.class_methods.push((selector.into(), behavior));
        self
    }
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, builder: ClassBuilder) -> Result<ClassId, OverrideError> {
        let mut classes = self.classes.write();
        if let Some(parent) = builder.parent {
            if parent.0 as usize >= classes.len() {
                return Err(OverrideError::UnknownClass(parent));
            }
        }
        let id = ClassId(classes.len() as u32);
        let class = Class {
            id,
            name: builder.name,
            parent: builder.parent,
            flags: builder.flags,
            original: None,
            interfaces: builder.interfaces,
            instance_methods: RwLock::new(builder.instance_methods.into_iter().collect()),
            class_methods: RwLock::new(builder.class_methods.into_iter().collect()),
        };
        classes.push(Arc::new(class));
        Ok(id)
    }

    /// Register the shadow class for `original`. Callers serialize this so
    /// each original gets at most one shadow.
    pub(crate) fn define_shadow(&self, original: &Class, suffix: &str) -> ClassId {
        let mut classes = self.classes.write();
        let id = ClassId(classes.len() as u32);
        classes.push(Arc::new(Class {
            id,
            name: Arc::from(format!("{}{}", original.name, suffix)),
            parent: Some(original.id),
            flags: ClassFlags::SHADOW,
            original: Some(original.id),
            interfaces: Vec::new(),
            instance_methods: RwLock::new(HashMap::new()),
            class_methods: RwLock::new(HashMap::new()),
        }));
        id
    }

    #[inline]
    pub fn get(&self, id: ClassId) -> Option<Arc<Class>> {
        self.classes.read().get(id.0 as usize).cloned()
    }

    pub fn contains(&self, id: ClassId) -> bool {
        (id.0 as usize) < self.classes.read().len()
    }

    /// `id` followed by each of its ancestors, nearest first.
    pub fn ancestry(&self, id: ClassId) -> Vec<Arc<Class>> {
        let classes = self.classes.read();
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            let Some(class) = classes.get(current.0 as usize) else {
                break;
            };
            debug_assert!(
                chain.len() <= classes.len(),
                "cycle in class hierarchy at {current:?}"
            );
            chain.push(class.clone());
            next = class.parent;
        }
        chain
    }

    pub fn is_subclass_of(&self, id: ClassId, ancestor: ClassId) -> bool {
        self.ancestry(id).iter().any(|c| c.id == ancestor)
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
