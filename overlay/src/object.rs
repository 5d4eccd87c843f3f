use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;

use crate::{Associations, ClassId, RuntimeId, Value, observer};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

pub type ObjectRef = Arc<Object>;

/// An instance in the object model.
///
/// The class identity can be replaced at run time (specialization); fields
/// and associations are untouched when that happens.
pub struct Object {
    id: ObjectId,
    owner: RuntimeId,
    class: AtomicU32,
    fields: RwLock<HashMap<Arc<str>, Value>>,
    associations: Associations,
}

/// Whatever a message is sent to.
#[derive(Clone)]
pub enum Receiver {
    /// instance method dispatch
    Object(ObjectRef),
    /// class method dispatch
    Class(ClassId),
}

impl Object {
    pub(crate) fn new(owner: RuntimeId, class: ClassId) -> ObjectRef {
        Arc::new(Self {
            id: ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)),
            owner,
            class: AtomicU32::new(class.0),
            fields: RwLock::new(HashMap::new()),
            associations: Associations::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub(crate) fn owner(&self) -> RuntimeId {
        self.owner
    }

    /// The class dispatch currently routes through. This is the shadow class
    /// once the object has been specialized.
    #[inline]
    pub fn class_id(&self) -> ClassId {
        ClassId(self.class.load(Ordering::Acquire))
    }

    /// Swap the class identity, returning the previous one.
    pub(crate) fn replace_class(&self, class: ClassId) -> ClassId {
        ClassId(self.class.swap(class.0, Ordering::AcqRel))
    }

    pub fn associations(&self) -> &Associations {
        &self.associations
    }

    pub fn field(&self, name: &str) -> Value {
        self.fields.read().get(name).cloned().unwrap_or_default()
    }

    pub fn field_names(&self) -> Vec<Arc<str>> {
        self.fields.read().keys().cloned().collect()
    }

    /// Write a field and notify observers of its key path.
    pub fn set_field(&self, name: &str, value: Value) {
        let observers = observer::observers_of(self);
        if let Some(table) = &observers {
            table.will_change(name, self.field(name));
        }
        let old = {
            let mut fields = self.fields.write();
            if value.is_nil() {
                fields.remove(name)
            } else {
                fields.insert(Arc::from(name), value.clone())
            }
        };
        if let Some(table) = observers {
            table.did_change(name, old.unwrap_or_default(), value);
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("class", &self.class_id())
            .field("fields", &*self.fields.read())
            .finish()
    }
}

impl Receiver {
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Receiver::Object(object) => Some(object),
            Receiver::Class(_) => None,
        }
    }

    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            Receiver::Class(class) => Some(*class),
            Receiver::Object(_) => None,
        }
    }

    /// Same object, or same class.
    pub fn same(&self, other: &Receiver) -> bool {
        match (self, other) {
            (Receiver::Object(a), Receiver::Object(b)) => Arc::ptr_eq(a, b),
            (Receiver::Class(a), Receiver::Class(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Receiver::Object(object) => write!(f, "object {}", object.id.0),
            Receiver::Class(class) => write!(f, "class {}", class.0),
        }
    }
}

impl From<ObjectRef> for Receiver {
    fn from(value: ObjectRef) -> Self {
        Receiver::Object(value)
    }
}

impl From<&ObjectRef> for Receiver {
    fn from(value: &ObjectRef) -> Self {
        Receiver::Object(value.clone())
    }
}

impl From<ClassId> for Receiver {
    fn from(value: ClassId) -> Self {
        Receiver::Class(value)
    }
}
