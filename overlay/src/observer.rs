//! Field observation with bulk teardown.
//!
//! Registrations live in the observed object's associated storage, so they
//! disappear with the object. `stop_observing` tears down every
//! registration made through this module in one call.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bitflags::bitflags;
use parking_lot::RwLock;

use crate::{AssocKey, AssociationPolicy, Object, ObjectRef, Value};

const OBSERVERS: AssocKey = AssocKey::reserved("overlay.observers");

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObservingOptions: u8 {
        /// report the new value
        const NEW = 1 << 0;
        /// report the old value
        const OLD = 1 << 1;
        /// fire once immediately on registration
        const INITIAL = 1 << 2;
        /// fire before the write as well as after it
        const PRIOR = 1 << 3;
    }
}

/// What a handler learns about a field write.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key_path: Arc<str>,
    pub old: Option<Value>,
    pub new: Option<Value>,
    /// set for the notification sent before the write
    pub is_prior: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(pub u64);

type Handler = Arc<dyn Fn(&Change) + Send + Sync>;

struct Registration {
    token: ObserverToken,
    key_path: Arc<str>,
    options: ObservingOptions,
    handler: Handler,
}

#[derive(Default)]
pub(crate) struct ObserverTable {
    registrations: RwLock<Vec<Registration>>,
}

pub(crate) fn observers_of(object: &Object) -> Option<Arc<ObserverTable>> {
    object.associations().get(OBSERVERS)?.downcast::<ObserverTable>()
}

impl ObserverTable {
    /// Handlers are copied out so that none runs under the table lock.
    fn matching(&self, key_path: &str) -> Vec<(ObservingOptions, Handler)> {
        self.registrations
            .read()
            .iter()
            .filter(|r| &*r.key_path == key_path)
            .map(|r| (r.options, r.handler.clone()))
            .collect()
    }

    pub(crate) fn will_change(&self, key_path: &str, old: Value) {
        for (options, handler) in self.matching(key_path) {
            if !options.contains(ObservingOptions::PRIOR) {
                continue;
            }
            handler(&Change {
                key_path: Arc::from(key_path),
                old: options.contains(ObservingOptions::OLD).then(|| old.clone()),
                new: None,
                is_prior: true,
            });
        }
    }

    pub(crate) fn did_change(&self, key_path: &str, old: Value, new: Value) {
        for (options, handler) in self.matching(key_path) {
            handler(&Change {
                key_path: Arc::from(key_path),
                old: options.contains(ObservingOptions::OLD).then(|| old.clone()),
                new: options.contains(ObservingOptions::NEW).then(|| new.clone()),
                is_prior: false,
            });
        }
    }
}

/// Call `handler` whenever the field `key_path` of `object` is written.
pub fn observe<F>(
    object: &ObjectRef,
    key_path: &str,
    options: ObservingOptions,
    handler: F,
) -> ObserverToken
where
    F: Fn(&Change) + Send + Sync + 'static,
{
    let table = object
        .associations()
        .get_or_insert_with(OBSERVERS, || Value::opaque(ObserverTable::default()))
        .downcast::<ObserverTable>();
    debug_assert!(table.is_some(), "foreign value stored under {OBSERVERS:?}");
    let token = ObserverToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
    let handler: Handler = Arc::new(handler);
    if let Some(table) = table {
        table.registrations.write().push(Registration {
            token,
            key_path: Arc::from(key_path),
            options,
            handler: handler.clone(),
        });
    }
    log::trace!("observing {key_path} on object {} as {token:?}", object.id().0);

    if options.contains(ObservingOptions::INITIAL) {
        handler(&Change {
            key_path: Arc::from(key_path),
            old: None,
            new: options
                .contains(ObservingOptions::NEW)
                .then(|| object.field(key_path)),
            is_prior: false,
        });
    }
    token
}

/// Key paths currently observed on `object`, with their tokens.
pub fn observing_info(object: &Object) -> Vec<(Arc<str>, ObserverToken)> {
    observers_of(object)
        .map(|table| {
            table
                .registrations
                .read()
                .iter()
                .map(|r| (r.key_path.clone(), r.token))
                .collect()
        })
        .unwrap_or_default()
}

pub fn remove_observer(object: &Object, token: ObserverToken) -> bool {
    let Some(table) = observers_of(object) else {
        return false;
    };
    let mut registrations = table.registrations.write();
    let before = registrations.len();
    registrations.retain(|r| r.token != token);
    before != registrations.len()
}

/// Drop every observation registered on `object`. Returns how many there were.
pub fn stop_observing(object: &Object) -> usize {
    let removed = observers_of(object)
        .map(|table| table.registrations.read().len())
        .unwrap_or(0);
    object
        .associations()
        .set(OBSERVERS, Value::Nil, AssociationPolicy::Retain);
    if removed > 0 {
        log::trace!("stopped {removed} observations on object {}", object.id().0);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassId, RuntimeId};
    use parking_lot::Mutex;

    fn object() -> ObjectRef {
        Object::new(RuntimeId(0), ClassId(0))
    }

    fn recorder() -> (Arc<Mutex<Vec<Change>>>, impl Fn(&Change) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |change: &Change| sink.lock().push(change.clone()))
    }

    #[test]
    fn reports_old_and_new() {
        let obj = object();
        obj.set_field("name", Value::from("a"));
        let (seen, handler) = recorder();
        observe(&obj, "name", ObservingOptions::NEW | ObservingOptions::OLD, handler);

        obj.set_field("name", Value::from("b"));
        obj.set_field("other", Value::Int(1));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].old, Some(Value::from("a")));
        assert_eq!(seen[0].new, Some(Value::from("b")));
        assert!(!seen[0].is_prior);
    }

    #[test]
    fn initial_and_prior() {
        let obj = object();
        obj.set_field("n", Value::Int(1));
        let (seen, handler) = recorder();
        observe(
            &obj,
            "n",
            ObservingOptions::NEW | ObservingOptions::INITIAL | ObservingOptions::PRIOR,
            handler,
        );
        obj.set_field("n", Value::Int(2));

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].new, Some(Value::Int(1)));
        assert!(seen[1].is_prior);
        assert_eq!(seen[2].new, Some(Value::Int(2)));
    }

    #[test]
    fn stop_observing_tears_down_everything() {
        let obj = object();
        let (seen, handler) = recorder();
        observe(&obj, "a", ObservingOptions::NEW, handler);
        let (_, other) = recorder();
        observe(&obj, "b", ObservingOptions::NEW, other);
        assert_eq!(observing_info(&obj).len(), 2);

        assert_eq!(stop_observing(&obj), 2);
        assert!(observing_info(&obj).is_empty());
        obj.set_field("a", Value::Int(1));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn remove_single_observer() {
        let obj = object();
        let (seen, handler) = recorder();
        let token = observe(&obj, "a", ObservingOptions::NEW, handler);
        assert!(remove_observer(&obj, token));
        assert!(!remove_observer(&obj, token));
        obj.set_field("a", Value::Int(1));
        assert!(seen.lock().is_empty());
    }
}
