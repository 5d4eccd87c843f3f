use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;

use crate::{Receiver, Value};

/// Posted right before an object's class identity is rewritten.
pub const WILL_CHANGE_CLASS: &str = "overlay.will-change-class";
/// Posted right after an object's class identity is rewritten.
pub const DID_CHANGE_CLASS: &str = "overlay.did-change-class";
pub const DID_INSTALL_OVERRIDE: &str = "overlay.did-install-override";
pub const DID_REMOVE_OVERRIDE: &str = "overlay.did-remove-override";

// payload keys
pub const OLD_CLASS_NAME: &str = "old-class-name";
pub const NEW_CLASS_NAME: &str = "new-class-name";
pub const SELECTOR: &str = "selector";
pub const OVERRIDE_KEY: &str = "key";

#[derive(Debug, Clone)]
pub struct Notification {
    pub name: Arc<str>,
    pub object: Option<Receiver>,
    pub info: HashMap<&'static str, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every notification
    name: Option<Arc<str>>,
    handler: Handler,
}

/// Synchronous fan-out of engine events to external observers.
#[derive(Default)]
pub struct NotificationCenter {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Notification {
    pub fn new(name: &str, object: Option<Receiver>) -> Self {
        Self {
            name: Arc::from(name),
            object,
            info: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.info.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Value {
        self.info.get(key).cloned().unwrap_or_default()
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.insert(Some(Arc::from(name)), Arc::new(handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(handler))
    }

    fn insert(&self, name: Option<Arc<str>>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .push(Subscription { id, name, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Deliver `notification` on the calling thread. Handlers run after the
    /// subscription list is released, so they may subscribe or post in turn.
    pub fn post(&self, notification: &Notification) {
        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.name.as_deref().is_none_or(|n| n == &*notification.name))
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            handler(notification);
        }
    }

    pub fn clear(&self) {
        self.subscriptions.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn filters_by_name() {
        let center = NotificationCenter::new();
        let named = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));
        {
            let named = named.clone();
            center.subscribe(WILL_CHANGE_CLASS, move |_| {
                named.fetch_add(1, Ordering::SeqCst);
            });
            let all = all.clone();
            center.subscribe_all(move |_| {
                all.fetch_add(1, Ordering::SeqCst);
            });
        }
        center.post(&Notification::new(WILL_CHANGE_CLASS, None));
        center.post(&Notification::new(DID_CHANGE_CLASS, None));
        assert_eq!(named.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handlers_may_unsubscribe_while_posting() {
        let center = Arc::new(NotificationCenter::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let center_ref = Arc::downgrade(&center);
            let hits = hits.clone();
            center.subscribe("ping", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                if let Some(center) = center_ref.upgrade() {
                    center.clear();
                }
            })
        };
        center.post(&Notification::new("ping", None));
        center.post(&Notification::new("ping", None));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!center.unsubscribe(id));
    }

    #[test]
    fn payload_lookup() {
        let n = Notification::new(DID_CHANGE_CLASS, None).with(OLD_CLASS_NAME, "A");
        assert_eq!(n.get(OLD_CLASS_NAME), Value::from("A"));
        assert!(n.get(NEW_CLASS_NAME).is_nil());
    }
}
