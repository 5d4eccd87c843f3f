use std::collections::{HashMap, HashSet};

use crate::{
    ClassId, Interface, OverrideError, OverrideKey, Receiver, Runtime, Scope, ScopeId,
    registry::{instance_state_or_insert, log_released},
};

/// Interfaces one scope currently reports beyond what its class declares.
///
/// Each interface is reference counted by the override keys that require
/// it; it is reported while at least one key holds it.
#[derive(Debug, Default, Clone)]
pub struct ConformanceLedger {
    required: HashMap<Interface, HashSet<OverrideKey>>,
    by_key: HashMap<OverrideKey, HashSet<Interface>>,
}

impl ConformanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `key` already required `interface`.
    pub fn require(&mut self, interface: Interface, key: OverrideKey) -> bool {
        let added = self
            .required
            .entry(interface.clone())
            .or_default()
            .insert(key.clone());
        self.by_key.entry(key).or_default().insert(interface);
        added
    }

    /// Returns false if `key` did not require `interface`.
    pub fn release(&mut self, interface: &Interface, key: &OverrideKey) -> bool {
        let Some(keys) = self.required.get_mut(interface) else {
            return false;
        };
        let removed = keys.remove(key);
        if keys.is_empty() {
            self.required.remove(interface);
        }
        if let Some(interfaces) = self.by_key.get_mut(key) {
            interfaces.remove(interface);
            if interfaces.is_empty() {
                self.by_key.remove(key);
            }
        }
        removed
    }

    /// Release everything `key` required. Returns the interfaces it held.
    pub fn release_key(&mut self, key: &OverrideKey) -> Vec<Interface> {
        let Some(interfaces) = self.by_key.remove(key) else {
            return Vec::new();
        };
        for interface in &interfaces {
            if let Some(keys) = self.required.get_mut(interface) {
                keys.remove(key);
                if keys.is_empty() {
                    self.required.remove(interface);
                }
            }
        }
        let mut released: Vec<_> = interfaces.into_iter().collect();
        released.sort();
        released
    }

    #[inline]
    pub fn conforms(&self, interface: &Interface) -> bool {
        self.required.get(interface).is_some_and(|keys| !keys.is_empty())
    }

    pub fn interfaces(&self) -> Vec<Interface> {
        let mut interfaces: Vec<_> = self.required.keys().cloned().collect();
        interfaces.sort();
        interfaces
    }

    pub fn keys_for(&self, interface: &Interface) -> Vec<OverrideKey> {
        let mut keys: Vec<_> = self
            .required
            .get(interface)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }
}

impl Runtime {
    /// Report `interface` for `scope` for as long as `key` holds it.
    pub fn require(
        &self,
        scope: &Scope,
        interface: impl Into<Interface>,
        key: &OverrideKey,
    ) -> Result<(), OverrideError> {
        let interface = interface.into();
        match scope {
            Scope::Class(class) | Scope::ClassObject(class) => {
                if !self.classes().contains(*class) {
                    return Err(OverrideError::UnknownClass(*class));
                }
                self.shared
                    .ledgers
                    .lock()
                    .entry(scope.id())
                    .or_default()
                    .require(interface.clone(), key.clone());
            }
            Scope::Instance(object) => {
                self.specialize(object)?;
                instance_state_or_insert(object)
                    .ledger
                    .lock()
                    .require(interface.clone(), key.clone());
            }
        }
        log::debug!(
            "[{}] {key} requires {interface} on {scope:?}",
            self.settings().name
        );
        Ok(())
    }

    pub fn release(&self, scope: &Scope, interface: impl Into<Interface>, key: &OverrideKey) -> bool {
        let interface = interface.into();
        let released = match scope {
            Scope::Class(_) | Scope::ClassObject(_) => {
                let mut ledgers = self.shared.ledgers.lock();
                let Some(ledger) = ledgers.get_mut(&scope.id()) else {
                    return false;
                };
                let released = ledger.release(&interface, key);
                if ledger.is_empty() {
                    ledgers.remove(&scope.id());
                }
                released
            }
            Scope::Instance(object) => match self.local_state(object) {
                Some(state) => state.ledger.lock().release(&interface, key),
                None => false,
            },
        };
        if released {
            log_released(self, scope, key, std::slice::from_ref(&interface));
        }
        released
    }

    /// Whether the ledger of exactly `scope` reports `interface`.
    pub fn conforms(&self, scope: &Scope, interface: impl Into<Interface>) -> bool {
        let interface = interface.into();
        match scope {
            Scope::Class(_) | Scope::ClassObject(_) => self
                .shared
                .ledgers
                .lock()
                .get(&scope.id())
                .is_some_and(|ledger| ledger.conforms(&interface)),
            Scope::Instance(object) => {
                self.local_state(object)
                    .is_some_and(|state| state.ledger.lock().conforms(&interface))
            }
        }
    }

    /// Interfaces the ledger of `scope` currently reports.
    pub fn required_interfaces(&self, scope: &Scope) -> Vec<Interface> {
        match scope {
            Scope::Class(_) | Scope::ClassObject(_) => self
                .shared
                .ledgers
                .lock()
                .get(&scope.id())
                .map(ConformanceLedger::interfaces)
                .unwrap_or_default(),
            Scope::Instance(object) => self
                .local_state(object)
                .map(|state| state.ledger.lock().interfaces())
                .unwrap_or_default(),
        }
    }

    /// Full conformance query: declared interfaces of the class chain, the
    /// ledgers along that chain, and the receiver's own ledger. Objects of
    /// another runtime conform to nothing here.
    pub fn conforms_to(&self, receiver: impl Into<Receiver>, interface: impl Into<Interface>) -> bool {
        let interface = interface.into();
        match receiver.into() {
            Receiver::Object(object) if !self.owns(&object) => false,
            Receiver::Object(object) => {
                let own = self
                    .local_state(&object)
                    .is_some_and(|state| state.ledger.lock().conforms(&interface));
                own || self.class_conforms(self.class_of(&object), &interface, false)
            }
            Receiver::Class(class) => self.class_conforms(class, &interface, true),
        }
    }

    fn class_conforms(&self, class: ClassId, interface: &Interface, class_object: bool) -> bool {
        let chain = self.classes().ancestry(class);
        let ledgers = self.shared.ledgers.lock();
        let required = |id: ScopeId| ledgers.get(&id).is_some_and(|l| l.conforms(interface));
        chain.iter().any(|class| {
            class.interfaces().contains(interface)
                || required(ScopeId::Class(class.id()))
                || (class_object && required(ScopeId::ClassObject(class.id())))
        })
    }
}

/// Release what `key` required in the type scope `scope`.
pub(crate) fn release_from(
    ledgers: &mut HashMap<ScopeId, ConformanceLedger>,
    scope: ScopeId,
    key: &OverrideKey,
) -> Vec<Interface> {
    let Some(ledger) = ledgers.get_mut(&scope) else {
        return Vec::new();
    };
    let released = ledger.release_key(key);
    if ledger.is_empty() {
        ledgers.remove(&scope);
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str) -> Interface {
        Interface::new(name)
    }

    fn key(name: &str) -> OverrideKey {
        OverrideKey::new(name)
    }

    #[test]
    fn reference_counted_by_key() {
        let mut ledger = ConformanceLedger::new();
        assert!(ledger.require(iface("X"), key("k1")));
        assert!(ledger.require(iface("X"), key("k2")));
        assert!(!ledger.require(iface("X"), key("k2")));
        assert!(ledger.conforms(&iface("X")));

        assert!(ledger.release(&iface("X"), &key("k1")));
        assert!(ledger.conforms(&iface("X")));
        assert!(ledger.release(&iface("X"), &key("k2")));
        assert!(!ledger.conforms(&iface("X")));
        assert!(ledger.is_empty());
    }

    #[test]
    fn release_unknown_is_noop() {
        let mut ledger = ConformanceLedger::new();
        assert!(!ledger.release(&iface("X"), &key("k")));
        ledger.require(iface("X"), key("k"));
        assert!(!ledger.release(&iface("X"), &key("other")));
        assert!(ledger.conforms(&iface("X")));
    }

    #[test]
    fn release_key_drops_every_interface() {
        let mut ledger = ConformanceLedger::new();
        ledger.require(iface("A"), key("k"));
        ledger.require(iface("B"), key("k"));
        ledger.require(iface("B"), key("other"));

        assert_eq!(ledger.release_key(&key("k")), [iface("A"), iface("B")]);
        assert!(!ledger.conforms(&iface("A")));
        assert!(ledger.conforms(&iface("B")));
        assert_eq!(ledger.keys_for(&iface("B")), [key("other")]);
        assert!(ledger.release_key(&key("k")).is_empty());
    }
}
