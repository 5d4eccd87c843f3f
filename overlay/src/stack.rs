use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;

use crate::{Behavior, ClassId, OverrideKey, Selector};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// One installed override. Immutable once installed.
#[derive(Debug)]
pub struct OverrideRecord {
    pub selector: Selector,
    pub type_scoped: bool,
    pub key: OverrideKey,
    pub behavior: Behavior,
    /// position in installation order, assigned when the record is pushed
    pub sequence: u64,
}

/// What a stack falls through to beneath its oldest record.
#[derive(Debug, Clone)]
pub enum Fallback {
    /// the method the scope itself declared when the stack was created
    Native(Behavior),
    /// ordinary resolution starting at this class, done at call time
    Inherited(ClassId),
    /// nothing to fall back to
    Unimplemented,
}

/// Overrides of one (scope, selector), oldest first.
///
/// Stacks are snapshots: writers build a new stack and swap it into the
/// table, so a dispatch that already picked a stack keeps a consistent view
/// while others install or remove.
#[derive(Debug, Clone)]
pub struct OverrideStack {
    fallback: Fallback,
    records: Vec<Arc<OverrideRecord>>,
}

/// Outcome of putting a record into a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installed {
    /// a new layer on top
    Pushed,
    /// an existing record with the same key was replaced in place
    Replaced,
}

impl OverrideStack {
    pub fn new(fallback: Fallback) -> Self {
        Self {
            fallback,
            records: Vec::new(),
        }
    }

    #[inline]
    pub fn fallback(&self) -> &Fallback {
        &self.fallback
    }

    #[inline]
    pub fn records(&self) -> &[Arc<OverrideRecord>] {
        &self.records
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of the newest record.
    #[inline]
    pub fn top(&self) -> Option<usize> {
        self.records.len().checked_sub(1)
    }

    #[inline]
    pub fn record(&self, position: usize) -> Option<&Arc<OverrideRecord>> {
        self.records.get(position)
    }

    pub fn position_of(&self, key: &OverrideKey) -> Option<usize> {
        self.records.iter().position(|r| &r.key == key)
    }

    pub fn contains(&self, key: &OverrideKey) -> bool {
        self.position_of(key).is_some()
    }

    /// A copy with `record` on top, or in place of the record sharing its key.
    /// A replacement keeps the sequence of the record it replaces.
    fn with_record(&self, mut record: OverrideRecord) -> (Self, Installed) {
        let mut next = self.clone();
        let installed = match next.position_of(&record.key) {
            Some(position) => {
                record.sequence = next.records[position].sequence;
                next.records[position] = Arc::new(record);
                Installed::Replaced
            }
            None => {
                record.sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
                next.records.push(Arc::new(record));
                Installed::Pushed
            }
        };
        debug_assert!(
            next.records.windows(2).all(|w| w[0].sequence < w[1].sequence),
            "override stack out of installation order"
        );
        (next, installed)
    }

    fn without(&self, key: &OverrideKey) -> Option<(Self, Arc<OverrideRecord>)> {
        let position = self.position_of(key)?;
        let mut next = self.clone();
        let removed = next.records.remove(position);
        Some((next, removed))
    }
}

impl OverrideRecord {
    pub fn new(selector: Selector, type_scoped: bool, key: OverrideKey, behavior: Behavior) -> Self {
        Self {
            selector,
            type_scoped,
            key,
            behavior,
            sequence: 0,
        }
    }
}

/// Map from some stack address to its current snapshot.
///
/// Readers clone the snapshot `Arc` under the read lock and drop the lock
/// before running anything. Empty stacks are removed.
#[derive(Debug)]
pub struct StackTable<K> {
    stacks: RwLock<HashMap<K, Arc<OverrideStack>>>,
}

impl<K> Default for StackTable<K> {
    fn default() -> Self {
        Self {
            stacks: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> StackTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, address: &K) -> Option<Arc<OverrideStack>> {
        self.stacks.read().get(address).cloned()
    }

    /// Put `record` into the stack at `address`. A missing stack is created
    /// with `fallback`; an existing one keeps the fallback it was created with.
    pub fn install(&self, address: K, record: OverrideRecord, fallback: Fallback) -> Installed {
        let mut stacks = self.stacks.write();
        let current = stacks
            .get(&address)
            .cloned()
            .unwrap_or_else(|| Arc::new(OverrideStack::new(fallback)));
        let (next, installed) = current.with_record(record);
        stacks.insert(address, Arc::new(next));
        installed
    }

    /// Take the record with `key` out of the stack at `address`.
    pub fn remove(&self, address: &K, key: &OverrideKey) -> Option<Arc<OverrideRecord>> {
        let mut stacks = self.stacks.write();
        let (next, removed) = stacks.get(address)?.without(key)?;
        if next.is_empty() {
            stacks.remove(address);
        } else {
            stacks.insert(address.clone(), Arc::new(next));
        }
        Some(removed)
    }

    /// Whether any stack whose address satisfies `filter` holds `key`.
    pub fn any_holds(&self, key: &OverrideKey, filter: impl Fn(&K) -> bool) -> bool {
        self.stacks
            .read()
            .iter()
            .any(|(address, stack)| filter(address) && stack.contains(key))
    }

    /// Remove every stack, returning how many records they held.
    pub fn clear(&self) -> usize {
        let mut stacks = self.stacks.write();
        let count = stacks.values().map(|s| s.len()).sum();
        stacks.clear();
        count
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn record(key: &str) -> OverrideRecord {
        OverrideRecord::new(
            Selector::new("say"),
            true,
            OverrideKey::new(key),
            Behavior::new(|_| Ok(Value::Nil)),
        )
    }

    fn keys(stack: &OverrideStack) -> Vec<&str> {
        stack.records().iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn push_orders_oldest_first() {
        let table = StackTable::new();
        assert_eq!(table.install(1u8, record("a"), Fallback::Unimplemented), Installed::Pushed);
        assert_eq!(table.install(1u8, record("b"), Fallback::Unimplemented), Installed::Pushed);
        let stack = table.get(&1).unwrap();
        assert_eq!(keys(&stack), ["a", "b"]);
        assert_eq!(stack.top(), Some(1));
    }

    #[test]
    fn same_key_replaces_in_place() {
        let table = StackTable::new();
        table.install(1u8, record("a"), Fallback::Unimplemented);
        table.install(1u8, record("b"), Fallback::Unimplemented);
        let before = table.get(&1).unwrap().record(0).unwrap().sequence;
        assert_eq!(table.install(1u8, record("a"), Fallback::Unimplemented), Installed::Replaced);
        let stack = table.get(&1).unwrap();
        assert_eq!(keys(&stack), ["a", "b"]);
        assert_eq!(stack.record(0).unwrap().sequence, before);
    }

    #[test]
    fn snapshots_survive_later_writes() {
        let table = StackTable::new();
        table.install(1u8, record("a"), Fallback::Unimplemented);
        let snapshot = table.get(&1).unwrap();
        table.install(1u8, record("b"), Fallback::Unimplemented);
        table.remove(&1, &OverrideKey::new("a"));
        assert_eq!(keys(&snapshot), ["a"]);
        assert_eq!(keys(&table.get(&1).unwrap()), ["b"]);
    }

    #[test]
    fn removing_last_record_drops_stack() {
        let table = StackTable::new();
        table.install(1u8, record("a"), Fallback::Unimplemented);
        assert!(table.remove(&1, &OverrideKey::new("missing")).is_none());
        assert!(table.remove(&1, &OverrideKey::new("a")).is_some());
        assert!(table.get(&1).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn fallback_is_kept_from_creation() {
        let table = StackTable::new();
        table.install(1u8, record("a"), Fallback::Inherited(ClassId(4)));
        table.install(1u8, record("b"), Fallback::Unimplemented);
        assert!(matches!(
            table.get(&1).unwrap().fallback(),
            Fallback::Inherited(ClassId(4))
        ));
    }

    #[test]
    fn any_holds_respects_filter() {
        let table = StackTable::new();
        table.install((1u8, 'x'), record("a"), Fallback::Unimplemented);
        table.install((2u8, 'y'), record("b"), Fallback::Unimplemented);
        let key = OverrideKey::new("a");
        assert!(table.any_holds(&key, |(scope, _)| *scope == 1));
        assert!(!table.any_holds(&key, |(scope, _)| *scope == 2));
        assert_eq!(table.clear(), 2);
    }
}
