//! Insertion-ordered hash storage backing Map and Set.
//!
//! Entries live in a dense `slots` vector in insertion order; a `hashbrown::HashTable`
//! maps key hashes to slot positions. Deleting an entry leaves a tombstone in
//! place so the positions iterators hold stay meaningful. Tombstones are only
//! dropped when the storage is rebuilt into a successor cell, which happens just
//! before an append would fill its capacity.
//!
//! A replaced storage is *retired*: it keeps just enough state for iterators
//! parked on it to move on. After a rebuild it records its successor and the
//! positions of the tombstones it dropped; after `clear()` it is marked cleared.

use std::mem::size_of;

use hashbrown::HashTable;
use serde::{Deserialize, Serialize};

use crate::{
    heap::{HeapData, HeapId},
    metadata::{MetadataBuilder, Traceable},
    types::CollectionKind,
    value::Value,
};

/// Dense capacity of a freshly constructed storage.
pub const INITIAL_CAPACITY: usize = 8;

/// A live key (and value, in map mode) with its cached hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub key: Value,
    /// Always `undefined` in set mode.
    pub value: Value,
    hash: u64,
}

/// One position of the dense sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Slot {
    Live(Entry),
    Tombstone,
}

impl Slot {
    #[must_use]
    pub fn as_live(&self) -> Option<&Entry> {
        match self {
            Self::Live(entry) => Some(entry),
            Self::Tombstone => None,
        }
    }
}

/// Why a storage no longer holds entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retirement {
    /// Replaced by a rebuilt copy.
    Rebuilt {
        successor: HeapId,
        /// Sorted positions of the tombstones the rebuild dropped.
        removed: Vec<usize>,
    },
    /// Emptied by `clear()`; iterators on it are finished.
    Cleared,
}

impl Retirement {
    /// Translates a cursor on the retired storage into one on its successor.
    ///
    /// Every dropped tombstone before the cursor shifts it left by one.
    #[must_use]
    pub fn translate(removed: &[usize], cursor: usize) -> usize {
        cursor - removed.partition_point(|&position| position < cursor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new slot was appended.
    Inserted,
    /// The key was present; its value was overwritten in place.
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    Removed,
    NotFound,
}

/// Ordered hash storage cell.
///
/// Keys must be normalised with [`Value::normalize_zero`] and hashed with the
/// heap's key hash before they reach this type; it never looks at the heap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedHashStorage {
    mode: CollectionKind,
    slots: Vec<Slot>,
    /// Positions of live slots, keyed by their entry's hash. Rebuilt after
    /// deserialization by [`Self::reindex`].
    #[serde(skip)]
    index: HashTable<usize>,
    live: usize,
    capacity: usize,
    retired: Option<Retirement>,
}

impl OrderedHashStorage {
    #[must_use]
    pub fn new(mode: CollectionKind) -> Self {
        Self::with_capacity(mode, INITIAL_CAPACITY)
    }

    fn with_capacity(mode: CollectionKind, capacity: usize) -> Self {
        Self {
            mode,
            slots: Vec::with_capacity(capacity),
            index: HashTable::with_capacity(capacity),
            live: 0,
            capacity,
            retired: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> CollectionKind {
        self.mode
    }

    /// Number of live entries. Tracked incrementally.
    #[must_use]
    pub fn size(&self) -> usize {
        self.live
    }

    /// Length of the dense sequence, tombstones included.
    #[must_use]
    pub fn dense_len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn slot(&self, position: usize) -> Option<&Slot> {
        self.slots.get(position)
    }

    /// Live entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().filter_map(Slot::as_live)
    }

    #[must_use]
    pub fn retirement(&self) -> Option<&Retirement> {
        self.retired.as_ref()
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.capacity * (size_of::<Slot>() + size_of::<usize>())
    }

    /// Position of the live slot holding `key`.
    #[must_use]
    pub fn find(&self, key: &Value, hash: u64) -> Option<usize> {
        let slots = &self.slots;
        self.index
            .find(hash, |&position| Self::holds(slots, position, key))
            .copied()
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &Value, hash: u64) -> Option<&Value> {
        let position = self.find(key, hash)?;
        Some(&self.live_entry(position).value)
    }

    /// Inserts `key`, or overwrites its value when already present.
    ///
    /// # Panics
    /// Panics if the storage has been retired.
    pub fn insert(&mut self, key: Value, value: Value, hash: u64) -> InsertOutcome {
        assert!(self.retired.is_none(), "OrderedHashStorage::insert: storage is retired");
        if let Some(position) = self.find(&key, hash) {
            if let Slot::Live(entry) = &mut self.slots[position] {
                entry.value = value;
            }
            return InsertOutcome::Updated;
        }

        let position = self.slots.len();
        self.slots.push(Slot::Live(Entry { key, value, hash }));
        let slots = &self.slots;
        self.index
            .insert_unique(hash, position, |&p| Self::indexed_hash(slots, p));
        self.live += 1;
        InsertOutcome::Inserted
    }

    /// Tombstones the slot holding `key` and unindexes it. Never compacts.
    pub fn erase(&mut self, key: &Value, hash: u64) -> EraseOutcome {
        let slots = &self.slots;
        let Ok(found) = self.index.find_entry(hash, |&position| Self::holds(slots, position, key)) else {
            return EraseOutcome::NotFound;
        };
        let (position, _) = found.remove();
        self.slots[position] = Slot::Tombstone;
        self.live -= 1;
        EraseOutcome::Removed
    }

    /// Whether appending one more entry fills the dense capacity.
    ///
    /// Checked before every appending insertion.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        self.slots.len() + 1 >= self.capacity
    }

    /// Capacity of the successor built by [`Self::rebuilt`].
    ///
    /// When at least half of the dense sequence is tombstones, compacting alone
    /// frees enough room and the capacity is kept. Otherwise it doubles. The
    /// capacity never shrinks.
    #[must_use]
    pub fn next_capacity(&self) -> usize {
        let tombstones = self.slots.len() - self.live;
        if tombstones * 2 >= self.capacity {
            self.capacity
        } else {
            self.capacity * 2
        }
    }

    /// Builds the successor storage: live entries only, same order, rehashed.
    #[must_use]
    pub fn rebuilt(&self) -> Self {
        let mut successor = Self::with_capacity(self.mode, self.next_capacity());
        for entry in self.entries() {
            successor.insert(entry.key.clone(), entry.value.clone(), entry.hash);
        }
        successor
    }

    /// Retires this storage in favour of `successor`, a cell holding [`Self::rebuilt`].
    pub(crate) fn retire_into(&mut self, successor: HeapId) {
        let removed = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(position, slot)| matches!(slot, Slot::Tombstone).then_some(position))
            .collect();
        self.drop_entries();
        self.retired = Some(Retirement::Rebuilt { successor, removed });
    }

    /// Retires this storage after its collection was cleared.
    pub(crate) fn retire_cleared(&mut self) {
        self.drop_entries();
        self.retired = Some(Retirement::Cleared);
    }

    fn drop_entries(&mut self) {
        self.slots = Vec::new();
        self.index = HashTable::new();
        self.live = 0;
    }

    /// Rebuilds the hash index from the slots.
    pub(crate) fn reindex(&mut self) {
        let slots = &self.slots;
        let mut index = HashTable::with_capacity(self.live);
        for (position, slot) in slots.iter().enumerate() {
            if let Slot::Live(entry) = slot {
                index.insert_unique(entry.hash, position, |&p| Self::indexed_hash(slots, p));
            }
        }
        self.index = index;
    }

    fn live_entry(&self, position: usize) -> &Entry {
        self.slots[position]
            .as_live()
            .expect("OrderedHashStorage: index points at a tombstone")
    }

    fn holds(slots: &[Slot], position: usize, key: &Value) -> bool {
        matches!(&slots[position], Slot::Live(entry) if entry.key.same_value_zero(key))
    }

    fn indexed_hash(slots: &[Slot], position: usize) -> u64 {
        slots[position]
            .as_live()
            .expect("OrderedHashStorage: index points at a tombstone")
            .hash
    }
}

impl Traceable for OrderedHashStorage {
    fn project(data: &HeapData) -> Option<&Self> {
        match data {
            HeapData::Storage(storage) => Some(storage),
            _ => None,
        }
    }

    fn project_mut(data: &mut HeapData) -> Option<&mut Self> {
        match data {
            HeapData::Storage(storage) => Some(storage),
            _ => None,
        }
    }

    fn build_metadata(builder: &mut MetadataBuilder<Self>) {
        builder
            .add_values(
                "@entries",
                |storage, visit| {
                    for entry in storage.entries() {
                        if let Value::Ref(id) = entry.key {
                            visit(id);
                        }
                        if let Value::Ref(id) = entry.value {
                            visit(id);
                        }
                    }
                },
                |storage, fix| {
                    for slot in &mut storage.slots {
                        if let Slot::Live(entry) = slot {
                            if let Value::Ref(id) = &mut entry.key {
                                fix(id);
                            }
                            if let Value::Ref(id) = &mut entry.value {
                                fix(id);
                            }
                        }
                    }
                },
            )
            .add_slot(
                "@successor",
                |storage| match storage.retired {
                    Some(Retirement::Rebuilt { successor, .. }) => Some(successor),
                    _ => None,
                },
                |storage| match &mut storage.retired {
                    Some(Retirement::Rebuilt { successor, .. }) => Some(successor),
                    _ => None,
                },
            );
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Distinct small keys with a deliberately weak hash so probing is exercised.
    fn key(n: i32) -> (Value, u64) {
        (Value::from(n), u64::from(n.unsigned_abs() % 3))
    }

    fn keys(storage: &OrderedHashStorage) -> Vec<Value> {
        storage.entries().map(|entry| entry.key.clone()).collect()
    }

    #[test]
    fn insert_updates_in_place() {
        let mut storage = OrderedHashStorage::new(CollectionKind::Map);
        let (a, ha) = key(1);
        let (b, hb) = key(2);
        assert_eq!(storage.insert(a.clone(), Value::from("x"), ha), InsertOutcome::Inserted);
        assert_eq!(storage.insert(b.clone(), Value::from("y"), hb), InsertOutcome::Inserted);
        assert_eq!(storage.insert(a.clone(), Value::from("z"), ha), InsertOutcome::Updated);

        assert_eq!(storage.size(), 2);
        assert_eq!(storage.dense_len(), 2);
        assert_eq!(keys(&storage), vec![a.clone(), b]);
        assert_eq!(storage.get(&a, ha), Some(&Value::from("z")));
    }

    #[test]
    fn erase_leaves_tombstone_and_unindexes() {
        let mut storage = OrderedHashStorage::new(CollectionKind::Set);
        for n in 0..3 {
            let (k, h) = key(n);
            storage.insert(k, Value::Undefined, h);
        }
        let (middle, hm) = key(1);
        assert_eq!(storage.erase(&middle, hm), EraseOutcome::Removed);
        assert_eq!(storage.erase(&middle, hm), EraseOutcome::NotFound);

        assert_eq!(storage.size(), 2);
        assert_eq!(storage.dense_len(), 3);
        assert!(matches!(storage.slot(1), Some(Slot::Tombstone)));
        assert_eq!(storage.find(&middle, hm), None);

        // re-inserting appends rather than reusing the tombstone
        storage.insert(middle.clone(), Value::Undefined, hm);
        assert_eq!(storage.find(&middle, hm), Some(3));
        assert_eq!(keys(&storage), vec![Value::from(0), Value::from(2), Value::from(1)]);
    }

    #[test]
    fn growth_doubles_and_compaction_keeps_capacity() {
        let mut storage = OrderedHashStorage::new(CollectionKind::Set);
        for n in 0..6 {
            let (k, h) = key(n);
            storage.insert(k, Value::Undefined, h);
        }
        assert!(!storage.needs_rebuild());
        let (k, h) = key(6);
        storage.insert(k, Value::Undefined, h);
        assert!(storage.needs_rebuild(), "the next append would fill the storage");
        assert_eq!(storage.next_capacity(), 16);

        for n in 0..4 {
            let (k, h) = key(n);
            storage.erase(&k, h);
        }
        assert_eq!(storage.next_capacity(), 8);

        let successor = storage.rebuilt();
        assert_eq!(successor.capacity(), 8);
        assert_eq!(successor.dense_len(), 3);
        assert_eq!(keys(&successor), (4..7).map(Value::from).collect::<Vec<_>>());
        let (k, h) = key(6);
        assert_eq!(successor.find(&k, h), Some(2));
    }

    #[test]
    fn retiring_records_removed_positions() {
        let mut storage = OrderedHashStorage::new(CollectionKind::Map);
        for n in 0..5 {
            let (k, h) = key(n);
            storage.insert(k, Value::from(n * 10), h);
        }
        for n in [1, 3] {
            let (k, h) = key(n);
            storage.erase(&k, h);
        }
        storage.retire_into(HeapId::from_index_for_tests(9));

        assert_eq!(storage.size(), 0);
        assert_eq!(storage.dense_len(), 0);
        let Some(Retirement::Rebuilt { removed, .. }) = storage.retirement() else {
            panic!("storage should be retired by a rebuild");
        };
        assert_eq!(removed, &vec![1, 3]);
        // a cursor parked before slot 4 skips the two dropped tombstones
        assert_eq!(Retirement::translate(removed, 4), 2);
        assert_eq!(Retirement::translate(removed, 1), 1);
        assert_eq!(Retirement::translate(removed, 0), 0);
    }

    #[test]
    fn reindex_restores_lookups() {
        let mut storage = OrderedHashStorage::new(CollectionKind::Map);
        let (k, h) = key(7);
        storage.insert(k.clone(), Value::Null, h);
        storage.index = HashTable::new();
        assert_eq!(storage.find(&k, h), None);
        storage.reindex();
        assert_eq!(storage.find(&k, h), Some(0));
    }
}
