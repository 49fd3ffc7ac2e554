//! Live iterators over Map and Set.
//!
//! An iterator holds the storage it is walking and a cursor into that storage's
//! dense sequence. It never owns the collection, so it keeps working when the
//! collection replaces its storage: a retired storage tells the iterator where
//! its successor is and how far to shift the cursor.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::{
    heap::{Heap, HeapData, HeapId},
    metadata::{MetadataBuilder, Traceable},
    resource::{ResourceError, ResourceTracker},
    tracer::HeapTracer,
    types::{
        Collection, CollectionKind, ObjectHeader,
        object::impl_js_object,
        storage::{Retirement, Slot},
    },
    value::Value,
};

/// What each step of an iterator yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize)]
pub enum IterKind {
    Keys,
    Values,
    Entries,
}

/// One item produced by [`CollectionIter::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum IterItem {
    /// A key (`keys()`) or a value (`values()`).
    Value(Value),
    /// A `[key, value]` pair; Set iterators report `[value, value]`.
    Entry(Value, Value),
}

/// A Map or Set iterator cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionIter {
    header: ObjectHeader,
    /// `None` once exhausted.
    storage: Option<HeapId>,
    cursor: usize,
    kind: IterKind,
}

impl_js_object!(CollectionIter);

/// A live entry found by [`advance`].
#[derive(Debug)]
pub(crate) struct Step {
    /// The storage the entry was found in, after following retirements.
    pub storage: HeapId,
    /// Cursor for the following call.
    pub next: usize,
    pub key: Value,
    pub value: Value,
}

/// Finds the first live entry at or after `cursor` in `storage`.
///
/// Retired storages are followed to their successors first, translating the
/// cursor past every tombstone the rebuild dropped. A storage retired by
/// `clear()` ends the walk, as does running off the current dense length.
pub(crate) fn advance(
    heap: &Heap<impl ResourceTracker, impl HeapTracer>,
    mut storage: HeapId,
    mut cursor: usize,
) -> Option<Step> {
    loop {
        match heap.storage(storage).retirement() {
            None => break,
            Some(Retirement::Cleared) => return None,
            Some(Retirement::Rebuilt { successor, removed }) => {
                cursor = Retirement::translate(removed, cursor);
                storage = *successor;
            }
        }
    }

    let cell = heap.storage(storage);
    while cursor < cell.dense_len() {
        let position = cursor;
        cursor += 1;
        if let Some(Slot::Live(entry)) = cell.slot(position) {
            return Some(Step {
                storage,
                next: cursor,
                key: entry.key.clone(),
                value: entry.value.clone(),
            });
        }
    }
    None
}

impl CollectionIter {
    #[must_use]
    pub fn kind(&self) -> IterKind {
        self.kind
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.storage.is_none()
    }

    /// Allocates an iterator over `collection`'s current storage, positioned
    /// before the first entry.
    ///
    /// Does not keep the collection alive, only its storage.
    pub fn create<T: ResourceTracker, Tr: HeapTracer>(
        heap: &mut Heap<T, Tr>,
        collection: HeapId,
        kind: IterKind,
        prototype: Option<HeapId>,
    ) -> Result<HeapId, ResourceError> {
        let flavour = Collection::kind(heap, collection);
        let iter = Self {
            header: ObjectHeader::new(prototype),
            storage: Some(heap.collection(collection).storage()),
            cursor: 0,
            kind,
        };
        // the new cell holds both references, so the allocation keeps them alive
        heap.allocate(match flavour {
            CollectionKind::Map => HeapData::MapIterator(iter),
            CollectionKind::Set => HeapData::SetIterator(iter),
        })
    }

    /// Produces the next item, or `None` once the iterator is done.
    ///
    /// Never allocates. Once `None` has been returned the iterator stays
    /// exhausted even if the collection grows again.
    pub fn next(heap: &mut Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId) -> Option<IterItem> {
        let flavour = CollectionKind::of(heap.kind(id)).expect("CollectionIter::next: not an iterator");
        let iter = heap.iterator(id);
        let (kind, cursor) = (iter.kind, iter.cursor);
        let storage = iter.storage?;

        let Some(step) = advance(heap, storage, cursor) else {
            heap.iterator_mut(id).storage = None;
            return None;
        };
        let iter = heap.iterator_mut(id);
        iter.storage = Some(step.storage);
        iter.cursor = step.next;

        let value = match flavour {
            CollectionKind::Map => step.value,
            CollectionKind::Set => step.key.clone(),
        };
        Some(match kind {
            IterKind::Keys => IterItem::Value(step.key),
            IterKind::Values => IterItem::Value(value),
            IterKind::Entries => IterItem::Entry(step.key, value),
        })
    }
}

impl Traceable for CollectionIter {
    fn project(data: &HeapData) -> Option<&Self> {
        match data {
            HeapData::MapIterator(iter) | HeapData::SetIterator(iter) => Some(iter),
            _ => None,
        }
    }

    fn project_mut(data: &mut HeapData) -> Option<&mut Self> {
        match data {
            HeapData::MapIterator(iter) | HeapData::SetIterator(iter) => Some(iter),
            _ => None,
        }
    }

    fn build_metadata(builder: &mut MetadataBuilder<Self>) {
        builder
            .add_object_fields()
            .add_slot("@storage", |iter| iter.storage, |iter| iter.storage.as_mut());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::resource::NoLimitTracker;

    type TestHeap = Heap<NoLimitTracker>;

    fn map_of(heap: &mut TestHeap, keys: impl IntoIterator<Item = i32>) -> HeapId {
        let mut map = Collection::construct(heap, CollectionKind::Map, None).unwrap();
        for key in keys {
            map = Collection::insert(heap, map, Value::from(key), Value::from(key * 100)).unwrap();
        }
        map
    }

    fn drain(heap: &mut TestHeap, iter: HeapId) -> Vec<IterItem> {
        std::iter::from_fn(|| CollectionIter::next(heap, iter)).collect()
    }

    #[test]
    fn keys_values_entries() {
        let mut heap = Heap::new(16, NoLimitTracker);
        let map = map_of(&mut heap, [1, 2]);
        let keys = CollectionIter::create(&mut heap, map, IterKind::Keys, None).unwrap();
        let values = CollectionIter::create(&mut heap, map, IterKind::Values, None).unwrap();
        let entries = CollectionIter::create(&mut heap, map, IterKind::Entries, None).unwrap();

        assert_eq!(
            drain(&mut heap, keys),
            vec![IterItem::Value(Value::from(1)), IterItem::Value(Value::from(2))]
        );
        assert_eq!(
            drain(&mut heap, values),
            vec![IterItem::Value(Value::from(100)), IterItem::Value(Value::from(200))]
        );
        assert_eq!(
            drain(&mut heap, entries),
            vec![
                IterItem::Entry(Value::from(1), Value::from(100)),
                IterItem::Entry(Value::from(2), Value::from(200)),
            ]
        );
    }

    #[test]
    fn set_entries_repeat_the_value() {
        let mut heap = Heap::new(16, NoLimitTracker);
        let set = Collection::construct(&mut heap, CollectionKind::Set, None).unwrap();
        let set = Collection::insert(&mut heap, set, Value::from("x"), Value::Undefined).unwrap();
        let iter = CollectionIter::create(&mut heap, set, IterKind::Entries, None).unwrap();
        assert_eq!(heap.kind(iter), crate::heap::CellKind::SetIterator);
        assert_eq!(
            drain(&mut heap, iter),
            vec![IterItem::Entry(Value::from("x"), Value::from("x"))]
        );
    }

    #[test]
    fn parked_iterator_survives_rebuild() {
        let mut heap = Heap::new(16, NoLimitTracker);
        let mut map = map_of(&mut heap, 0..6);
        let iter = CollectionIter::create(&mut heap, map, IterKind::Keys, None).unwrap();
        assert_eq!(CollectionIter::next(&mut heap, iter), Some(IterItem::Value(Value::from(0))));
        assert_eq!(CollectionIter::next(&mut heap, iter), Some(IterItem::Value(Value::from(1))));

        // drop entries on both sides of the cursor, then force a rebuild
        for key in [0, 1, 3] {
            Collection::remove(&mut heap, map, &Value::from(key));
        }
        for key in 6..8 {
            map = Collection::insert(&mut heap, map, Value::from(key), Value::Null).unwrap();
        }
        let keys: Vec<_> = drain(&mut heap, iter);
        assert_eq!(
            keys,
            [2, 4, 5, 6, 7].map(|k| IterItem::Value(Value::from(k))).to_vec()
        );
        assert!(heap.iterator(iter).is_exhausted());
    }

    #[test]
    fn exhaustion_is_permanent() {
        let mut heap = Heap::new(16, NoLimitTracker);
        let mut map = map_of(&mut heap, [1]);
        let iter = CollectionIter::create(&mut heap, map, IterKind::Keys, None).unwrap();
        assert_eq!(drain(&mut heap, iter).len(), 1);
        map = Collection::insert(&mut heap, map, Value::from(2), Value::Null).unwrap();
        assert_eq!(CollectionIter::next(&mut heap, iter), None);
        assert_eq!(Collection::size(&heap, map), 2);
    }

    #[test]
    fn clear_finishes_iterators() {
        let mut heap = Heap::new(16, NoLimitTracker);
        let map = map_of(&mut heap, [1, 2, 3]);
        let iter = CollectionIter::create(&mut heap, map, IterKind::Keys, None).unwrap();
        CollectionIter::next(&mut heap, iter);
        let map = Collection::clear(&mut heap, map).unwrap();
        Collection::insert(&mut heap, map, Value::from(9), Value::Null).unwrap();
        assert_eq!(CollectionIter::next(&mut heap, iter), None);
    }
}
