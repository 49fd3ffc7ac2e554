//! Map and Set objects.
//!
//! Both flavours share one cell type: an object header plus a reference to the
//! [`OrderedHashStorage`] that holds the entries. A Set stores `undefined` as
//! every value.
//!
//! Operations are associated functions over the heap rather than methods,
//! because any insertion may allocate a successor storage and so run the
//! collector. Each function takes ids that are valid on entry, roots what it
//! needs internally, and returns the receiver's current id when it allocated.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    exception::RunResult,
    heap::{CellKind, Heap, HeapData, HeapId},
    metadata::{MetadataBuilder, Traceable},
    resource::{ResourceError, ResourceTracker},
    tracer::HeapTracer,
    types::{
        ObjectHeader, OrderedHashStorage,
        iter::{self, Step},
        object::impl_js_object,
        storage::{EraseOutcome, InsertOutcome},
    },
    value::Value,
};

/// Which flavour of keyed collection a cell or storage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter, Serialize, Deserialize)]
pub enum CollectionKind {
    Map,
    Set,
}

impl CollectionKind {
    #[must_use]
    pub fn cell_kind(self) -> CellKind {
        match self {
            Self::Map => CellKind::Map,
            Self::Set => CellKind::Set,
        }
    }

    /// Kind of the iterator cells created over this flavour.
    #[must_use]
    pub fn iterator_kind(self) -> CellKind {
        match self {
            Self::Map => CellKind::MapIterator,
            Self::Set => CellKind::SetIterator,
        }
    }

    /// Flavour of a collection or iterator cell kind.
    #[must_use]
    pub fn of(kind: CellKind) -> Option<Self> {
        match kind {
            CellKind::Map | CellKind::MapIterator => Some(Self::Map),
            CellKind::Set | CellKind::SetIterator => Some(Self::Set),
            _ => None,
        }
    }

    fn wrap(self, collection: Collection) -> HeapData {
        match self {
            Self::Map => HeapData::Map(collection),
            Self::Set => HeapData::Set(collection),
        }
    }
}

/// A Map or Set cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    header: ObjectHeader,
    /// Exclusively owned; replaced on growth and on `clear()`.
    storage: HeapId,
}

impl_js_object!(Collection);

impl Collection {
    /// The storage currently holding the entries.
    #[must_use]
    pub fn storage(&self) -> HeapId {
        self.storage
    }

    /// Flavour of the collection at `id`.
    ///
    /// # Panics
    /// Panics if `id` is not a Map or Set.
    #[must_use]
    pub fn kind(heap: &Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId) -> CollectionKind {
        match heap.kind(id) {
            CellKind::Map => CollectionKind::Map,
            CellKind::Set => CollectionKind::Set,
            other => panic!("Collection::kind: expected Map or Set, found {other}"),
        }
    }

    /// Allocates an empty collection with its initial storage.
    pub fn construct<T: ResourceTracker, Tr: HeapTracer>(
        heap: &mut Heap<T, Tr>,
        kind: CollectionKind,
        prototype: Option<HeapId>,
    ) -> Result<HeapId, ResourceError> {
        let mut scope = heap.scope();
        let prototype = prototype.map(|id| scope.root_id(id));
        let storage = scope.allocate(HeapData::Storage(OrderedHashStorage::new(kind)))?;
        let collection = Self {
            header: ObjectHeader::new(prototype.map(|rooted| scope.id(rooted))),
            storage,
        };
        scope.allocate(kind.wrap(collection))
    }

    /// Allocates a collection holding a copy of `source`'s entries, in order.
    ///
    /// `source` must have the same flavour as `kind`.
    pub fn construct_from<T: ResourceTracker, Tr: HeapTracer>(
        heap: &mut Heap<T, Tr>,
        kind: CollectionKind,
        prototype: Option<HeapId>,
        source: HeapId,
    ) -> RunResult<HeapId> {
        let mut scope = heap.scope();
        let source = scope.root_id(source);
        let target = Self::construct(&mut *scope, kind, prototype)?;
        let target = scope.root_id(target);
        let storage = scope.collection(scope.id(source)).storage;
        let storage = scope.root_id(storage);

        let mut cursor = 0;
        while let Some(Step { storage: current, next, key, value }) = iter::advance(&*scope, scope.id(storage), cursor) {
            scope.set(storage, Value::Ref(current));
            cursor = next;
            let id = scope.id(target);
            let id = Self::insert(&mut *scope, id, key, value)?;
            scope.set(target, Value::Ref(id));
        }
        Ok(scope.id(target))
    }

    /// Looks `key` up with SameValueZero.
    #[must_use]
    pub fn get(heap: &Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId, key: &Value) -> Option<Value> {
        let hash = key.key_hash(heap);
        heap.storage(heap.collection(id).storage).get(key, hash).cloned()
    }

    #[must_use]
    pub fn has(heap: &Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId, key: &Value) -> bool {
        let hash = key.key_hash(heap);
        heap.storage(heap.collection(id).storage).find(key, hash).is_some()
    }

    /// Inserts or overwrites `key`. `value` is ignored for a Set.
    ///
    /// A new entry is charged to the tracker as a container insert. When the
    /// append would fill the storage, the successor is allocated first, so a
    /// failed allocation leaves the collection untouched. Returns the
    /// collection's id, which moves if growing the storage ran the collector.
    pub fn insert<T: ResourceTracker, Tr: HeapTracer>(
        heap: &mut Heap<T, Tr>,
        id: HeapId,
        key: Value,
        value: Value,
    ) -> RunResult<HeapId> {
        let key = key.normalize_zero();
        let storage = heap.collection(id).storage;
        let value = match heap.storage(storage).mode() {
            CollectionKind::Map => value,
            CollectionKind::Set => Value::Undefined,
        };

        let mut scope = heap.scope();
        let key = scope.root(key);
        let value = scope.root(value);
        let hash = scope.value(key).key_hash(&*scope);
        let fresh = scope.storage(storage).find(scope.value(key), hash).is_none();
        let mut id = id;
        if fresh {
            scope.tracker_mut().on_container_insert()?;
            id = Self::rebuild_if_full(&mut *scope, id)?;
        }
        // an object key may have moved during the rebuild; its hash did not
        let (key, value) = (scope.value(key).clone(), scope.value(value).clone());
        let storage = scope.collection(id).storage;
        let outcome = scope.storage_mut(storage).insert(key, value, hash);
        debug_assert_eq!(outcome == InsertOutcome::Inserted, fresh);
        Ok(id)
    }

    /// Replaces a storage that one more append would fill with a rebuilt
    /// successor and retires the old one.
    fn rebuild_if_full<T: ResourceTracker, Tr: HeapTracer>(
        heap: &mut Heap<T, Tr>,
        id: HeapId,
    ) -> Result<HeapId, ResourceError> {
        let old = heap.storage(heap.collection(id).storage);
        if !old.needs_rebuild() {
            return Ok(id);
        }
        let old_capacity = old.capacity();
        let successor = old.rebuilt();
        let (new_capacity, live) = (successor.capacity(), successor.size());

        let mut scope = heap.scope();
        let collection = scope.root_id(id);
        let successor = scope.allocate(HeapData::Storage(successor))?;
        let collection = scope.id(collection);
        let old = std::mem::replace(&mut scope.collection_mut(collection).storage, successor);
        scope.storage_mut(old).retire_into(successor);
        scope.tracer_mut().on_storage_rebuild(old_capacity, new_capacity, live);
        Ok(collection)
    }

    /// Removes `key`; returns whether it was present.
    pub fn remove(heap: &mut Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId, key: &Value) -> bool {
        let hash = key.key_hash(heap);
        let storage = heap.collection(id).storage;
        heap.storage_mut(storage).erase(key, hash) == EraseOutcome::Removed
    }

    /// Empties the collection by swapping in a fresh storage.
    ///
    /// The old storage is retired as cleared, which finishes every iterator
    /// still parked on it.
    pub fn clear<T: ResourceTracker, Tr: HeapTracer>(heap: &mut Heap<T, Tr>, id: HeapId) -> Result<HeapId, ResourceError> {
        let kind = heap.storage(heap.collection(id).storage).mode();
        let mut scope = heap.scope();
        let collection = scope.root_id(id);
        let fresh = scope.allocate(HeapData::Storage(OrderedHashStorage::new(kind)))?;
        let collection = scope.id(collection);
        let old = std::mem::replace(&mut scope.collection_mut(collection).storage, fresh);
        let live = scope.storage(old).size();
        scope.storage_mut(old).retire_cleared();
        scope.tracer_mut().on_storage_cleared(live);
        Ok(collection)
    }

    #[must_use]
    pub fn size(heap: &Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId) -> usize {
        heap.storage(heap.collection(id).storage).size()
    }

    /// Live entries in insertion order. A Set reports each key as its own value.
    ///
    /// The returned values hold ids that are only valid until the next call that
    /// may collect.
    #[must_use]
    pub fn entries(heap: &Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId) -> Vec<(Value, Value)> {
        let storage = heap.storage(heap.collection(id).storage);
        let mode = storage.mode();
        storage
            .entries()
            .map(|entry| match mode {
                CollectionKind::Map => (entry.key.clone(), entry.value.clone()),
                CollectionKind::Set => (entry.key.clone(), entry.key.clone()),
            })
            .collect()
    }

    /// Calls `f(heap, value, key, collection)` for every entry, in order.
    ///
    /// `f` may mutate the collection: entries it adds before the walk reaches
    /// them are visited, entries it deletes are not, and clearing ends the walk.
    /// The id passed to `f` is the collection's current one.
    pub fn for_each<T, Tr, F>(heap: &mut Heap<T, Tr>, id: HeapId, mut f: F) -> RunResult<()>
    where
        T: ResourceTracker,
        Tr: HeapTracer,
        F: FnMut(&mut Heap<T, Tr>, Value, Value, HeapId) -> RunResult<()>,
    {
        let kind = Self::kind(heap, id);
        let mut scope = heap.scope();
        let collection = scope.root_id(id);
        let storage = scope.collection(id).storage;
        let storage = scope.root_id(storage);

        let mut cursor = 0;
        while let Some(Step { storage: current, next, key, value }) = iter::advance(&*scope, scope.id(storage), cursor) {
            scope.set(storage, Value::Ref(current));
            cursor = next;
            let value = match kind {
                CollectionKind::Map => value,
                CollectionKind::Set => key.clone(),
            };
            let receiver = scope.id(collection);
            f(&mut *scope, value, key, receiver)?;
        }
        Ok(())
    }
}

impl Traceable for Collection {
    fn project(data: &HeapData) -> Option<&Self> {
        match data {
            HeapData::Map(collection) | HeapData::Set(collection) => Some(collection),
            _ => None,
        }
    }

    fn project_mut(data: &mut HeapData) -> Option<&mut Self> {
        match data {
            HeapData::Map(collection) | HeapData::Set(collection) => Some(collection),
            _ => None,
        }
    }

    fn build_metadata(builder: &mut MetadataBuilder<Self>) {
        builder
            .add_object_fields()
            .add_slot("@storage", |c| Some(c.storage), |c| Some(&mut c.storage));
    }
}
