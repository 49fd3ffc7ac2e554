use std::{
    collections::BTreeMap,
    fmt,
    mem::size_of,
    ops::{Deref, DerefMut},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    metadata,
    resource::{ResourceError, ResourceTracker},
    tracer::{CollectionSummary, HeapTracer, NoopTracer},
    types::{ArrayBuffer, Collection, CollectionIter, DataView, JsObject, ObjectHeader, OrderedHashStorage, PlainObject},
    value::Value,
};

/// Unique identifier for cells stored inside the heap arena.
///
/// Ids are arena positions: the collector's compaction pass rewrites every id
/// it can see (cell fields declared in the metadata, and roots). An id kept
/// anywhere else is stale after any call that may collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index_for_tests(index: usize) -> Self {
        Self(index)
    }
}

/// Identity of an object that never changes, even when the collector moves it.
///
/// Assigned from a monotonic counter at allocation and never reused. Key hashes
/// for object keys are derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("#{}", self.0))
    }
}

/// Kind tag of a heap cell, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr, EnumIter, Serialize, Deserialize)]
pub enum CellKind {
    Object,
    Map,
    Set,
    MapIterator,
    SetIterator,
    Storage,
    ArrayBuffer,
    DataView,
}

impl CellKind {
    /// Whether cells of this kind are script-visible objects with a prototype.
    #[must_use]
    pub fn is_object(self) -> bool {
        !matches!(self, Self::Storage)
    }
}

/// HeapData captures every runtime value that must live in the arena.
///
/// Each variant's outgoing references are described by its metadata
/// (see [`crate::metadata`]); the collector never looks inside a variant any
/// other way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeapData {
    Object(PlainObject),
    Map(Collection),
    Set(Collection),
    MapIterator(CollectionIter),
    SetIterator(CollectionIter),
    /// Ordered hash storage owned by one Map or Set (or retired).
    Storage(OrderedHashStorage),
    ArrayBuffer(ArrayBuffer),
    DataView(DataView),
}

impl HeapData {
    #[must_use]
    pub fn kind(&self) -> CellKind {
        match self {
            Self::Object(_) => CellKind::Object,
            Self::Map(_) => CellKind::Map,
            Self::Set(_) => CellKind::Set,
            Self::MapIterator(_) => CellKind::MapIterator,
            Self::SetIterator(_) => CellKind::SetIterator,
            Self::Storage(_) => CellKind::Storage,
            Self::ArrayBuffer(_) => CellKind::ArrayBuffer,
            Self::DataView(_) => CellKind::DataView,
        }
    }

    /// The object header, for kinds that are script-visible objects.
    #[must_use]
    pub fn header(&self) -> Option<&ObjectHeader> {
        match self {
            Self::Object(o) => Some(o.header()),
            Self::Map(c) | Self::Set(c) => Some(c.header()),
            Self::MapIterator(i) | Self::SetIterator(i) => Some(i.header()),
            Self::ArrayBuffer(b) => Some(b.header()),
            Self::DataView(v) => Some(v.header()),
            Self::Storage(_) => None,
        }
    }

    /// Approximate footprint charged to the resource tracker.
    fn estimate_size(&self) -> usize {
        let payload = match self {
            Self::Storage(s) => s.estimate_size(),
            Self::ArrayBuffer(b) => b.byte_length(),
            _ => 0,
        };
        size_of::<HeapEntry>() + payload
    }
}

/// One occupied arena slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeapEntry {
    object_id: ObjectId,
    /// Size charged at allocation, refunded when the cell is freed.
    size: usize,
    data: HeapData,
}

/// Point-in-time summary of heap state.
///
/// `objects_by_kind` is a `BTreeMap` so the output is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live cells.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total arena length (live + free).
    pub total_slots: usize,
    /// Breakdown of live cells by kind name.
    pub objects_by_kind: BTreeMap<&'static str, usize>,
    /// Number of collections run so far.
    pub collections: usize,
    /// Resource tracker allocation count, if the tracker records one.
    pub tracker_allocations: Option<usize>,
    /// Resource tracker memory usage in bytes, if the tracker records one.
    pub tracker_memory_bytes: Option<usize>,
}

/// A reference that points at a freed slot.
///
/// Reported by [`Heap::dangling_references`]; any entry means a reference was
/// held somewhere the metadata does not declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingRef {
    /// Cell holding the reference, or `None` for a root.
    pub holder: Option<HeapId>,
    pub field: &'static str,
    pub target: HeapId,
}

/// Handle to a slot on the scoped root stack. See [`RootScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rooted(usize);

/// Handle to a permanent root slot.
///
/// Permanent roots are never released; they back the realm's prototypes and
/// named globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermanentRoot(usize);

/// Collect when this many allocations happened since the last collection.
///
/// The actual interval comes from the tracker's [`GcPolicy`](crate::resource::GcPolicy).
fn should_collect(allocations_since_gc: usize, interval: usize) -> bool {
    allocations_since_gc >= interval
}

/// Arena of heap cells with a precise, compacting mark-sweep collector.
///
/// Collection only happens inside [`Heap::allocate`] (when the tracker's policy
/// says so) or an explicit [`Heap::collect_garbage`]. Native code that holds an
/// id across such a call must register it with a [`RootScope`].
#[derive(Debug)]
pub struct Heap<T: ResourceTracker, Tr: HeapTracer = NoopTracer> {
    entries: Vec<Option<HeapEntry>>,
    /// Free slot indices available for reuse. Empty right after a compaction.
    free_list: Vec<HeapId>,
    /// Scoped roots; pushed by [`RootScope::root`], truncated when the scope drops.
    roots: Vec<Value>,
    permanent_roots: Vec<Value>,
    next_object_id: u64,
    allocations_since_gc: usize,
    collections: usize,
    tracker: T,
    tracer: Tr,
}

impl<T: ResourceTracker> Heap<T> {
    /// Creates a heap that does not trace.
    #[must_use]
    pub fn new(capacity: usize, tracker: T) -> Self {
        Self::with_tracer(capacity, tracker, NoopTracer)
    }
}

impl<T: ResourceTracker, Tr: HeapTracer> Heap<T, Tr> {
    #[must_use]
    pub fn with_tracer(capacity: usize, tracker: T, tracer: Tr) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            roots: Vec::new(),
            permanent_roots: Vec::new(),
            next_object_id: 0,
            allocations_since_gc: 0,
            collections: 0,
            tracker,
            tracer,
        }
    }

    /// Places `data` in the arena and returns its id.
    ///
    /// May run a collection after placing the cell. The new cell and everything
    /// it references survive it, but any other unrooted id the caller holds is
    /// stale once this returns.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        let size = data.estimate_size();
        self.tracker.on_allocate(|| size)?;

        let kind = data.kind();
        let object_id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        let entry = HeapEntry { object_id, size, data };
        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            self.entries.push(Some(entry));
            HeapId(self.entries.len() - 1)
        };
        self.allocations_since_gc += 1;
        self.tracer.on_allocate(kind, id, object_id, size);

        if should_collect(self.allocations_since_gc, self.tracker.gc_policy().effective_interval()) {
            let mut scope = self.scope();
            let rooted = scope.root_id(id);
            scope.collect_garbage();
            return Ok(scope.id(rooted));
        }
        Ok(id)
    }

    fn entry(&self, id: HeapId) -> &HeapEntry {
        self.entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: data already freed")
    }

    /// Returns the cell at `id`.
    ///
    /// # Panics
    /// Panics if `id` does not name a live cell.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.entry(id).data
    }

    /// Returns the cell at `id` mutably.
    ///
    /// # Panics
    /// Panics if `id` does not name a live cell.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: data already freed")
            .data
    }

    /// Returns the cell at `id`, or `None` if the slot is free or out of range.
    #[must_use]
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index())?.as_ref().map(|entry| &entry.data)
    }

    #[must_use]
    pub fn kind(&self, id: HeapId) -> CellKind {
        self.get(id).kind()
    }

    #[must_use]
    pub fn object_id(&self, id: HeapId) -> ObjectId {
        self.entry(id).object_id
    }

    /// The prototype recorded in an object's header.
    #[must_use]
    pub fn prototype(&self, id: HeapId) -> Option<HeapId> {
        self.get(id).header().and_then(|header| header.prototype)
    }

    pub(crate) fn storage(&self, id: HeapId) -> &OrderedHashStorage {
        match self.get(id) {
            HeapData::Storage(storage) => storage,
            other => panic!("Heap::storage: expected Storage, found {}", other.kind()),
        }
    }

    pub(crate) fn storage_mut(&mut self, id: HeapId) -> &mut OrderedHashStorage {
        match self.get_mut(id) {
            HeapData::Storage(storage) => storage,
            other => panic!("Heap::storage_mut: expected Storage, found {}", other.kind()),
        }
    }

    pub(crate) fn collection(&self, id: HeapId) -> &Collection {
        match self.get(id) {
            HeapData::Map(c) | HeapData::Set(c) => c,
            other => panic!("Heap::collection: expected Map or Set, found {}", other.kind()),
        }
    }

    pub(crate) fn collection_mut(&mut self, id: HeapId) -> &mut Collection {
        match self.get_mut(id) {
            HeapData::Map(c) | HeapData::Set(c) => c,
            other => panic!("Heap::collection_mut: expected Map or Set, found {}", other.kind()),
        }
    }

    pub(crate) fn iterator(&self, id: HeapId) -> &CollectionIter {
        match self.get(id) {
            HeapData::MapIterator(i) | HeapData::SetIterator(i) => i,
            other => panic!("Heap::iterator: expected an iterator, found {}", other.kind()),
        }
    }

    pub(crate) fn iterator_mut(&mut self, id: HeapId) -> &mut CollectionIter {
        match self.get_mut(id) {
            HeapData::MapIterator(i) | HeapData::SetIterator(i) => i,
            other => panic!("Heap::iterator_mut: expected an iterator, found {}", other.kind()),
        }
    }

    pub(crate) fn array_buffer(&self, id: HeapId) -> &ArrayBuffer {
        match self.get(id) {
            HeapData::ArrayBuffer(b) => b,
            other => panic!("Heap::array_buffer: expected ArrayBuffer, found {}", other.kind()),
        }
    }

    pub(crate) fn array_buffer_mut(&mut self, id: HeapId) -> &mut ArrayBuffer {
        match self.get_mut(id) {
            HeapData::ArrayBuffer(b) => b,
            other => panic!("Heap::array_buffer_mut: expected ArrayBuffer, found {}", other.kind()),
        }
    }

    pub(crate) fn data_view(&self, id: HeapId) -> &DataView {
        match self.get(id) {
            HeapData::DataView(v) => v,
            other => panic!("Heap::data_view: expected DataView, found {}", other.kind()),
        }
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    /// Opens a root scope. Roots registered through it are released when it drops.
    pub fn scope(&mut self) -> RootScope<'_, T, Tr> {
        RootScope {
            base: self.roots.len(),
            heap: self,
        }
    }

    /// Current depth of the scoped root stack.
    #[must_use]
    pub fn root_depth(&self) -> usize {
        self.roots.len()
    }

    pub fn add_permanent_root(&mut self, value: Value) -> PermanentRoot {
        self.permanent_roots.push(value);
        PermanentRoot(self.permanent_roots.len() - 1)
    }

    #[must_use]
    pub fn permanent_root(&self, root: PermanentRoot) -> &Value {
        &self.permanent_roots[root.0]
    }

    pub fn set_permanent_root(&mut self, root: PermanentRoot, value: Value) {
        self.permanent_roots[root.0] = value;
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Runs a full collection: mark from the roots, sweep, then compact when the
    /// tracker's policy asks for it.
    pub fn collect_garbage(&mut self) -> CollectionSummary {
        // Mark phase: a Vec<bool> rather than a set, ids are dense indices
        let mut reachable = vec![false; self.entries.len()];
        let mut work_list: Vec<HeapId> = self
            .roots
            .iter()
            .chain(&self.permanent_roots)
            .filter_map(Value::ref_id)
            .collect();
        let mut marked = 0;

        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            marked += 1;

            let entry = self.entries[idx].as_ref().expect("collect_garbage: root or field names a freed cell");
            metadata::for_kind(entry.data.kind()).trace(&entry.data, &mut |child| work_list.push(child));
        }

        // Sweep phase
        let mut freed = 0;
        for (idx, slot) in self.entries.iter_mut().enumerate() {
            if reachable[idx] {
                continue;
            }
            if let Some(entry) = slot.take() {
                self.tracker.on_free(|| entry.size);
                self.free_list.push(HeapId(idx));
                freed += 1;
            }
        }

        let moved = if self.tracker.gc_policy().compact {
            self.compact()
        } else {
            0
        };

        self.allocations_since_gc = 0;
        self.collections += 1;
        let summary = CollectionSummary { marked, freed, moved };
        self.tracer.on_collect(summary);
        summary
    }

    /// Slides live cells to the front of the arena and rewrites every reference.
    ///
    /// Returns the number of cells whose id changed.
    fn compact(&mut self) -> usize {
        let mut forwarding: Vec<Option<HeapId>> = vec![None; self.entries.len()];
        let mut compacted: Vec<Option<HeapEntry>> = Vec::with_capacity(self.entries.len() - self.free_list.len());
        let mut moved = 0;
        for (idx, slot) in std::mem::take(&mut self.entries).into_iter().enumerate() {
            if let Some(entry) = slot {
                let new_id = HeapId(compacted.len());
                if new_id.index() != idx {
                    moved += 1;
                }
                forwarding[idx] = Some(new_id);
                compacted.push(Some(entry));
            }
        }
        self.entries = compacted;
        self.free_list.clear();

        let mut forward = |id: &mut HeapId| {
            *id = forwarding[id.index()].expect("compact: reference to a freed cell");
        };
        for entry in self.entries.iter_mut().flatten() {
            metadata::for_kind(entry.data.kind()).relocate(&mut entry.data, &mut forward);
        }
        for root in self.roots.iter_mut().chain(&mut self.permanent_roots) {
            if let Value::Ref(id) = root {
                forward(id);
            }
        }
        moved
    }

    /// Every reference held by the cell at `id`, with its metadata field name.
    #[must_use]
    pub fn outgoing_references(&self, id: HeapId) -> Vec<(&'static str, HeapId)> {
        let data = self.get(id);
        let mut refs = Vec::new();
        metadata::for_kind(data.kind()).each_reference(data, &mut |field, target| refs.push((field, target)));
        refs
    }

    /// Finds references (in cells or roots) that point at free slots.
    ///
    /// An empty result means the metadata accounts for everything the
    /// collector needed to keep alive and rewrite.
    #[must_use]
    pub fn dangling_references(&self) -> Vec<DanglingRef> {
        let is_live = |id: HeapId| matches!(self.entries.get(id.index()), Some(Some(_)));
        let mut dangling = Vec::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            let Some(entry) = entry else { continue };
            metadata::for_kind(entry.data.kind()).each_reference(&entry.data, &mut |field, target| {
                if !is_live(target) {
                    dangling.push(DanglingRef {
                        holder: Some(HeapId(idx)),
                        field,
                        target,
                    });
                }
            });
        }
        for target in self.roots.iter().chain(&self.permanent_roots).filter_map(Value::ref_id) {
            if !is_live(target) {
                dangling.push(DanglingRef {
                    holder: None,
                    field: "@root",
                    target,
                });
            }
        }
        dangling
    }

    /// Returns a snapshot of the current heap state.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_kind = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_kind.entry(entry.data.kind().into()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_kind,
            collections: self.collections,
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }
}

// ----------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------

/// Serialized form of a heap. Scoped roots are not part of it.
#[derive(Serialize)]
struct HeapImageRef<'a, T> {
    entries: &'a [Option<HeapEntry>],
    free_list: &'a [HeapId],
    permanent_roots: &'a [Value],
    next_object_id: u64,
    collections: usize,
    tracker: &'a T,
}

#[derive(Deserialize)]
struct HeapImage<T> {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
    permanent_roots: Vec<Value>,
    next_object_id: u64,
    collections: usize,
    tracker: T,
}

impl<T: ResourceTracker + Serialize, Tr: HeapTracer> Heap<T, Tr> {
    /// Serializes every cell, the permanent roots and the tracker with postcard.
    ///
    /// Ids and object identities are preserved exactly, so permanent root handles
    /// remain valid in the restored heap.
    pub fn snapshot(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&HeapImageRef {
            entries: &self.entries,
            free_list: &self.free_list,
            permanent_roots: &self.permanent_roots,
            next_object_id: self.next_object_id,
            collections: self.collections,
            tracker: &self.tracker,
        })
    }
}

impl<T: ResourceTracker + DeserializeOwned, Tr: HeapTracer> Heap<T, Tr> {
    /// Rebuilds a heap from [`Heap::snapshot`] output.
    pub fn restore(bytes: &[u8], tracer: Tr) -> Result<Self, postcard::Error> {
        let image: HeapImage<T> = postcard::from_bytes(bytes)?;
        let mut heap = Self {
            entries: image.entries,
            free_list: image.free_list,
            roots: Vec::new(),
            permanent_roots: image.permanent_roots,
            next_object_id: image.next_object_id,
            allocations_since_gc: 0,
            collections: image.collections,
            tracker: image.tracker,
            tracer,
        };
        // hash indexes are not serialized
        for entry in heap.entries.iter_mut().flatten() {
            if let HeapData::Storage(storage) = &mut entry.data {
                storage.reindex();
            }
        }
        Ok(heap)
    }
}

// ----------------------------------------------------------------------
// Root scopes
// ----------------------------------------------------------------------

/// Stack-discipline root registration.
///
/// Values rooted through a scope are traced and rewritten by the collector until
/// the scope drops, on every exit path including `?` and early returns. The scope
/// dereferences to the heap, so allocating calls go through it and nested scopes
/// can be opened from it.
///
/// ```ignore
/// let mut scope = heap.scope();
/// let map = scope.root_id(map);
/// let storage = scope.allocate(data)?; // may collect and move `map`
/// scope.collection_mut(scope.id(map)).storage = storage;
/// ```
pub struct RootScope<'h, T: ResourceTracker, Tr: HeapTracer> {
    heap: &'h mut Heap<T, Tr>,
    base: usize,
}

impl<T: ResourceTracker, Tr: HeapTracer> RootScope<'_, T, Tr> {
    pub fn root(&mut self, value: Value) -> Rooted {
        self.heap.roots.push(value);
        Rooted(self.heap.roots.len() - 1)
    }

    pub fn root_id(&mut self, id: HeapId) -> Rooted {
        self.root(Value::Ref(id))
    }

    /// Current value of a rooted slot.
    #[must_use]
    pub fn value(&self, rooted: Rooted) -> &Value {
        self.heap.roots.get(rooted.0).expect("RootScope::value: root already released")
    }

    /// Current id of a rooted object.
    ///
    /// # Panics
    /// Panics if the slot holds a primitive.
    #[must_use]
    pub fn id(&self, rooted: Rooted) -> HeapId {
        self.value(rooted).ref_id().expect("RootScope::id: rooted value is not an object")
    }

    pub fn set(&mut self, rooted: Rooted, value: Value) {
        let slot = self.heap.roots.get_mut(rooted.0).expect("RootScope::set: root already released");
        *slot = value;
    }
}

impl<T: ResourceTracker, Tr: HeapTracer> Deref for RootScope<'_, T, Tr> {
    type Target = Heap<T, Tr>;

    fn deref(&self) -> &Self::Target {
        self.heap
    }
}

impl<T: ResourceTracker, Tr: HeapTracer> DerefMut for RootScope<'_, T, Tr> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.heap
    }
}

impl<T: ResourceTracker, Tr: HeapTracer> Drop for RootScope<'_, T, Tr> {
    fn drop(&mut self) {
        self.heap.roots.truncate(self.base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{LimitedTracker, NoLimitTracker, ResourceLimits};

    fn object(heap: &mut Heap<impl ResourceTracker, impl HeapTracer>, prototype: Option<HeapId>) -> HeapId {
        heap.allocate(HeapData::Object(PlainObject::new(prototype))).unwrap()
    }

    #[test]
    fn unrooted_cells_are_freed() {
        let mut heap = Heap::new(8, NoLimitTracker);
        let kept = object(&mut heap, None);
        let root = heap.add_permanent_root(Value::Ref(kept));
        object(&mut heap, None);
        object(&mut heap, None);

        let summary = heap.collect_garbage();
        assert_eq!(summary.marked, 1);
        assert_eq!(summary.freed, 2);
        assert_eq!(heap.stats().live_objects, 1);
        assert!(heap.permanent_root(root).ref_id().is_some());
    }

    #[test]
    fn prototype_keeps_target_alive() {
        let mut heap = Heap::new(8, NoLimitTracker);
        let proto = object(&mut heap, None);
        let child = object(&mut heap, Some(proto));
        heap.add_permanent_root(Value::Ref(child));

        heap.collect_garbage();
        assert_eq!(heap.stats().live_objects, 2);
        assert_eq!(heap.outgoing_references(child), vec![("@prototype", proto)]);
    }

    #[test]
    fn compaction_rewrites_fields_and_roots() {
        let mut heap = Heap::new(8, NoLimitTracker);
        let garbage = object(&mut heap, None);
        let proto = object(&mut heap, None);
        let child = object(&mut heap, Some(proto));
        let proto_object_id = heap.object_id(proto);
        let root = heap.add_permanent_root(Value::Ref(child));
        assert_eq!(garbage.index(), 0);

        let summary = heap.collect_garbage();
        assert_eq!(summary.freed, 1);
        assert_eq!(summary.moved, 2);

        let child = heap.permanent_root(root).ref_id().unwrap();
        assert_eq!(child.index(), 1);
        let proto = heap.prototype(child).unwrap();
        assert_eq!(proto.index(), 0);
        assert_eq!(heap.object_id(proto), proto_object_id);
        assert!(heap.dangling_references().is_empty());
    }

    #[test]
    fn sweep_without_compaction_reuses_slots() {
        let tracker = LimitedTracker::new(ResourceLimits::new().gc_compact(false));
        let mut heap = Heap::new(8, tracker);
        let garbage = object(&mut heap, None);
        let kept = object(&mut heap, None);
        heap.add_permanent_root(Value::Ref(kept));

        heap.collect_garbage();
        assert_eq!(heap.stats().free_slots, 1);
        let reused = object(&mut heap, None);
        assert_eq!(reused, garbage);
        assert_ne!(heap.object_id(reused), heap.object_id(kept));
    }

    #[test]
    fn scope_releases_roots_on_every_path() {
        fn fails(heap: &mut Heap<NoLimitTracker>, id: HeapId) -> Result<(), &'static str> {
            let mut scope = heap.scope();
            scope.root_id(id);
            assert_eq!(scope.root_depth(), 1);
            Err("early exit")
        }

        let mut heap = Heap::new(8, NoLimitTracker);
        let id = object(&mut heap, None);
        assert!(fails(&mut heap, id).is_err());
        assert_eq!(heap.root_depth(), 0);

        {
            let mut outer = heap.scope();
            let a = outer.root_id(id);
            {
                let mut inner = outer.scope();
                inner.root(Value::Null);
                assert_eq!(inner.root_depth(), 2);
            }
            assert_eq!(outer.root_depth(), 1);
            assert_eq!(outer.id(a), id);
        }
        assert_eq!(heap.root_depth(), 0);
    }

    #[test]
    fn allocation_triggered_collection_keeps_new_cell() {
        let tracker = LimitedTracker::new(ResourceLimits::new().gc_interval(1));
        let mut heap = Heap::new(8, tracker);
        object(&mut heap, None);
        let kept = object(&mut heap, None);
        // the first object was collected and `kept` slid into slot 0
        assert_eq!(kept.index(), 0);
        assert_eq!(heap.stats().live_objects, 1);
        assert_eq!(heap.stats().collections, 2);
    }

    #[test]
    fn memory_accounting_refunds_freed_cells() {
        let tracker = LimitedTracker::new(ResourceLimits::new().max_memory(10_000));
        let mut heap = Heap::new(8, tracker);
        object(&mut heap, None);
        let used = heap.tracker().current_memory();
        assert!(used > 0);
        heap.collect_garbage();
        assert_eq!(heap.tracker().current_memory(), 0);
    }
}
