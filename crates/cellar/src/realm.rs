use serde::{Deserialize, Serialize};

use crate::{
    heap::{CellKind, Heap, HeapData, HeapId, PermanentRoot},
    resource::{ResourceError, ResourceTracker},
    tracer::HeapTracer,
    types::PlainObject,
    value::Value,
};

/// The intrinsic prototypes every object created by the runtime links to.
///
/// Each prototype is a plain object held through a permanent root, so it survives
/// every collection and its id is always read back through the heap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Realm {
    object: PermanentRoot,
    map: PermanentRoot,
    set: PermanentRoot,
    map_iterator: PermanentRoot,
    set_iterator: PermanentRoot,
    array_buffer: PermanentRoot,
    data_view: PermanentRoot,
}

impl Realm {
    /// Allocates `%Object.prototype%` and the prototypes inheriting from it.
    pub fn new(heap: &mut Heap<impl ResourceTracker, impl HeapTracer>) -> Result<Self, ResourceError> {
        let object = heap.allocate(HeapData::Object(PlainObject::new(None)))?;
        let object = heap.add_permanent_root(Value::Ref(object));
        let mut derived = || -> Result<PermanentRoot, ResourceError> {
            let parent = heap.permanent_root(object).ref_id();
            let proto = heap.allocate(HeapData::Object(PlainObject::new(parent)))?;
            Ok(heap.add_permanent_root(Value::Ref(proto)))
        };
        Ok(Self {
            map: derived()?,
            set: derived()?,
            map_iterator: derived()?,
            set_iterator: derived()?,
            array_buffer: derived()?,
            data_view: derived()?,
            object,
        })
    }

    /// Current id of the prototype for objects of `kind`.
    ///
    /// Storage cells are not objects; asking for their prototype yields
    /// `%Object.prototype%`.
    #[must_use]
    pub fn prototype_of(&self, heap: &Heap<impl ResourceTracker, impl HeapTracer>, kind: CellKind) -> HeapId {
        let root = match kind {
            CellKind::Object | CellKind::Storage => self.object,
            CellKind::Map => self.map,
            CellKind::Set => self.set,
            CellKind::MapIterator => self.map_iterator,
            CellKind::SetIterator => self.set_iterator,
            CellKind::ArrayBuffer => self.array_buffer,
            CellKind::DataView => self.data_view,
        };
        heap.permanent_root(root)
            .ref_id()
            .expect("Realm::prototype_of: intrinsic root is not an object")
    }

    #[must_use]
    pub fn object_prototype(&self, heap: &Heap<impl ResourceTracker, impl HeapTracer>) -> HeapId {
        self.prototype_of(heap, CellKind::Object)
    }
}
