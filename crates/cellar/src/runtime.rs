//! The script-facing surface: constructors, prototype methods and iteration.
//!
//! A [`Runtime`] owns the heap and the realm. Calls take the receiver as a
//! `&Value` and arguments as [`ArgValues`], with the usual script conventions:
//! missing arguments are `undefined`, a receiver of the wrong kind is a
//! TypeError, numeric arguments go through `ToIndex` / `ToNumber`.
//!
//! Object values handed out by the runtime carry arena ids. They stay valid until
//! the next call that allocates, which may run the collector and move cells.
//! Hold objects across such calls as globals ([`Runtime::set_global`]); globals
//! are permanent roots and are rewritten by the collector.

use indexmap::{IndexMap, map::Entry};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    heap::{CellKind, Heap, HeapId, HeapStats, PermanentRoot},
    realm::Realm,
    resource::{LimitedTracker, ResourceError, ResourceLimits, ResourceTracker},
    tracer::{CollectionSummary, HeapTracer, NoopTracer},
    types::{ArrayBuffer, Collection, CollectionIter, CollectionKind, DataView, ElementKind, IterItem, IterKind},
    value::Value,
};

/// Largest buffer the `ArrayBuffer` constructor accepts.
pub const MAX_ARRAY_BUFFER_LENGTH: usize = 0x7FFF_FFFF;

/// Builtin constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumString, EnumIter)]
pub enum Constructor {
    Map,
    Set,
    ArrayBuffer,
    DataView,
}

impl Constructor {
    /// Kind of the cells this constructor creates.
    #[must_use]
    pub fn cell_kind(self) -> CellKind {
        match self {
            Self::Map => CellKind::Map,
            Self::Set => CellKind::Set,
            Self::ArrayBuffer => CellKind::ArrayBuffer,
            Self::DataView => CellKind::DataView,
        }
    }
}

/// Builtin prototype methods and accessors, named as scripts see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumString, EnumIter)]
pub enum Method {
    #[strum(serialize = "Map.prototype.get")]
    MapGet,
    #[strum(serialize = "Map.prototype.set")]
    MapSet,
    #[strum(serialize = "Map.prototype.has")]
    MapHas,
    #[strum(serialize = "Map.prototype.delete")]
    MapDelete,
    #[strum(serialize = "Map.prototype.clear")]
    MapClear,
    #[strum(serialize = "Map.prototype.size")]
    MapSize,
    #[strum(serialize = "Map.prototype.keys")]
    MapKeys,
    #[strum(serialize = "Map.prototype.values")]
    MapValues,
    #[strum(serialize = "Map.prototype.entries")]
    MapEntries,

    #[strum(serialize = "Set.prototype.add")]
    SetAdd,
    #[strum(serialize = "Set.prototype.has")]
    SetHas,
    #[strum(serialize = "Set.prototype.delete")]
    SetDelete,
    #[strum(serialize = "Set.prototype.clear")]
    SetClear,
    #[strum(serialize = "Set.prototype.size")]
    SetSize,
    #[strum(serialize = "Set.prototype.values")]
    SetValues,
    /// Same function object as `values` in scripts.
    #[strum(serialize = "Set.prototype.keys")]
    SetKeys,
    #[strum(serialize = "Set.prototype.entries")]
    SetEntries,

    #[strum(serialize = "ArrayBuffer.prototype.byteLength")]
    ArrayBufferByteLength,
    #[strum(serialize = "ArrayBuffer.prototype.detached")]
    ArrayBufferDetached,

    #[strum(serialize = "DataView.prototype.buffer")]
    DataViewBuffer,
    #[strum(serialize = "DataView.prototype.byteLength")]
    DataViewByteLength,
    #[strum(serialize = "DataView.prototype.byteOffset")]
    DataViewByteOffset,
    #[strum(serialize = "DataView.prototype.getInt8")]
    DataViewGetInt8,
    #[strum(serialize = "DataView.prototype.getUint8")]
    DataViewGetUint8,
    #[strum(serialize = "DataView.prototype.getInt16")]
    DataViewGetInt16,
    #[strum(serialize = "DataView.prototype.getUint16")]
    DataViewGetUint16,
    #[strum(serialize = "DataView.prototype.getInt32")]
    DataViewGetInt32,
    #[strum(serialize = "DataView.prototype.getUint32")]
    DataViewGetUint32,
    #[strum(serialize = "DataView.prototype.getFloat32")]
    DataViewGetFloat32,
    #[strum(serialize = "DataView.prototype.getFloat64")]
    DataViewGetFloat64,
    #[strum(serialize = "DataView.prototype.setInt8")]
    DataViewSetInt8,
    #[strum(serialize = "DataView.prototype.setUint8")]
    DataViewSetUint8,
    #[strum(serialize = "DataView.prototype.setInt16")]
    DataViewSetInt16,
    #[strum(serialize = "DataView.prototype.setUint16")]
    DataViewSetUint16,
    #[strum(serialize = "DataView.prototype.setInt32")]
    DataViewSetInt32,
    #[strum(serialize = "DataView.prototype.setUint32")]
    DataViewSetUint32,
    #[strum(serialize = "DataView.prototype.setFloat32")]
    DataViewSetFloat32,
    #[strum(serialize = "DataView.prototype.setFloat64")]
    DataViewSetFloat64,
}

impl Method {
    /// Kind the receiver must have.
    #[must_use]
    pub fn receiver_kind(self) -> CellKind {
        match self {
            Self::MapGet
            | Self::MapSet
            | Self::MapHas
            | Self::MapDelete
            | Self::MapClear
            | Self::MapSize
            | Self::MapKeys
            | Self::MapValues
            | Self::MapEntries => CellKind::Map,
            Self::SetAdd
            | Self::SetHas
            | Self::SetDelete
            | Self::SetClear
            | Self::SetSize
            | Self::SetValues
            | Self::SetKeys
            | Self::SetEntries => CellKind::Set,
            Self::ArrayBufferByteLength | Self::ArrayBufferDetached => CellKind::ArrayBuffer,
            _ => CellKind::DataView,
        }
    }

    /// Element kind read by a `DataView.prototype.get*` method.
    #[must_use]
    pub fn element_read(self) -> Option<ElementKind> {
        match self {
            Self::DataViewGetInt8 => Some(ElementKind::Int8),
            Self::DataViewGetUint8 => Some(ElementKind::Uint8),
            Self::DataViewGetInt16 => Some(ElementKind::Int16),
            Self::DataViewGetUint16 => Some(ElementKind::Uint16),
            Self::DataViewGetInt32 => Some(ElementKind::Int32),
            Self::DataViewGetUint32 => Some(ElementKind::Uint32),
            Self::DataViewGetFloat32 => Some(ElementKind::Float32),
            Self::DataViewGetFloat64 => Some(ElementKind::Float64),
            _ => None,
        }
    }

    /// Element kind written by a `DataView.prototype.set*` method.
    #[must_use]
    pub fn element_write(self) -> Option<ElementKind> {
        match self {
            Self::DataViewSetInt8 => Some(ElementKind::Int8),
            Self::DataViewSetUint8 => Some(ElementKind::Uint8),
            Self::DataViewSetInt16 => Some(ElementKind::Int16),
            Self::DataViewSetUint16 => Some(ElementKind::Uint16),
            Self::DataViewSetInt32 => Some(ElementKind::Int32),
            Self::DataViewSetUint32 => Some(ElementKind::Uint32),
            Self::DataViewSetFloat32 => Some(ElementKind::Float32),
            Self::DataViewSetFloat64 => Some(ElementKind::Float64),
            _ => None,
        }
    }
}

/// Heap, realm and named globals.
#[derive(Debug)]
pub struct Runtime<T: ResourceTracker, Tr: HeapTracer = NoopTracer> {
    heap: Heap<T, Tr>,
    realm: Realm,
    globals: IndexMap<String, PermanentRoot>,
}

impl<T: ResourceTracker> Runtime<T> {
    pub fn new(tracker: T) -> Result<Self, ResourceError> {
        Self::with_tracer(tracker, NoopTracer)
    }
}

impl Runtime<LimitedTracker> {
    pub fn with_limits(limits: ResourceLimits) -> Result<Self, ResourceError> {
        Self::new(LimitedTracker::new(limits))
    }
}

impl<T: ResourceTracker, Tr: HeapTracer> Runtime<T, Tr> {
    /// Creates the heap and allocates the realm's prototypes.
    pub fn with_tracer(tracker: T, tracer: Tr) -> Result<Self, ResourceError> {
        let mut heap = Heap::with_tracer(64, tracker, tracer);
        let realm = Realm::new(&mut heap)?;
        Ok(Self {
            heap,
            realm,
            globals: IndexMap::new(),
        })
    }

    #[must_use]
    pub fn heap(&self) -> &Heap<T, Tr> {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap<T, Tr> {
        &mut self.heap
    }

    #[must_use]
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// `new Ctor(...args)`.
    ///
    /// `new Map(source)` and `new Set(source)` copy another Map or Set of the
    /// same flavour; any other non-nullish source is a TypeError.
    pub fn construct(&mut self, ctor: Constructor, args: impl Into<ArgValues>) -> RunResult<Value> {
        let args = args.into();
        let prototype = Some(self.realm.prototype_of(&self.heap, ctor.cell_kind()));
        let id = match ctor {
            Constructor::Map | Constructor::Set => {
                let kind = CollectionKind::of(ctor.cell_kind()).expect("collection constructor");
                match args.get(0) {
                    Value::Undefined | Value::Null => Collection::construct(&mut self.heap, kind, prototype)?,
                    Value::Ref(source)
                        if self
                            .heap
                            .get_if_live(*source)
                            .is_some_and(|data| data.kind() == kind.cell_kind()) =>
                    {
                        Collection::construct_from(&mut self.heap, kind, prototype, *source)?
                    }
                    other => {
                        return Err(ExcType::type_error(format!(
                            "{ctor} constructor: {} is not a {ctor}",
                            self.describe(other)
                        )));
                    }
                }
            }
            Constructor::ArrayBuffer => {
                let length = args.get(0).to_index()?;
                if length > MAX_ARRAY_BUFFER_LENGTH {
                    return Err(ExcType::range_error(format!("Array buffer allocation failed: {length} bytes")));
                }
                ArrayBuffer::construct(&mut self.heap, prototype, length)?
            }
            Constructor::DataView => DataView::construct(&mut self.heap, prototype, args.get(0), args.get(1), args.get(2))?,
        };
        Ok(Value::Ref(id))
    }

    /// `Ctor(...args)` without `new`. Every builtin constructor here requires `new`.
    pub fn call_constructor(&mut self, ctor: Constructor, _args: impl Into<ArgValues>) -> RunResult<Value> {
        Err(ExcType::constructor_requires_new(ctor.into()))
    }

    // ------------------------------------------------------------------
    // Methods
    // ------------------------------------------------------------------

    /// Calls a prototype method or accessor with `this` as the receiver.
    ///
    /// Map `set` and Set `add` return the receiver, as scripts expect.
    pub fn call_method(&mut self, this: &Value, method: Method, args: impl Into<ArgValues>) -> RunResult<Value> {
        let args = args.into();
        let id = self.receiver(this, method.into(), method.receiver_kind())?;

        if let Some(kind) = method.element_read() {
            let offset = args.get(0).to_index()?;
            let little_endian = args.get(1).to_boolean();
            return Ok(Value::Number(DataView::get_value(&self.heap, id, kind, offset, little_endian)?));
        }
        if let Some(kind) = method.element_write() {
            let offset = args.get(0).to_index()?;
            let value = args.get(1).to_number();
            let little_endian = args.get(2).to_boolean();
            DataView::set_value(&mut self.heap, id, kind, offset, value, little_endian)?;
            return Ok(Value::Undefined);
        }

        let heap = &mut self.heap;
        let result = match method {
            Method::MapGet => Collection::get(heap, id, args.get(0)).unwrap_or_default(),
            Method::MapSet => Value::Ref(Collection::insert(heap, id, args.get(0).clone(), args.get(1).clone())?),
            Method::SetAdd => Value::Ref(Collection::insert(heap, id, args.get(0).clone(), Value::Undefined)?),
            Method::MapHas | Method::SetHas => Value::Bool(Collection::has(heap, id, args.get(0))),
            Method::MapDelete | Method::SetDelete => Value::Bool(Collection::remove(heap, id, args.get(0))),
            Method::MapClear | Method::SetClear => {
                Collection::clear(heap, id)?;
                Value::Undefined
            }
            Method::MapSize | Method::SetSize => Value::from(Collection::size(heap, id)),
            Method::MapKeys => self.create_iterator(id, IterKind::Keys)?,
            Method::MapValues | Method::SetValues | Method::SetKeys => self.create_iterator(id, IterKind::Values)?,
            Method::MapEntries | Method::SetEntries => self.create_iterator(id, IterKind::Entries)?,
            Method::ArrayBufferByteLength => Value::from(heap.array_buffer(id).byte_length()),
            Method::ArrayBufferDetached => Value::Bool(heap.array_buffer(id).is_detached()),
            Method::DataViewBuffer => Value::Ref(heap.data_view(id).buffer()),
            Method::DataViewByteLength => Value::from(heap.data_view(id).byte_length()),
            Method::DataViewByteOffset => Value::from(heap.data_view(id).byte_offset()),
            element => unreachable!("{element} is dispatched as an element access"),
        };
        Ok(result)
    }

    fn create_iterator(&mut self, collection: HeapId, kind: IterKind) -> RunResult<Value> {
        let flavour = Collection::kind(&self.heap, collection);
        let prototype = self.realm.prototype_of(&self.heap, flavour.iterator_kind());
        let iter = CollectionIter::create(&mut self.heap, collection, kind, Some(prototype))?;
        Ok(Value::Ref(iter))
    }

    /// `%MapIteratorPrototype%.next` or `%SetIteratorPrototype%.next`.
    ///
    /// `None` is the `{ done: true }` result. An iterator of the other flavour
    /// is a TypeError.
    pub fn iterator_next(&mut self, this: &Value, flavour: CollectionKind) -> RunResult<Option<IterItem>> {
        let name = match flavour {
            CollectionKind::Map => "%MapIteratorPrototype%.next",
            CollectionKind::Set => "%SetIteratorPrototype%.next",
        };
        let id = self.receiver(this, name, flavour.iterator_kind())?;
        Ok(CollectionIter::next(&mut self.heap, id))
    }

    /// `Map.prototype.forEach` / `Set.prototype.forEach`.
    ///
    /// `f` receives the heap, the value, the key and the collection's current id,
    /// and may mutate the collection while the walk runs.
    pub fn for_each<F>(&mut self, this: &Value, flavour: CollectionKind, f: F) -> RunResult<()>
    where
        F: FnMut(&mut Heap<T, Tr>, Value, Value, HeapId) -> RunResult<()>,
    {
        let name = match flavour {
            CollectionKind::Map => "Map.prototype.forEach",
            CollectionKind::Set => "Set.prototype.forEach",
        };
        let id = self.receiver(this, name, flavour.cell_kind())?;
        Collection::for_each(&mut self.heap, id, f)
    }

    /// Detaches an ArrayBuffer, as a transfer to another agent would.
    pub fn detach_array_buffer(&mut self, buffer: &Value) -> RunResult<()> {
        let id = self.receiver(buffer, "DetachArrayBuffer", CellKind::ArrayBuffer)?;
        ArrayBuffer::detach(&mut self.heap, id);
        Ok(())
    }

    /// The `Symbol.toStringTag` of builtin objects; `None` for anything else.
    #[must_use]
    pub fn to_string_tag(&self, value: &Value) -> Option<&'static str> {
        match self.heap.get_if_live(value.ref_id()?)?.kind() {
            CellKind::Map => Some("Map"),
            CellKind::Set => Some("Set"),
            CellKind::MapIterator => Some("Map Iterator"),
            CellKind::SetIterator => Some("Set Iterator"),
            CellKind::ArrayBuffer => Some("ArrayBuffer"),
            CellKind::DataView => Some("DataView"),
            CellKind::Object | CellKind::Storage => None,
        }
    }

    /// Receiver description used in error messages, e.g. `[object Set]`.
    fn describe(&self, value: &Value) -> String {
        match value {
            Value::Ref(_) => format!("[object {}]", self.to_string_tag(value).unwrap_or("Object")),
            Value::String(s) => format!("\"{s}\""),
            other => other.to_string(),
        }
    }

    fn receiver(&self, this: &Value, method: &str, expected: CellKind) -> RunResult<HeapId> {
        match this.ref_id() {
            Some(id) if self.heap.get_if_live(id).is_some_and(|data| data.kind() == expected) => Ok(id),
            _ => Err(ExcType::incompatible_receiver(method, self.describe(this))),
        }
    }

    // ------------------------------------------------------------------
    // Globals and heap control
    // ------------------------------------------------------------------

    /// Binds `name` to `value` in a permanent root.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        match self.globals.entry(name.into()) {
            Entry::Occupied(entry) => self.heap.set_permanent_root(*entry.get(), value),
            Entry::Vacant(entry) => {
                entry.insert(self.heap.add_permanent_root(value));
            }
        }
    }

    /// Current value of a global; `undefined` if it was never set.
    #[must_use]
    pub fn global(&self, name: &str) -> Value {
        self.globals
            .get(name)
            .map_or(Value::Undefined, |&root| self.heap.permanent_root(root).clone())
    }

    /// Unbinds a global. The root slot is kept, holding `undefined`.
    pub fn remove_global(&mut self, name: &str) {
        if let Some(root) = self.globals.shift_remove(name) {
            self.heap.set_permanent_root(root, Value::Undefined);
        }
    }

    pub fn collect_garbage(&mut self) -> CollectionSummary {
        self.heap.collect_garbage()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }
}

// ----------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------

#[derive(Serialize)]
struct RuntimeImageRef<'a> {
    heap: Vec<u8>,
    realm: &'a Realm,
    globals: &'a IndexMap<String, PermanentRoot>,
}

#[derive(Deserialize)]
struct RuntimeImage {
    heap: Vec<u8>,
    realm: Realm,
    globals: IndexMap<String, PermanentRoot>,
}

impl<T: ResourceTracker + Serialize, Tr: HeapTracer> Runtime<T, Tr> {
    /// Serializes the heap, realm and globals. Values held outside globals are not
    /// part of the snapshot.
    pub fn snapshot(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&RuntimeImageRef {
            heap: self.heap.snapshot()?,
            realm: &self.realm,
            globals: &self.globals,
        })
    }
}

impl<T: ResourceTracker + DeserializeOwned, Tr: HeapTracer> Runtime<T, Tr> {
    pub fn restore(bytes: &[u8], tracer: Tr) -> Result<Self, postcard::Error> {
        let image: RuntimeImage = postcard::from_bytes(bytes)?;
        Ok(Self {
            heap: Heap::restore(&image.heap, tracer)?,
            realm: image.realm,
            globals: image.globals,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn method_names_round_trip_through_strum() {
        for method in Method::iter() {
            let name: &'static str = method.into();
            assert_eq!(name.parse::<Method>(), Ok(method));
        }
        assert_eq!(Method::DataViewGetUint16.to_string(), "DataView.prototype.getUint16");
    }

    #[test]
    fn every_method_has_a_receiver_kind() {
        let data_view_methods = Method::iter()
            .filter(|method| method.receiver_kind() == CellKind::DataView)
            .count();
        let element_methods = Method::iter()
            .filter(|method| method.element_read().is_some() || method.element_write().is_some())
            .count();
        assert_eq!(element_methods, 16);
        assert_eq!(data_view_methods, element_methods + 3);
    }

    #[test]
    fn incompatible_receiver_names_both_sides() {
        let mut rt = Runtime::new(NoLimitTracker).unwrap();
        let set = rt.construct(Constructor::Set, ()).unwrap();
        let err = rt.call_method(&set, Method::MapGet, [Value::from(1)]).unwrap_err();
        assert_eq!(
            err.into_exception().message(),
            Some("Method Map.prototype.get called on incompatible receiver [object Set]")
        );
    }

    #[test]
    fn globals_follow_relocation() {
        let mut rt = Runtime::new(NoLimitTracker).unwrap();
        rt.construct(Constructor::Map, ()).unwrap();
        let map = rt.construct(Constructor::Map, ()).unwrap();
        rt.set_global("m", map.clone());
        rt.collect_garbage();
        let moved = rt.global("m");
        assert_ne!(moved, map);
        assert_eq!(rt.to_string_tag(&moved), Some("Map"));
        assert_eq!(rt.global("missing"), Value::Undefined);
    }
}
