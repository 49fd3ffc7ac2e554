//! Heap cell metadata: the declarative description of every reference a cell holds.
//!
//! Each cell type implements [`Traceable`] and registers its reference fields once
//! through a [`MetadataBuilder`]. The resulting table is the only thing the
//! collector consults: marking calls [`CellMetadata::trace`] and compaction calls
//! [`CellMetadata::relocate`]. A reference a cell holds outside its declared
//! fields is invisible to the collector and will dangle after a collection.

use std::{fmt, marker::PhantomData, sync::OnceLock};

use indexmap::IndexMap;
use smallvec::SmallVec;
use strum::IntoEnumIterator;

use crate::{
    heap::{CellKind, HeapData, HeapId},
    types::{ArrayBuffer, Collection, CollectionIter, DataView, JsObject, OrderedHashStorage, PlainObject},
};

/// Capability of a cell type to describe its outgoing references.
pub trait Traceable: Sized + 'static {
    /// Borrows the cell's payload out of a [`HeapData`] of one of this type's kinds.
    fn project(data: &HeapData) -> Option<&Self>;

    fn project_mut(data: &mut HeapData) -> Option<&mut Self>;

    /// Registers every reference field. Called once per kind.
    fn build_metadata(builder: &mut MetadataBuilder<Self>);
}

/// How a field holds its references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Zero or one reference.
    Slot,
    /// A run of values, any of which may be a reference.
    Values,
}

type TraceFn = Box<dyn Fn(&HeapData, &mut dyn FnMut(HeapId)) + Send + Sync>;
type RelocateFn = Box<dyn Fn(&mut HeapData, &mut dyn FnMut(&mut HeapId)) + Send + Sync>;

/// One named reference field of a kind.
pub struct FieldDescriptor {
    name: &'static str,
    shape: FieldShape,
    trace: TraceFn,
    relocate: RelocateFn,
}

impl FieldDescriptor {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn shape(&self) -> FieldShape {
        self.shape
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Accumulates the field descriptors of one kind.
pub struct MetadataBuilder<S> {
    kind: CellKind,
    fields: SmallVec<[FieldDescriptor; 4]>,
    _cell: PhantomData<fn(&S)>,
}

impl<S: Traceable> MetadataBuilder<S> {
    fn new(kind: CellKind) -> Self {
        Self {
            kind,
            fields: SmallVec::new(),
            _cell: PhantomData,
        }
    }

    /// The kind being described; lets one type serve several kinds.
    #[must_use]
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    /// Declares a field holding at most one reference.
    pub fn add_slot(
        &mut self,
        name: &'static str,
        get: fn(&S) -> Option<HeapId>,
        get_mut: fn(&mut S) -> Option<&mut HeapId>,
    ) -> &mut Self {
        self.push(FieldDescriptor {
            name,
            shape: FieldShape::Slot,
            trace: Box::new(move |data: &HeapData, visit: &mut dyn FnMut(HeapId)| {
                if let Some(id) = S::project(data).and_then(get) {
                    visit(id);
                }
            }),
            relocate: Box::new(move |data: &mut HeapData, fix: &mut dyn FnMut(&mut HeapId)| {
                if let Some(id) = S::project_mut(data).and_then(get_mut) {
                    fix(id);
                }
            }),
        })
    }

    /// Declares a field holding a run of values.
    pub fn add_values(
        &mut self,
        name: &'static str,
        each: fn(&S, &mut dyn FnMut(HeapId)),
        each_mut: fn(&mut S, &mut dyn FnMut(&mut HeapId)),
    ) -> &mut Self {
        self.push(FieldDescriptor {
            name,
            shape: FieldShape::Values,
            trace: Box::new(move |data: &HeapData, visit: &mut dyn FnMut(HeapId)| {
                if let Some(cell) = S::project(data) {
                    each(cell, visit);
                }
            }),
            relocate: Box::new(move |data: &mut HeapData, fix: &mut dyn FnMut(&mut HeapId)| {
                if let Some(cell) = S::project_mut(data) {
                    each_mut(cell, fix);
                }
            }),
        })
    }

    fn push(&mut self, field: FieldDescriptor) -> &mut Self {
        debug_assert!(
            self.fields.iter().all(|f| f.name != field.name),
            "{:?} declares field {} twice",
            self.kind,
            field.name
        );
        self.fields.push(field);
        self
    }

    fn build(self) -> CellMetadata {
        CellMetadata {
            kind: self.kind,
            fields: self.fields,
        }
    }
}

impl<S: Traceable + JsObject> MetadataBuilder<S> {
    /// Declares the fields every script-visible object has (`@prototype`).
    pub fn add_object_fields(&mut self) -> &mut Self {
        self.add_slot(
            "@prototype",
            |cell| cell.header().prototype,
            |cell| cell.header_mut().prototype.as_mut(),
        )
    }
}

/// The finished description of one kind.
#[derive(Debug)]
pub struct CellMetadata {
    kind: CellKind,
    fields: SmallVec<[FieldDescriptor; 4]>,
}

impl CellMetadata {
    #[must_use]
    pub fn kind(&self) -> CellKind {
        self.kind
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(FieldDescriptor::name)
    }

    /// Visits every reference held by `data`.
    pub fn trace(&self, data: &HeapData, visit: &mut dyn FnMut(HeapId)) {
        for field in &self.fields {
            (field.trace)(data, visit);
        }
    }

    /// Visits every reference held by `data` along with the declaring field's name.
    pub fn each_reference(&self, data: &HeapData, visit: &mut dyn FnMut(&'static str, HeapId)) {
        for field in &self.fields {
            (field.trace)(data, &mut |id| visit(field.name, id));
        }
    }

    /// Lets `fix` rewrite every reference held by `data` in place.
    pub fn relocate(&self, data: &mut HeapData, fix: &mut dyn FnMut(&mut HeapId)) {
        for field in &self.fields {
            (field.relocate)(data, fix);
        }
    }
}

fn describe<S: Traceable>(kind: CellKind) -> CellMetadata {
    let mut builder = MetadataBuilder::<S>::new(kind);
    S::build_metadata(&mut builder);
    builder.build()
}

fn build_table() -> IndexMap<CellKind, CellMetadata> {
    CellKind::iter()
        .map(|kind| {
            let metadata = match kind {
                CellKind::Object => describe::<PlainObject>(kind),
                CellKind::Map | CellKind::Set => describe::<Collection>(kind),
                CellKind::MapIterator | CellKind::SetIterator => describe::<CollectionIter>(kind),
                CellKind::Storage => describe::<OrderedHashStorage>(kind),
                CellKind::ArrayBuffer => describe::<ArrayBuffer>(kind),
                CellKind::DataView => describe::<DataView>(kind),
            };
            (kind, metadata)
        })
        .collect()
}

fn table() -> &'static IndexMap<CellKind, CellMetadata> {
    static TABLE: OnceLock<IndexMap<CellKind, CellMetadata>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

/// Metadata for `kind`, built on first use.
#[must_use]
pub fn for_kind(kind: CellKind) -> &'static CellMetadata {
    table().get(&kind).expect("metadata::for_kind: kind was never registered")
}

/// Every registered kind's metadata, in declaration order.
pub fn all() -> impl Iterator<Item = &'static CellMetadata> {
    table().values()
}
