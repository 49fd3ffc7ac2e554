use serde::{Deserialize, Serialize};

use crate::{
    heap::{HeapData, HeapId},
    metadata::{MetadataBuilder, Traceable},
};

/// The part every script-visible object shares.
///
/// Only the prototype link is modelled; property storage belongs to the host
/// object model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub prototype: Option<HeapId>,
}

impl ObjectHeader {
    #[must_use]
    pub fn new(prototype: Option<HeapId>) -> Self {
        Self { prototype }
    }
}

/// Access to the [`ObjectHeader`] of an object cell.
pub trait JsObject {
    fn header(&self) -> &ObjectHeader;

    fn header_mut(&mut self) -> &mut ObjectHeader;
}

/// Implements [`JsObject`] for cell types that store their header in a `header` field.
macro_rules! impl_js_object {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::types::JsObject for $ty {
                #[inline]
                fn header(&self) -> &$crate::types::ObjectHeader {
                    &self.header
                }

                #[inline]
                fn header_mut(&mut self) -> &mut $crate::types::ObjectHeader {
                    &mut self.header
                }
            }
        )+
    };
}

pub(crate) use impl_js_object;

/// An object with nothing but a prototype. The realm's prototypes are plain objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlainObject {
    header: ObjectHeader,
}

impl PlainObject {
    #[must_use]
    pub fn new(prototype: Option<HeapId>) -> Self {
        Self {
            header: ObjectHeader::new(prototype),
        }
    }
}

impl_js_object!(PlainObject);

impl Traceable for PlainObject {
    fn project(data: &HeapData) -> Option<&Self> {
        match data {
            HeapData::Object(object) => Some(object),
            _ => None,
        }
    }

    fn project_mut(data: &mut HeapData) -> Option<&mut Self> {
        match data {
            HeapData::Object(object) => Some(object),
            _ => None,
        }
    }

    fn build_metadata(builder: &mut MetadataBuilder<Self>) {
        builder.add_object_fields();
    }
}
