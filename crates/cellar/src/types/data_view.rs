//! Typed, endianness-aware views over an [`ArrayBuffer`](crate::types::ArrayBuffer).
//!
//! A view fixes a byte window of its buffer at construction. Every read and write
//! re-checks detachment and bounds; nothing is cached, so several views over one
//! buffer all observe a detach immediately.
//!
//! Element access is generic over [`ViewElement`]; [`ElementKind`] is the dynamic
//! tag used by the script-facing `getInt8` .. `setFloat64` methods.

use num_traits::{FromBytes, ToBytes};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    metadata::{MetadataBuilder, Traceable},
    resource::ResourceTracker,
    tracer::HeapTracer,
    types::{ObjectHeader, object::impl_js_object},
    value::{Value, wrap_to_bits},
};

/// Numeric element types a view can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, EnumIter, Serialize, Deserialize)]
pub enum ElementKind {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl ElementKind {
    /// Width in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

/// A Rust numeric type that backs one [`ElementKind`].
pub trait ViewElement: Copy + FromBytes + ToBytes {
    const KIND: ElementKind;

    /// Converts an already `ToNumber`-ed value into the element domain.
    ///
    /// Integers wrap modulo 2^bits with NaN and infinities mapping to 0;
    /// `f32` rounds to nearest; `f64` is the identity.
    fn from_number(n: f64) -> Self;

    fn into_number(self) -> f64;

    /// Reassembles an element from exactly `size_of::<Self>()` bytes.
    fn decode(bytes: &[u8], little_endian: bool) -> Self;

    /// Writes the element into exactly `size_of::<Self>()` bytes.
    fn encode(self, out: &mut [u8], little_endian: bool) {
        let bytes = if little_endian { self.to_le_bytes() } else { self.to_be_bytes() };
        out.copy_from_slice(bytes.as_ref());
    }
}

macro_rules! view_element {
    ($($ty:ty => $kind:ident, $from:expr;)+) => {
        $(
            impl ViewElement for $ty {
                const KIND: ElementKind = ElementKind::$kind;

                #[inline]
                fn from_number(n: f64) -> Self {
                    let convert: fn(f64) -> Self = $from;
                    convert(n)
                }

                #[inline]
                fn into_number(self) -> f64 {
                    f64::from(self)
                }

                #[inline]
                fn decode(bytes: &[u8], little_endian: bool) -> Self {
                    let bytes: &<Self as FromBytes>::Bytes =
                        bytes.try_into().expect("ViewElement::decode: byte count does not match element size");
                    if little_endian {
                        <Self as FromBytes>::from_le_bytes(bytes)
                    } else {
                        <Self as FromBytes>::from_be_bytes(bytes)
                    }
                }
            }
        )+
    };
}

#[expect(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
mod conversions {
    use super::*;

    view_element! {
        i8 => Int8, |n| wrap_to_bits(n, 8) as u8 as i8;
        u8 => Uint8, |n| wrap_to_bits(n, 8) as u8;
        i16 => Int16, |n| wrap_to_bits(n, 16) as u16 as i16;
        u16 => Uint16, |n| wrap_to_bits(n, 16) as u16;
        i32 => Int32, |n| wrap_to_bits(n, 32) as u32 as i32;
        u32 => Uint32, |n| wrap_to_bits(n, 32) as u32;
        f32 => Float32, |n| n as f32;
        f64 => Float64, |n| n;
    }
}

/// Runs `$body` with `$t` bound to the Rust type behind `$kind`.
macro_rules! with_element_type {
    ($kind:expr, $t:ident => $body:expr) => {
        match $kind {
            ElementKind::Int8 => { type $t = i8; $body }
            ElementKind::Uint8 => { type $t = u8; $body }
            ElementKind::Int16 => { type $t = i16; $body }
            ElementKind::Uint16 => { type $t = u16; $body }
            ElementKind::Int32 => { type $t = i32; $body }
            ElementKind::Uint32 => { type $t = u32; $body }
            ElementKind::Float32 => { type $t = f32; $body }
            ElementKind::Float64 => { type $t = f64; $body }
        }
    };
}

/// A DataView cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataView {
    header: ObjectHeader,
    buffer: HeapId,
    byte_offset: usize,
    byte_length: usize,
}

impl_js_object!(DataView);

const CONSTRUCTOR: &str = "new DataView(buffer, [byteOffset], [byteLength])";

impl DataView {
    #[must_use]
    pub fn buffer(&self) -> HeapId {
        self.buffer
    }

    /// Offset of the window into the buffer, fixed at construction.
    #[must_use]
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// Length of the window, fixed at construction. Unchanged by detachment.
    #[must_use]
    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Validates the arguments and allocates a view over `buffer`.
    ///
    /// `byte_length` of `undefined` selects the rest of the buffer.
    pub fn construct(
        heap: &mut Heap<impl ResourceTracker, impl HeapTracer>,
        prototype: Option<HeapId>,
        buffer: &Value,
        byte_offset: &Value,
        byte_length: &Value,
    ) -> RunResult<HeapId> {
        let Some(buffer) = buffer.ref_id().filter(|&id| matches!(heap.get(id), HeapData::ArrayBuffer(_))) else {
            return Err(ExcType::type_error(format!("{CONSTRUCTOR}: buffer must be an ArrayBuffer")));
        };
        let offset = byte_offset.to_index()?;
        let target = heap.array_buffer(buffer);
        if target.is_detached() {
            return Err(ExcType::type_error(format!("{CONSTRUCTOR}: buffer is detached")));
        }
        let buffer_length = target.byte_length();
        if offset > buffer_length {
            return Err(ExcType::range_error(format!(
                "{CONSTRUCTOR}: byteOffset must be <= the buffer's byte length"
            )));
        }
        let view_length = if byte_length.is_undefined() {
            buffer_length - offset
        } else {
            let length = byte_length.to_index()?;
            if offset.checked_add(length).is_none_or(|end| end > buffer_length) {
                return Err(ExcType::range_error(format!(
                    "{CONSTRUCTOR}: byteOffset + byteLength must be <= the length of the buffer"
                )));
            }
            length
        };

        // the cell holds the buffer and prototype, so allocating it keeps them alive
        Ok(heap.allocate(HeapData::DataView(Self {
            header: ObjectHeader::new(prototype),
            buffer,
            byte_offset: offset,
            byte_length: view_length,
        }))?)
    }

    /// Absolute byte range of an element access, after the liveness and window checks.
    fn element_range(
        &self,
        heap: &Heap<impl ResourceTracker, impl HeapTracer>,
        kind: ElementKind,
        byte_offset: usize,
        method: &str,
    ) -> RunResult<std::ops::Range<usize>> {
        if heap.array_buffer(self.buffer).is_detached() {
            return Err(ExcType::detached_buffer(method));
        }
        match byte_offset.checked_add(kind.size()) {
            Some(end) if end <= self.byte_length => {
                Ok(self.byte_offset + byte_offset..self.byte_offset + end)
            }
            _ => Err(ExcType::range_error(format!(
                "{method}(): Cannot access {} bytes at offset {byte_offset}",
                kind.size()
            ))),
        }
    }

    /// Reads one element at `byte_offset` within the view.
    pub fn get<E: ViewElement>(
        heap: &Heap<impl ResourceTracker, impl HeapTracer>,
        id: HeapId,
        byte_offset: usize,
        little_endian: bool,
    ) -> RunResult<E> {
        let method = format!("DataView.prototype.get{}", E::KIND);
        let view = heap.data_view(id);
        let range = view.element_range(heap, E::KIND, byte_offset, &method)?;
        let bytes = heap
            .array_buffer(view.buffer)
            .bytes()
            .and_then(|bytes| bytes.get(range))
            .ok_or_else(|| ExcType::range_error(format!("{method}(): view is outside its buffer")))?;
        Ok(E::decode(bytes, little_endian))
    }

    /// Writes one element at `byte_offset` within the view.
    pub fn set<E: ViewElement>(
        heap: &mut Heap<impl ResourceTracker, impl HeapTracer>,
        id: HeapId,
        byte_offset: usize,
        value: E,
        little_endian: bool,
    ) -> RunResult<()> {
        let method = format!("DataView.prototype.set{}", E::KIND);
        let view = heap.data_view(id);
        let buffer = view.buffer;
        let range = view.element_range(heap, E::KIND, byte_offset, &method)?;
        let out = heap
            .array_buffer_mut(buffer)
            .bytes_mut()
            .and_then(|bytes| bytes.get_mut(range))
            .ok_or_else(|| ExcType::range_error(format!("{method}(): view is outside its buffer")))?;
        value.encode(out, little_endian);
        Ok(())
    }

    /// [`Self::get`] dispatched on a runtime element kind, widened to `f64`.
    pub fn get_value(
        heap: &Heap<impl ResourceTracker, impl HeapTracer>,
        id: HeapId,
        kind: ElementKind,
        byte_offset: usize,
        little_endian: bool,
    ) -> RunResult<f64> {
        with_element_type!(kind, E => Self::get::<E>(heap, id, byte_offset, little_endian).map(E::into_number))
    }

    /// [`Self::set`] dispatched on a runtime element kind.
    pub fn set_value(
        heap: &mut Heap<impl ResourceTracker, impl HeapTracer>,
        id: HeapId,
        kind: ElementKind,
        byte_offset: usize,
        value: f64,
        little_endian: bool,
    ) -> RunResult<()> {
        with_element_type!(kind, E => Self::set(heap, id, byte_offset, E::from_number(value), little_endian))
    }
}

impl Traceable for DataView {
    fn project(data: &HeapData) -> Option<&Self> {
        match data {
            HeapData::DataView(view) => Some(view),
            _ => None,
        }
    }

    fn project_mut(data: &mut HeapData) -> Option<&mut Self> {
        match data {
            HeapData::DataView(view) => Some(view),
            _ => None,
        }
    }

    fn build_metadata(builder: &mut MetadataBuilder<Self>) {
        builder
            .add_object_fields()
            .add_slot("@buffer", |view| Some(view.buffer), |view| Some(&mut view.buffer));
    }
}
