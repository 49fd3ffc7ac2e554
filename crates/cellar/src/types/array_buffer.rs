use serde::{Deserialize, Serialize};

use crate::{
    exception::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    metadata::{MetadataBuilder, Traceable},
    resource::ResourceTracker,
    tracer::HeapTracer,
    types::{ObjectHeader, object::impl_js_object},
};

/// A fixed-length byte buffer that can be detached.
///
/// Detaching drops the bytes; afterwards the byte length reads as 0 and every
/// view over the buffer fails its accesses. Detachment is one-way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayBuffer {
    header: ObjectHeader,
    /// `None` once detached.
    data: Option<Vec<u8>>,
}

impl_js_object!(ArrayBuffer);

impl ArrayBuffer {
    /// A zero-filled buffer of `byte_length` bytes.
    ///
    /// Fails with a RangeError when the bytes cannot be reserved.
    pub fn new(prototype: Option<HeapId>, byte_length: usize) -> RunResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(byte_length)
            .map_err(|_| ExcType::range_error(format!("Array buffer allocation failed: {byte_length} bytes")))?;
        data.resize(byte_length, 0);
        Ok(Self::from_bytes(prototype, data))
    }

    #[must_use]
    pub fn from_bytes(prototype: Option<HeapId>, bytes: Vec<u8>) -> Self {
        Self {
            header: ObjectHeader::new(prototype),
            data: Some(bytes),
        }
    }

    /// Allocates a zero-filled buffer in the heap. The bytes are charged to the tracker.
    pub fn construct(
        heap: &mut Heap<impl ResourceTracker, impl HeapTracer>,
        prototype: Option<HeapId>,
        byte_length: usize,
    ) -> RunResult<HeapId> {
        let buffer = Self::new(prototype, byte_length)?;
        Ok(heap.allocate(HeapData::ArrayBuffer(buffer))?)
    }

    /// Current length; 0 once detached.
    #[must_use]
    pub fn byte_length(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.data.is_none()
    }

    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        self.data.as_deref_mut()
    }

    /// Detaches the buffer at `id`. Detaching twice is a no-op.
    pub fn detach(heap: &mut Heap<impl ResourceTracker, impl HeapTracer>, id: HeapId) {
        let Some(bytes) = heap.array_buffer_mut(id).data.take() else {
            return;
        };
        let object_id = heap.object_id(id);
        heap.tracer_mut().on_detach(object_id, bytes.len());
    }
}

impl Traceable for ArrayBuffer {
    fn project(data: &HeapData) -> Option<&Self> {
        match data {
            HeapData::ArrayBuffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    fn project_mut(data: &mut HeapData) -> Option<&mut Self> {
        match data {
            HeapData::ArrayBuffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    fn build_metadata(builder: &mut MetadataBuilder<Self>) {
        builder.add_object_fields();
    }
}
