//! Heap event tracing.
//!
//! A trait-based hook system for the heap. The heap is parameterized as
//! `Heap<T: ResourceTracker, Tr: HeapTracer>`; with [`NoopTracer`] every hook
//! compiles away, the same way [`NoLimitTracker`](crate::resource::NoLimitTracker)
//! removes limit checks.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`StderrTracer`] | Human-readable heap log on stderr |
//! | [`RecordingTracer`] | Event recording for tests and post-mortem inspection |

use crate::heap::{CellKind, HeapId, ObjectId};

/// Counters reported at the end of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionSummary {
    /// Cells reached from the roots.
    pub marked: usize,
    /// Cells freed by the sweep.
    pub freed: usize,
    /// Cells whose `HeapId` changed during compaction.
    pub moved: usize,
}

/// Trace event emitted by the heap.
///
/// Used by [`RecordingTracer`] to capture what the heap did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A cell was placed in the arena.
    Allocate {
        kind: CellKind,
        id: HeapId,
        object_id: ObjectId,
        size: usize,
    },
    /// A collection finished.
    Collect(CollectionSummary),
    /// An ordered storage was replaced by a rebuilt successor.
    StorageRebuild {
        old_capacity: usize,
        new_capacity: usize,
        live: usize,
    },
    /// A storage was retired by `clear()`.
    StorageCleared { live: usize },
    /// An array buffer lost its backing bytes.
    Detach { object_id: ObjectId, byte_length: usize },
}

/// Trait for heap tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// no code and implementations only override the hooks they care about.
pub trait HeapTracer: std::fmt::Debug {
    /// Called after a cell is placed, before any collection the allocation triggers.
    #[inline(always)]
    fn on_allocate(&mut self, _kind: CellKind, _id: HeapId, _object_id: ObjectId, _size: usize) {}

    /// Called when a collection (sweep plus optional compaction) completes.
    #[inline(always)]
    fn on_collect(&mut self, _summary: CollectionSummary) {}

    /// Called when an ordered storage is rebuilt for growth or compaction.
    #[inline(always)]
    fn on_storage_rebuild(&mut self, _old_capacity: usize, _new_capacity: usize, _live: usize) {}

    /// Called when an ordered storage is retired by `clear()`.
    #[inline(always)]
    fn on_storage_cleared(&mut self, _live: usize) {}

    /// Called when an array buffer is detached.
    #[inline(always)]
    fn on_detach(&mut self, _object_id: ObjectId, _byte_length: usize) {}
}

/// Tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl HeapTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints one line per heap event to stderr.
///
/// Allocation lines can be suppressed since stress runs produce one per cell:
///
/// ```text
///   +++ ALLOC Map          id=4    obj=#4   size=40
///   ... REBUILD cap 8 -> 16 live=8
///   --- GC marked=12 freed=3 moved=2
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Skip `on_allocate` output.
    quiet_allocations: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that only reports collections, rebuilds and detachments.
    #[must_use]
    pub fn without_allocations() -> Self {
        Self {
            quiet_allocations: true,
        }
    }
}

impl HeapTracer for StderrTracer {
    fn on_allocate(&mut self, kind: CellKind, id: HeapId, object_id: ObjectId, size: usize) {
        if self.quiet_allocations {
            return;
        }
        let name: &'static str = kind.into();
        eprintln!(
            "  +++ ALLOC {name:<12} id={id:<4} obj={object_id:<4} size={size}",
            id = id.index()
        );
    }

    fn on_collect(&mut self, summary: CollectionSummary) {
        eprintln!(
            "  --- GC marked={} freed={} moved={}",
            summary.marked, summary.freed, summary.moved
        );
    }

    fn on_storage_rebuild(&mut self, old_capacity: usize, new_capacity: usize, live: usize) {
        eprintln!("  ... REBUILD cap {old_capacity} -> {new_capacity} live={live}");
    }

    fn on_storage_cleared(&mut self, live: usize) {
        eprintln!("  ... CLEAR live={live}");
    }

    fn on_detach(&mut self, object_id: ObjectId, byte_length: usize) {
        eprintln!("  !!! DETACH {object_id} bytes={byte_length}");
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event in order.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Returns the recorded events and starts a fresh recording.
    pub fn take_events(&mut self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Returns only the collection summaries.
    #[must_use]
    pub fn collections(&self) -> Vec<CollectionSummary> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Collect(summary) => Some(*summary),
                _ => None,
            })
            .collect()
    }
}

impl HeapTracer for RecordingTracer {
    fn on_allocate(&mut self, kind: CellKind, id: HeapId, object_id: ObjectId, size: usize) {
        self.events.push(TraceEvent::Allocate {
            kind,
            id,
            object_id,
            size,
        });
    }

    fn on_collect(&mut self, summary: CollectionSummary) {
        self.events.push(TraceEvent::Collect(summary));
    }

    fn on_storage_rebuild(&mut self, old_capacity: usize, new_capacity: usize, live: usize) {
        self.events.push(TraceEvent::StorageRebuild {
            old_capacity,
            new_capacity,
            live,
        });
    }

    fn on_storage_cleared(&mut self, live: usize) {
        self.events.push(TraceEvent::StorageCleared { live });
    }

    fn on_detach(&mut self, object_id: ObjectId, byte_length: usize) {
        self.events.push(TraceEvent::Detach { object_id, byte_length });
    }
}
