#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "float to integer conversions are range checked first")]
#![expect(clippy::cast_sign_loss, reason = "float to integer conversions are range checked first")]

mod args;
mod exception;
mod heap;
pub mod metadata;
mod realm;
mod resource;
mod runtime;
pub mod tracer;
pub mod types;
pub mod unicode;
mod value;

pub use crate::{
    args::ArgValues,
    exception::{ExcType, Exception, RunError, RunResult},
    heap::{CellKind, DanglingRef, Heap, HeapData, HeapId, HeapStats, ObjectId, PermanentRoot, RootScope, Rooted},
    realm::Realm,
    resource::{
        DEFAULT_GC_INTERVAL, GcPolicy, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    runtime::{Constructor, MAX_ARRAY_BUFFER_LENGTH, Method, Runtime},
    tracer::{CollectionSummary, HeapTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    types::{ElementKind, IterItem, IterKind},
    value::{MAX_SAFE_INTEGER, Value, to_integer_or_infinity},
    unicode::JsString,
};
