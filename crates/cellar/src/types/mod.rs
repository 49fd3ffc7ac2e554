pub mod array_buffer;
pub mod collection;
pub mod data_view;
pub mod iter;
pub mod object;
pub mod storage;

pub use array_buffer::ArrayBuffer;
pub use collection::{Collection, CollectionKind};
pub use data_view::{DataView, ElementKind, ViewElement};
pub use iter::{CollectionIter, IterItem, IterKind};
pub use object::{JsObject, ObjectHeader, PlainObject};
pub use storage::{EraseOutcome, InsertOutcome, OrderedHashStorage, Retirement, Slot};
