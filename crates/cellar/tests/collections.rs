//! Map and Set semantics through the `Runtime` surface.
//!
//! Covers insertion order, size accounting, SameValueZero keys, growth and
//! compaction, and the receiver and constructor checks scripts observe.

use cellar::{
    Constructor, ExcType, IterItem, Method, NoLimitTracker, Runtime, Value,
    types::{Collection, CollectionKind},
};
use pretty_assertions::assert_eq;

fn runtime() -> Runtime<NoLimitTracker> {
    Runtime::new(NoLimitTracker).unwrap()
}

/// Keys of a Map or Set in iteration order, read through `keys()`.
fn keys(rt: &mut Runtime<NoLimitTracker>, collection: &Value) -> Vec<Value> {
    let kind = match rt.to_string_tag(collection) {
        Some("Map") => CollectionKind::Map,
        Some("Set") => CollectionKind::Set,
        other => panic!("not a collection: {other:?}"),
    };
    let method = match kind {
        CollectionKind::Map => Method::MapKeys,
        CollectionKind::Set => Method::SetKeys,
    };
    let iter = rt.call_method(collection, method, ()).unwrap();
    let mut out = Vec::new();
    while let Some(item) = rt.iterator_next(&iter, kind).unwrap() {
        match item {
            IterItem::Value(key) => out.push(key),
            IterItem::Entry(..) => panic!("keys() yielded an entry"),
        }
    }
    out
}

fn numbers(values: &[Value]) -> Vec<f64> {
    values.iter().map(Value::to_number).collect()
}

fn map_set(rt: &mut Runtime<NoLimitTracker>, map: &Value, key: impl Into<Value>, value: impl Into<Value>) {
    let returned = rt.call_method(map, Method::MapSet, [key.into(), value.into()]).unwrap();
    assert_eq!(&returned, map, "Map.prototype.set returns the receiver");
}

fn map_delete(rt: &mut Runtime<NoLimitTracker>, map: &Value, key: impl Into<Value>) -> bool {
    rt.call_method(map, Method::MapDelete, [key.into()]).unwrap() == Value::Bool(true)
}

fn size(rt: &mut Runtime<NoLimitTracker>, collection: &Value, method: Method) -> f64 {
    rt.call_method(collection, method, ()).unwrap().to_number()
}

// =============================================================================
// 1. Insertion order and size
// =============================================================================

/// Live entries come back in the order their keys were first inserted;
/// overwriting a key keeps its position.
#[test]
fn iteration_follows_insertion_order() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    for key in ["c", "a", "b"] {
        map_set(&mut rt, &map, key, 1);
    }
    map_set(&mut rt, &map, "a", 2);
    assert_eq!(keys(&mut rt, &map), vec![Value::from("c"), Value::from("a"), Value::from("b")]);
    assert_eq!(rt.call_method(&map, Method::MapGet, [Value::from("a")]).unwrap(), Value::from(2));
}

/// Deleting and re-inserting moves a key to the end.
#[test]
fn reinsertion_moves_key_to_the_end() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    for key in 1..=3 {
        map_set(&mut rt, &map, key, key);
    }
    assert!(map_delete(&mut rt, &map, 1));
    map_set(&mut rt, &map, 1, 10);
    assert_eq!(numbers(&keys(&mut rt, &map)), vec![2.0, 3.0, 1.0]);
}

/// `size` counts inserts minus deletes; overwrites do not change it.
#[test]
fn size_tracks_inserts_and_deletes() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    for key in 0..10 {
        map_set(&mut rt, &map, key, key);
    }
    for key in 0..5 {
        map_set(&mut rt, &map, key, -key);
    }
    for key in (0..10).step_by(3) {
        assert!(map_delete(&mut rt, &map, key));
    }
    assert_eq!(size(&mut rt, &map, Method::MapSize), 6.0);
}

/// Deleting an absent key reports false and changes nothing.
#[test]
fn delete_of_absent_key_is_idempotent() {
    let mut rt = runtime();
    let set = rt.construct(Constructor::Set, ()).unwrap();
    for key in ["x", "y"] {
        rt.call_method(&set, Method::SetAdd, [Value::from(key)]).unwrap();
    }
    let before = keys(&mut rt, &set);
    for _ in 0..3 {
        let removed = rt.call_method(&set, Method::SetDelete, [Value::from("z")]).unwrap();
        assert_eq!(removed, Value::Bool(false));
    }
    assert_eq!(size(&mut rt, &set, Method::SetSize), 2.0);
    assert_eq!(keys(&mut rt, &set), before);
}

/// `get` of a missing key is undefined; `has` distinguishes it from a stored undefined.
#[test]
fn missing_key_reads_undefined() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    map_set(&mut rt, &map, "present", Value::Undefined);
    assert_eq!(rt.call_method(&map, Method::MapGet, [Value::from("absent")]).unwrap(), Value::Undefined);
    assert_eq!(rt.call_method(&map, Method::MapHas, [Value::from("present")]).unwrap(), Value::Bool(true));
    assert_eq!(rt.call_method(&map, Method::MapHas, [Value::from("absent")]).unwrap(), Value::Bool(false));
}

// =============================================================================
// 2. Key equality
// =============================================================================

/// NaN is one key; +0 and -0 are one key; objects compare by identity.
#[test]
fn keys_use_same_value_zero() {
    let mut rt = runtime();
    let set = rt.construct(Constructor::Set, ()).unwrap();
    let a = rt.construct(Constructor::Set, ()).unwrap();
    let b = rt.construct(Constructor::Set, ()).unwrap();
    for key in [
        Value::Number(f64::NAN),
        Value::Number(-0.0),
        Value::Number(f64::NAN),
        Value::Number(0.0),
        a.clone(),
        b.clone(),
        a.clone(),
        Value::from("1"),
        Value::from(1),
    ] {
        rt.call_method(&set, Method::SetAdd, [key]).unwrap();
    }
    assert_eq!(size(&mut rt, &set, Method::SetSize), 6.0);
    assert_eq!(rt.call_method(&set, Method::SetHas, [Value::Number(0.0)]).unwrap(), Value::Bool(true));
    assert_eq!(rt.call_method(&set, Method::SetHas, [b]).unwrap(), Value::Bool(true));
}

// =============================================================================
// 3. Growth and compaction
// =============================================================================

/// Insert three, delete the middle, insert a fourth, then force growth:
/// order is first, fourth, then the newly added keys.
#[test]
fn growth_preserves_relative_order() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    for key in ["first", "second", "third"] {
        map_set(&mut rt, &map, key, 0);
    }
    assert!(map_delete(&mut rt, &map, "second"));
    map_set(&mut rt, &map, "fourth", 0);
    for n in 0..40 {
        map_set(&mut rt, &map, n, n);
    }

    let order = keys(&mut rt, &map);
    assert_eq!(order.len(), 43);
    assert_eq!(&order[..3], &[Value::from("first"), Value::from("third"), Value::from("fourth")]);
    assert_eq!(numbers(&order[3..]), (0..40).map(f64::from).collect::<Vec<_>>());
    assert_eq!(
        rt.call_method(&map, Method::MapHas, [Value::from("second")]).unwrap(),
        Value::Bool(false)
    );
}

/// Heavy churn on a small map keeps it at the initial capacity and correct.
#[test]
fn churn_is_compacted_in_place() {
    let mut rt = runtime();
    let set = rt.construct(Constructor::Set, ()).unwrap();
    for n in 0..1_000 {
        rt.call_method(&set, Method::SetAdd, [Value::from(n)]).unwrap();
        if n >= 2 {
            rt.call_method(&set, Method::SetDelete, [Value::from(n - 2)]).unwrap();
        }
    }
    assert_eq!(numbers(&keys(&mut rt, &set)), vec![998.0, 999.0]);
    assert_eq!(
        rt.stats().objects_by_kind.get("Set"),
        Some(&1),
        "only the one Set should exist"
    );
}

/// `clear` empties the collection and it stays usable.
#[test]
fn clear_then_reuse() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    for n in 0..20 {
        map_set(&mut rt, &map, n, n);
    }
    assert_eq!(rt.call_method(&map, Method::MapClear, ()).unwrap(), Value::Undefined);
    assert_eq!(size(&mut rt, &map, Method::MapSize), 0.0);
    map_set(&mut rt, &map, "again", 1);
    assert_eq!(keys(&mut rt, &map), vec![Value::from("again")]);
}

// =============================================================================
// 4. Constructors and receivers
// =============================================================================

/// `new Map(map)` copies entries in order; the copy is independent.
#[test]
fn construct_from_existing_collection() {
    let mut rt = runtime();
    let source = rt.construct(Constructor::Map, ()).unwrap();
    for n in [3, 1, 2] {
        map_set(&mut rt, &source, n, n * 10);
    }
    let copy = rt.construct(Constructor::Map, [source.clone()]).unwrap();
    map_set(&mut rt, &source, 4, 40);

    assert_eq!(numbers(&keys(&mut rt, &copy)), vec![3.0, 1.0, 2.0]);
    assert_eq!(rt.call_method(&copy, Method::MapGet, [Value::from(1)]).unwrap(), Value::from(10));
    assert_eq!(size(&mut rt, &source, Method::MapSize), 4.0);
}

/// A Set cannot seed a Map, and primitives are rejected.
#[test]
fn construct_from_wrong_source_is_type_error() {
    let mut rt = runtime();
    let set = rt.construct(Constructor::Set, ()).unwrap();
    let err = rt.construct(Constructor::Map, [set]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::TypeError);
    let err = rt.construct(Constructor::Set, [Value::from(5)]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::TypeError);
}

/// A reference to a collected Set is not a valid source either.
#[test]
fn construct_from_collected_source_is_type_error() {
    let mut rt = runtime();
    let stale = rt.construct(Constructor::Set, ()).unwrap();
    rt.collect_garbage();
    assert_eq!(rt.to_string_tag(&stale), None, "the unrooted set was collected");

    let err = rt.construct(Constructor::Set, [stale]).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::TypeError);
}

/// Calling a constructor without `new` is a TypeError.
#[test]
fn constructors_require_new() {
    let mut rt = runtime();
    let err = rt.call_constructor(Constructor::Map, ()).unwrap_err();
    assert!(err.is_exception_type(ExcType::TypeError));
    assert_eq!(
        err.into_exception().message(),
        Some("Map() called in function context instead of constructor")
    );
}

/// Map methods reject Sets and primitives, and vice versa.
#[test]
fn methods_check_their_receiver() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    let set = rt.construct(Constructor::Set, ()).unwrap();

    for (receiver, method) in [
        (&set, Method::MapSet),
        (&map, Method::SetAdd),
        (&Value::from(1), Method::MapHas),
        (&Value::Undefined, Method::SetSize),
    ] {
        let err = rt.call_method(receiver, method, [Value::from(1)]).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::TypeError, "{method} on {receiver}");
    }
    assert_eq!(rt.to_string_tag(&map), Some("Map"));
    assert_eq!(rt.to_string_tag(&set), Some("Set"));
    assert_eq!(rt.to_string_tag(&Value::Null), None);
}

/// `forEach` visits value then key, and sees entries added during the walk.
#[test]
fn for_each_passes_value_and_key() {
    let mut rt = runtime();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    map_set(&mut rt, &map, "a", 1);
    map_set(&mut rt, &map, "b", 2);

    let mut seen = Vec::new();
    rt.for_each(&map, CollectionKind::Map, |heap, value, key, map| {
        if key == Value::from("a") {
            Collection::insert(heap, map, Value::from("c"), Value::from(3))?;
        }
        seen.push((key.to_string(), value.to_number()));
        Ok(())
    })
    .unwrap();
    assert_eq!(
        seen,
        vec![("a".to_owned(), 1.0), ("b".to_owned(), 2.0), ("c".to_owned(), 3.0)]
    );
}
