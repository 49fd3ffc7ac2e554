// Use codspeed-criterion-compat when running on CodSpeed (CI), real criterion otherwise (for flamegraphs)
#[cfg(codspeed)]
use codspeed_criterion_compat::{Bencher, Criterion, black_box, criterion_group, criterion_main};
#[cfg(not(codspeed))]
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use cellar::{
    Constructor, GcPolicy, IterItem, Method, NoLimitTracker, ResourceLimits, Runtime, Value, types::CollectionKind,
};

/// Inserts `n` integer keys into a fresh Map, growing it from the initial capacity.
fn map_fill(bench: &mut Bencher, n: i32) {
    bench.iter(|| {
        let mut rt = Runtime::new(NoLimitTracker).unwrap();
        let map = rt.construct(Constructor::Map, ()).unwrap();
        for key in 0..n {
            rt.call_method(&map, Method::MapSet, [Value::from(key), Value::from(key)]).unwrap();
        }
        black_box(rt.call_method(&map, Method::MapSize, ()).unwrap());
    });
}

/// Lookups against a Map with `n` entries, half of them misses.
fn map_lookup(bench: &mut Bencher, n: i32) {
    let mut rt = Runtime::new(NoLimitTracker).unwrap();
    let map = rt.construct(Constructor::Map, ()).unwrap();
    for key in 0..n {
        rt.call_method(&map, Method::MapSet, [Value::from(key * 2), Value::from(key)]).unwrap();
    }
    bench.iter(|| {
        let mut hits = 0;
        for key in 0..n {
            if rt.call_method(&map, Method::MapHas, [Value::from(key)]).unwrap() == Value::Bool(true) {
                hits += 1;
            }
        }
        assert_eq!(hits, n / 2);
        black_box(hits);
    });
}

/// Sliding window of two live keys: every insert pairs with a delete, so the
/// storage compacts in place rather than growing.
fn set_churn(bench: &mut Bencher, n: i32) {
    let mut rt = Runtime::new(NoLimitTracker).unwrap();
    let set = rt.construct(Constructor::Set, ()).unwrap();
    // rebuilds allocate, so the set may move once the collector runs
    rt.set_global("set", set);
    bench.iter(|| {
        for key in 0..n {
            let set = rt.global("set");
            rt.call_method(&set, Method::SetAdd, [Value::from(key)]).unwrap();
            rt.call_method(&set, Method::SetDelete, [Value::from(key - 2)]).unwrap();
        }
        let set = rt.global("set");
        rt.call_method(&set, Method::SetClear, ()).unwrap();
    });
}

/// Full iteration over a Set of `n` entries.
fn set_iterate(bench: &mut Bencher, n: i32) {
    let mut rt = Runtime::new(NoLimitTracker).unwrap();
    let set = rt.construct(Constructor::Set, ()).unwrap();
    for key in 0..n {
        rt.call_method(&set, Method::SetAdd, [Value::from(key)]).unwrap();
    }
    rt.set_global("set", set);
    bench.iter(|| {
        let set = rt.global("set");
        let iter = rt.call_method(&set, Method::SetValues, ()).unwrap();
        let mut sum = 0.0;
        while let Some(IterItem::Value(value)) = rt.iterator_next(&iter, CollectionKind::Set).unwrap() {
            sum += value.to_number();
        }
        black_box(sum);
    });
}

/// Alternating little and big endian 32-bit stores and loads over a 4 KiB view.
fn data_view_round_trip(bench: &mut Bencher) {
    let mut rt = Runtime::new(NoLimitTracker).unwrap();
    let buffer = rt.construct(Constructor::ArrayBuffer, [Value::from(4096)]).unwrap();
    let view = rt.construct(Constructor::DataView, [buffer]).unwrap();
    bench.iter(|| {
        for offset in (0..4096).step_by(4) {
            let little_endian = Value::Bool(offset % 8 == 0);
            rt.call_method(
                &view,
                Method::DataViewSetUint32,
                [Value::from(offset), Value::from(offset), little_endian.clone()],
            )
            .unwrap();
            black_box(
                rt.call_method(&view, Method::DataViewGetUint32, [Value::from(offset), little_endian])
                    .unwrap(),
            );
        }
    });
}

/// Builds a Map of 200 entries while collecting on every allocation.
fn map_fill_under_gc_stress(bench: &mut Bencher) {
    bench.iter(|| {
        let mut rt = Runtime::with_limits(ResourceLimits::new().gc_policy(GcPolicy::stress())).unwrap();
        let map = rt.construct(Constructor::Map, ()).unwrap();
        rt.set_global("map", map);
        for key in 0..200 {
            let map = rt.global("map");
            rt.call_method(&map, Method::MapSet, [Value::from(key), Value::Null]).unwrap();
        }
        black_box(rt.stats().collections);
    });
}

/// Configures the collection and view benchmark group.
fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("map_fill_1000", |b| map_fill(b, 1000));
    c.bench_function("map_lookup_1000", |b| map_lookup(b, 1000));
    c.bench_function("set_churn_1000", |b| set_churn(b, 1000));
    c.bench_function("set_iterate_1000", |b| set_iterate(b, 1000));
    c.bench_function("data_view_round_trip", data_view_round_trip);
    c.bench_function("map_fill_under_gc_stress", map_fill_under_gc_stress);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
