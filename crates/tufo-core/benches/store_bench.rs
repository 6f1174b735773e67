//! # Store Benchmarks
//!
//! Performance benchmarks for tufo-core node ingestion and index lookups.
//!
//! Run with: `cargo bench -p tufo-core`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use tufo_core::{Model, Store, StoreConfig, Valu};

const BENCH_MODEL: &str = r#"{
    "types": [
        ["host", ["str", {"lower": true}], {}]
    ],
    "forms": [
        ["host", {}, [
            ["port", ["int", {"min": 0, "max": 65535}], {}],
            ["seen", ["time", {}], {}]
        ]]
    ]
}"#;

fn create_store() -> Store {
    let model = Model::from_json_str("bench", BENCH_MODEL).expect("model");
    Store::open(StoreConfig::in_memory(), model).expect("store")
}

/// Create a store holding N hosts with ports cycling through 0..100.
fn create_populated_store(size: usize) -> Store {
    let store = create_store();
    let mut snap = store.snap("root");
    snap.begin_batch().expect("batch");
    for i in 0..size {
        let props = [("port", Valu::Int((i % 100) as i64))];
        snap.add_node("host", format!("host{i}.example.com"), &props)
            .expect("add");
    }
    snap.commit_batch().expect("commit");
    drop(snap);
    store
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_add_node(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_node");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("autocommit", size), size, |b, &size| {
            b.iter(|| {
                let store = create_store();
                let mut snap = store.snap("root");
                for i in 0..size {
                    let _ = snap.add_node("host", format!("h{i}"), &[]);
                }
                black_box(snap.splices().len())
            });
        });

        group.bench_with_input(BenchmarkId::new("batched", size), size, |b, &size| {
            b.iter(|| black_box(create_populated_store(size)));
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for size in [100, 1000, 10000].iter() {
        let store = create_populated_store(*size);
        let snap = store.snap("root");
        let middle = format!("host{}.example.com", size / 2);

        group.bench_with_input(BenchmarkId::new("ndef", size), &middle, |b, valu| {
            b.iter(|| black_box(snap.get_node_by_ndef("host", valu.as_str())));
        });

        group.bench_with_input(BenchmarkId::new("prop", size), size, |b, _| {
            b.iter(|| black_box(snap.get_nodes_by_prop("host:port", 42)));
        });

        group.bench_with_input(BenchmarkId::new("range", size), size, |b, _| {
            b.iter(|| black_box(snap.get_nodes_by_range("host:port", 10, 20)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_node, bench_lookup);

criterion_main!(benches);
