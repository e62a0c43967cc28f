//! Concurrent hashtable benchmarks (spec §4.2): insert, update, search, and
//! delete throughput against a pre-populated table.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kestrel::hashtable::mcmp::ConcurrentHashtable;

const NEIGHBORHOOD: usize = 4;

fn populated(capacity: usize, keys: usize) -> (ConcurrentHashtable, Vec<Vec<u8>>) {
    let table = ConcurrentHashtable::new(capacity, NEIGHBORHOOD);
    let keys: Vec<Vec<u8>> = (0..keys).map(|i| format!("key:{i:08}").into_bytes()).collect();
    for (i, key) in keys.iter().enumerate() {
        table.insert_or_update(key, i as u64).expect("insert");
    }
    (table, keys)
}

fn bench_search_hit(c: &mut Criterion) {
    let (table, keys) = populated(1 << 16, 1 << 14);
    let mut i = 0usize;
    c.bench_function("hashtable_search_hit", |b| {
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(table.search(&keys[i]));
        });
    });
}

fn bench_search_miss(c: &mut Criterion) {
    let (table, _keys) = populated(1 << 16, 1 << 14);
    c.bench_function("hashtable_search_miss", |b| {
        b.iter(|| {
            black_box(table.search(b"definitely-not-present"));
        });
    });
}

fn bench_insert_update(c: &mut Criterion) {
    let (table, keys) = populated(1 << 16, 1 << 14);
    let mut value = 1u64 << 32;
    c.bench_function("hashtable_update_existing", |b| {
        b.iter(|| {
            value = value.wrapping_add(1);
            black_box(table.insert_or_update(&keys[0], value).expect("update"));
        });
    });
}

fn bench_scan(c: &mut Criterion) {
    let (table, _keys) = populated(1 << 16, 1 << 14);
    c.bench_function("hashtable_scan_block", |b| {
        b.iter(|| {
            let (entries, cursor) = table.scan(0, 256);
            black_box((entries, cursor));
        });
    });
}

criterion_group!(benches, bench_search_hit, bench_search_miss, bench_insert_update, bench_scan);
criterion_main!(benches);
