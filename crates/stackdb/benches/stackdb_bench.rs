//! Benchmark: typed store and overlay paths

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stackdb::{DbParams, Overlay, Store};

const SIZES: &[u32] = &[1_000, 10_000];

fn memory_store() -> Store {
    Store::open(DbParams::in_memory()).unwrap()
}

/// Overlay staging, no commit
fn bench_overlay_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("overlay_write");
    let store = memory_store();

    for &size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let tx = Overlay::new(&store);
                for i in 0..size {
                    tx.write(&black_box(i), u64::from(i));
                }
                tx.memory_usage()
            });
        });
    }

    group.finish();
}

/// Overlay reads that hit the write-set and fall through to the store
fn bench_overlay_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("overlay_read");

    for &size in SIZES {
        let store = memory_store();
        for i in (0..size).filter(|i| i % 2 == 0) {
            store.write(&i, &u64::from(i), false).unwrap();
        }
        let tx = Overlay::new(&store);
        for i in (0..size).filter(|i| i % 2 == 1) {
            tx.write(&i, u64::from(i));
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut sum = 0u64;
                for i in 0..size {
                    sum += tx.read::<_, u64>(&black_box(i)).unwrap_or(0);
                }
                sum
            });
        });
    }

    group.finish();
}

/// Full merged traversal from the first key
fn bench_merge_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_iterate");

    for &size in SIZES {
        let store = memory_store();
        for i in 0..size {
            store.write(&i, &u64::from(i), false).unwrap();
        }
        let tx = Overlay::new(&store);
        for i in (0..size).step_by(3) {
            tx.write(&i, 0u64);
        }
        for i in (1..size).step_by(7) {
            tx.erase(&i);
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut it = tx.iter();
                it.seek_to_first();
                let mut count = 0usize;
                while it.valid() {
                    count += it.key_size();
                    it.next();
                }
                count
            });
        });
    }

    group.finish();
}

/// Overlay commit into a batch, then one atomic store write
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for &size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let store = memory_store();
            b.iter(|| {
                let tx = Overlay::new(&store);
                for i in 0..size {
                    tx.write(&i, u64::from(i));
                }
                let mut batch = store.new_batch();
                tx.commit_into(&mut batch).unwrap();
                store.write_batch(&batch, false).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_overlay_write, bench_overlay_read, bench_merge_iterate, bench_commit);
criterion_main!(benches);
