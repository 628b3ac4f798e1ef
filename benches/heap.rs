use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tagalloc::Heap;

fn allocate_and_release(c: &mut Criterion) {
    let mut heap = Heap::new();

    c.bench_function("allocate + release 64", |b| {
        b.iter(|| unsafe {
            let address = heap.allocate(black_box(64)).unwrap();
            heap.release(address);
        });
    });

    c.bench_function("allocate 1000 blocks", |b| {
        b.iter_batched(
            Heap::new,
            |mut heap| {
                for size in (0..1000).map(|i| 16 + (i % 32) * 8) {
                    black_box(heap.allocate(size).unwrap());
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });
}

fn resize(c: &mut Criterion) {
    let mut heap = Heap::new();

    c.bench_function("resize grow in place", |b| {
        b.iter(|| unsafe {
            let address = heap.allocate(32).unwrap();
            let address = heap.resize(address, black_box(256)).unwrap();
            heap.release(address);
        });
    });

    c.bench_function("resize relocate", |b| {
        b.iter(|| unsafe {
            let address = heap.allocate(32).unwrap();
            let fence = heap.allocate(32).unwrap();
            let address = heap.resize(address, black_box(256)).unwrap();
            heap.release(fence);
            heap.release(address);
        });
    });
}

fn fragmented_first_fit(c: &mut Criterion) {
    let mut heap = Heap::new();
    let mut live = Vec::new();
    for i in 0..2000 {
        live.push(heap.allocate(16 + (i % 8) * 16).unwrap());
    }
    // Release every other block so the free list is long and full of small
    // holes.
    for address in live.iter().step_by(2) {
        unsafe { heap.release(*address) };
    }

    c.bench_function("first fit over fragmented list", |b| {
        b.iter(|| unsafe {
            let address = heap.allocate(black_box(200)).unwrap();
            heap.release(address);
        });
    });
}

criterion_group!(benches, allocate_and_release, resize, fragmented_first_fit);
criterion_main!(benches);
