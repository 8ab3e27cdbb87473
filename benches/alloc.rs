// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// SegmentAllocator alloc/free/coalesce throughput at three sizes: a small
// object well inside a segment, one that straddles the default segment
// size boundary, and the eviction-forcing workload of many small objects
// packed and freed together.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use plasma_store::allocator::{SegmentAllocator, DEFAULT_SEGMENT_SIZE};

const CAPACITY: i64 = 8 * 1024 * 1024 * 1024;

const SIZES: &[(&str, usize)] = &[
    ("small_300", 300),
    ("segment_boundary", DEFAULT_SEGMENT_SIZE - 64),
    ("oversized_dedicated", DEFAULT_SEGMENT_SIZE + 1024),
];

fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free");
    for &(label, size) in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &size, |b, &sz| {
            let mut allocator = SegmentAllocator::new(CAPACITY);
            b.iter(|| {
                let a = allocator.alloc(sz).expect("alloc");
                black_box(a);
                allocator.free(a.segment_index, a.offset, a.aligned_len);
            });
        });
    }
    group.finish();
}

fn bench_coalesce_many_small(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesce");
    group.throughput(Throughput::Elements(64));

    group.bench_function("pack_and_free_300x64", |b| {
        b.iter(|| {
            let mut allocator = SegmentAllocator::new(CAPACITY);
            let mut allocations = Vec::with_capacity(64);
            for _ in 0..64 {
                allocations.push(allocator.alloc(300).expect("alloc"));
            }
            for a in allocations.into_iter().rev() {
                allocator.free(a.segment_index, a.offset, a.aligned_len);
            }
            black_box(allocator.allocated_bytes());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free, bench_coalesce_many_small);
criterion_main!(benches);
