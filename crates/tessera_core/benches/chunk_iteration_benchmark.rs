//! # Chunk Iteration Benchmark
//!
//! Compares per-slot locator access against whole-chunk slices for a
//! trivial column.
//!
//! Run with: `cargo bench --package tessera_core --bench chunk_iteration_benchmark`

#![allow(missing_docs)]
#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_core::{ArchetypeId, World};

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
#[repr(C)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

fn populated(count: usize) -> (World, ArchetypeId) {
    let mut world = World::new();
    let position = world.register_trivial::<Position>().expect("register");
    let velocity = world.register_trivial::<Velocity>().expect("register");
    let id = world.ensure_archetype(&[position, velocity]).expect("archetype");
    for _ in 0..count {
        world.create_in(id).expect("create");
    }
    (world, id)
}

fn bench_locator_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("locator_scan");
    for count in [1_000, 100_000] {
        let (mut world, id) = populated(count);
        let position = world.component_type::<Position>().expect("registered");
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let memory = world.memory_mut(id).expect("memory");
                let locator = memory.trivial_locator::<Position>(position).expect("column");
                for at in memory.viewer() {
                    if let Some(p) = locator.locate_mut(memory, at) {
                        p.x += 1.0;
                    }
                }
                black_box(memory.len())
            });
        });
    }
    group.finish();
}

fn bench_chunk_slices(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_slices");
    for count in [1_000, 100_000] {
        let (mut world, id) = populated(count);
        let position = world.component_type::<Position>().expect("registered");
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let memory = world.memory_mut(id).expect("memory");
                let locator = memory.trivial_locator::<Position>(position).expect("column");
                for chunk in 0..memory.chunk_count() {
                    if let Some(rows) = locator.chunk_slice_mut(memory, chunk) {
                        for p in rows {
                            p.x += 1.0;
                        }
                    }
                }
                black_box(memory.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_locator_scan, bench_chunk_slices);
criterion_main!(benches);
