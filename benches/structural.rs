use criterion::*;
use std::hint::black_box;

use granite_ecs::World;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

const ENTITIES: u32 = 10_000;

fn structural_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("structural");

    group.bench_function("add_remove_churn_10k", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                let entities: Vec<_> = (0..ENTITIES)
                    .map(|_| {
                        let e = world.create().unwrap();
                        world.add::<Position>(e).unwrap();
                        e
                    })
                    .collect();
                (world, entities)
            },
            |(mut world, entities)| {
                // After the first transition everything rides graph edges.
                for &e in &entities {
                    world.add::<Velocity>(e).unwrap();
                }
                for &e in &entities {
                    world.remove::<Velocity>(e).unwrap();
                }
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("delete_and_gc_10k", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                let entities: Vec<_> = (0..ENTITIES)
                    .map(|_| {
                        let e = world.create().unwrap();
                        world.add::<Position>(e).unwrap();
                        e
                    })
                    .collect();
                (world, entities)
            },
            |(mut world, entities)| {
                for e in entities {
                    world.delete(e).unwrap();
                }
                for _ in 0..16 {
                    world.gc();
                }
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("defragment_sparse_chunks", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                let entities: Vec<_> = (0..ENTITIES)
                    .map(|i| {
                        let e = world.create().unwrap();
                        world
                            .add_value(e, Position { x: i as f32, y: 0.0, z: 0.0 })
                            .unwrap();
                        e
                    })
                    .collect();
                // Punch holes so most chunks drop below the semi threshold.
                for (i, e) in entities.iter().enumerate() {
                    if i % 3 != 0 {
                        world.delete(*e).unwrap();
                    }
                }
                world
            },
            |mut world| {
                world.defragment(u32::MAX);
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, structural_benchmark);
criterion_main!(benches);
