use criterion::*;
use std::hint::black_box;

use granite_ecs::{Query, World};

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

const ENTITIES: u32 = 100_000;

fn populated_world() -> (World, Query) {
    let mut world = World::new();
    let template = world.create().unwrap();
    world.add::<Position>(template).unwrap();
    world.add::<Velocity>(template).unwrap();
    for _ in 1..ENTITIES {
        world.create_from(template).unwrap();
    }
    let query = world.query().write::<Position>().all::<Velocity>().build().unwrap();
    (world, query)
}

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    group.throughput(Throughput::Elements(ENTITIES as u64));

    group.bench_function("each_read_100k", |b| {
        b.iter_batched(
            populated_world,
            |(mut world, query)| {
                let mut sum = 0.0f32;
                query.each::<Position>(&mut world, |p| sum += p.x).unwrap();
                black_box(sum);
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("each2_mut_integrate_100k", |b| {
        b.iter_batched(
            populated_world,
            |(mut world, query)| {
                query
                    .each2_mut::<Position, Velocity>(&mut world, |p, v| {
                        p.x += v.dx;
                        p.y += v.dy;
                    })
                    .unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("par_each_read_100k", |b| {
        b.iter_batched(
            populated_world,
            |(mut world, query)| {
                query
                    .par_each::<Position>(&mut world, |p| {
                        black_box(p.x);
                    })
                    .unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("count_100k", |b| {
        b.iter_batched(
            populated_world,
            |(mut world, query)| {
                black_box(query.count(&mut world));
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
