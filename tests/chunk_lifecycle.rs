use granite_ecs::engine::types::MAX_CHUNK_LIFESPAN;
use granite_ecs::{EcsResult, World};

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

fn spawn_with_components(world: &mut World, n: u32) -> EcsResult<Vec<granite_ecs::Entity>> {
    let mut out = Vec::with_capacity(n as usize);
    for i in 0..n {
        let e = world.create()?;
        world.add_value(e, Position { x: i as f32, y: 0.0, z: 0.0 })?;
        world.add_value(e, Velocity { dx: 1.0, dy: 2.0 })?;
        out.push(e);
    }
    Ok(out)
}

#[test]
fn overflow_allocates_a_second_chunk() -> EcsResult<()> {
    let mut world = World::new();

    let first = world.create()?;
    world.add::<Position>(first)?;
    world.add::<Velocity>(first)?;

    let capacity = world.archetype_of(first)?.props().capacity as u32;
    assert!(capacity > 1);

    // Fill the first chunk exactly, then spill one entity over.
    for _ in 1..capacity {
        world.create_from(first)?;
    }
    let spill = world.create_from(first)?;

    let archetype = world.archetype_of(first)?;
    assert_eq!(archetype.chunks().len(), 2);
    assert_eq!(archetype.chunks()[0].count(), capacity as u16);
    assert_eq!(archetype.chunks()[1].count(), 1);
    assert_eq!(world.container_of(spill)?.chunk, 1);
    Ok(())
}

#[test]
fn emptied_chunk_dies_after_its_countdown() -> EcsResult<()> {
    let mut world = World::new();

    let entities = spawn_with_components(&mut world, 4)?;
    let chunks_before = world.diag().chunk_count;

    for e in entities {
        world.delete(e)?;
    }
    // Emptied chunks only start a countdown; nothing is freed yet.
    assert_eq!(world.diag().chunk_count, chunks_before);

    for _ in 0..MAX_CHUNK_LIFESPAN {
        world.gc();
    }
    assert!(world.diag().chunk_count < chunks_before);
    Ok(())
}

#[test]
fn reclaimed_chunk_survives_gc() -> EcsResult<()> {
    let mut world = World::new();

    let entities = spawn_with_components(&mut world, 4)?;
    for e in entities {
        world.delete(e)?;
    }
    world.gc();

    // Reclaim the dying chunk before its countdown expires.
    let e = spawn_with_components(&mut world, 1)?[0];
    for _ in 0..MAX_CHUNK_LIFESPAN * 2 {
        world.gc();
    }
    assert_eq!(world.archetype_of(e)?.chunks().len(), 1);
    assert_eq!(*world.get::<Velocity>(e)?, Velocity { dx: 1.0, dy: 2.0 });
    Ok(())
}

#[test]
fn dead_archetype_is_collected() -> EcsResult<()> {
    let mut world = World::new();

    let entities = spawn_with_components(&mut world, 4)?;
    let archetypes_before = world.diag().archetype_count;

    for e in entities {
        world.delete(e)?;
    }

    // Chunk countdown first, then the archetype countdown.
    let mut remaining = 1024u32;
    while world.diag().archetype_count == archetypes_before && remaining > 0 {
        world.gc();
        remaining -= 1;
    }
    assert!(world.diag().archetype_count < archetypes_before);
    Ok(())
}

#[test]
fn defragment_compacts_and_preserves_data() -> EcsResult<()> {
    let mut world = World::new();

    let first = world.create()?;
    world.add_value(first, Position { x: 0.0, y: 0.0, z: 0.0 })?;
    world.add_value(first, Velocity { dx: 0.0, dy: 0.0 })?;
    let capacity = world.archetype_of(first)?.props().capacity as u32;

    // Three chunks: full / 3 entities / 7 entities.
    let mut entities = vec![first];
    for i in 1..capacity * 2 + 7 {
        let e = world.create_from(first)?;
        world.set(e, Position { x: i as f32, y: 0.0, z: 0.0 })?;
        entities.push(e);
    }
    let in_chunk1: Vec<_> = entities
        .iter()
        .copied()
        .filter(|&e| world.container_of(e).unwrap().chunk == 1)
        .collect();
    for &e in in_chunk1.iter().skip(3) {
        world.delete(e)?;
    }

    // Preserve a disabled entity in the source chunk.
    let moved: Vec<_> = entities
        .iter()
        .copied()
        .filter(|&e| world.is_valid(e) && world.container_of(e).unwrap().chunk == 2)
        .collect();
    assert_eq!(moved.len(), 7);
    world.enable(moved[0], false)?;

    let expected: Vec<(granite_ecs::Entity, Position)> = entities
        .iter()
        .copied()
        .filter(|&e| world.is_valid(e))
        .map(|e| (e, *world.get::<Position>(e).unwrap()))
        .collect();

    world.defragment(u32::MAX);

    let archetype = world.archetype_of(first)?;
    assert_eq!(archetype.chunks()[1].count() as u32, 10);
    assert_eq!(archetype.chunks()[2].count(), 0);
    assert!(archetype.chunks()[2].dying());

    for (e, value) in expected {
        assert_eq!(*world.get::<Position>(e)?, value, "component data survives defragmentation");
    }
    assert!(!world.is_enabled(moved[0]));
    assert!(world.is_enabled(moved[1]));
    Ok(())
}
