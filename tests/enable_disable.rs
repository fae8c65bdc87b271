use std::collections::HashSet;

use granite_ecs::{Constraints, EcsResult, Entity, World};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Marker(u32);

fn spawn_marked(world: &mut World, n: u32) -> EcsResult<Vec<Entity>> {
    (0..n)
        .map(|i| {
            let e = world.create()?;
            world.add_value(e, Marker(i))?;
            Ok(e)
        })
        .collect()
}

#[test]
fn disabling_partitions_the_chunk() -> EcsResult<()> {
    let mut world = World::new();
    let e = spawn_marked(&mut world, 5)?;

    world.enable(e[2], false)?;
    world.enable(e[4], false)?;

    let archetype = world.archetype_of(e[0])?;
    let chunk = &archetype.chunks()[0];
    assert_eq!(chunk.first_enabled_row(), 2);
    assert_eq!(chunk.count_enabled(), 3);
    assert_eq!(chunk.count(), 5);

    // The disabled prefix holds exactly {e2, e4}, in some order.
    let disabled: HashSet<Entity> = chunk.entities()[..2].iter().copied().collect();
    assert_eq!(disabled, HashSet::from([e[2], e[4]]));
    let enabled: HashSet<Entity> = chunk.entities()[2..].iter().copied().collect();
    assert_eq!(enabled, HashSet::from([e[0], e[1], e[3]]));

    for (i, entity) in e.iter().enumerate() {
        let expect_disabled = i == 2 || i == 4;
        assert_eq!(world.container_of(*entity)?.disabled, expect_disabled);
        assert_eq!(world.is_enabled(*entity), !expect_disabled);
        // Row position and the table flag must agree.
        let row = world.container_of(*entity)?.row;
        assert_eq!(row < chunk.first_enabled_row(), expect_disabled);
    }
    Ok(())
}

#[test]
fn enable_is_idempotent() -> EcsResult<()> {
    let mut world = World::new();
    let e = spawn_marked(&mut world, 3)?;

    world.enable(e[1], true)?;
    world.enable(e[1], true)?;
    assert_eq!(world.archetype_of(e[0])?.chunks()[0].first_enabled_row(), 0);

    world.enable(e[1], false)?;
    world.enable(e[1], false)?;
    let archetype = world.archetype_of(e[0])?;
    assert_eq!(archetype.chunks()[0].first_enabled_row(), 1);
    assert_eq!(archetype.chunks()[0].count_enabled(), 2);

    world.enable(e[1], true)?;
    assert_eq!(world.archetype_of(e[0])?.chunks()[0].first_enabled_row(), 0);
    Ok(())
}

#[test]
fn disable_preserves_component_values() -> EcsResult<()> {
    let mut world = World::new();
    let e = spawn_marked(&mut world, 8)?;

    for entity in e.iter().step_by(2) {
        world.enable(*entity, false)?;
    }
    for (i, entity) in e.iter().enumerate() {
        assert_eq!(*world.get::<Marker>(*entity)?, Marker(i as u32));
    }
    Ok(())
}

#[test]
fn queries_select_the_requested_population() -> EcsResult<()> {
    let mut world = World::new();
    let e = spawn_marked(&mut world, 6)?;
    world.enable(e[0], false)?;
    world.enable(e[5], false)?;

    let enabled_only = world.query().all::<Marker>().build()?;
    let disabled_only = world
        .query()
        .all::<Marker>()
        .with_constraints(Constraints::DisabledOnly)
        .build()?;
    let all = world
        .query()
        .all::<Marker>()
        .with_constraints(Constraints::AcceptAll)
        .build()?;

    assert_eq!(enabled_only.count(&mut world), 4);
    assert_eq!(disabled_only.count(&mut world), 2);
    assert_eq!(all.count(&mut world), 6);

    let mut seen = HashSet::new();
    disabled_only.each_entity::<Marker>(&mut world, |entity, _| {
        seen.insert(entity);
    })?;
    assert_eq!(seen, HashSet::from([e[0], e[5]]));
    Ok(())
}

#[test]
fn deleting_a_disabled_entity_keeps_the_partition() -> EcsResult<()> {
    let mut world = World::new();
    let e = spawn_marked(&mut world, 5)?;

    world.enable(e[1], false)?;
    world.enable(e[3], false)?;
    world.delete(e[1])?;

    let archetype = world.archetype_of(e[0])?;
    let chunk = &archetype.chunks()[0];
    assert_eq!(chunk.count(), 4);
    assert_eq!(chunk.first_enabled_row(), 1);
    assert_eq!(chunk.count_enabled(), 3);
    assert_eq!(chunk.entities()[0], e[3]);

    for entity in [e[0], e[2], e[4]] {
        assert!(world.is_enabled(entity));
    }
    assert!(!world.is_enabled(e[3]));
    Ok(())
}
