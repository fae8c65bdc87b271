use granite_ecs::{EcsError, EcsResult, World};

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

#[test]
fn add_remove_round_trip() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    world.add_value(e, Position { x: 1.0, y: 2.0, z: 3.0 })?;
    world.add_value(e, Velocity { dx: 4.0, dy: 5.0 })?;

    let p = world.register_component::<Position>();
    let v = world.register_component::<Velocity>();
    assert_eq!(world.archetype_of(e)?.ids(), &[p, v]);

    world.remove::<Velocity>(e)?;
    assert_eq!(world.archetype_of(e)?.ids(), &[p]);
    assert_eq!(*world.get::<Position>(e)?, Position { x: 1.0, y: 2.0, z: 3.0 });
    assert!(!world.has::<Velocity>(e));
    Ok(())
}

#[test]
fn round_trip_reaches_the_same_archetype_id() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    world.add::<Position>(e)?;
    let before = world.container_of(e)?.archetype;

    world.add::<Velocity>(e)?;
    world.remove::<Velocity>(e)?;

    // Graph edges must lead back to the identical archetype, not merely an
    // equal component set.
    assert_eq!(world.container_of(e)?.archetype, before);
    Ok(())
}

#[test]
fn create_delete_recycles_ids_and_bumps_generation() -> EcsResult<()> {
    let mut world = World::new();

    let a = world.create()?;
    let before = world.diag();
    world.delete(a)?;
    let after = world.diag();

    assert_eq!(after.free_entity_count, before.free_entity_count + 1);
    assert!(!world.is_valid(a));

    // The recycled slot keeps the id but advances the generation.
    let b = world.create()?;
    assert_eq!(b.index(), a.index());
    assert_eq!(b.gen(), a.gen() + 1);
    assert!(world.is_valid(b));

    // Deleting through the stale handle must not touch the new entity.
    world.delete(a)?;
    assert!(world.is_valid(b));
    Ok(())
}

#[test]
fn stale_handles_are_rejected() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    world.add_value(e, Position::default())?;
    world.delete(e)?;

    assert!(matches!(world.get::<Position>(e), Err(EcsError::InvalidEntity(_))));
    assert!(matches!(world.add::<Velocity>(e), Err(EcsError::InvalidEntity(_))));
    Ok(())
}

#[test]
fn duplicate_and_missing_component_errors() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    world.add::<Position>(e)?;
    assert!(matches!(world.add::<Position>(e), Err(EcsError::DuplicateComponent(_))));
    assert!(matches!(world.remove::<Velocity>(e), Err(EcsError::MissingComponent(_))));
    assert!(matches!(world.get::<Velocity>(e), Err(EcsError::MissingComponent(_))));
    Ok(())
}

#[test]
fn create_from_clones_components() -> EcsResult<()> {
    let mut world = World::new();

    let template = world.create()?;
    world.add_value(template, Position { x: 7.0, y: 8.0, z: 9.0 })?;
    world.add_value(template, Velocity { dx: 1.0, dy: -1.0 })?;

    let clone = world.create_from(template)?;
    assert_ne!(clone, template);
    assert_eq!(
        world.container_of(clone)?.archetype,
        world.container_of(template)?.archetype
    );
    assert_eq!(*world.get::<Position>(clone)?, Position { x: 7.0, y: 8.0, z: 9.0 });
    assert_eq!(*world.get::<Velocity>(clone)?, Velocity { dx: 1.0, dy: -1.0 });

    // The clone owns its values.
    world.set(clone, Position { x: 0.0, y: 0.0, z: 0.0 })?;
    assert_eq!(*world.get::<Position>(template)?, Position { x: 7.0, y: 8.0, z: 9.0 });
    Ok(())
}

#[test]
fn entity_accounting_matches_table_length() -> EcsResult<()> {
    let mut world = World::new();

    let entities: Vec<_> = (0..64).map(|_| world.create().unwrap()).collect();
    for e in entities.iter().step_by(3) {
        world.delete(*e)?;
    }

    // Live entities plus free-list entries always cover the whole table.
    let diag = world.diag();
    let expected_live = 64 - entities.iter().step_by(3).count() as u32;
    assert_eq!(diag.entity_count, expected_live);
    assert_eq!(diag.entity_count + diag.free_entity_count, 64);
    Ok(())
}

#[test]
fn set_and_get_mut_update_values() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    world.add::<Position>(e)?;
    assert_eq!(*world.get::<Position>(e)?, Position::default());

    world.set(e, Position { x: 5.0, y: 0.0, z: 0.0 })?;
    world.get_mut::<Position>(e)?.y = 6.0;
    assert_eq!(*world.get::<Position>(e)?, Position { x: 5.0, y: 6.0, z: 0.0 });
    Ok(())
}

#[test]
fn drop_order_runs_component_destructors() -> EcsResult<()> {
    use std::sync::atomic::{AtomicU32, Ordering};

    static DROPS: AtomicU32 = AtomicU32::new(0);

    #[derive(Clone, Default, PartialEq)]
    struct Tracked(u32);

    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }
    }

    {
        let mut world = World::new();
        for _ in 0..10 {
            let e = world.create()?;
            world.add::<Tracked>(e)?;
        }
        let e = world.create()?;
        world.add::<Tracked>(e)?;
        world.delete(e)?;
    }

    // 10 live at teardown + 1 deleted explicitly. Clones made during
    // set/get do not exist for this type.
    assert_eq!(DROPS.load(Ordering::Relaxed), 11);
    Ok(())
}
