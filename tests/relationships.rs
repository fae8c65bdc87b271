use granite_ecs::{EcsResult, Entity, EntityKind, World};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct TeamColor(u32);

#[test]
fn pair_of_plain_entities_acts_as_a_tag() -> EcsResult<()> {
    let mut world = World::new();

    let likes = world.create()?;
    let alice = world.create()?;
    let bob = world.create()?;

    world.add_pair(bob, likes, alice)?;
    assert!(world.has_id(bob, Entity::pair(likes, alice)));
    assert!(!world.has_id(alice, Entity::pair(likes, alice)));

    world.remove_id(bob, Entity::pair(likes, alice))?;
    assert!(!world.has_id(bob, Entity::pair(likes, alice)));
    Ok(())
}

#[test]
fn pair_handles_preserve_both_sides() {
    let rel = Entity::new(12, 3);
    let tgt = Entity::new(34, 7);
    let pair = Entity::pair(rel, tgt);

    assert!(pair.is_pair());
    assert_eq!(pair.rel_index(), 12);
    assert_eq!(pair.tgt_index(), 34);
    assert_eq!(pair.rel_as_component(), None);

    let comp = Entity::component(5, EntityKind::Unique);
    let mixed = Entity::pair(comp, tgt);
    assert_eq!(mixed.rel_as_component(), Some(comp));
    assert_eq!(mixed.tgt_as_component(), None);
}

#[test]
fn unique_component_is_shared_per_chunk() -> EcsResult<()> {
    let mut world = World::new();
    world.register_unique::<TeamColor>();

    let a = world.create()?;
    world.add::<Position>(a)?;
    world.add::<TeamColor>(a)?;
    let b = world.create_from(a)?;

    // Both entities share one chunk, hence one TeamColor value.
    assert_eq!(world.container_of(a)?.chunk, world.container_of(b)?.chunk);
    world.set(a, TeamColor(0xff0000))?;
    assert_eq!(*world.get::<TeamColor>(b)?, TeamColor(0xff0000));
    Ok(())
}

#[test]
fn unique_components_sort_after_generic_ones() -> EcsResult<()> {
    let mut world = World::new();
    let color = world.register_unique::<TeamColor>();
    let position = world.register_component::<Position>();

    let e = world.create()?;
    world.add::<TeamColor>(e)?;
    world.add::<Position>(e)?;

    let archetype = world.archetype_of(e)?;
    assert_eq!(archetype.ids(), &[position, color]);
    assert_eq!(archetype.props().gen_entities, 1);
    Ok(())
}

#[test]
fn entity_container_tracks_moves() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    let root_location = world.container_of(e)?;
    assert_eq!(root_location.archetype, 0);

    world.add::<Position>(e)?;
    let moved = world.container_of(e)?;
    assert_ne!(moved.archetype, root_location.archetype);

    // The chunk's entity array and the table agree at every step.
    let archetype = world.archetype_of(e)?;
    let chunk = &archetype.chunks()[moved.chunk as usize];
    assert_eq!(chunk.entity_at(moved.row), e);
    Ok(())
}
