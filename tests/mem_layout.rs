use std::mem::size_of;

use granite_ecs::engine::types::{CHUNK_HEADER_BYTES, CHUNK_LARGE_BYTES, CHUNK_SMALL_BYTES};
use granite_ecs::{Chunk, ChunkAllocator, ChunkHeader, EcsResult, SizeClass, World};

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

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Wide(u64, u64);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Tag;

#[test]
fn chunk_header_fits_its_reserved_space() {
    assert!(size_of::<ChunkHeader>() <= CHUNK_HEADER_BYTES);
}

#[test]
fn component_arrays_are_aligned_in_every_chunk() -> EcsResult<()> {
    let mut world = World::new();

    let first = world.create()?;
    world.add::<Position>(first)?;
    world.add::<Wide>(first)?;
    world.add::<Velocity>(first)?;

    // Spill into a second chunk so both are checked.
    let capacity = world.archetype_of(first)?.props().capacity as u32;
    for _ in 0..capacity {
        world.create_from(first)?;
    }

    let archetype = world.archetype_of(first)?;
    assert_eq!(archetype.chunks().len(), 2);

    let cache = world.components();
    for chunk in archetype.chunks() {
        for (i, &id) in chunk.comp_ids().iter().enumerate() {
            let desc = cache.descriptor(id);
            let offset = chunk.comp_offsets()[i] as usize;
            // The data area is 64-aligned, so a data-area offset aligned
            // to the component's alignment yields an aligned address.
            assert_eq!(offset % desc.align, 0, "component {} misaligned", desc.name);
        }
    }
    Ok(())
}

#[test]
fn chunk_describes_its_own_layout() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    world.add::<Position>(e)?;
    world.add::<Velocity>(e)?;

    let archetype = world.archetype_of(e)?;
    let chunk = &archetype.chunks()[0];

    assert_eq!(chunk.comp_ids(), archetype.ids());
    assert_eq!(chunk.comp_offsets().len(), archetype.ids().len());
    assert_eq!(chunk.versions().len(), archetype.ids().len());
    assert_eq!(chunk.capacity(), archetype.props().capacity);
    assert!(
        Chunk::total_bytes(archetype.props().chunk_data_bytes)
            <= chunk.size_class().block_bytes()
    );
    Ok(())
}

#[test]
fn entity_only_archetype_fills_a_large_chunk() -> EcsResult<()> {
    let mut world = World::new();

    let e = world.create()?;
    let root = world.archetype_of(e)?;

    // The root archetype stores nothing but entity ids, so its capacity is
    // bounded by the entity array alone.
    let capacity = root.props().capacity as usize;
    assert!(capacity * size_of::<granite_ecs::Entity>() <= CHUNK_LARGE_BYTES - CHUNK_HEADER_BYTES);
    assert!(capacity > 1000);
    Ok(())
}

#[test]
fn tags_occupy_no_bytes() -> EcsResult<()> {
    let mut world = World::new();

    let plain = world.create()?;
    world.add::<Position>(plain)?;
    let with_tag = world.create()?;
    world.add::<Position>(with_tag)?;
    world.add::<Tag>(with_tag)?;

    let plain_arch = world.archetype_of(plain)?;
    let tagged_arch = world.archetype_of(with_tag)?;
    assert_eq!(
        plain_arch.props().capacity,
        tagged_arch.props().capacity,
        "a zero-sized tag must not change chunk capacity"
    );
    Ok(())
}

#[test]
fn allocator_hands_out_aligned_size_classed_blocks() -> EcsResult<()> {
    let mut alloc = ChunkAllocator::new();

    let (small, small_class) = alloc.alloc(5000).map_err(granite_ecs::EcsError::from)?;
    assert_eq!(small_class, SizeClass::Small);
    assert_eq!(small.as_ptr() as usize % CHUNK_SMALL_BYTES, 0);

    let (large, large_class) = alloc.alloc(CHUNK_SMALL_BYTES + 1).map_err(granite_ecs::EcsError::from)?;
    assert_eq!(large_class, SizeClass::Large);
    assert_eq!(large.as_ptr() as usize % CHUNK_LARGE_BYTES, 0);

    let stats = alloc.stats();
    assert_eq!(stats.used_bytes, (CHUNK_SMALL_BYTES + CHUNK_LARGE_BYTES) as u64);
    assert_eq!(stats.slab_count, 2);
    assert!(stats.free_block_count > 0);

    alloc.free(small, small_class);
    alloc.free(large, large_class);
    assert_eq!(alloc.stats().used_bytes, 0);

    // Flush releases the now-empty slabs back to the host.
    alloc.flush();
    let stats = alloc.stats();
    assert_eq!(stats.slab_count, 0);
    assert_eq!(stats.allocated_bytes, 0);
    Ok(())
}

#[test]
fn allocator_reuses_freed_blocks() -> EcsResult<()> {
    let mut alloc = ChunkAllocator::new();

    let (first, class) = alloc.alloc(1024).map_err(granite_ecs::EcsError::from)?;
    alloc.free(first, class);
    let (second, _) = alloc.alloc(1024).map_err(granite_ecs::EcsError::from)?;
    assert_eq!(first, second, "freed blocks are pooled, not returned to the host");

    let stats = alloc.stats();
    assert_eq!(stats.slab_count, 1);
    Ok(())
}

#[test]
fn world_teardown_releases_all_chunk_memory() -> EcsResult<()> {
    let diag;
    {
        let mut world = World::new();
        for i in 0..500 {
            let e = world.create()?;
            world.add_value(e, Position { x: i as f32, y: 0.0, z: 0.0 })?;
            if i % 2 == 0 {
                world.add::<Velocity>(e)?;
            }
        }
        diag = world.diag();
    }
    // diag was captured while alive; the drop itself warns on leaks and
    // cannot be observed from here, so this is a liveness check only.
    assert!(diag.alloc.used_bytes > 0);
    Ok(())
}
