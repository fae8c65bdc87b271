//! # World: entity table, archetype registry, structural mutation
//!
//! The world owns every piece of the engine: the chunk allocator, the
//! component cache, the sparse entity table, the dense archetype list, and
//! the registered queries.
//!
//! ## Structural mutation
//!
//! Adding or removing a component moves the entity's row between chunks of
//! two archetypes. The destination is found in O(1) through the source
//! archetype's graph edge when one exists; otherwise the sorted target set
//! is hashed, looked up in the registry (creating the archetype on demand),
//! and the edge is recorded for the next transition. The root archetype
//! stores no add edges and always goes through the hash lookup.
//!
//! ## Entity lifecycle
//!
//! Entities are created into the root archetype and recycled through an
//! intrusive free-list threaded through the entity table. Deletion bumps
//! the slot's generation so stale handles are rejected.
//!
//! ## Garbage collection
//!
//! Emptied chunks and chunkless archetypes enter a bounded death countdown;
//! [`World::gc`] advances the countdowns and frees whatever is still empty
//! when they expire. Reclaimed chunks and archetypes are revived instead.
//!
//! ## Concurrency
//!
//! All mutation requires `&mut World` and is strictly ordered on one
//! thread. Shared references permit read-only iteration, which queries may
//! fan out across threads.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::engine::allocator::{ChunkAllocator, ChunkAllocatorStats};
use crate::engine::archetype::Archetype;
use crate::engine::component::ComponentCache;
use crate::engine::error::{
    CapacityError, DuplicateComponentError, EcsResult, InvalidEntityError, MissingComponentError,
    StructuralChangeError,
};
use crate::engine::query::{QueryBuilder, QueryState};
use crate::engine::types::{
    bump_version, sort_component_ids, ArchetypeId, ChunkIndex, Entity, EntityGen, EntityIndex,
    EntityKind, LookupHash, Row, Version, ARCHETYPE_ID_BAD, CHUNK_INDEX_BAD, ENTITY_GEN_MASK,
    ENTITY_INDEX_BAD,
};

/// Entry in the sparse entity table, indexed by entity id.
///
/// Live entries point at the entity's row; dead entries carry the free-list
/// link and an already-bumped generation.
#[derive(Clone, Copy, Debug)]
pub struct EntityContainer {
    /// Archetype holding the entity; `ARCHETYPE_ID_BAD` when dead.
    pub archetype: ArchetypeId,
    /// Chunk index within the archetype.
    pub chunk: ChunkIndex,
    /// Row within the chunk.
    pub row: Row,
    /// Generation a live handle must match.
    pub gen: EntityGen,
    /// Set while the entity sits in its chunk's disabled prefix.
    pub disabled: bool,
    /// Intrusive free-list link, meaningful only when dead.
    pub(crate) next_free: EntityIndex,
}

impl EntityContainer {
    fn tombstone(gen: EntityGen, next_free: EntityIndex) -> Self {
        Self {
            archetype: ARCHETYPE_ID_BAD,
            chunk: CHUNK_INDEX_BAD,
            row: 0,
            gen,
            disabled: false,
            next_free,
        }
    }
}

/// Numeric counters exposed for debugging and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorldDiag {
    /// Live entities.
    pub entity_count: u32,
    /// Recycled ids waiting on the free-list.
    pub free_entity_count: u32,
    /// Live archetypes (dead slots excluded).
    pub archetype_count: u32,
    /// Chunks across all live archetypes.
    pub chunk_count: u32,
    /// Current world version.
    pub world_version: Version,
    /// Archetype-set hash lookups performed so far; graph-edge hits do not
    /// count.
    pub archetype_hash_lookups: u64,
    /// Allocator usage.
    pub alloc: ChunkAllocatorStats,
}

/// The ECS data store.
pub struct World {
    pub(crate) allocator: ChunkAllocator,
    pub(crate) cache: ComponentCache,

    pub(crate) entities: Vec<EntityContainer>,
    next_free_entity: EntityIndex,
    free_entity_count: u32,

    /// Dense archetype storage; ids are slot indices and are never reused,
    /// so incremental query matching can rely on monotonically growing ids.
    pub(crate) archetypes: Vec<Option<Archetype>>,
    /// Lookup-hash buckets over live archetypes.
    archetype_map: HashMap<LookupHash, Vec<ArchetypeId>>,
    /// For every component entity (or pair), the archetypes containing it,
    /// in creation order.
    pub(crate) entity_to_archetypes: HashMap<Entity, Vec<ArchetypeId>>,

    pub(crate) queries: Vec<QueryState>,

    pub(crate) world_version: Version,
    hash_lookups: u64,
}

const ROOT: ArchetypeId = 0;

fn hash_ids(ids: &[Entity]) -> LookupHash {
    let mut hasher = DefaultHasher::new();
    for id in ids {
        id.0.hash(&mut hasher);
    }
    hasher.finish()
}

/// Borrows two distinct archetypes mutably out of the dense list.
fn archetype_pair_mut(
    archetypes: &mut [Option<Archetype>],
    a: ArchetypeId,
    b: ArchetypeId,
) -> (&mut Archetype, &mut Archetype) {
    assert!(a != b, "source and destination archetype must differ");
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let (head, tail) = archetypes.split_at_mut(hi as usize);
    let lo_ref = head[lo as usize].as_mut().expect("live archetype");
    let hi_ref = tail[0].as_mut().expect("live archetype");
    if a < b { (lo_ref, hi_ref) } else { (hi_ref, lo_ref) }
}

impl World {
    /// Creates an empty world holding only the root archetype.
    pub fn new() -> Self {
        let cache = ComponentCache::new();
        let root = Archetype::create(&cache, ROOT, hash_ids(&[]), Vec::new())
            .expect("root archetype layout always fits");

        let mut archetype_map = HashMap::new();
        archetype_map.insert(root.lookup_hash(), vec![ROOT]);

        Self {
            allocator: ChunkAllocator::new(),
            cache,
            entities: Vec::new(),
            next_free_entity: ENTITY_INDEX_BAD,
            free_entity_count: 0,
            archetypes: vec![Some(root)],
            archetype_map,
            entity_to_archetypes: HashMap::new(),
            queries: Vec::new(),
            world_version: 1,
            hash_lookups: 0,
        }
    }

    // ── component registration ──────────────────────────────────────────────

    /// Registers `T` as a generic (per-entity) component and returns its
    /// component entity. Idempotent.
    pub fn register_component<T>(&mut self) -> Entity
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        self.cache.get_or_register::<T>(EntityKind::Generic)
    }

    /// Registers `T` as a unique (per-chunk) component and returns its
    /// component entity. Idempotent.
    pub fn register_unique<T>(&mut self) -> Entity
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        self.cache.get_or_register::<T>(EntityKind::Unique)
    }

    /// Read-only access to the component cache.
    pub fn components(&self) -> &ComponentCache {
        &self.cache
    }

    // ── entity table ────────────────────────────────────────────────────────

    fn allocate_handle(&mut self) -> EcsResult<Entity> {
        if self.next_free_entity != ENTITY_INDEX_BAD {
            let index = self.next_free_entity;
            let container = &mut self.entities[index as usize];
            self.next_free_entity = container.next_free;
            container.next_free = ENTITY_INDEX_BAD;
            self.free_entity_count -= 1;
            return Ok(Entity::new(index, container.gen));
        }

        let index = self.entities.len() as EntityIndex;
        if index >= ENTITY_INDEX_BAD {
            return Err(CapacityError {
                what: "entity ids",
                requested: index as u64 + 1,
                cap: ENTITY_INDEX_BAD as u64,
            }
            .into());
        }
        self.entities.push(EntityContainer::tombstone(0, ENTITY_INDEX_BAD));
        Ok(Entity::new(index, 0))
    }

    fn container(&self, entity: Entity) -> EcsResult<&EntityContainer> {
        if entity.is_component() || entity.is_pair() {
            return Err(InvalidEntityError { entity, current_gen: None }.into());
        }
        let container = self
            .entities
            .get(entity.index() as usize)
            .ok_or(InvalidEntityError { entity, current_gen: None })?;
        if container.archetype == ARCHETYPE_ID_BAD || container.gen != entity.gen() {
            return Err(InvalidEntityError { entity, current_gen: Some(container.gen) }.into());
        }
        Ok(container)
    }

    fn ensure_unlocked(&self, entity: Entity) -> EcsResult<()> {
        let container = self.container(entity)?;
        let chunk = &self.archetypes[container.archetype as usize]
            .as_ref()
            .expect("live archetype")
            .chunks()[container.chunk as usize];
        if chunk.has_structural_lock() {
            return Err(StructuralChangeError { entity }.into());
        }
        Ok(())
    }

    /// Returns `true` if `entity` refers to a live entity.
    pub fn is_valid(&self, entity: Entity) -> bool {
        self.container(entity).is_ok()
    }

    /// Returns a copy of the entity's table entry.
    pub fn container_of(&self, entity: Entity) -> EcsResult<EntityContainer> {
        self.container(entity).copied()
    }

    /// Borrows the archetype currently holding `entity`.
    pub fn archetype_of(&self, entity: Entity) -> EcsResult<&Archetype> {
        let container = self.container(entity)?;
        Ok(self.archetypes[container.archetype as usize].as_ref().expect("live archetype"))
    }

    /// Returns `true` if `entity` is live and enabled.
    pub fn is_enabled(&self, entity: Entity) -> bool {
        self.container(entity).map(|c| !c.disabled).unwrap_or(false)
    }

    /// Rebuilds the current handle for a raw entity index, if live.
    pub fn entity_from_index(&self, index: EntityIndex) -> Option<Entity> {
        let container = self.entities.get(index as usize)?;
        if container.archetype == ARCHETYPE_ID_BAD {
            return None;
        }
        Some(Entity::new(index, container.gen))
    }

    // ── entity lifecycle ────────────────────────────────────────────────────

    /// Creates a new empty entity in the root archetype.
    pub fn create(&mut self) -> EcsResult<Entity> {
        let entity = self.allocate_handle()?;
        bump_version(&mut self.world_version);

        let root = self.archetypes[ROOT as usize].as_mut().expect("root is immortal");
        let chunk_idx = root.find_or_create_chunk(&mut self.allocator, self.world_version)?;
        let row = root.chunks[chunk_idx as usize].add_entity(entity, self.world_version);

        self.entities[entity.index() as usize] = EntityContainer {
            archetype: ROOT,
            chunk: chunk_idx,
            row,
            gen: entity.gen(),
            disabled: false,
            next_free: ENTITY_INDEX_BAD,
        };
        Ok(entity)
    }

    /// Creates `count` empty entities, scanning chunks with a bulk cursor
    /// instead of restarting the free-chunk search per entity.
    pub fn create_many(&mut self, count: u32) -> EcsResult<Vec<Entity>> {
        let mut out = Vec::with_capacity(count as usize);
        let mut cursor: ChunkIndex = 0;
        for _ in 0..count {
            let entity = self.allocate_handle()?;
            bump_version(&mut self.world_version);

            let root = self.archetypes[ROOT as usize].as_mut().expect("root is immortal");
            let chunk_idx =
                root.find_or_create_chunk_bulk(&mut cursor, &mut self.allocator, self.world_version)?;
            let row = root.chunks[chunk_idx as usize].add_entity(entity, self.world_version);

            self.entities[entity.index() as usize] = EntityContainer {
                archetype: ROOT,
                chunk: chunk_idx,
                row,
                gen: entity.gen(),
                disabled: false,
                next_free: ENTITY_INDEX_BAD,
            };
            out.push(entity);
        }
        Ok(out)
    }

    /// Creates a new entity by cloning all generic components of
    /// `template`.
    pub fn create_from(&mut self, template: Entity) -> EcsResult<Entity> {
        let src = *self.container(template)?;
        let entity = self.allocate_handle()?;
        bump_version(&mut self.world_version);

        let archetype = self.archetypes[src.archetype as usize].as_mut().expect("live archetype");
        let chunk_idx = archetype.find_or_create_chunk(&mut self.allocator, self.world_version)?;
        let row = archetype.chunks[chunk_idx as usize].add_entity(entity, self.world_version);

        // Re-read the template's location: its row cannot have moved, but
        // the borrow above ended.
        let archetype = self.archetypes[src.archetype as usize].as_mut().expect("live archetype");
        archetype.copy_row((src.chunk, src.row), (chunk_idx, row));

        self.entities[entity.index() as usize] = EntityContainer {
            archetype: src.archetype,
            chunk: chunk_idx,
            row,
            gen: entity.gen(),
            disabled: false,
            next_free: ENTITY_INDEX_BAD,
        };
        Ok(entity)
    }

    /// Destroys an entity along with all its component data.
    ///
    /// Deleting through a stale handle is a no-op.
    pub fn delete(&mut self, entity: Entity) -> EcsResult<()> {
        let Ok(container) = self.container(entity).map(|c| *c) else {
            return Ok(());
        };
        self.ensure_unlocked(entity)?;
        bump_version(&mut self.world_version);

        let World { archetypes, entities, .. } = self;
        let archetype = archetypes[container.archetype as usize].as_mut().expect("live archetype");
        let emptied = archetype.remove_row(container.chunk, container.row, true, entities);
        if emptied {
            let chunk = &mut archetype.chunks[container.chunk as usize];
            if !chunk.dying() {
                chunk.prepare_to_die();
            }
        }

        let index = entity.index();
        let gen = (entity.gen() + 1) & ENTITY_GEN_MASK as EntityGen;
        self.entities[index as usize] = EntityContainer::tombstone(gen, self.next_free_entity);
        self.next_free_entity = index;
        self.free_entity_count += 1;
        Ok(())
    }

    /// Enables or disables an entity by swapping its row across the
    /// chunk's partition boundary. Enabling an enabled entity (or
    /// disabling a disabled one) is a no-op.
    pub fn enable(&mut self, entity: Entity, enabled: bool) -> EcsResult<()> {
        let container = *self.container(entity)?;
        self.ensure_unlocked(entity)?;
        if container.disabled != enabled {
            return Ok(());
        }

        let World { archetypes, entities, .. } = self;
        let archetype = archetypes[container.archetype as usize].as_mut().expect("live archetype");
        archetype.enable_row(container.chunk, container.row, enabled, entities);
        Ok(())
    }

    // ── archetype registry ──────────────────────────────────────────────────

    /// Finds or creates the archetype for a sorted, deduplicated id set.
    ///
    /// Counts one hash lookup; graph-edge transitions bypass this entirely.
    pub(crate) fn archetype_by_ids(&mut self, ids: &[Entity]) -> EcsResult<ArchetypeId> {
        self.hash_lookups += 1;
        let hash = hash_ids(ids);

        if let Some(bucket) = self.archetype_map.get(&hash) {
            for &aid in bucket {
                let archetype = self.archetypes[aid as usize].as_ref().expect("registered archetype");
                if archetype.ids() == ids {
                    return Ok(aid);
                }
            }
        }

        let aid = self.archetypes.len() as ArchetypeId;
        let archetype = Archetype::create(&self.cache, aid, hash, ids.to_vec())?;
        self.archetype_map.entry(hash).or_default().push(aid);
        for &id in archetype.ids() {
            self.entity_to_archetypes.entry(id).or_default().push(aid);
        }
        self.archetypes.push(Some(archetype));
        Ok(aid)
    }

    /// Destination archetype for adding `component` to an entity of
    /// `src`, recording graph edges for the next transition.
    fn target_for_add(&mut self, src: ArchetypeId, component: Entity) -> EcsResult<ArchetypeId> {
        if src != ROOT {
            let archetype = self.archetypes[src as usize].as_ref().expect("live archetype");
            if let Some(edge) = archetype.graph.find_edge_right(component) {
                return Ok(edge.id);
            }
        }

        let src_arch = self.archetypes[src as usize].as_ref().expect("live archetype");
        let mut ids: Vec<Entity> = src_arch.ids().to_vec();
        ids.push(component);
        sort_component_ids(&mut ids);

        let dst = self.archetype_by_ids(&ids)?;

        // The root stores no add edges: one per registered component would
        // be pure memory waste.
        let (src_hash, dst_hash) = (
            self.archetypes[src as usize].as_ref().expect("live archetype").lookup_hash(),
            self.archetypes[dst as usize].as_ref().expect("live archetype").lookup_hash(),
        );
        if src != ROOT {
            let src_arch = self.archetypes[src as usize].as_mut().expect("live archetype");
            if src_arch.graph.find_edge_right(component).is_none() {
                src_arch.graph.add_edge_right(component, dst, dst_hash);
            }
        }
        let dst_arch = self.archetypes[dst as usize].as_mut().expect("live archetype");
        if dst_arch.graph.find_edge_left(component).is_none() {
            dst_arch.graph.add_edge_left(component, src, src_hash);
        }
        Ok(dst)
    }

    /// Destination archetype for removing `component`, recording the
    /// inverse edges.
    fn target_for_remove(&mut self, src: ArchetypeId, component: Entity) -> EcsResult<ArchetypeId> {
        {
            let archetype = self.archetypes[src as usize].as_ref().expect("live archetype");
            if let Some(edge) = archetype.graph.find_edge_left(component) {
                return Ok(edge.id);
            }
        }

        let src_arch = self.archetypes[src as usize].as_ref().expect("live archetype");
        let ids: Vec<Entity> = src_arch.ids().iter().copied().filter(|&e| e != component).collect();

        let dst = self.archetype_by_ids(&ids)?;

        let (src_hash, dst_hash) = (
            self.archetypes[src as usize].as_ref().expect("live archetype").lookup_hash(),
            self.archetypes[dst as usize].as_ref().expect("live archetype").lookup_hash(),
        );
        // dst + component = src, so dst gains the add edge back to src.
        if dst != ROOT {
            let dst_arch = self.archetypes[dst as usize].as_mut().expect("live archetype");
            if dst_arch.graph.find_edge_right(component).is_none() {
                dst_arch.graph.add_edge_right(component, src, src_hash);
            }
        }
        let src_arch = self.archetypes[src as usize].as_mut().expect("live archetype");
        if src_arch.graph.find_edge_left(component).is_none() {
            src_arch.graph.add_edge_left(component, dst, dst_hash);
        }
        Ok(dst)
    }

    // ── structural mutation ─────────────────────────────────────────────────

    /// Moves an entity's row into `dst`, transferring the component
    /// intersection and dropping source-only values.
    fn move_entity(&mut self, entity: Entity, dst: ArchetypeId) -> EcsResult<()> {
        let src = *self.container(entity)?;
        debug_assert_ne!(src.archetype, dst);

        let dst_chunk;
        let dst_row;
        {
            let archetype = self.archetypes[dst as usize].as_mut().expect("live archetype");
            dst_chunk = archetype.find_or_create_chunk(&mut self.allocator, self.world_version)?;
            dst_row = archetype.chunks[dst_chunk as usize].add_entity(entity, self.world_version);
        }

        let World { archetypes, entities, .. } = self;
        let (src_arch, dst_arch) = archetype_pair_mut(archetypes, src.archetype, dst);

        // Both id lists share the same ordering, so the intersection is a
        // linear merge. The lists are copied out so value operations below
        // can borrow the archetypes freely.
        let src_gen = src_arch.props().gen_entities as usize;
        let dst_gen = dst_arch.props().gen_entities as usize;
        let src_ids: Vec<Entity> = src_arch.ids().to_vec();
        let dst_ids: Vec<Entity> = dst_arch.ids().to_vec();
        let mut i = 0;
        let mut j = 0;
        while i < src_gen && j < dst_gen {
            if src_ids[i] == dst_ids[j] {
                if let Some(desc) = src_arch.record_desc(i) {
                    // SAFETY: source row initialized, destination row fresh.
                    unsafe {
                        (desc.move_)(
                            src_arch.comp_ptr(src.chunk, i, src.row),
                            dst_arch.comp_ptr(dst_chunk, j, dst_row),
                        )
                    };
                }
                i += 1;
                j += 1;
            } else if crate::engine::types::id_sort_key(src_ids[i])
                < crate::engine::types::id_sort_key(dst_ids[j])
            {
                src_arch.destruct_value(src.chunk, i, src.row);
                i += 1;
            } else {
                j += 1;
            }
        }
        while i < src_gen {
            src_arch.destruct_value(src.chunk, i, src.row);
            i += 1;
        }

        // The moved-out source row is backfilled without destructors.
        let emptied = src_arch.remove_row(src.chunk, src.row, false, entities);
        if emptied {
            let chunk = &mut src_arch.chunks[src.chunk as usize];
            if !chunk.dying() {
                chunk.prepare_to_die();
            }
        }

        entities[entity.index() as usize] = EntityContainer {
            archetype: dst,
            chunk: dst_chunk,
            row: dst_row,
            gen: entity.gen(),
            disabled: false,
            next_free: ENTITY_INDEX_BAD,
        };
        Ok(())
    }

    /// Adds the component identified by `component` to an entity.
    ///
    /// Accepts component entities, pairs, and plain entities used as tags.
    /// The new value is default-constructed when the id resolves to a
    /// sized component.
    pub fn add_id(&mut self, entity: Entity, component: Entity) -> EcsResult<()> {
        let container = *self.container(entity)?;
        self.ensure_unlocked(entity)?;

        let src_arch = self.archetypes[container.archetype as usize].as_ref().expect("live archetype");
        if src_arch.has(component) {
            return Err(DuplicateComponentError { entity, component }.into());
        }

        bump_version(&mut self.world_version);
        let dst = self.target_for_add(container.archetype, component)?;
        self.move_entity(entity, dst)?;

        // Construct the newly gained slot.
        let moved = self.entities[entity.index() as usize];
        let archetype = self.archetypes[dst as usize].as_mut().expect("live archetype");
        if let Some(comp_idx) = archetype.comp_idx(component) {
            if comp_idx < archetype.props().gen_entities as usize {
                if let Some(desc) = archetype.record_desc(comp_idx) {
                    // SAFETY: the slot was left uninitialized by move_entity.
                    unsafe { (desc.ctor)(archetype.comp_ptr(moved.chunk, comp_idx, moved.row), 1) };
                }
            }
        }
        Ok(())
    }

    /// Adds component `T` with its default value.
    pub fn add<T>(&mut self, entity: Entity) -> EcsResult<()>
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        let component = self.register_component_auto::<T>();
        self.add_id(entity, component)
    }

    /// Adds component `T` initialized to `value`.
    pub fn add_value<T>(&mut self, entity: Entity, value: T) -> EcsResult<()>
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        let component = self.register_component_auto::<T>();
        self.add_id(entity, component)?;
        self.set(entity, value)
    }

    /// Adds the relationship pair `(rel, tgt)` to an entity.
    pub fn add_pair(&mut self, entity: Entity, rel: Entity, tgt: Entity) -> EcsResult<()> {
        self.add_id(entity, Entity::pair(rel, tgt))
    }

    /// States that `entity` inherits from `base` via the builtin `Is`
    /// relation.
    pub fn add_is(&mut self, entity: Entity, base: Entity) -> EcsResult<()> {
        self.add_pair(entity, crate::engine::types::IS, base)
    }

    fn register_component_auto<T>(&mut self) -> Entity
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        // Respect an earlier unique registration; first sight defaults to
        // generic storage.
        if let Some(existing) = self.cache.entity_of::<T>() {
            existing
        } else {
            self.cache.get_or_register::<T>(EntityKind::Generic)
        }
    }

    /// Removes the component identified by `component` from an entity.
    pub fn remove_id(&mut self, entity: Entity, component: Entity) -> EcsResult<()> {
        let container = *self.container(entity)?;
        self.ensure_unlocked(entity)?;

        let src_arch = self.archetypes[container.archetype as usize].as_ref().expect("live archetype");
        if !src_arch.has(component) {
            return Err(MissingComponentError { entity, component }.into());
        }

        bump_version(&mut self.world_version);
        let dst = self.target_for_remove(container.archetype, component)?;
        self.move_entity(entity, dst)
    }

    /// Removes component `T` from an entity.
    pub fn remove<T: 'static>(&mut self, entity: Entity) -> EcsResult<()> {
        let component = self.component_entity_of::<T>(entity)?;
        self.remove_id(entity, component)
    }

    fn component_entity_of<T: 'static>(&self, entity: Entity) -> EcsResult<Entity> {
        self.cache.entity_of::<T>().ok_or_else(|| {
            MissingComponentError {
                entity,
                component: Entity::component(ENTITY_INDEX_BAD, EntityKind::Generic),
            }
            .into()
        })
    }

    // ── component data access ───────────────────────────────────────────────

    fn locate<T: 'static>(&self, entity: Entity) -> EcsResult<(ArchetypeId, ChunkIndex, Row, usize)> {
        let container = self.container(entity)?;
        let component = self.component_entity_of::<T>(entity)?;
        let archetype = self.archetypes[container.archetype as usize].as_ref().expect("live archetype");
        let comp_idx = archetype
            .comp_idx(component)
            .ok_or(MissingComponentError { entity, component })?;
        Ok((container.archetype, container.chunk, container.row, comp_idx))
    }

    /// Reads component `T` of an entity.
    pub fn get<T: 'static>(&self, entity: Entity) -> EcsResult<&T> {
        let (aid, chunk, row, comp_idx) = self.locate::<T>(entity)?;
        let archetype = self.archetypes[aid as usize].as_ref().expect("live archetype");
        let ptr = if comp_idx < archetype.props().gen_entities as usize {
            archetype.comp_ptr(chunk, comp_idx, row)
        } else {
            archetype.unique_ptr(chunk, comp_idx)
        };
        // SAFETY: comp_idx was resolved through T's descriptor, so the
        // array holds T values; the row is initialized.
        Ok(unsafe { &*ptr.cast::<T>() })
    }

    /// Mutably borrows component `T` of an entity, recording the write in
    /// the chunk's change versions.
    pub fn get_mut<T: 'static>(&mut self, entity: Entity) -> EcsResult<&mut T> {
        let (aid, chunk, row, comp_idx) = self.locate::<T>(entity)?;
        bump_version(&mut self.world_version);
        let version = self.world_version;
        let archetype = self.archetypes[aid as usize].as_mut().expect("live archetype");
        archetype.chunks[chunk as usize].touch_component(comp_idx, version);
        let ptr = if comp_idx < archetype.props().gen_entities as usize {
            archetype.comp_ptr(chunk, comp_idx, row)
        } else {
            archetype.unique_ptr(chunk, comp_idx)
        };
        // SAFETY: as in get(); &mut self guarantees exclusivity.
        Ok(unsafe { &mut *ptr.cast::<T>() })
    }

    /// Overwrites component `T` of an entity and records the write.
    pub fn set<T: 'static>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        *self.get_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Returns `true` if the entity currently has component `T`.
    pub fn has<T: 'static>(&self, entity: Entity) -> bool {
        self.locate::<T>(entity).is_ok()
    }

    /// Returns `true` if the entity's archetype contains `component`.
    pub fn has_id(&self, entity: Entity, component: Entity) -> bool {
        self.container(entity)
            .map(|c| {
                self.archetypes[c.archetype as usize]
                    .as_ref()
                    .expect("live archetype")
                    .has(component)
            })
            .unwrap_or(false)
    }

    // ── relationships ───────────────────────────────────────────────────────

    /// Single-hop `Is` check: does `entity`'s archetype carry the pair
    /// `(Is, base)`?
    pub fn is_base_of(&self, entity: Entity, base: Entity) -> bool {
        self.is_base_of_index(entity, base.index())
    }

    pub(crate) fn is_base_of_index(&self, entity: Entity, base_index: EntityIndex) -> bool {
        let Ok(container) = self.container(entity) else { return false };
        let archetype = self.archetypes[container.archetype as usize].as_ref().expect("live archetype");
        archetype
            .pairs_is()
            .iter()
            .any(|&idx| archetype.ids()[idx as usize].tgt_index() == base_index)
    }

    // ── maintenance ─────────────────────────────────────────────────────────

    /// Compacts semi-empty chunks across all archetypes, moving at most
    /// `budget` entities.
    pub fn defragment(&mut self, mut budget: u32) {
        let World { archetypes, entities, world_version, .. } = self;
        for slot in archetypes.iter_mut() {
            if budget == 0 {
                break;
            }
            if let Some(archetype) = slot {
                archetype.defragment(&mut budget, *world_version, entities);
            }
        }
    }

    /// Advances death countdowns: frees chunks that stayed empty through
    /// their lifespan, then archetypes that stayed chunkless.
    pub fn gc(&mut self) {
        // Chunk pass.
        for aid in 0..self.archetypes.len() {
            let World { archetypes, entities, allocator, .. } = self;
            let Some(archetype) = archetypes[aid].as_mut() else { continue };

            let mut to_free: Vec<ChunkIndex> = Vec::new();
            for (ci, chunk) in archetype.chunks.iter_mut().enumerate() {
                if !chunk.dying() {
                    continue;
                }
                if !chunk.is_empty() {
                    chunk.revive();
                    continue;
                }
                if !chunk.progress_death() {
                    to_free.push(ci as ChunkIndex);
                }
            }
            // Free in descending index order so the swap-remove never
            // disturbs a pending index.
            for &ci in to_free.iter().rev() {
                archetype.free_chunk(ci, allocator, entities);
            }
        }

        // Archetype pass. The root is immortal.
        let mut dead: Vec<ArchetypeId> = Vec::new();
        for aid in 1..self.archetypes.len() {
            let Some(archetype) = self.archetypes[aid].as_mut() else { continue };
            if !archetype.chunks.is_empty() {
                if archetype.dying() {
                    archetype.revive();
                }
                continue;
            }
            if !archetype.dying() {
                archetype.start_dying();
            } else if !archetype.progress_death() {
                dead.push(aid as ArchetypeId);
            }
        }
        for aid in dead {
            self.free_archetype(aid);
        }

        self.allocator.flush();
    }

    /// Unregisters and drops a dead archetype, fixing every structure that
    /// referenced it.
    fn free_archetype(&mut self, aid: ArchetypeId) {
        let mut archetype = self.archetypes[aid as usize].take().expect("live archetype");
        archetype.die();
        debug_assert!(archetype.chunks.is_empty());

        // Symmetric edge cleanup through the dying archetype's own maps.
        let left: Vec<_> = archetype.graph.edges_left().collect();
        let right: Vec<_> = archetype.graph.edges_right().collect();
        for (e, edge) in left {
            if let Some(Some(parent)) = self.archetypes.get_mut(edge.id as usize) {
                parent.graph.del_edge_right(e);
            }
        }
        for (e, edge) in right {
            if let Some(Some(child)) = self.archetypes.get_mut(edge.id as usize) {
                child.graph.del_edge_left(e);
            }
        }

        let hash = archetype.lookup_hash();
        let bucket_empty = self
            .archetype_map
            .get_mut(&hash)
            .map(|bucket| {
                bucket.retain(|&id| id != aid);
                bucket.is_empty()
            })
            .unwrap_or(false);
        if bucket_empty {
            self.archetype_map.remove(&hash);
        }

        for &id in archetype.ids() {
            let list_empty = self
                .entity_to_archetypes
                .get_mut(&id)
                .map(|list| {
                    list.retain(|&a| a != aid);
                    list.is_empty()
                })
                .unwrap_or(false);
            if list_empty {
                self.entity_to_archetypes.remove(&id);
            }
        }

        for query in &mut self.queries {
            query.info.remove_archetype(aid);
        }
    }

    // ── queries ─────────────────────────────────────────────────────────────

    /// Starts building a query against this world.
    pub fn query(&mut self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    // ── observation ─────────────────────────────────────────────────────────

    /// Current world version; bumped on every structural change and every
    /// mutable component access.
    pub fn world_version(&self) -> Version {
        self.world_version
    }

    /// Collects numeric counters and logs a diagnostic dump of the world's
    /// archetypes.
    pub fn diag(&self) -> WorldDiag {
        let mut diag = WorldDiag {
            entity_count: self.entities.len() as u32 - self.free_entity_count,
            free_entity_count: self.free_entity_count,
            world_version: self.world_version,
            archetype_hash_lookups: self.hash_lookups,
            alloc: self.allocator.stats(),
            ..Default::default()
        };

        for archetype in self.archetypes.iter().flatten() {
            diag.archetype_count += 1;
            diag.chunk_count += archetype.chunks().len() as u32;

            log::debug!(
                "archetype aid:{} hash:{:016x} comps:{} chunks:{} entities:{}/{} edges:{}",
                archetype.id(),
                archetype.lookup_hash(),
                archetype.ids().len(),
                archetype.chunks().len(),
                archetype.entity_count(),
                archetype.props().capacity,
                archetype.graph.edge_count(),
            );
            for chunk in archetype.chunks() {
                log::trace!(
                    "  chunk #{:04} entities:{}/{} disabled:{} lifespan:{}",
                    chunk.index(),
                    chunk.count(),
                    chunk.capacity(),
                    chunk.first_enabled_row(),
                    if chunk.dying() { 1 } else { 0 },
                );
            }
        }

        log::info!(
            "world v{}: {} entities ({} free), {} archetypes, {} chunks, {} B in {} slabs",
            diag.world_version,
            diag.entity_count,
            diag.free_entity_count,
            diag.archetype_count,
            diag.chunk_count,
            diag.alloc.allocated_bytes,
            diag.alloc.slab_count,
        );
        diag
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // Free chunks through their archetypes so component destructors
        // run, then hand every slab back and check for leaks.
        let World { archetypes, entities, allocator, .. } = self;
        for slot in archetypes.iter_mut() {
            let Some(archetype) = slot else { continue };
            while !archetype.chunks.is_empty() {
                let last = (archetype.chunks.len() - 1) as ChunkIndex;
                archetype.free_chunk(last, allocator, entities);
            }
        }
        allocator.flush();

        let stats = allocator.stats();
        if stats.used_bytes != 0 {
            log::warn!("world leaking {} bytes of chunk memory at shutdown", stats.used_bytes);
        }
    }
}
