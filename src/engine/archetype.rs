//! # Archetype storage
//!
//! An archetype groups every entity that carries exactly the same sorted
//! set of component entities. It owns:
//!
//! * the resolved per-component layout (descriptor, data-area offset),
//! * a list of [`Chunk`]s sharing that layout,
//! * the [`ArchetypeGraph`] edges towards neighboring archetypes,
//! * its own GC lifespan once it has no chunks left.
//!
//! ## Layout computation
//!
//! `create` solves for the number of entities per chunk: starting from the
//! 16 KiB class it estimates capacity from the component sizes, then
//! iteratively corrects for padding introduced by each component's
//! alignment. If the used bytes land below the midpoint between the two
//! size classes, the layout is re-fit into an 8 KiB chunk so mostly-empty
//! large chunks are avoided. Non-root archetypes additionally clamp
//! capacity so several small archetypes do not monopolize large blocks.
//!
//! ## Concurrency
//!
//! Structural mutation of an archetype is single-threaded (it requires
//! `&mut World`). Shared references permit read-only chunk iteration, which
//! may be fanned out across threads.
//!
//! ## Unsafe code
//!
//! Row-level value operations (construct, drop, move, swap, compare) walk
//! raw chunk pointers using the offsets computed here and the function
//! pointers captured by the component cache. Soundness rests on the layout
//! solver: every offset respects its component's alignment and every array
//! ends before the chunk's data size.

use crate::engine::allocator::{ChunkAllocator, SizeClass};
use crate::engine::chunk::{Chunk, ChunkDataOffsets};
use crate::engine::component::{ComponentCache, ComponentDescriptor};
use crate::engine::error::{CapacityError, EcsResult};
use crate::engine::graph::ArchetypeGraph;
use crate::engine::types::{
    align_up, ArchetypeId, ChunkIndex, Entity, EntityKind, LookupHash, Row, Version,
    CHUNK_LARGE_BYTES, CHUNK_SMALL_BYTES, MAX_ARCHETYPE_LIFESPAN, MAX_CHUNK_ENTITIES,
    MAX_COMPONENTS_PER_ARCHETYPE, NON_ROOT_CHUNK_ENTITY_CAP,
};
use crate::engine::world::EntityContainer;

/// Computed storage properties of an archetype.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArchetypeProps {
    /// Number of entities one chunk of this archetype can hold.
    pub capacity: Row,
    /// Bytes of chunk data a fully utilized chunk occupies.
    pub chunk_data_bytes: u16,
    /// Number of generic (per-entity) components; unique components form
    /// the tail of the id list.
    pub gen_entities: u8,
}

/// One component of an archetype with its resolved descriptor.
///
/// `desc` is `None` for ids that occupy no bytes: data entities used as
/// tags and pairs whose sides are both zero-sized.
#[derive(Clone, Copy)]
pub(crate) struct ComponentRecord {
    pub id: Entity,
    pub desc: Option<ComponentDescriptor>,
}

impl ComponentRecord {
    #[inline]
    pub fn size(&self) -> usize {
        self.desc.map_or(0, |d| d.size)
    }

    #[inline]
    fn align(&self) -> usize {
        self.desc.map_or(1, |d| d.align)
    }
}

/// Resolves the descriptor backing an archetype id.
///
/// For pairs, the side with non-zero size defines the stored type; when
/// both sides are zero-sized the pair is a tag.
fn resolve_record(cache: &ComponentCache, id: Entity) -> ComponentRecord {
    let desc = if id.is_pair() {
        let rel = id.rel_as_component().and_then(|e| cache.find(e)).copied();
        let tgt = id.tgt_as_component().and_then(|e| cache.find(e)).copied();
        let rel_size = rel.map_or(0, |d| d.size);
        let tgt_size = tgt.map_or(0, |d| d.size);
        if rel_size != 0 || tgt_size == 0 { rel } else { tgt }
    } else {
        cache.find(id).copied()
    };
    // Tags store nothing.
    let desc = desc.filter(|d| d.size != 0);
    ComponentRecord { id, desc }
}

/// Walks the component list accumulating aligned offsets and shrinks the
/// entity estimate when the running offset would cross `target`.
///
/// Returns `false` when `max_items` was reduced and the caller must
/// recalculate from the entity array onward.
fn estimate_fit(
    records: &[ComponentRecord],
    count: u32,
    offs: &mut u32,
    max_items: &mut u32,
    target: u32,
) -> bool {
    for record in records {
        let size = record.size() as u32;
        if size == 0 {
            continue;
        }
        let next = align_up(*offs, record.align() as u32) + size * count;
        if next >= target {
            let subtract = (next - target + size) / size;
            debug_assert!(subtract > 0);
            *max_items = max_items.saturating_sub(subtract);
            return false;
        }
        *offs = next;
    }
    true
}

/// Storage and graph node for one unique component composition.
pub struct Archetype {
    id: ArchetypeId,
    lookup_hash: LookupHash,
    props: ArchetypeProps,
    size_class: SizeClass,

    /// Sorted component entities identifying this archetype.
    ids: Vec<Entity>,
    /// Resolved descriptor per id, parallel to `ids`.
    records: Vec<ComponentRecord>,
    /// Data-area offset of each component's array, parallel to `ids`.
    comp_offsets: Vec<u16>,
    /// Offsets of the bookkeeping arrays inside every chunk.
    data_offsets: ChunkDataOffsets,

    /// Chunks owned by this archetype.
    pub(crate) chunks: Vec<Chunk>,
    /// Edges towards neighboring archetypes.
    pub(crate) graph: ArchetypeGraph,

    /// Number of relationship pairs among `ids`.
    pair_count: u8,
    /// Positions of `(Is, _)` pairs in `ids`.
    pairs_is: Vec<u8>,

    lifespan_countdown: u8,
    dead: bool,
}

impl Archetype {
    /// Builds an archetype for the given sorted id list and computes its
    /// chunk layout.
    ///
    /// ## Errors
    /// `CapacityExceeded` when the id list exceeds the per-archetype
    /// component cap or a single entity's components cannot fit one chunk.
    pub(crate) fn create(
        cache: &ComponentCache,
        id: ArchetypeId,
        lookup_hash: LookupHash,
        ids: Vec<Entity>,
    ) -> EcsResult<Archetype> {
        if ids.len() > MAX_COMPONENTS_PER_ARCHETYPE {
            return Err(CapacityError {
                what: "components per archetype",
                requested: ids.len() as u64,
                cap: MAX_COMPONENTS_PER_ARCHETYPE as u64,
            }
            .into());
        }
        debug_assert!(ids.windows(2).all(|w| w[0] != w[1]), "archetype ids must be deduplicated");

        let records: Vec<ComponentRecord> = ids.iter().map(|&e| resolve_record(cache, e)).collect();

        // Unique components form the tail of the sorted id list.
        let mut gen_entities = ids.len();
        while gen_entities > 0 && ids[gen_entities - 1].kind() == EntityKind::Unique {
            gen_entities -= 1;
        }

        let mut pair_count = 0u8;
        let mut pairs_is = Vec::new();
        for (i, e) in ids.iter().enumerate() {
            if !e.is_pair() {
                continue;
            }
            pair_count += 1;
            if e.rel_as_component() == Some(crate::engine::types::IS) {
                pairs_is.push(i as u8);
            }
        }

        let data_offsets = Self::compute_data_offsets(ids.len());

        let (capacity, chunk_data_bytes, comp_offsets) =
            Self::compute_layout(&records, gen_entities, &data_offsets, id == 0)?;

        Ok(Archetype {
            id,
            lookup_hash,
            props: ArchetypeProps {
                capacity: capacity as Row,
                chunk_data_bytes,
                gen_entities: gen_entities as u8,
            },
            size_class: SizeClass::for_bytes(Chunk::total_bytes(chunk_data_bytes)),
            ids,
            records,
            comp_offsets,
            data_offsets,
            chunks: Vec::new(),
            graph: ArchetypeGraph::default(),
            pair_count,
            pairs_is,
            lifespan_countdown: 0,
            dead: false,
        })
    }

    /// Offsets of the version / id / offset / entity arrays for a chunk
    /// holding `n` components.
    fn compute_data_offsets(n: usize) -> ChunkDataOffsets {
        if n == 0 {
            return ChunkDataOffsets::default();
        }
        let n = n as u32;
        let mut off = 0u32;

        let versions = off as u16; // u32 array, data area is 64-aligned
        off += 4 * n;

        off = align_up(off, 8);
        let comp_ids = off as u16; // Entity array
        off += 8 * n;

        let comp_offsets = off as u16; // u16 array; off is 8-aligned here
        off += 2 * n;

        off = align_up(off, 8);
        let entity_data = off as u16;

        ChunkDataOffsets { versions, comp_ids, comp_offsets, entity_data }
    }

    /// Solves for entities-per-chunk and per-component offsets.
    fn compute_layout(
        records: &[ComponentRecord],
        gen_entities: usize,
        data_offsets: &ChunkDataOffsets,
        is_root: bool,
    ) -> EcsResult<(u32, u16, Vec<u16>)> {
        const ENTITY_BYTES: u32 = std::mem::size_of::<Entity>() as u32;

        let size_small = Chunk::data_bytes(CHUNK_SMALL_BYTES) as u32;
        let size_large = Chunk::data_bytes(CHUNK_LARGE_BYTES) as u32;
        let size_mid = (size_small + size_large) / 2;

        let entity_cap = if is_root { MAX_CHUNK_ENTITIES } else { NON_ROOT_CHUNK_ENTITY_CAP };
        let first_entity_byte = data_offsets.entity_data as u32;

        let gen_bytes: u32 = records[..gen_entities].iter().map(|r| r.size() as u32).sum();
        let uni_bytes: u32 = records[gen_entities..].iter().map(|r| r.size() as u32).sum();

        let initial_estimate = |target: u32| -> EcsResult<u32> {
            let budget = target
                .checked_sub(first_entity_byte + uni_bytes + 1)
                .ok_or(CapacityError {
                    what: "chunk data bytes",
                    requested: (first_entity_byte + uni_bytes) as u64,
                    cap: target as u64,
                })?;
            Ok(budget / (gen_bytes + ENTITY_BYTES))
        };

        let mut target = size_large;
        let mut max_items = initial_estimate(target)?;
        let mut refit_checked = false;
        let mut cur_off;

        loop {
            if max_items == 0 {
                return Err(CapacityError {
                    what: "bytes per entity",
                    requested: (gen_bytes + uni_bytes) as u64,
                    cap: target as u64,
                }
                .into());
            }

            cur_off = first_entity_byte + ENTITY_BYTES * max_items;

            // Correct the estimate for per-component alignment padding.
            let per_entity = max_items;
            if !estimate_fit(&records[..gen_entities], per_entity, &mut cur_off, &mut max_items, target) {
                continue;
            }
            if !estimate_fit(&records[gen_entities..], 1, &mut cur_off, &mut max_items, target) {
                continue;
            }

            if max_items > entity_cap {
                max_items = entity_cap;
                continue;
            }

            // Chunks come in 8 K and 16 K. A 16 K chunk that would sit
            // mostly empty is refit into the small class instead.
            if !refit_checked && cur_off < size_mid {
                refit_checked = true;
                target = size_small;
                max_items = initial_estimate(target)?;
                continue;
            }

            break;
        }

        // Final pass: write the per-component offsets for the solved
        // capacity.
        let mut comp_offsets = vec![0u16; records.len()];
        let mut off = first_entity_byte + ENTITY_BYTES * max_items;
        for (i, record) in records.iter().enumerate() {
            let size = record.size() as u32;
            if size == 0 {
                continue;
            }
            off = align_up(off, record.align() as u32);
            comp_offsets[i] = off as u16;
            off += if i < gen_entities { size * max_items } else { size };
        }

        debug_assert!(Chunk::total_bytes(off as u16) <= SizeClass::for_bytes(Chunk::total_bytes(off as u16)).block_bytes());
        Ok((max_items, off as u16, comp_offsets))
    }

    // ── accessors ───────────────────────────────────────────────────────────

    /// Archetype id (index into the world's archetype list).
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Lookup hash of the sorted component set.
    #[inline]
    pub fn lookup_hash(&self) -> LookupHash {
        self.lookup_hash
    }

    /// Computed storage properties.
    #[inline]
    pub fn props(&self) -> &ArchetypeProps {
        &self.props
    }

    /// Size class every chunk of this archetype is allocated from.
    #[inline]
    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// Sorted component entities identifying this archetype.
    #[inline]
    pub fn ids(&self) -> &[Entity] {
        &self.ids
    }

    /// Chunks owned by this archetype.
    #[inline]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Number of relationship pairs among the ids.
    #[inline]
    pub fn pair_count(&self) -> u8 {
        self.pair_count
    }

    /// Positions of `(Is, _)` pairs in the id list.
    #[inline]
    pub(crate) fn pairs_is(&self) -> &[u8] {
        &self.pairs_is
    }

    /// Data-area offset of component `comp_idx`'s array.
    #[inline]
    pub fn comp_offset(&self, comp_idx: usize) -> u16 {
        self.comp_offsets[comp_idx]
    }

    /// Size in bytes of component `comp_idx`.
    #[inline]
    pub fn comp_size(&self, comp_idx: usize) -> usize {
        self.records[comp_idx].size()
    }

    /// Position of `id` in this archetype's component list.
    #[inline]
    pub fn comp_idx(&self, id: Entity) -> Option<usize> {
        self.ids.iter().position(|&e| e == id)
    }

    /// Returns `true` if `id` is part of this archetype.
    #[inline]
    pub fn has(&self, id: Entity) -> bool {
        self.comp_idx(id).is_some()
    }

    /// Total number of live entities across all chunks.
    pub fn entity_count(&self) -> u32 {
        self.chunks.iter().map(|c| c.count() as u32).sum()
    }

    // ── chunk management ────────────────────────────────────────────────────

    /// Finds a chunk with room for one more entity, creating one if needed.
    ///
    /// Prefers a partially filled chunk; falls back to the first empty one
    /// so dying chunks get reclaimed before new memory is allocated.
    pub(crate) fn find_or_create_chunk(
        &mut self,
        alloc: &mut ChunkAllocator,
        world_version: Version,
    ) -> EcsResult<ChunkIndex> {
        let mut empty = None;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let count = chunk.count();
            if count == 0 {
                empty.get_or_insert(i);
            } else if count < chunk.capacity() {
                return Ok(i as ChunkIndex);
            }
        }
        if let Some(i) = empty {
            return Ok(i as ChunkIndex);
        }
        self.create_chunk(alloc, world_version)
    }

    /// Linear-scan variant for bulk insertion: resumes from `cursor` and
    /// accepts any non-full chunk.
    pub(crate) fn find_or_create_chunk_bulk(
        &mut self,
        cursor: &mut ChunkIndex,
        alloc: &mut ChunkAllocator,
        world_version: Version,
    ) -> EcsResult<ChunkIndex> {
        let mut i = *cursor as usize;
        while i < self.chunks.len() {
            if !self.chunks[i].is_full() {
                *cursor = i as ChunkIndex;
                return Ok(i as ChunkIndex);
            }
            i += 1;
        }
        let idx = self.create_chunk(alloc, world_version)?;
        *cursor = idx;
        Ok(idx)
    }

    fn create_chunk(&mut self, alloc: &mut ChunkAllocator, world_version: Version) -> EcsResult<ChunkIndex> {
        let index = self.chunks.len() as ChunkIndex;
        let chunk = Chunk::create(
            alloc,
            self.id,
            index,
            self.props.capacity,
            self.props.chunk_data_bytes,
            self.props.gen_entities,
            self.data_offsets,
            &self.ids,
            &self.comp_offsets,
            world_version,
        )?;

        // Unique components carry one default value per chunk.
        for i in self.props.gen_entities as usize..self.records.len() {
            if let Some(desc) = self.records[i].desc {
                // SAFETY: the layout solver reserved one aligned value at
                // this offset.
                unsafe { (desc.ctor)(chunk.data_ptr(self.comp_offsets[i]), 1) };
            }
        }

        self.chunks.push(chunk);
        Ok(index)
    }

    /// Destroys a chunk: runs destructors for everything still stored,
    /// releases the block, and keeps the chunk list dense.
    ///
    /// Entities of the chunk swapped into position `chunk_idx` get their
    /// containers repointed.
    pub(crate) fn free_chunk(
        &mut self,
        chunk_idx: ChunkIndex,
        alloc: &mut ChunkAllocator,
        containers: &mut [EntityContainer],
    ) {
        let chunk_idx = chunk_idx as usize;
        {
            let chunk = &self.chunks[chunk_idx];
            let count = chunk.count() as usize;

            for (i, record) in self.records.iter().enumerate() {
                let Some(desc) = record.desc else { continue };
                let Some(dtor) = desc.dtor else { continue };
                let base = chunk.data_ptr(self.comp_offsets[i]);
                if i < self.props.gen_entities as usize {
                    if count > 0 {
                        // SAFETY: rows [0, count) hold initialized values.
                        unsafe { dtor(base, count) };
                    }
                } else {
                    // SAFETY: unique values are constructed at chunk creation.
                    unsafe { dtor(base, 1) };
                }
            }
        }

        let chunk = self.chunks.swap_remove(chunk_idx);
        chunk.release(alloc);

        if chunk_idx < self.chunks.len() {
            let moved = &mut self.chunks[chunk_idx];
            moved.set_index(chunk_idx as ChunkIndex);
            for row in 0..moved.count() {
                let e = moved.entity_at(row);
                containers[e.index() as usize].chunk = chunk_idx as ChunkIndex;
            }
        }
    }

    // ── row value operations ────────────────────────────────────────────────

    /// Raw pointer to component `comp_idx` of `row` in chunk `chunk_idx`.
    #[inline]
    pub(crate) fn comp_ptr(&self, chunk_idx: ChunkIndex, comp_idx: usize, row: Row) -> *mut u8 {
        let chunk = &self.chunks[chunk_idx as usize];
        let size = self.records[comp_idx].size();
        // SAFETY: offset solved for this layout; row < capacity.
        unsafe { chunk.data_ptr(self.comp_offsets[comp_idx]).add(row as usize * size) }
    }

    /// Raw pointer to the per-chunk value of unique component `comp_idx`.
    #[inline]
    pub(crate) fn unique_ptr(&self, chunk_idx: ChunkIndex, comp_idx: usize) -> *mut u8 {
        debug_assert!(comp_idx >= self.props.gen_entities as usize);
        self.chunks[chunk_idx as usize].data_ptr(self.comp_offsets[comp_idx])
    }

    /// Resolved descriptor of component `comp_idx`, if it stores bytes.
    #[inline]
    pub(crate) fn record_desc(&self, comp_idx: usize) -> Option<ComponentDescriptor> {
        self.records[comp_idx].desc
    }

    /// Drops the value of one generic component at `row`, leaving the slot
    /// logically uninitialized.
    #[inline]
    pub(crate) fn destruct_value(&mut self, chunk_idx: ChunkIndex, comp_idx: usize, row: Row) {
        if let Some(desc) = self.records[comp_idx].desc {
            if let Some(dtor) = desc.dtor {
                // SAFETY: the slot holds an initialized value.
                unsafe { dtor(self.comp_ptr(chunk_idx, comp_idx, row), 1) };
            }
        }
    }

    /// Clones every generic component of `src` into the fresh row `dst`.
    ///
    /// Both rows belong to this archetype; they may share a chunk.
    pub(crate) fn copy_row(&mut self, src: (ChunkIndex, Row), dst: (ChunkIndex, Row)) {
        for i in 0..self.props.gen_entities as usize {
            if let Some(desc) = self.records[i].desc {
                let from = self.comp_ptr(src.0, i, src.1);
                let to = self.comp_ptr(dst.0, i, dst.1);
                // SAFETY: distinct rows; src initialized, dst fresh.
                unsafe { (desc.copy)(from, to) };
            }
        }
    }

    /// Swaps rows `a` and `b` of one chunk: entities, component values, and
    /// the containers' row fields. Enabled/disabled flags are left to the
    /// caller.
    pub(crate) fn swap_rows(
        &mut self,
        chunk_idx: ChunkIndex,
        a: Row,
        b: Row,
        containers: &mut [EntityContainer],
    ) {
        if a == b {
            return;
        }

        for i in 0..self.props.gen_entities as usize {
            if let Some(desc) = self.records[i].desc {
                // SAFETY: distinct initialized rows.
                unsafe { (desc.swap)(self.comp_ptr(chunk_idx, i, a), self.comp_ptr(chunk_idx, i, b)) };
            }
        }

        let chunk = &mut self.chunks[chunk_idx as usize];
        let ea = chunk.entity_at(a);
        let eb = chunk.entity_at(b);
        chunk.set_entity(a, eb);
        chunk.set_entity(b, ea);
        containers[ea.index() as usize].row = b;
        containers[eb.index() as usize].row = a;
    }

    /// Removes `row` from a chunk, keeping rows dense and the
    /// disabled-prefix partition intact.
    ///
    /// ## Behavior
    /// - A disabled victim is first swapped to the end of the disabled
    ///   prefix and the boundary retracted, so the swap-remove below only
    ///   ever moves an enabled entity into an enabled slot.
    /// - With `destruct` set the victim's values are dropped; callers that
    ///   already moved the values out pass `false`.
    ///
    /// Returns `true` if the chunk is now empty.
    pub(crate) fn remove_row(
        &mut self,
        chunk_idx: ChunkIndex,
        mut row: Row,
        destruct: bool,
        containers: &mut [EntityContainer],
    ) -> bool {
        let first_enabled = self.chunks[chunk_idx as usize].first_enabled_row();
        if row < first_enabled {
            let last_disabled = first_enabled - 1;
            self.swap_rows(chunk_idx, row, last_disabled, containers);
            self.chunks[chunk_idx as usize].shift_enabled_boundary(false);
            row = last_disabled;
        }

        let last = self.chunks[chunk_idx as usize].count() - 1;
        if row < last {
            for i in 0..self.props.gen_entities as usize {
                let Some(desc) = self.records[i].desc else { continue };
                let victim = self.comp_ptr(chunk_idx, i, row);
                if destruct {
                    if let Some(dtor) = desc.dtor {
                        // SAFETY: victim row initialized.
                        unsafe { dtor(victim, 1) };
                    }
                }
                // SAFETY: last row initialized; victim slot is free now.
                unsafe { (desc.move_)(self.comp_ptr(chunk_idx, i, last), victim) };
            }

            let chunk = &mut self.chunks[chunk_idx as usize];
            let moved = chunk.entity_at(last);
            chunk.set_entity(row, moved);
            containers[moved.index() as usize].row = row;
        } else if destruct {
            for i in 0..self.props.gen_entities as usize {
                let Some(desc) = self.records[i].desc else { continue };
                if let Some(dtor) = desc.dtor {
                    // SAFETY: victim row initialized.
                    unsafe { dtor(self.comp_ptr(chunk_idx, i, row), 1) };
                }
            }
        }

        let chunk = &mut self.chunks[chunk_idx as usize];
        chunk.pop_entity();
        chunk.is_empty()
    }

    /// Enables or disables the entity at `row` by swapping it across the
    /// partition boundary.
    ///
    /// Returns `false` if the entity already had the requested state.
    pub(crate) fn enable_row(
        &mut self,
        chunk_idx: ChunkIndex,
        row: Row,
        enable: bool,
        containers: &mut [EntityContainer],
    ) -> bool {
        let first_enabled = self.chunks[chunk_idx as usize].first_enabled_row();
        if enable {
            if row >= first_enabled {
                return false;
            }
            self.swap_rows(chunk_idx, first_enabled - 1, row, containers);
            let chunk = &mut self.chunks[chunk_idx as usize];
            chunk.shift_enabled_boundary(false);
            let e = chunk.entity_at(first_enabled - 1);
            containers[e.index() as usize].disabled = false;
        } else {
            if row < first_enabled {
                return false;
            }
            self.swap_rows(chunk_idx, first_enabled, row, containers);
            let chunk = &mut self.chunks[chunk_idx as usize];
            let e = chunk.entity_at(first_enabled);
            containers[e.index() as usize].disabled = true;
            chunk.shift_enabled_boundary(true);
        }
        true
    }

    /// Compares the unique-component values of two chunks.
    fn unique_values_equal(&self, a: ChunkIndex, b: ChunkIndex) -> bool {
        for i in self.props.gen_entities as usize..self.records.len() {
            let Some(desc) = self.records[i].desc else { continue };
            // SAFETY: unique values are always initialized.
            let equal = unsafe { (desc.cmp)(self.unique_ptr(a, i), self.unique_ptr(b, i)) };
            if !equal {
                return false;
            }
        }
        true
    }

    /// In-place compaction: moves entities out of semi-empty back chunks
    /// into semi-empty front chunks until `budget` entities were moved or
    /// the two cursors meet.
    ///
    /// ## Behavior
    /// - Chunks holding unique components are merged only when their
    ///   unique values compare equal.
    /// - Enabled/disabled state of every moved entity is preserved.
    /// - The world version is not bumped; no structural change is visible
    ///   externally. Emptied chunks enter their death countdown.
    pub(crate) fn defragment(
        &mut self,
        budget: &mut u32,
        world_version: Version,
        containers: &mut [EntityContainer],
    ) {
        if self.chunks.len() < 2 {
            return;
        }

        let has_unique = (self.props.gen_entities as usize) < self.ids.len();
        let mut front = 0usize;
        let mut back = self.chunks.len() - 1;

        'outer: while *budget > 0 {
            while front < back && !self.chunks[front].is_semi() {
                front += 1;
            }
            while back > front && (!self.chunks[back].is_semi() || self.chunks[back].is_empty()) {
                back -= 1;
            }
            if front >= back {
                return;
            }

            if has_unique && !self.unique_values_equal(front as ChunkIndex, back as ChunkIndex) {
                front += 1;
                continue;
            }

            while *budget > 0 {
                if self.chunks[front].is_full() {
                    front += 1;
                    continue 'outer;
                }
                if self.chunks[back].is_empty() {
                    self.chunks[back].prepare_to_die();
                    if back == 0 {
                        return;
                    }
                    back -= 1;
                    continue 'outer;
                }

                let src_last = self.chunks[back].count() - 1;
                let entity = self.chunks[back].entity_at(src_last);
                let was_enabled = self.chunks[back].enabled(src_last);

                let dst_row = self.chunks[front].add_entity(entity, world_version);

                for i in 0..self.props.gen_entities as usize {
                    let Some(desc) = self.records[i].desc else { continue };
                    // SAFETY: source row initialized, destination fresh.
                    unsafe {
                        (desc.move_)(
                            self.comp_ptr(back as ChunkIndex, i, src_last),
                            self.comp_ptr(front as ChunkIndex, i, dst_row),
                        )
                    };
                }

                self.remove_row(back as ChunkIndex, src_last, false, containers);

                let container = &mut containers[entity.index() as usize];
                container.chunk = front as ChunkIndex;
                container.row = dst_row;

                if !was_enabled {
                    self.enable_row(front as ChunkIndex, dst_row, false, containers);
                }

                *budget -= 1;
            }
        }
    }

    // ── lifespan ────────────────────────────────────────────────────────────

    /// Returns `true` if the archetype is counting down to removal.
    #[inline]
    pub fn dying(&self) -> bool {
        self.lifespan_countdown > 0
    }

    /// Starts the death countdown of an archetype without chunks.
    pub(crate) fn start_dying(&mut self) {
        debug_assert!(!self.dead);
        self.lifespan_countdown = MAX_ARCHETYPE_LIFESPAN;
    }

    /// Cancels a pending death countdown.
    pub(crate) fn revive(&mut self) {
        debug_assert!(!self.dead);
        self.lifespan_countdown = 0;
    }

    /// Advances the death countdown; returns `true` while lifespan remains.
    pub(crate) fn progress_death(&mut self) -> bool {
        debug_assert!(self.dying());
        self.lifespan_countdown -= 1;
        self.lifespan_countdown > 0
    }

    /// Marks the archetype dead before it is dropped from the registry.
    pub(crate) fn die(&mut self) {
        self.dead = true;
    }
}
