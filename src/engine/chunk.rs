//! Fixed-size chunk storage.
//!
//! A chunk is one 8 KiB or 16 KiB block obtained from the
//! [`ChunkAllocator`](crate::engine::allocator::ChunkAllocator). The header
//! lives at offset 0; the data area starts at [`CHUNK_HEADER_BYTES`] and is
//! laid out as:
//!
//! ```text
//! 1) component version array   (u32 per component)
//! 2) component id array        (Entity per component)
//! 3) component offset array    (u16 per component)
//! 4) entity array              (Entity * capacity)
//! 5) SoA component arrays, each aligned to its component's alignment
//! ```
//!
//! The root archetype stores only entities, so its chunks are fully
//! occupied by the entity array.
//!
//! Disabled entities occupy the prefix `[0, first_enabled_row)` of the
//! entity array; enabled entities occupy `[first_enabled_row, count)`.
//!
//! `Chunk` is a thin wrapper over the raw block: it owns the header, the
//! entity array, and the layout views. Operations touching component
//! *values* (move, drop, swap) need resolved descriptors and live on
//! [`Archetype`](crate::engine::archetype::Archetype).
//!
//! ## Unsafe code
//! All accessors derive pointers from the block base using offsets computed
//! once per archetype. Invariants that make this sound:
//! - the block is at least `CHUNK_HEADER_BYTES + chunk_data_bytes` long,
//! - every stored offset was produced by the archetype layout solver and
//!   respects the target's alignment,
//! - `&mut self` methods are the only writers.

use std::ptr::NonNull;

use crate::engine::allocator::{ChunkAllocator, SizeClass};
use crate::engine::error::EcsResult;
use crate::engine::types::{
    ArchetypeId, ChunkIndex, Entity, Row, Version, CHUNK_HEADER_BYTES, MAX_CHUNK_LIFESPAN,
};

/// Utilization threshold below which a chunk counts as semi-empty and
/// becomes a defragmentation candidate.
const SEMI_THRESHOLD_PERCENT: u32 = 70;

/// Offsets of the bookkeeping arrays inside a chunk's data area.
///
/// Computed once per archetype; identical for every chunk of that
/// archetype. All values are relative to the start of the data area.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkDataOffsets {
    /// First byte of the component version array.
    pub versions: u16,
    /// First byte of the component id array.
    pub comp_ids: u16,
    /// First byte of the component offset array.
    pub comp_offsets: u16,
    /// First byte of the entity array.
    pub entity_data: u16,
}

/// Header stored at offset 0 of every chunk block.
#[repr(C)]
pub struct ChunkHeader {
    /// Owning archetype.
    pub archetype_id: ArchetypeId,
    /// Index of this chunk in the archetype's chunk list.
    pub index: ChunkIndex,
    /// Number of entities stored (enabled and disabled).
    pub count: Row,
    /// Number of enabled entities.
    pub count_enabled: Row,
    /// Row of the first enabled entity; rows below it are disabled.
    pub first_enabled_row: Row,
    /// Maximum number of entities this chunk can hold.
    pub capacity: Row,
    /// Size class of the underlying block (`SizeClass` as u8).
    pub size_class: u8,
    /// Number of components stored (generic + unique).
    pub component_count: u8,
    /// Number of generic components; unique components follow them.
    pub gen_component_count: u8,
    /// Remaining GC ticks once the chunk has been emptied; 0 = alive.
    pub lifespan_countdown: u8,
    /// Structural-lock depth; non-zero while the chunk is iterated.
    pub structural_lock: u8,
    _reserved: [u8; 3],
    /// Data-area offsets of the bookkeeping arrays.
    pub versions_offset: u16,
    /// See [`ChunkDataOffsets::comp_ids`].
    pub comp_ids_offset: u16,
    /// See [`ChunkDataOffsets::comp_offsets`].
    pub comp_offsets_offset: u16,
    /// See [`ChunkDataOffsets::entity_data`].
    pub entity_data_offset: u16,
    /// World version at the last write to any component on this chunk.
    pub version: Version,
}

const _: [(); 1] = [(); (std::mem::size_of::<ChunkHeader>() <= CHUNK_HEADER_BYTES) as usize];

/// Handle to one allocated chunk block.
///
/// The handle does not free its block on drop; chunks are released
/// explicitly through [`Chunk::release`] so destructors can run with the
/// owning archetype's descriptors at hand.
pub struct Chunk {
    ptr: NonNull<u8>,
}

// SAFETY: a chunk's block is exclusively owned by its archetype; shared
// references only permit reads, and all writes go through &mut methods.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Total block bytes needed for `data_bytes` of chunk data.
    #[inline]
    pub const fn total_bytes(data_bytes: u16) -> usize {
        CHUNK_HEADER_BYTES + data_bytes as usize
    }

    /// Chunk data bytes available in a block of `total` bytes.
    #[inline]
    pub const fn data_bytes(total: usize) -> usize {
        total - CHUNK_HEADER_BYTES
    }

    /// Allocates and initializes a chunk for an archetype.
    ///
    /// ## Behavior
    /// Obtains a block from the allocator, writes the header, copies the
    /// component id and offset arrays into the data area, and zeroes the
    /// version array. Component values are not constructed here.
    ///
    /// ## Errors
    /// [`EcsError::Alloc`](crate::engine::error::EcsError::Alloc) when the
    /// host refuses memory.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        alloc: &mut ChunkAllocator,
        archetype_id: ArchetypeId,
        index: ChunkIndex,
        capacity: Row,
        data_bytes: u16,
        gen_component_count: u8,
        offsets: ChunkDataOffsets,
        comp_ids: &[Entity],
        comp_offsets: &[u16],
        world_version: Version,
    ) -> EcsResult<Chunk> {
        debug_assert_eq!(comp_ids.len(), comp_offsets.len());

        let (ptr, class) = alloc.alloc(Self::total_bytes(data_bytes))?;
        let chunk = Chunk { ptr };

        let header = ChunkHeader {
            archetype_id,
            index,
            count: 0,
            count_enabled: 0,
            first_enabled_row: 0,
            capacity,
            size_class: class as u8,
            component_count: comp_ids.len() as u8,
            gen_component_count,
            lifespan_countdown: 0,
            structural_lock: 0,
            _reserved: [0; 3],
            versions_offset: offsets.versions,
            comp_ids_offset: offsets.comp_ids,
            comp_offsets_offset: offsets.comp_offsets,
            entity_data_offset: offsets.entity_data,
            version: world_version,
        };

        // SAFETY: the block is at least CHUNK_HEADER_BYTES long and
        // block-aligned, so the header write is in bounds and aligned.
        unsafe { chunk.ptr.cast::<ChunkHeader>().as_ptr().write(header) };

        unsafe {
            let n = comp_ids.len();
            let ids_dst = chunk.data_ptr(offsets.comp_ids).cast::<Entity>();
            std::ptr::copy_nonoverlapping(comp_ids.as_ptr(), ids_dst, n);

            let offs_dst = chunk.data_ptr(offsets.comp_offsets).cast::<u16>();
            std::ptr::copy_nonoverlapping(comp_offsets.as_ptr(), offs_dst, n);

            let versions_dst = chunk.data_ptr(offsets.versions).cast::<Version>();
            std::ptr::write_bytes(versions_dst, 0, n);
        }

        Ok(chunk)
    }

    /// Returns the block to the allocator.
    ///
    /// Component destructors must already have run; see
    /// `Archetype::free_chunk`.
    pub(crate) fn release(self, alloc: &mut ChunkAllocator) {
        let class = self.size_class();
        alloc.free(self.ptr, class);
    }

    #[inline]
    fn header(&self) -> &ChunkHeader {
        // SAFETY: the header was written at creation and the block outlives
        // the handle.
        unsafe { self.ptr.cast::<ChunkHeader>().as_ref() }
    }

    #[inline]
    fn header_mut(&mut self) -> &mut ChunkHeader {
        // SAFETY: as above; &mut self guarantees exclusivity.
        unsafe { self.ptr.cast::<ChunkHeader>().as_mut() }
    }

    /// Raw pointer into the data area at `data_offset`.
    #[inline]
    pub(crate) fn data_ptr(&self, data_offset: u16) -> *mut u8 {
        // SAFETY: the layout solver guarantees data offsets stay inside the
        // block.
        unsafe { self.ptr.as_ptr().add(CHUNK_HEADER_BYTES + data_offset as usize) }
    }

    // ── header getters ──────────────────────────────────────────────────────

    /// Owning archetype id.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeId {
        self.header().archetype_id
    }

    /// Index of this chunk within its archetype.
    #[inline]
    pub fn index(&self) -> ChunkIndex {
        self.header().index
    }

    /// Updates the chunk's index after the archetype's chunk list shrank.
    #[inline]
    pub(crate) fn set_index(&mut self, index: ChunkIndex) {
        self.header_mut().index = index;
    }

    /// Number of stored entities, enabled and disabled.
    #[inline]
    pub fn count(&self) -> Row {
        self.header().count
    }

    /// Number of enabled entities.
    #[inline]
    pub fn count_enabled(&self) -> Row {
        self.header().count_enabled
    }

    /// Row of the first enabled entity.
    #[inline]
    pub fn first_enabled_row(&self) -> Row {
        self.header().first_enabled_row
    }

    /// Maximum entities this chunk can hold.
    #[inline]
    pub fn capacity(&self) -> Row {
        self.header().capacity
    }

    /// Size class of the underlying block.
    #[inline]
    pub fn size_class(&self) -> SizeClass {
        SizeClass::from_u8(self.header().size_class)
    }

    /// World version at the last write to this chunk.
    #[inline]
    pub fn version(&self) -> Version {
        self.header().version
    }

    /// Returns `true` if the chunk holds no entities.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.header().count == 0
    }

    /// Returns `true` if the chunk is at capacity.
    #[inline]
    pub fn is_full(&self) -> bool {
        let h = self.header();
        h.count >= h.capacity
    }

    /// Returns `true` if utilization is below the defragmentation threshold.
    #[inline]
    pub fn is_semi(&self) -> bool {
        let h = self.header();
        (h.count as u32 * 100) < (h.capacity as u32 * SEMI_THRESHOLD_PERCENT)
    }

    /// Returns `true` if the entity at `row` is enabled.
    #[inline]
    pub fn enabled(&self, row: Row) -> bool {
        row >= self.header().first_enabled_row
    }

    // ── lifespan / structural lock ──────────────────────────────────────────

    /// Returns `true` if the chunk is counting down to removal.
    #[inline]
    pub fn dying(&self) -> bool {
        self.header().lifespan_countdown > 0
    }

    /// Starts the death countdown of an emptied chunk.
    pub(crate) fn prepare_to_die(&mut self) {
        self.header_mut().lifespan_countdown = MAX_CHUNK_LIFESPAN;
    }

    /// Advances the death countdown by one tick.
    ///
    /// Returns `true` while lifespan remains.
    pub(crate) fn progress_death(&mut self) -> bool {
        debug_assert!(self.dying());
        let h = self.header_mut();
        h.lifespan_countdown -= 1;
        h.lifespan_countdown > 0
    }

    /// Cancels a pending death countdown.
    pub(crate) fn revive(&mut self) {
        self.header_mut().lifespan_countdown = 0;
    }

    /// Raises or lowers the structural-lock depth.
    pub(crate) fn set_structural_lock(&mut self, locked: bool) {
        let h = self.header_mut();
        if locked {
            debug_assert!(h.structural_lock < u8::MAX);
            h.structural_lock += 1;
        } else {
            debug_assert!(h.structural_lock > 0);
            h.structural_lock -= 1;
        }
    }

    /// Returns `true` while the chunk is being iterated.
    #[inline]
    pub fn has_structural_lock(&self) -> bool {
        self.header().structural_lock != 0
    }

    // ── layout views ────────────────────────────────────────────────────────

    /// Per-component world versions.
    #[inline]
    pub fn versions(&self) -> &[Version] {
        let h = self.header();
        // SAFETY: the version array was zero-initialized at creation and
        // holds component_count u32 values at a 4-aligned offset.
        unsafe {
            std::slice::from_raw_parts(
                self.data_ptr(h.versions_offset).cast::<Version>(),
                h.component_count as usize,
            )
        }
    }

    /// Component ids stored in this chunk, sorted.
    #[inline]
    pub fn comp_ids(&self) -> &[Entity] {
        let h = self.header();
        // SAFETY: written at creation; 8-aligned offset.
        unsafe {
            std::slice::from_raw_parts(
                self.data_ptr(h.comp_ids_offset).cast::<Entity>(),
                h.component_count as usize,
            )
        }
    }

    /// Data-area offsets of each component's array.
    #[inline]
    pub fn comp_offsets(&self) -> &[u16] {
        let h = self.header();
        // SAFETY: written at creation; 2-aligned offset.
        unsafe {
            std::slice::from_raw_parts(
                self.data_ptr(h.comp_offsets_offset).cast::<u16>(),
                h.component_count as usize,
            )
        }
    }

    /// Position of `id` in this chunk's component array.
    #[inline]
    pub fn comp_idx(&self, id: Entity) -> Option<usize> {
        self.comp_ids().iter().position(|&c| c == id)
    }

    /// Entities stored in this chunk, disabled prefix first.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        let h = self.header();
        // SAFETY: rows [0, count) were written by add_entity/set_entity.
        unsafe {
            std::slice::from_raw_parts(
                self.data_ptr(h.entity_data_offset).cast::<Entity>(),
                h.count as usize,
            )
        }
    }

    /// Entity stored at `row`.
    #[inline]
    pub fn entity_at(&self, row: Row) -> Entity {
        debug_assert!(row < self.header().count, "entity row out of bounds");
        // SAFETY: bounds asserted above.
        unsafe {
            *self
                .data_ptr(self.header().entity_data_offset)
                .cast::<Entity>()
                .add(row as usize)
        }
    }

    /// Overwrites the entity stored at `row`.
    #[inline]
    pub(crate) fn set_entity(&mut self, row: Row, entity: Entity) {
        debug_assert!(row < self.header().count, "entity row out of bounds");
        // SAFETY: bounds asserted above; &mut self guarantees exclusivity.
        unsafe {
            *self
                .data_ptr(self.header().entity_data_offset)
                .cast::<Entity>()
                .add(row as usize) = entity;
        }
    }

    // ── version bookkeeping ─────────────────────────────────────────────────

    #[inline]
    fn versions_mut(&mut self) -> &mut [Version] {
        let h = self.header();
        let (off, n) = (h.versions_offset, h.component_count as usize);
        // SAFETY: same as versions(); exclusivity via &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.data_ptr(off).cast::<Version>(), n) }
    }

    /// Records a write to component `comp_idx` at the given world version.
    #[inline]
    pub(crate) fn touch_component(&mut self, comp_idx: usize, world_version: Version) {
        self.header_mut().version = world_version;
        self.versions_mut()[comp_idx] = world_version;
    }

    /// Records a write to every component at the given world version.
    pub(crate) fn touch_all(&mut self, world_version: Version) {
        self.header_mut().version = world_version;
        for v in self.versions_mut() {
            *v = world_version;
        }
    }

    /// Returns `true` if component `comp_idx` changed after `last_seen`.
    #[inline]
    pub fn did_change(&self, comp_idx: usize, last_seen: Version) -> bool {
        crate::engine::types::version_changed(self.versions()[comp_idx], last_seen)
    }

    // ── entity bookkeeping ──────────────────────────────────────────────────

    /// Appends `entity` to the enabled region and stamps every component
    /// version with `world_version`.
    ///
    /// The caller bumps the world version beforehand when the insertion is
    /// a structural change; defragmentation passes the current version
    /// unchanged.
    ///
    /// ## Invariants
    /// The chunk must not be full. Component values for the new row are not
    /// constructed here.
    pub(crate) fn add_entity(&mut self, entity: Entity, world_version: Version) -> Row {
        debug_assert!(!self.is_full(), "add_entity on a full chunk");

        let row = {
            let h = self.header_mut();
            let row = h.count;
            h.count += 1;
            h.count_enabled += 1;
            row
        };
        self.set_entity(row, entity);
        self.touch_all(world_version);

        if self.dying() {
            self.revive();
        }
        row
    }

    /// Drops the last row's entity bookkeeping.
    ///
    /// The caller has already destructed or moved out the row's component
    /// values and fixed the enabled/disabled partition.
    pub(crate) fn pop_entity(&mut self) {
        let h = self.header_mut();
        debug_assert!(h.count > 0);
        debug_assert!(h.count > h.first_enabled_row, "pop must target the enabled region");
        h.count -= 1;
        h.count_enabled -= 1;
    }

    /// Shifts the enabled/disabled boundary by one row.
    pub(crate) fn shift_enabled_boundary(&mut self, disable: bool) {
        let h = self.header_mut();
        if disable {
            debug_assert!(h.first_enabled_row < h.count);
            h.first_enabled_row += 1;
            h.count_enabled -= 1;
        } else {
            debug_assert!(h.first_enabled_row > 0);
            h.first_enabled_row -= 1;
            h.count_enabled += 1;
        }
        debug_assert_eq!(h.count_enabled, h.count - h.first_enabled_row);
    }
}
