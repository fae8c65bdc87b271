//! Core Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental types, identifiers, bit layouts, and
//! compile-time configuration** used throughout the engine. These definitions
//! are shared across all subsystems: the chunk allocator, chunks, archetypes,
//! the world, and the query engine.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | flags | pair | kind | generation (24) | id (24) |
//! ```
//!
//! - **Id** indexes the world's entity table (or the component cache for
//!   component entities).
//! - **Generation** detects stale handles after an entity is destroyed and
//!   its id recycled.
//! - **Kind** distinguishes generic (per-entity) from unique (per-chunk)
//!   component storage.
//! - **Pair** marks a composite handle `(relation, target)`. For pairs, the
//!   id field holds the relation id and the generation field holds the
//!   target id.
//! - One flag bit marks **component entities**, whose lookups route to the
//!   component cache instead of the entity table.
//!
//! The exact bit widths are controlled by compile-time constants and
//! validated with static assertions.
//!
//! ## Versioning
//!
//! The world carries a monotonic `u32` version that is bumped on every
//! structural change and every mutable component access. Comparisons are
//! performed under wrap-around arithmetic so the counter may overflow
//! safely; see [`version_changed`].

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Raw 64-bit entity identifier value.
pub type EntityId = u64;
/// Index portion of an entity (24 bits in use).
pub type EntityIndex = u32;
/// Generation counter of an entity (24 bits in use).
pub type EntityGen = u32;

/// Unique identifier for an archetype. Indexes the world's archetype list.
pub type ArchetypeId = u32;
/// Row index within a chunk.
pub type Row = u16;
/// Chunk index within an archetype.
pub type ChunkIndex = u32;
/// Stable lookup hash of a sorted component set.
pub type LookupHash = u64;
/// World/component version counter.
pub type Version = u32;
/// Group identifier produced by a query's `group_by` function.
pub type GroupId = u32;

/// Total number of bits in an entity identifier.
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for the entity index.
pub const ENTITY_INDEX_BITS: Bits = 24;
/// Number of bits reserved for the entity generation.
pub const ENTITY_GEN_BITS: Bits = 24;
/// Bit position of the storage-kind flag (generic vs. unique).
pub const ENTITY_KIND_BIT: Bits = 48;
/// Bit position of the pair flag.
pub const ENTITY_PAIR_BIT: Bits = 49;
/// Bit position of the component flag.
pub const ENTITY_COMPONENT_BIT: Bits = 50;
/// Pair flag: the relation side is a component entity.
pub const ENTITY_PAIR_REL_COMP_BIT: Bits = 51;
/// Pair flag: the target side is a component entity.
pub const ENTITY_PAIR_TGT_COMP_BIT: Bits = 52;
/// Pair flag: storage kind of the relation side (set = unique).
pub const ENTITY_PAIR_REL_KIND_BIT: Bits = 53;
/// Pair flag: storage kind of the target side (set = unique).
pub const ENTITY_PAIR_TGT_KIND_BIT: Bits = 54;

const _: [(); 1] = [(); (ENTITY_INDEX_BITS + ENTITY_GEN_BITS <= ENTITY_KIND_BIT) as usize];
const _: [(); 1] = [(); (ENTITY_PAIR_TGT_KIND_BIT < ENTITY_BITS) as usize];

const fn mask(bits: Bits) -> EntityId {
    if bits == 0 { 0 } else { ((1 as EntityId) << bits) - 1 }
}

/// Mask selecting the index portion of an entity.
pub const ENTITY_INDEX_MASK: EntityId = mask(ENTITY_INDEX_BITS);
/// Mask selecting the generation portion of an entity.
pub const ENTITY_GEN_MASK: EntityId = mask(ENTITY_GEN_BITS);
/// Reserved invalid entity index (also the free-list terminator).
pub const ENTITY_INDEX_BAD: EntityIndex = ENTITY_INDEX_MASK as EntityIndex;

/// Reserved invalid archetype id.
pub const ARCHETYPE_ID_BAD: ArchetypeId = ArchetypeId::MAX;
/// Reserved invalid chunk index.
pub const CHUNK_INDEX_BAD: ChunkIndex = ChunkIndex::MAX;

/// Storage kind of a component entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityKind {
    /// One value per entity, stored in SoA arrays inside a chunk.
    Generic,
    /// One value per chunk, shared by every entity in the chunk.
    Unique,
}

/// Opaque, versioned 64-bit entity handle.
///
/// ## Purpose
/// `Entity` uniquely identifies a data entity, a component type, or a
/// relationship pair. The same handle type is used for all three so that an
/// archetype's identity is a uniform sorted list of entities.
///
/// ## Invariants
/// - Two handles with equal `(id, gen)` but different flags are distinct.
/// - A pair handle never carries a generation; its id/gen fields hold the
///   relation and target ids.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(pub EntityId);

impl Entity {
    /// Builds a plain data-entity handle.
    #[inline]
    pub const fn new(index: EntityIndex, gen: EntityGen) -> Self {
        Self(((gen as EntityId & ENTITY_GEN_MASK) << ENTITY_INDEX_BITS) | (index as EntityId & ENTITY_INDEX_MASK))
    }

    /// Builds a component-entity handle of the given storage kind.
    #[inline]
    pub const fn component(index: EntityIndex, kind: EntityKind) -> Self {
        let kind_bit = match kind {
            EntityKind::Generic => 0,
            EntityKind::Unique => 1 << ENTITY_KIND_BIT,
        };
        Self((index as EntityId & ENTITY_INDEX_MASK) | kind_bit | (1 << ENTITY_COMPONENT_BIT))
    }

    /// Builds a relationship pair handle out of two entities.
    ///
    /// Only the ids of `rel` and `tgt` survive (pairs carry no generation),
    /// plus enough flag bits to reconstruct component-entity sides later.
    #[inline]
    pub const fn pair(rel: Entity, tgt: Entity) -> Self {
        let mut bits = (rel.0 & ENTITY_INDEX_MASK)
            | ((tgt.0 & ENTITY_INDEX_MASK) << ENTITY_INDEX_BITS)
            | (1 << ENTITY_PAIR_BIT);
        if rel.is_component() {
            bits |= 1 << ENTITY_PAIR_REL_COMP_BIT;
            if matches!(rel.kind(), EntityKind::Unique) {
                bits |= 1 << ENTITY_PAIR_REL_KIND_BIT;
            }
        }
        if tgt.is_component() {
            bits |= 1 << ENTITY_PAIR_TGT_COMP_BIT;
            if matches!(tgt.kind(), EntityKind::Unique) {
                bits |= 1 << ENTITY_PAIR_TGT_KIND_BIT;
            }
        }
        Self(bits)
    }

    /// Index portion of this handle.
    #[inline]
    pub const fn index(self) -> EntityIndex {
        (self.0 & ENTITY_INDEX_MASK) as EntityIndex
    }

    /// Generation portion of this handle.
    #[inline]
    pub const fn gen(self) -> EntityGen {
        ((self.0 >> ENTITY_INDEX_BITS) & ENTITY_GEN_MASK) as EntityGen
    }

    /// Storage kind encoded in this handle.
    #[inline]
    pub const fn kind(self) -> EntityKind {
        if (self.0 >> ENTITY_KIND_BIT) & 1 == 1 { EntityKind::Unique } else { EntityKind::Generic }
    }

    /// Returns `true` if this handle is a relationship pair.
    #[inline]
    pub const fn is_pair(self) -> bool {
        (self.0 >> ENTITY_PAIR_BIT) & 1 == 1
    }

    /// Returns `true` if this handle denotes a component type.
    #[inline]
    pub const fn is_component(self) -> bool {
        (self.0 >> ENTITY_COMPONENT_BIT) & 1 == 1
    }

    /// Relation id of a pair handle.
    #[inline]
    pub const fn rel_index(self) -> EntityIndex {
        debug_assert!(self.is_pair());
        self.index()
    }

    /// Target id of a pair handle.
    #[inline]
    pub const fn tgt_index(self) -> EntityIndex {
        debug_assert!(self.is_pair());
        self.gen()
    }

    /// Reconstructs the relation side of a pair as a component entity, if
    /// it was one.
    #[inline]
    pub const fn rel_as_component(self) -> Option<Entity> {
        debug_assert!(self.is_pair());
        if (self.0 >> ENTITY_PAIR_REL_COMP_BIT) & 1 == 1 {
            let kind = if (self.0 >> ENTITY_PAIR_REL_KIND_BIT) & 1 == 1 {
                EntityKind::Unique
            } else {
                EntityKind::Generic
            };
            Some(Entity::component(self.index(), kind))
        } else {
            None
        }
    }

    /// Reconstructs the target side of a pair as a component entity, if it
    /// was one.
    #[inline]
    pub const fn tgt_as_component(self) -> Option<Entity> {
        debug_assert!(self.is_pair());
        if (self.0 >> ENTITY_PAIR_TGT_COMP_BIT) & 1 == 1 {
            let kind = if (self.0 >> ENTITY_PAIR_TGT_KIND_BIT) & 1 == 1 {
                EntityKind::Unique
            } else {
                EntityKind::Generic
            };
            Some(Entity::component(self.gen(), kind))
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_pair() {
            write!(f, "Pair({}, {})", self.rel_index(), self.tgt_index())
        } else if self.is_component() {
            write!(f, "Component({}:{:?})", self.index(), self.kind())
        } else {
            write!(f, "Entity({}:{})", self.index(), self.gen())
        }
    }
}

/// Builtin `Is` relation used to express inheritance between entities.
///
/// `add_pair(e, IS, base)` states that `e` can stand in for `base` during
/// query matching (single hop).
pub const IS: Entity = Entity::component(0, EntityKind::Generic);

// ─────────────────────────────────────────────────────────────────────────────
// Chunk configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Size in bytes of the small chunk class.
pub const CHUNK_SMALL_BYTES: usize = 8 * 1024;
/// Size in bytes of the large chunk class.
pub const CHUNK_LARGE_BYTES: usize = 16 * 1024;
/// Bytes reserved at the start of every chunk for the header.
pub const CHUNK_HEADER_BYTES: usize = 64;
/// Alignment guaranteed for the start of a chunk's data area.
pub const CHUNK_DATA_ALIGN: usize = 64;

/// Maximum number of components an archetype may carry.
pub const MAX_COMPONENTS_PER_ARCHETYPE: usize = 32;
/// Sentinel marking an absent per-term component index in a query cache.
pub const COMPONENT_IDX_BAD: u8 = u8::MAX;

/// Per-chunk entity clamp for non-root archetypes.
///
/// The root archetype stores nothing but entity ids and uses whatever fits;
/// every other archetype caps out here so partially used capacity can go
/// into the smaller chunk class.
pub const NON_ROOT_CHUNK_ENTITY_CAP: u32 = 512;
/// Absolute upper bound on entities per chunk.
pub const MAX_CHUNK_ENTITIES: u32 = u16::MAX as u32;

/// Number of GC ticks an emptied chunk survives before its memory is freed.
pub const MAX_CHUNK_LIFESPAN: u8 = 15;
/// Number of GC ticks an emptied archetype survives before it is freed.
pub const MAX_ARCHETYPE_LIFESPAN: u8 = 127;

const _: [(); 1] = [(); (MAX_ARCHETYPE_LIFESPAN >= MAX_CHUNK_LIFESPAN) as usize];
const _: [(); 1] = [(); (CHUNK_HEADER_BYTES.is_power_of_two()) as usize];
const _: [(); 1] = [(); (CHUNK_SMALL_BYTES < CHUNK_LARGE_BYTES) as usize];
const _: [(); 1] = [(); (MAX_COMPONENTS_PER_ARCHETYPE <= COMPONENT_IDX_BAD as usize) as usize];

/// Rounds `offset` up to the next multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
pub const fn align_up(offset: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

// ─────────────────────────────────────────────────────────────────────────────
// Version arithmetic
// ─────────────────────────────────────────────────────────────────────────────

/// Returns `true` if `version` is newer than `last_seen`.
///
/// Comparison is performed under 32-bit wrap-around: a counter that
/// overflowed is treated as "far in the future" rather than ancient past.
#[inline]
pub const fn version_changed(version: Version, last_seen: Version) -> bool {
    version.wrapping_sub(last_seen) as i32 > 0
}

/// Advances a version counter, skipping the reserved zero value.
///
/// All component versions start at zero and the world at one, so the first
/// read after construction always compares as changed.
#[inline]
pub fn bump_version(version: &mut Version) {
    *version = version.wrapping_add(1);
    if *version == 0 {
        *version = 1;
    }
}

/// Sort key for the component entities identifying an archetype.
///
/// Generic components sort before unique components so the unique partition
/// always forms the tail of the id list; within a partition plain entities
/// precede pairs and ties break on the raw handle bits.
#[inline]
pub fn id_sort_key(e: Entity) -> (EntityKind, bool, EntityId) {
    (e.kind(), e.is_pair(), e.0)
}

/// Sorts an archetype id list by [`id_sort_key`].
#[inline]
pub fn sort_component_ids(ids: &mut [Entity]) {
    ids.sort_unstable_by_key(|e| id_sort_key(*e));
}
