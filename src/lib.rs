//! # granite_ecs
//!
//! Archetype-based Entity-Component-System data engine.
//!
//! Entities sharing the same component composition are grouped into
//! archetypes, and each archetype stores its entities in fixed-size
//! cache-friendly chunks (8 KiB or 16 KiB) with SoA component arrays.
//! Structural changes ride an add/remove edge graph between archetypes,
//! and queries compile into a small matcher that only ever inspects
//! archetypes created since the previous run.
//!
//! ## Design Goals
//! - Pooled chunk allocation: no per-chunk host allocation on hot paths
//! - O(1) amortized structural transitions via the archetype graph
//! - Change detection through wrapping version counters
//! - Safe, explicit data access; read-only iteration may run in parallel

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::{EntityContainer, World, WorldDiag};

pub use engine::types::{
    Entity,
    EntityGen,
    EntityIndex,
    EntityKind,
    ArchetypeId,
    GroupId,
    Version,
    IS,
};

pub use engine::query::{Query, QueryBuilder, QueryOp, QueryTerm};
pub use engine::query_info::GroupByFn;
pub use engine::iterator::{ChunkIter, Constraints};

pub use engine::allocator::{ChunkAllocator, ChunkAllocatorStats, SizeClass};
pub use engine::component::{ComponentCache, ComponentDescriptor};
pub use engine::archetype::{Archetype, ArchetypeProps};
pub use engine::chunk::{Chunk, ChunkHeader};

pub use engine::error::{
    AllocError,
    CapacityError,
    DuplicateComponentError,
    EcsError,
    EcsResult,
    InvalidEntityError,
    MissingComponentError,
    StructuralChangeError,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use granite_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Constraints,
        EcsError,
        EcsResult,
        Entity,
        EntityKind,
        Query,
        QueryBuilder,
        World,
    };
}
