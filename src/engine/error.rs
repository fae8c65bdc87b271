//! Error types for the ECS core.
//!
//! This module declares focused, composable error types used across the
//! engine. Each error carries enough context to make failures actionable
//! while remaining small and cheap to pass around or convert into the
//! aggregate [`EcsError`].
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (stale
//!   entity handles, duplicate components, allocator exhaustion, ...).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`std::fmt::Display`], and provide `From<T>` conversions into
//!   [`EcsError`] so call sites can use `?`.
//! * **Actionability:** Structured fields (offending entity, component name,
//!   requested bytes) make logs useful without reproducing the issue.
//!
//! ## Policy
//! The first four variants are programmer errors: the world refuses the
//! operation and reports exactly what precondition was violated.
//! [`AllocError`] and [`StructuralChangeError`] are fatal and propagated;
//! there is no silent recovery and no retry at this layer.

use std::fmt;

use crate::engine::types::{Entity, EntityGen};

/// Returned when an entity handle's generation does not match the entity
/// table, or its id is out of range.
///
/// ### Fields
/// * `entity` — The stale or malformed handle that was supplied.
/// * `current_gen` — Generation stored in the table slot, if the id was in
///   range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidEntityError {
    /// Offending handle.
    pub entity: Entity,

    /// Generation currently stored for the id, if any.
    pub current_gen: Option<EntityGen>,
}

impl fmt::Display for InvalidEntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current_gen {
            Some(gen) => write!(
                f,
                "stale entity handle {:?} (table generation is {})",
                self.entity, gen
            ),
            None => write!(f, "entity handle {:?} is out of range", self.entity),
        }
    }
}

impl std::error::Error for InvalidEntityError {}

/// Returned when adding a component the entity already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateComponentError {
    /// Entity the component was added to.
    pub entity: Entity,

    /// Component entity that is already present.
    pub component: Entity,
}

impl fmt::Display for DuplicateComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component {:?} already present on {:?}", self.component, self.entity)
    }
}

impl std::error::Error for DuplicateComponentError {}

/// Returned when removing or reading a component the entity lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingComponentError {
    /// Entity the component was expected on.
    pub entity: Entity,

    /// Component entity that is absent.
    pub component: Entity,
}

impl fmt::Display for MissingComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component {:?} not present on {:?}", self.component, self.entity)
    }
}

impl std::error::Error for MissingComponentError {}

/// Returned when an operation would exceed a hard capacity limit: the
/// component-per-archetype cap, the entity id space, or the query term
/// budget.
///
/// ### Fields
/// * `what` — Which limit was hit (static description).
/// * `requested` / `cap` — The offending request and the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    /// Human-readable name of the exhausted resource.
    pub what: &'static str,

    /// Requested amount.
    pub requested: u64,

    /// Configured maximum.
    pub cap: u64,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} capacity exceeded ({} requested; cap {})", self.what, self.requested, self.cap)
    }
}

impl std::error::Error for CapacityError {}

/// Returned when a structural mutation is attempted while the target chunk
/// is being iterated (its structural-lock depth is non-zero).
///
/// ## Notes
/// This models the "no structural changes during iteration" rule without
/// real locks. It indicates a logic error at the call site and is always
/// fatal; the world state is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuralChangeError {
    /// Entity whose chunk was locked.
    pub entity: Entity,
}

impl fmt::Display for StructuralChangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "structural change on {:?} while its chunk is being iterated",
            self.entity
        )
    }
}

impl std::error::Error for StructuralChangeError {}

/// Returned when the chunk allocator cannot obtain more memory from the
/// host allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// Bytes requested from the host.
    pub bytes: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk allocator failed to obtain {} bytes from the host", self.bytes)
    }
}

impl std::error::Error for AllocError {}

/// Aggregate error for all fallible engine operations.
///
/// Low-level subsystems return the dedicated types above; the world and the
/// query engine bubble them up through `?` into this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcsError {
    /// An entity handle was stale or out of range.
    InvalidEntity(InvalidEntityError),

    /// A component was added twice to the same entity.
    DuplicateComponent(DuplicateComponentError),

    /// A component was removed or read where it does not exist.
    MissingComponent(MissingComponentError),

    /// A hard capacity limit was exceeded.
    CapacityExceeded(CapacityError),

    /// A structural mutation raced an iteration.
    StructuralChangeDuringIteration(StructuralChangeError),

    /// The chunk allocator ran out of host memory.
    Alloc(AllocError),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::InvalidEntity(e) => write!(f, "{e}"),
            EcsError::DuplicateComponent(e) => write!(f, "{e}"),
            EcsError::MissingComponent(e) => write!(f, "{e}"),
            EcsError::CapacityExceeded(e) => write!(f, "{e}"),
            EcsError::StructuralChangeDuringIteration(e) => write!(f, "{e}"),
            EcsError::Alloc(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<InvalidEntityError> for EcsError {
    fn from(e: InvalidEntityError) -> Self { EcsError::InvalidEntity(e) }
}
impl From<DuplicateComponentError> for EcsError {
    fn from(e: DuplicateComponentError) -> Self { EcsError::DuplicateComponent(e) }
}
impl From<MissingComponentError> for EcsError {
    fn from(e: MissingComponentError) -> Self { EcsError::MissingComponent(e) }
}
impl From<CapacityError> for EcsError {
    fn from(e: CapacityError) -> Self { EcsError::CapacityExceeded(e) }
}
impl From<StructuralChangeError> for EcsError {
    fn from(e: StructuralChangeError) -> Self { EcsError::StructuralChangeDuringIteration(e) }
}
impl From<AllocError> for EcsError {
    fn from(e: AllocError) -> Self { EcsError::Alloc(e) }
}

/// Convenience alias used by every fallible engine operation.
pub type EcsResult<T> = Result<T, EcsError>;
