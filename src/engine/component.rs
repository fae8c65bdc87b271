//! # Component Cache
//!
//! This module provides the mapping between Rust component types, their
//! runtime descriptors, and the **component entities** that identify them
//! inside archetypes.
//!
//! ## Purpose
//! Components are entities too: registering a type yields an [`Entity`]
//! handle with the component flag set, which is what archetype id lists,
//! graph edges, and query terms are made of. The cache stores, per
//! component, a [`ComponentDescriptor`] with size, alignment, and the
//! type-erased operations (ctor/dtor/copy/move/swap/cmp) needed to shuffle
//! component bytes around chunks without monomorphizing the hot paths.
//!
//! ## Design
//! - The **type identity** (`TypeId` → dense descriptor id) is process-wide
//!   and monotonic, held in a global registry.
//! - The **cache** (descriptor id → descriptor + component entity) is owned
//!   by each world. Component entity ids are assigned from the cache's own
//!   id space; the component flag bit routes lookups here instead of the
//!   entity table.
//! - The cache is monotonic: descriptors are never removed for the lifetime
//!   of the world.
//!
//! ## Invariants
//! - Every registered descriptor has a unique component entity whose index
//!   equals its position in the cache's entity column.
//! - A component's alignment never exceeds the chunk data-area alignment.

use std::any::{type_name, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{OnceLock, RwLock};

use crate::engine::types::{Entity, EntityIndex, EntityKind, CHUNK_DATA_ALIGN, IS};

/// Process-wide dense identifier for a component type.
pub type ComponentDescId = u32;

/// Type-erased default construction of `count` values at `dst`.
pub type CtorFn = unsafe fn(dst: *mut u8, count: usize);
/// Type-erased destruction of `count` values at `ptr`.
pub type DtorFn = unsafe fn(ptr: *mut u8, count: usize);
/// Type-erased clone of one value from `src` into uninitialized `dst`.
pub type CopyFn = unsafe fn(src: *const u8, dst: *mut u8);
/// Type-erased move of one value from `src` into uninitialized `dst`.
/// The source slot is logically uninitialized afterwards.
pub type MoveFn = unsafe fn(src: *mut u8, dst: *mut u8);
/// Type-erased swap of two initialized values.
pub type SwapFn = unsafe fn(a: *mut u8, b: *mut u8);
/// Type-erased equality of two initialized values.
pub type CmpFn = unsafe fn(a: *const u8, b: *const u8) -> bool;

unsafe fn ctor_impl<T: Default>(dst: *mut u8, count: usize) {
    let dst = dst.cast::<T>();
    for i in 0..count {
        unsafe { dst.add(i).write(T::default()) };
    }
}

unsafe fn dtor_impl<T>(ptr: *mut u8, count: usize) {
    let ptr = ptr.cast::<T>();
    for i in 0..count {
        unsafe { ptr.add(i).drop_in_place() };
    }
}

unsafe fn copy_impl<T: Clone>(src: *const u8, dst: *mut u8) {
    let value = unsafe { (*src.cast::<T>()).clone() };
    unsafe { dst.cast::<T>().write(value) };
}

unsafe fn move_impl<T>(src: *mut u8, dst: *mut u8) {
    // Rust moves are bitwise; the source must simply not be dropped again.
    unsafe { std::ptr::copy_nonoverlapping(src.cast::<T>(), dst.cast::<T>(), 1) };
}

unsafe fn swap_impl<T>(a: *mut u8, b: *mut u8) {
    unsafe { std::ptr::swap_nonoverlapping(a.cast::<T>(), b.cast::<T>(), 1) };
}

unsafe fn cmp_impl<T: PartialEq>(a: *const u8, b: *const u8) -> bool {
    unsafe { *a.cast::<T>() == *b.cast::<T>() }
}

/// Describes a registered component type.
///
/// ## Fields
/// - `entity`: Component entity identifying this type in archetypes.
/// - `desc_id`: Process-wide dense type id.
/// - `size` / `align`: Memory layout; size 0 marks a tag.
/// - `lookup_hash`: Stable per-process hash used in archetype hashing.
/// - Function pointers implementing the type-erased value operations.
#[derive(Clone, Copy)]
pub struct ComponentDescriptor {
    /// Component entity assigned by the cache.
    pub entity: Entity,

    /// Process-wide dense type id.
    pub desc_id: ComponentDescId,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Size of one value in bytes; 0 for tags.
    pub size: usize,

    /// Alignment of one value in bytes.
    pub align: usize,

    /// Stable per-process hash of the type identity.
    pub lookup_hash: u64,

    /// Default-constructs values in place.
    pub ctor: CtorFn,

    /// Drops values in place; absent for types without drop glue.
    pub dtor: Option<DtorFn>,

    /// Clones one value into an uninitialized slot.
    pub copy: CopyFn,

    /// Moves one value into an uninitialized slot.
    pub move_: MoveFn,

    /// Swaps two initialized values.
    pub swap: SwapFn,

    /// Compares two initialized values for equality.
    pub cmp: CmpFn,
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDescriptor {{ entity: {:?}, name: {}, size: {}, align: {} }}",
            self.entity, self.name, self.size, self.align
        )
    }
}

struct TypeIdRegistry {
    next: ComponentDescId,
    by_type: HashMap<TypeId, ComponentDescId>,
}

static TYPE_IDS: OnceLock<RwLock<TypeIdRegistry>> = OnceLock::new();

fn type_id_registry() -> &'static RwLock<TypeIdRegistry> {
    TYPE_IDS.get_or_init(|| RwLock::new(TypeIdRegistry { next: 0, by_type: HashMap::new() }))
}

/// Returns the process-wide dense id for component type `T`, assigning one
/// on first call.
pub fn component_desc_id_of<T: 'static>() -> ComponentDescId {
    let type_id = TypeId::of::<T>();

    {
        let registry = type_id_registry().read().unwrap_or_else(|e| e.into_inner());
        if let Some(&id) = registry.by_type.get(&type_id) {
            return id;
        }
    }

    let mut registry = type_id_registry().write().unwrap_or_else(|e| e.into_inner());
    if let Some(&id) = registry.by_type.get(&type_id) {
        return id;
    }
    let id = registry.next;
    registry.next += 1;
    registry.by_type.insert(type_id, id);
    id
}

fn lookup_hash_of<T: 'static>() -> u64 {
    let mut hasher = DefaultHasher::new();
    TypeId::of::<T>().hash(&mut hasher);
    hasher.finish()
}

/// Marker type backing the builtin `Is` relation.
#[derive(Default, Clone, Copy, PartialEq)]
struct IsRelation;

/// World-owned registry mapping component types to descriptors and
/// component entities.
pub struct ComponentCache {
    /// Descriptors indexed by `ComponentDescId`. Sparse: a world only fills
    /// the slots for types it has seen.
    items: Vec<Option<ComponentDescriptor>>,

    /// Component entity index → `ComponentDescId`.
    by_entity: Vec<ComponentDescId>,
}

impl ComponentCache {
    /// Creates a cache with the builtin `Is` relation pre-registered at
    /// entity index 0.
    pub fn new() -> Self {
        let mut cache = Self { items: Vec::new(), by_entity: Vec::new() };
        let is = cache.get_or_register::<IsRelation>(EntityKind::Generic);
        debug_assert_eq!(is, IS);
        cache
    }

    /// Registers component type `T` and returns its component entity.
    ///
    /// ## Behavior
    /// Idempotent: a type registered earlier (under either storage kind
    /// call) returns its existing entity. First registration assigns the
    /// next component entity index and captures the type-erased value
    /// operations.
    ///
    /// ## Panics
    /// Panics if `T`'s alignment exceeds the chunk data-area alignment;
    /// such a component could never be placed in a chunk.
    pub fn get_or_register<T>(&mut self, kind: EntityKind) -> Entity
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        let desc_id = component_desc_id_of::<T>();
        let idx = desc_id as usize;

        if idx < self.items.len() {
            if let Some(desc) = &self.items[idx] {
                return desc.entity;
            }
        } else {
            self.items.resize(idx + 1, None);
        }

        let align = std::mem::align_of::<T>();
        assert!(
            align <= CHUNK_DATA_ALIGN,
            "component {} alignment {} exceeds chunk data alignment {}",
            type_name::<T>(),
            align,
            CHUNK_DATA_ALIGN
        );

        let entity = Entity::component(self.by_entity.len() as EntityIndex, kind);
        let desc = ComponentDescriptor {
            entity,
            desc_id,
            name: type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align,
            lookup_hash: lookup_hash_of::<T>(),
            ctor: ctor_impl::<T>,
            dtor: if std::mem::needs_drop::<T>() { Some(dtor_impl::<T>) } else { None },
            copy: copy_impl::<T>,
            move_: move_impl::<T>,
            swap: swap_impl::<T>,
            cmp: cmp_impl::<T>,
        };

        self.items[idx] = Some(desc);
        self.by_entity.push(desc_id);
        entity
    }

    /// Looks up the descriptor of a component entity.
    ///
    /// Returns `None` for entities that are not components (data entities
    /// used as tags, pairs) — such ids occupy no bytes in a chunk.
    pub fn find(&self, entity: Entity) -> Option<&ComponentDescriptor> {
        if !entity.is_component() {
            return None;
        }
        let desc_id = *self.by_entity.get(entity.index() as usize)?;
        self.items.get(desc_id as usize)?.as_ref()
    }

    /// Returns the descriptor of a component entity.
    ///
    /// ## Panics
    /// The component must exist; this is used on hot paths after presence
    /// was established.
    #[inline]
    pub fn descriptor(&self, entity: Entity) -> &ComponentDescriptor {
        self.find(entity).expect("component entity is not registered")
    }

    /// Looks up the descriptor registered for type `T`, if any.
    pub fn find_by_type<T: 'static>(&self) -> Option<&ComponentDescriptor> {
        let desc_id = component_desc_id_of::<T>();
        self.items.get(desc_id as usize)?.as_ref()
    }

    /// Returns the component entity registered for type `T`, if any.
    pub fn entity_of<T: 'static>(&self) -> Option<Entity> {
        self.find_by_type::<T>().map(|d| d.entity)
    }

    /// Number of components registered in this world.
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    /// Returns `true` if no user components are registered yet.
    pub fn is_empty(&self) -> bool {
        // Slot 0 is always the builtin Is relation.
        self.by_entity.len() <= 1
    }

    /// Iterates registered descriptors for diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.items.iter().flatten()
    }
}

impl Default for ComponentCache {
    fn default() -> Self {
        Self::new()
    }
}
