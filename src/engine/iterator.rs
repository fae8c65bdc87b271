//! Chunk iteration views.
//!
//! A [`ChunkIter`] is handed to query callbacks once per matched chunk. It
//! materializes typed slices over the chunk's SoA arrays using the column
//! indices the query cached for the archetype, so no id search happens
//! inside the loop.
//!
//! The iteration window depends on the constraint: enabled entities occupy
//! `[first_enabled_row, count)`, disabled entities `[0, first_enabled_row)`,
//! and `AcceptAll` spans the whole chunk. Disabled entities always precede
//! enabled ones.
//!
//! Mutable views stamp the component's change version on construction,
//! which is what change-filtered queries compare against.

use crate::engine::archetype::Archetype;
use crate::engine::query_info::ArchetypeCacheData;
use crate::engine::types::{
    bump_version, ChunkIndex, Entity, GroupId, Row, Version, COMPONENT_IDX_BAD,
};

/// Which entity population a query iterates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Constraints {
    /// Only enabled entities (the default).
    EnabledOnly,
    /// Only disabled entities.
    DisabledOnly,
    /// Both populations.
    AcceptAll,
}

impl Constraints {
    /// Row window selected by this constraint for a chunk with the given
    /// partition.
    #[inline]
    pub(crate) fn window(self, first_enabled_row: Row, count: Row) -> (Row, Row) {
        match self {
            Constraints::EnabledOnly => (first_enabled_row, count),
            Constraints::DisabledOnly => (0, first_enabled_row),
            Constraints::AcceptAll => (0, count),
        }
    }
}

/// View over one matched chunk during query execution.
pub struct ChunkIter<'a> {
    archetype: &'a mut Archetype,
    chunk_idx: ChunkIndex,
    data: &'a ArchetypeCacheData,
    from: Row,
    to: Row,
    world_version: &'a mut Version,
}

impl<'a> ChunkIter<'a> {
    pub(crate) fn new(
        archetype: &'a mut Archetype,
        chunk_idx: ChunkIndex,
        data: &'a ArchetypeCacheData,
        constraints: Constraints,
        world_version: &'a mut Version,
    ) -> Self {
        let chunk = &archetype.chunks()[chunk_idx as usize];
        let (from, to) = constraints.window(chunk.first_enabled_row(), chunk.count());
        Self { archetype, chunk_idx, data, from, to, world_version }
    }

    /// Number of rows in the iteration window.
    #[inline]
    pub fn size(&self) -> usize {
        (self.to - self.from) as usize
    }

    /// Entities of the iteration window, in row order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.archetype.chunks()[self.chunk_idx as usize].entities()[self.from as usize..self.to as usize]
    }

    /// Group id the owning archetype was cached under; 0 without grouping.
    #[inline]
    pub fn group_id(&self) -> GroupId {
        self.data.group_id
    }

    /// Returns `true` if the row at window position `i` is enabled.
    #[inline]
    pub fn enabled(&self, i: usize) -> bool {
        self.archetype.chunks()[self.chunk_idx as usize].enabled(self.from + i as Row)
    }

    #[inline]
    fn comp_idx(&self, term: usize) -> usize {
        let idx = self.data.indices[term];
        assert!(idx != COMPONENT_IDX_BAD, "term {term} is not present on this archetype");
        idx as usize
    }

    #[inline]
    fn term_bounds<T>(&self, term: usize) -> (usize, *mut u8, usize) {
        let comp_idx = self.comp_idx(term);
        debug_assert_eq!(
            self.archetype.comp_size(comp_idx),
            std::mem::size_of::<T>(),
            "view type does not match the term's component"
        );
        if comp_idx < self.archetype.props().gen_entities as usize {
            (comp_idx, self.archetype.comp_ptr(self.chunk_idx, comp_idx, self.from), self.size())
        } else {
            // Unique components expose their single per-chunk value.
            (comp_idx, self.archetype.unique_ptr(self.chunk_idx, comp_idx), 1)
        }
    }

    /// Read-only slice over the term's component for this window.
    ///
    /// `T` must be the type the term was built from.
    #[inline]
    pub fn view<T: 'static>(&self, term: usize) -> &[T] {
        let (_, ptr, len) = self.term_bounds::<T>(term);
        // SAFETY: the cached column index was resolved from T's component
        // entity and rows [from, to) are initialized.
        unsafe { std::slice::from_raw_parts(ptr.cast::<T>(), len) }
    }

    /// Mutable slice over the term's component; stamps the component's
    /// change version.
    #[inline]
    pub fn view_mut<T: 'static>(&mut self, term: usize) -> &mut [T] {
        let (comp_idx, ptr, len) = self.term_bounds::<T>(term);
        bump_version(self.world_version);
        let version = *self.world_version;
        self.archetype.chunks[self.chunk_idx as usize].touch_component(comp_idx, version);
        // SAFETY: as in view(); &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(ptr.cast::<T>(), len) }
    }

    /// One mutable and one read-only slice over two distinct terms.
    #[inline]
    pub fn split_mut<A: 'static, B: 'static>(&mut self, term_a: usize, term_b: usize) -> (&mut [A], &[B]) {
        assert_ne!(self.comp_idx(term_a), self.comp_idx(term_b), "split terms must be distinct");
        let (idx_a, ptr_a, len_a) = self.term_bounds::<A>(term_a);
        let (_, ptr_b, len_b) = self.term_bounds::<B>(term_b);
        bump_version(self.world_version);
        let version = *self.world_version;
        self.archetype.chunks[self.chunk_idx as usize].touch_component(idx_a, version);
        // SAFETY: distinct columns never alias; see view()/view_mut().
        unsafe {
            (
                std::slice::from_raw_parts_mut(ptr_a.cast::<A>(), len_a),
                std::slice::from_raw_parts(ptr_b.cast::<B>(), len_b),
            )
        }
    }
}
