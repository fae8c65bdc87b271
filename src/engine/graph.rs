//! Archetype graph edges.
//!
//! Every archetype keeps two small maps keyed by component entity: `add`
//! edges point to the archetype reached by adding that component, `del`
//! edges to the archetype reached by removing it. Together they let
//! structural mutations hop between archetypes in O(1) without re-hashing
//! the component set.
//!
//! Edges are recorded symmetrically: when `A + E = B` is discovered, `A`
//! gains an add edge on `E` towards `B` and `B` gains a del edge on `E`
//! back towards `A`.
//!
//! The root archetype stores no add edges; it would accumulate one per
//! registered component, so transitions out of the root always go through
//! the hash lookup instead.

use std::collections::HashMap;

use crate::engine::types::{ArchetypeId, Entity, LookupHash};

/// Target of a graph edge: the archetype id plus its lookup hash, so a hop
/// can validate against the registry without recomputing the hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchetypeGraphEdge {
    /// Destination archetype.
    pub id: ArchetypeId,
    /// Destination's component-set lookup hash.
    pub hash: LookupHash,
}

/// Per-archetype add/del edge maps.
#[derive(Default)]
pub struct ArchetypeGraph {
    edges_add: HashMap<Entity, ArchetypeGraphEdge>,
    edges_del: HashMap<Entity, ArchetypeGraphEdge>,
}

impl ArchetypeGraph {
    /// Records an "add" edge on `entity` towards `id`.
    pub fn add_edge_right(&mut self, entity: Entity, id: ArchetypeId, hash: LookupHash) {
        let prev = self.edges_add.insert(entity, ArchetypeGraphEdge { id, hash });
        debug_assert!(prev.is_none(), "add edge recorded twice for {entity:?}");
    }

    /// Records a "del" edge on `entity` towards `id`.
    pub fn add_edge_left(&mut self, entity: Entity, id: ArchetypeId, hash: LookupHash) {
        let prev = self.edges_del.insert(entity, ArchetypeGraphEdge { id, hash });
        debug_assert!(prev.is_none(), "del edge recorded twice for {entity:?}");
    }

    /// Deletes the "add" edge on `entity`, if present.
    pub fn del_edge_right(&mut self, entity: Entity) {
        self.edges_add.remove(&entity);
    }

    /// Deletes the "del" edge on `entity`, if present.
    pub fn del_edge_left(&mut self, entity: Entity) {
        self.edges_del.remove(&entity);
    }

    /// Looks up the archetype reached by adding `entity`.
    #[inline]
    pub fn find_edge_right(&self, entity: Entity) -> Option<ArchetypeGraphEdge> {
        self.edges_add.get(&entity).copied()
    }

    /// Looks up the archetype reached by removing `entity`.
    #[inline]
    pub fn find_edge_left(&self, entity: Entity) -> Option<ArchetypeGraphEdge> {
        self.edges_del.get(&entity).copied()
    }

    /// Iterates all add edges (towards larger sets).
    pub fn edges_right(&self) -> impl Iterator<Item = (Entity, ArchetypeGraphEdge)> + '_ {
        self.edges_add.iter().map(|(&e, &edge)| (e, edge))
    }

    /// Iterates all del edges (towards smaller sets).
    pub fn edges_left(&self) -> impl Iterator<Item = (Entity, ArchetypeGraphEdge)> + '_ {
        self.edges_del.iter().map(|(&e, &edge)| (e, edge))
    }

    /// Number of edges in both directions, for diagnostics.
    pub fn edge_count(&self) -> usize {
        self.edges_add.len() + self.edges_del.len()
    }
}
