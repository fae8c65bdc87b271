//! Compiled query state: instruction stream, incremental matching, and the
//! archetype cache.
//!
//! A query's terms are compiled once into a small instruction stream. On
//! every execution the matcher consumes only archetypes created since the
//! previous run: per term entity it remembers how far into the
//! entity→archetypes index it has scanned, so matching cost is proportional
//! to world churn rather than world size.
//!
//! Matched archetypes land in a cache carrying, per archetype, the column
//! index of every term (so chunk iteration never searches id lists) and an
//! optional group id. Grouped caches keep entries sorted by group id;
//! insertions that perturb the order raise a flag consumed at the next
//! execution, never mid-iteration.

use std::collections::{HashMap, HashSet};

use crate::engine::archetype::Archetype;
use crate::engine::types::{
    ArchetypeId, Entity, GroupId, Version, COMPONENT_IDX_BAD, IS, MAX_COMPONENTS_PER_ARCHETYPE,
};
use crate::engine::world::World;

/// Matching operation of one compiled instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchOp {
    /// Restrict candidates to archetypes containing the term's entity.
    All,
    /// Union candidates with archetypes containing the term's entity.
    Any,
    /// Subtract archetypes containing the term's entity.
    Not,
    /// Like `All`, but follows the `Is` relation one hop.
    AllAs,
}

/// One compiled matcher instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Instruction {
    pub id: Entity,
    pub op: MatchOp,
}

/// Per-archetype payload of the query cache.
#[derive(Clone, Copy)]
pub(crate) struct ArchetypeCacheData {
    /// Group this archetype belongs to; 0 without grouping.
    pub group_id: GroupId,
    /// For every term, the component's position in the archetype's id
    /// list, or `COMPONENT_IDX_BAD` when absent (Not/Opt terms).
    pub indices: [u8; MAX_COMPONENTS_PER_ARCHETYPE],
}

/// Contiguous range of cache entries sharing a group id.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GroupData {
    pub group_id: GroupId,
    pub idx_first: u32,
    pub idx_last: u32,
}

/// Group id derivation; see `QueryBuilder::group_by`.
pub type GroupByFn = fn(&World, &Archetype, Entity) -> GroupId;

/// Compiled, incrementally updated matching state of one query.
#[derive(Default)]
pub(crate) struct QueryInfo {
    instructions: Vec<Instruction>,

    cache_archetypes: Vec<ArchetypeId>,
    cache_data: Vec<ArchetypeCacheData>,
    cached_set: HashSet<ArchetypeId>,
    group_data: Vec<GroupData>,

    /// Per-term-entity scan cursors into the entity→archetypes index.
    cursors_all: HashMap<Entity, u32>,
    cursors_any: HashMap<Entity, u32>,
    /// Scan cursor over the full archetype list (As and pure-Not terms).
    cursor_all_archetypes: u32,

    /// Total archetype slots seen at the last match; matching is skipped
    /// until the world grows past it.
    last_archetype_total: u32,
    /// World version recorded after the last execution; change filters
    /// compare against this.
    last_world_version: Version,

    sort_groups_pending: bool,
}

impl QueryInfo {
    /// Compiles canonicalized terms into the instruction stream.
    ///
    /// Terms arrive sorted by (op, entity) and deduplicated, so compiling
    /// the same term set twice yields identical streams.
    pub fn compile(terms: &[super::query::QueryTerm]) -> QueryInfo {
        use super::query::QueryOp;

        let mut instructions = Vec::with_capacity(terms.len());
        for term in terms {
            let op = match term.op {
                QueryOp::All => {
                    if term.id.is_pair() && term.id.rel_as_component() == Some(IS) {
                        MatchOp::AllAs
                    } else {
                        MatchOp::All
                    }
                }
                QueryOp::Any => MatchOp::Any,
                QueryOp::Not => MatchOp::Not,
                // Optional terms do not constrain matching.
                QueryOp::Opt => continue,
            };
            instructions.push(Instruction { id: term.id, op });
        }

        QueryInfo { instructions, ..QueryInfo::default() }
    }

    pub fn last_world_version(&self) -> Version {
        self.last_world_version
    }

    pub fn set_last_world_version(&mut self, version: Version) {
        self.last_world_version = version;
    }

    pub fn cached_archetypes(&self) -> &[ArchetypeId] {
        &self.cache_archetypes
    }

    pub fn cache_data(&self, idx: usize) -> &ArchetypeCacheData {
        &self.cache_data[idx]
    }

    // ── matching ────────────────────────────────────────────────────────────

    /// Returns `true` if `archetype` satisfies the instruction `inst`.
    fn term_present(world: &World, archetype: &Archetype, inst: Instruction) -> bool {
        match inst.op {
            MatchOp::All | MatchOp::Any | MatchOp::Not => archetype.has(inst.id),
            MatchOp::AllAs => {
                if archetype.has(inst.id) {
                    return true;
                }
                // Single hop: any plain entity id on the archetype whose own
                // archetype carries (Is, target).
                let base_index = inst.id.tgt_index();
                archetype.ids().iter().any(|&d| {
                    if d.is_component() || d.is_pair() {
                        return false;
                    }
                    world
                        .entity_from_index(d.index())
                        .map(|e| world.is_base_of_index(e, base_index))
                        .unwrap_or(false)
                })
            }
        }
    }

    fn matches_all_terms(world: &World, archetype: &Archetype, instructions: &[Instruction]) -> bool {
        instructions
            .iter()
            .filter(|i| matches!(i.op, MatchOp::All | MatchOp::AllAs))
            .all(|&i| Self::term_present(world, archetype, i))
    }

    /// Incrementally extends the archetype cache with archetypes created
    /// since the last call.
    pub fn update_match(
        &mut self,
        world: &World,
        group_by: Option<(Entity, GroupByFn)>,
        term_ids: &[Entity],
    ) {
        let total = world.archetypes.len() as u32;
        if total == self.last_archetype_total || self.instructions.is_empty() {
            return;
        }
        self.last_archetype_total = total;

        let instructions = std::mem::take(&mut self.instructions);

        let all_terms: Vec<Instruction> = instructions
            .iter()
            .copied()
            .filter(|i| matches!(i.op, MatchOp::All | MatchOp::AllAs))
            .collect();
        let any_terms: Vec<Instruction> =
            instructions.iter().copied().filter(|i| i.op == MatchOp::Any).collect();
        let not_terms: Vec<Instruction> =
            instructions.iter().copied().filter(|i| i.op == MatchOp::Not).collect();

        let mut candidates: Vec<ArchetypeId> = Vec::new();

        if let Some(first) = all_terms.first() {
            if first.op == MatchOp::AllAs {
                // Is-terms can be satisfied by archetypes that do not
                // contain the pair itself, so scan the whole list.
                let from = self.cursor_all_archetypes;
                self.cursor_all_archetypes = total;
                for aid in from..total {
                    let Some(archetype) = world.archetypes[aid as usize].as_ref() else { continue };
                    if Self::matches_all_terms(world, archetype, &all_terms) {
                        candidates.push(aid);
                    }
                }
            } else {
                let list = world.entity_to_archetypes.get(&first.id);
                let len = list.map_or(0, |l| l.len() as u32);
                let from = *self.cursors_all.get(&first.id).unwrap_or(&0);
                self.cursors_all.insert(first.id, len);

                if let Some(list) = list {
                    for &aid in list.iter().skip(from as usize) {
                        let Some(archetype) = world.archetypes[aid as usize].as_ref() else { continue };
                        if Self::matches_all_terms(world, archetype, &all_terms) {
                            candidates.push(aid);
                        }
                    }
                }
            }

            if candidates.is_empty() {
                self.instructions = instructions;
                return;
            }

            // ANY prunes the ALL candidates.
            if !any_terms.is_empty() {
                candidates.retain(|&aid| {
                    let archetype = world.archetypes[aid as usize].as_ref().expect("live archetype");
                    any_terms.iter().any(|&i| Self::term_present(world, archetype, i))
                });
            }
        } else if !any_terms.is_empty() {
            // No ALL terms: union the per-term archetype lists.
            let mut seen: HashSet<ArchetypeId> = HashSet::new();
            for inst in &any_terms {
                let list = world.entity_to_archetypes.get(&inst.id);
                let len = list.map_or(0, |l| l.len() as u32);
                let from = *self.cursors_any.get(&inst.id).unwrap_or(&0);
                self.cursors_any.insert(inst.id, len);

                if let Some(list) = list {
                    for &aid in list.iter().skip(from as usize) {
                        if seen.insert(aid) {
                            candidates.push(aid);
                        }
                    }
                }
            }
        } else if !not_terms.is_empty() {
            // Pure-NOT query: scan every archetype.
            let from = self.cursor_all_archetypes;
            self.cursor_all_archetypes = total;
            for aid in from..total {
                if world.archetypes[aid as usize].is_some() {
                    candidates.push(aid);
                }
            }
        }

        if !not_terms.is_empty() {
            candidates.retain(|&aid| {
                let archetype = world.archetypes[aid as usize].as_ref().expect("live archetype");
                !not_terms.iter().any(|&i| Self::term_present(world, archetype, i))
            });
        }

        for aid in candidates {
            if self.cached_set.contains(&aid) {
                continue;
            }
            let archetype = world.archetypes[aid as usize].as_ref().expect("live archetype");
            self.add_archetype_to_cache(world, archetype, group_by, term_ids);
        }

        self.instructions = instructions;
    }

    // ── cache maintenance ───────────────────────────────────────────────────

    fn create_cache_data(archetype: &Archetype, term_ids: &[Entity]) -> ArchetypeCacheData {
        let mut indices = [COMPONENT_IDX_BAD; MAX_COMPONENTS_PER_ARCHETYPE];
        for (t, &id) in term_ids.iter().enumerate() {
            if let Some(idx) = archetype.comp_idx(id) {
                indices[t] = idx as u8;
            }
        }
        ArchetypeCacheData { group_id: 0, indices }
    }

    fn add_archetype_to_cache(
        &mut self,
        world: &World,
        archetype: &Archetype,
        group_by: Option<(Entity, GroupByFn)>,
        term_ids: &[Entity],
    ) {
        let mut data = Self::create_cache_data(archetype, term_ids);
        self.cached_set.insert(archetype.id());

        let Some((group_entity, group_fn)) = group_by else {
            self.cache_archetypes.push(archetype.id());
            self.cache_data.push(data);
            return;
        };

        let group_id = group_fn(world, archetype, group_entity);
        data.group_id = group_id;

        // Keep group ranges contiguous. Appending to the tail group is
        // cheap; anything else shifts the ranges after it and schedules a
        // cache re-sort for the next execution.
        let mut found = false;
        for g in 0..self.group_data.len() {
            if self.group_data[g].group_id == group_id {
                self.group_data[g].idx_last += 1;
                for later in &mut self.group_data[g + 1..] {
                    later.idx_first += 1;
                    later.idx_last += 1;
                    self.sort_groups_pending = true;
                }
                found = true;
                break;
            }
            if group_id < self.group_data[g].group_id {
                let at = self.group_data[g].idx_first;
                self.group_data.insert(g, GroupData { group_id, idx_first: at, idx_last: at });
                for later in &mut self.group_data[g + 1..] {
                    later.idx_first += 1;
                    later.idx_last += 1;
                }
                self.sort_groups_pending = true;
                found = true;
                break;
            }
        }
        if !found {
            let at = self.cache_archetypes.len() as u32;
            self.group_data.push(GroupData { group_id, idx_first: at, idx_last: at });
        }

        self.cache_archetypes.push(archetype.id());
        self.cache_data.push(data);
    }

    /// Re-sorts the cache by group id if an insertion perturbed the order.
    ///
    /// Entries within a group keep their insertion order.
    pub fn sort_groups_if_pending(&mut self) {
        if !self.sort_groups_pending {
            return;
        }
        self.sort_groups_pending = false;

        let mut zipped: Vec<(ArchetypeCacheData, ArchetypeId)> =
            self.cache_data.iter().copied().zip(self.cache_archetypes.iter().copied()).collect();
        zipped.sort_by_key(|(data, _)| data.group_id);

        for (i, (data, aid)) in zipped.into_iter().enumerate() {
            self.cache_data[i] = data;
            self.cache_archetypes[i] = aid;
        }
    }

    /// Evicts a dead archetype and adjusts group ranges and scan cursors.
    pub fn remove_archetype(&mut self, aid: ArchetypeId) {
        // The entity→archetypes lists just shrank by one entry each, so
        // every cursor beyond zero steps back one slot. The full-list
        // cursor stays put: dead archetype slots are kept, not removed.
        for cursor in self.cursors_all.values_mut() {
            *cursor = cursor.saturating_sub(1);
        }
        for cursor in self.cursors_any.values_mut() {
            *cursor = cursor.saturating_sub(1);
        }

        if !self.cached_set.remove(&aid) {
            return;
        }
        let idx = self
            .cache_archetypes
            .iter()
            .position(|&a| a == aid)
            .expect("cached_set and cache agree");

        let group_id = self.cache_data[idx].group_id;
        self.cache_archetypes.remove(idx);
        self.cache_data.remove(idx);

        if let Some(g) = self.group_data.iter().position(|g| g.group_id == group_id) {
            for later in &mut self.group_data[g + 1..] {
                later.idx_first -= 1;
                later.idx_last -= 1;
            }
            let group = &mut self.group_data[g];
            if group.idx_last > group.idx_first {
                group.idx_last -= 1;
            } else {
                self.group_data.remove(g);
            }
        }
    }
}
