//! Query construction and execution.
//!
//! A query is a set of terms `(entity, op)` with `op ∈ {All, Any, Not,
//! Opt}`, plus an optional change-filter list, an optional grouping
//! function, and a population constraint. Queries are built against a
//! world through [`QueryBuilder`], compiled once, and stored inside the
//! world; the returned [`Query`] is a copyable handle.
//!
//! ## Execution model
//! Each execution first extends the compiled matcher's archetype cache
//! with archetypes created since the previous run, applies any pending
//! group re-sort, then walks the cached archetypes chunk by chunk. Chunks
//! outside the constraint window are skipped; with a change filter, chunks
//! whose listed components did not change since the query's last run are
//! skipped as well. Each visited chunk is structurally locked for the
//! duration of the callback.
//!
//! Typed helpers (`each`, `each2_mut`, ...) iterate entities directly;
//! [`Query::each_chunk`] exposes the underlying [`ChunkIter`] for callers
//! that want whole slices.

use rayon::prelude::*;

use crate::engine::error::{CapacityError, EcsResult, MissingComponentError};
use crate::engine::iterator::{ChunkIter, Constraints};
use crate::engine::query_info::{GroupByFn, QueryInfo};
use crate::engine::types::{
    id_sort_key, ChunkIndex, Entity, EntityIndex, EntityKind, Version,
    MAX_COMPONENTS_PER_ARCHETYPE,
};
use crate::engine::world::World;

/// Matching operator of one query term.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueryOp {
    /// The archetype must contain the term's entity.
    All,
    /// At least one `Any` term must be present.
    Any,
    /// The archetype must not contain the term's entity.
    Not,
    /// Does not constrain matching; resolved to a column when present.
    Opt,
}

/// One term of a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueryTerm {
    /// Component entity, pair, or tag entity to match.
    pub id: Entity,
    /// Matching operator.
    pub op: QueryOp,
    /// Whether the query writes through this term.
    pub write: bool,
}

/// Stored state of a registered query.
pub(crate) struct QueryState {
    pub terms: Vec<QueryTerm>,
    /// Term ids in term order; used to resolve cached column indices.
    pub term_ids: Vec<Entity>,
    pub changed: Vec<Entity>,
    pub group_by: Option<(Entity, GroupByFn)>,
    pub constraints: Constraints,
    pub info: QueryInfo,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            term_ids: Vec::new(),
            changed: Vec::new(),
            group_by: None,
            constraints: Constraints::EnabledOnly,
            info: QueryInfo::default(),
        }
    }
}

/// Copyable handle to a query registered in a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Query {
    id: u32,
}

/// Builder for queries; obtained from [`World::query`].
pub struct QueryBuilder<'w> {
    world: &'w mut World,
    terms: Vec<QueryTerm>,
    changed: Vec<Entity>,
    group_by: Option<(Entity, GroupByFn)>,
    constraints: Constraints,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self {
            world,
            terms: Vec::new(),
            changed: Vec::new(),
            group_by: None,
            constraints: Constraints::EnabledOnly,
        }
    }

    fn push<T>(mut self, op: QueryOp, write: bool) -> Self
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        let id = self.world.cache.entity_of::<T>().unwrap_or_else(|| {
            self.world.cache.get_or_register::<T>(EntityKind::Generic)
        });
        self.terms.push(QueryTerm { id, op, write });
        self
    }

    /// Requires component `T` with read access.
    pub fn all<T>(self) -> Self
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        self.push::<T>(QueryOp::All, false)
    }

    /// Requires component `T` with write access.
    pub fn write<T>(self) -> Self
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        self.push::<T>(QueryOp::All, true)
    }

    /// Matches archetypes containing at least one `any` term.
    pub fn any<T>(self) -> Self
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        self.push::<T>(QueryOp::Any, false)
    }

    /// Excludes archetypes containing component `T`.
    pub fn none<T>(self) -> Self
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        self.push::<T>(QueryOp::Not, false)
    }

    /// Resolves component `T`'s column when present, without constraining
    /// the match.
    pub fn opt<T>(self) -> Self
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        self.push::<T>(QueryOp::Opt, false)
    }

    /// Adds a term on a raw entity id (tag entity or pair).
    pub fn term_id(mut self, id: Entity, op: QueryOp) -> Self {
        self.terms.push(QueryTerm { id, op, write: false });
        self
    }

    /// Requires the relationship pair `(rel, tgt)`.
    pub fn all_pair(self, rel: Entity, tgt: Entity) -> Self {
        self.term_id(Entity::pair(rel, tgt), QueryOp::All)
    }

    /// Only iterate chunks in which component `T` changed since this
    /// query's previous execution.
    pub fn changed<T>(mut self) -> Self
    where
        T: 'static + Send + Sync + Default + Clone + PartialEq,
    {
        let id = self.world.cache.entity_of::<T>().unwrap_or_else(|| {
            self.world.cache.get_or_register::<T>(EntityKind::Generic)
        });
        self.changed.push(id);
        self
    }

    /// Groups matched archetypes by `group_fn(world, archetype, entity)`.
    ///
    /// Iteration visits groups in ascending group id; entries within a
    /// group keep match order.
    pub fn group_by(mut self, entity: Entity, group_fn: GroupByFn) -> Self {
        self.group_by = Some((entity, group_fn));
        self
    }

    /// Selects which entity population the query iterates.
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Canonicalizes the terms, compiles the matcher, and registers the
    /// query in the world.
    ///
    /// ## Errors
    /// `CapacityExceeded` when the term count exceeds the per-archetype
    /// component cap.
    pub fn build(self) -> EcsResult<Query> {
        let QueryBuilder { world, mut terms, changed, group_by, constraints } = self;

        // Canonical form: stable sort by (op, id), duplicates merged with
        // their write flags OR-ed. Equivalent term permutations compile to
        // identical instruction streams.
        terms.sort_by_key(|t| (t.op, id_sort_key(t.id)));
        terms.dedup_by(|b, a| {
            if a.id == b.id && a.op == b.op {
                a.write |= b.write;
                true
            } else {
                false
            }
        });

        if terms.len() > MAX_COMPONENTS_PER_ARCHETYPE {
            return Err(CapacityError {
                what: "query terms",
                requested: terms.len() as u64,
                cap: MAX_COMPONENTS_PER_ARCHETYPE as u64,
            }
            .into());
        }

        let info = QueryInfo::compile(&terms);
        let term_ids = terms.iter().map(|t| t.id).collect();

        let id = world.queries.len() as u32;
        world.queries.push(QueryState { terms, term_ids, changed, group_by, constraints, info });
        Ok(Query { id })
    }
}

/// Iteration window for one chunk, or `None` when it should be skipped.
fn chunk_window(
    state: &QueryState,
    filter_idxs: &[usize],
    chunk: &crate::engine::chunk::Chunk,
    since: Version,
) -> Option<(u16, u16)> {
    let (from, to) = state.constraints.window(chunk.first_enabled_row(), chunk.count());
    if from >= to {
        return None;
    }
    if !state.changed.is_empty() && !filter_idxs.iter().any(|&i| chunk.did_change(i, since)) {
        return None;
    }
    Some((from, to))
}

/// Change-filter columns present on an archetype; `None` means the
/// archetype cannot satisfy the filter at all.
fn filter_columns(state: &QueryState, archetype: &crate::engine::archetype::Archetype) -> Option<Vec<usize>> {
    if state.changed.is_empty() {
        return Some(Vec::new());
    }
    let idxs: Vec<usize> = state.changed.iter().filter_map(|&c| archetype.comp_idx(c)).collect();
    if idxs.is_empty() {
        None
    } else {
        Some(idxs)
    }
}

impl Query {
    fn with_state<R>(self, world: &mut World, f: impl FnOnce(&mut QueryState, &mut World) -> R) -> R {
        let mut state = std::mem::take(&mut world.queries[self.id as usize]);
        let result = f(&mut state, world);
        world.queries[self.id as usize] = state;
        result
    }

    /// Resolves the term position of component `T`, registering nothing.
    fn term_of<T: 'static>(state: &QueryState, world: &World) -> EcsResult<usize> {
        let component = world.cache.entity_of::<T>().ok_or(MissingComponentError {
            entity: Entity::new(EntityIndex::MAX, 0),
            component: Entity::component(EntityIndex::MAX, EntityKind::Generic),
        })?;
        state
            .terms
            .iter()
            .position(|t| t.id == component)
            .ok_or_else(|| {
                MissingComponentError { entity: Entity::new(EntityIndex::MAX, 0), component }.into()
            })
    }

    /// Runs `f` once per matched chunk with a [`ChunkIter`] view.
    ///
    /// The chunk is structurally locked while `f` runs.
    pub fn each_chunk(self, world: &mut World, mut f: impl FnMut(&mut ChunkIter<'_>)) -> EcsResult<()> {
        self.with_state(world, |state, world| {
            state.info.update_match(world, state.group_by, &state.term_ids);
            state.info.sort_groups_if_pending();
            let since = state.info.last_world_version();

            {
                let World { archetypes, world_version, .. } = world;
                for idx in 0..state.info.cached_archetypes().len() {
                    let aid = state.info.cached_archetypes()[idx];
                    let Some(archetype) = archetypes[aid as usize].as_mut() else { continue };

                    let Some(filter_idxs) = filter_columns(state, archetype) else { continue };
                    let data = state.info.cache_data(idx);

                    for ci in 0..archetype.chunks.len() {
                        let Some(_) = chunk_window(state, &filter_idxs, &archetype.chunks[ci], since)
                        else {
                            continue;
                        };

                        archetype.chunks[ci].set_structural_lock(true);
                        {
                            let mut iter = ChunkIter::new(
                                archetype,
                                ci as ChunkIndex,
                                data,
                                state.constraints,
                                world_version,
                            );
                            f(&mut iter);
                        }
                        archetype.chunks[ci].set_structural_lock(false);
                    }
                }
            }

            state.info.set_last_world_version(world.world_version);
            Ok(())
        })
    }

    /// Calls `f` with a shared reference to component `T` of every matched
    /// entity.
    pub fn each<T: 'static>(self, world: &mut World, mut f: impl FnMut(&T)) -> EcsResult<()> {
        let term = self.with_state(world, |state, world| Self::term_of::<T>(state, world))?;
        self.each_chunk(world, |iter| {
            for value in iter.view::<T>(term) {
                f(value);
            }
        })
    }

    /// Calls `f` with a mutable reference to component `T` of every
    /// matched entity, recording the writes for change filters.
    pub fn each_mut<T: 'static>(self, world: &mut World, mut f: impl FnMut(&mut T)) -> EcsResult<()> {
        let term = self.with_state(world, |state, world| Self::term_of::<T>(state, world))?;
        self.each_chunk(world, |iter| {
            for value in iter.view_mut::<T>(term) {
                f(value);
            }
        })
    }

    /// Calls `f` with shared references to components `A` and `B`.
    pub fn each2<A: 'static, B: 'static>(
        self,
        world: &mut World,
        mut f: impl FnMut(&A, &B),
    ) -> EcsResult<()> {
        let (ta, tb) = self.with_state(world, |state, world| {
            Ok::<_, crate::engine::error::EcsError>((
                Self::term_of::<A>(state, world)?,
                Self::term_of::<B>(state, world)?,
            ))
        })?;
        self.each_chunk(world, |iter| {
            let a = iter.view::<A>(ta);
            let b = iter.view::<B>(tb);
            for i in 0..a.len() {
                f(&a[i], &b[i]);
            }
        })
    }

    /// Calls `f` with a mutable `A` and a shared `B` per matched entity.
    pub fn each2_mut<A: 'static, B: 'static>(
        self,
        world: &mut World,
        mut f: impl FnMut(&mut A, &B),
    ) -> EcsResult<()> {
        let (ta, tb) = self.with_state(world, |state, world| {
            Ok::<_, crate::engine::error::EcsError>((
                Self::term_of::<A>(state, world)?,
                Self::term_of::<B>(state, world)?,
            ))
        })?;
        self.each_chunk(world, |iter| {
            let (a, b) = iter.split_mut::<A, B>(ta, tb);
            for i in 0..a.len() {
                f(&mut a[i], &b[i]);
            }
        })
    }

    /// Calls `f` with the entity handle alongside component `T`.
    pub fn each_entity<T: 'static>(
        self,
        world: &mut World,
        mut f: impl FnMut(Entity, &T),
    ) -> EcsResult<()> {
        let term = self.with_state(world, |state, world| Self::term_of::<T>(state, world))?;
        self.each_chunk(world, |iter| {
            let values = iter.view::<T>(term);
            let entities = iter.entities();
            for i in 0..values.len() {
                f(entities[i], &values[i]);
            }
        })
    }

    /// Number of entities the query currently matches.
    pub fn count(self, world: &mut World) -> usize {
        self.with_state(world, |state, world| {
            state.info.update_match(world, state.group_by, &state.term_ids);
            state.info.sort_groups_if_pending();
            let since = state.info.last_world_version();

            let mut total = 0usize;
            for &aid in state.info.cached_archetypes() {
                let Some(archetype) = world.archetypes[aid as usize].as_ref() else { continue };
                let Some(filter_idxs) = filter_columns(state, archetype) else { continue };
                for chunk in archetype.chunks() {
                    if let Some((from, to)) = chunk_window(state, &filter_idxs, chunk, since) {
                        total += (to - from) as usize;
                    }
                }
            }
            total
        })
    }

    /// Fans read-only iteration of component `T` out across threads.
    ///
    /// Matching state is refreshed first; the iteration itself takes the
    /// world by shared reference, so no mutation can run concurrently.
    pub fn par_each<T>(self, world: &mut World, f: impl Fn(&T) + Send + Sync) -> EcsResult<()>
    where
        T: 'static + Sync,
    {
        self.with_state(world, |state, world| {
            state.info.update_match(world, state.group_by, &state.term_ids);
            state.info.sort_groups_if_pending();
            let since = state.info.last_world_version();
            let term = Self::term_of::<T>(state, world)?;

            let world_ro: &World = world;
            let chunks: Vec<(*const T, usize)> = state
                .info
                .cached_archetypes()
                .iter()
                .enumerate()
                .filter_map(|(idx, &aid)| {
                    let archetype = world_ro.archetypes[aid as usize].as_ref()?;
                    let filter_idxs = filter_columns(state, archetype)?;
                    let comp_idx = state.info.cache_data(idx).indices[term];
                    if comp_idx == crate::engine::types::COMPONENT_IDX_BAD {
                        return None;
                    }
                    let mut spans = Vec::new();
                    for ci in 0..archetype.chunks().len() {
                        let chunk = &archetype.chunks()[ci];
                        if let Some((from, to)) = chunk_window(state, &filter_idxs, chunk, since) {
                            let ptr = archetype
                                .comp_ptr(ci as ChunkIndex, comp_idx as usize, from)
                                .cast::<T>();
                            spans.push((ptr as *const T, (to - from) as usize));
                        }
                    }
                    Some(spans)
                })
                .flatten()
                .collect();

            // Raw pointers are not Send; wrap the spans for the fan-out.
            struct Span<T>(*const T, usize);
            unsafe impl<T: Sync> Send for Span<T> {}
            unsafe impl<T: Sync> Sync for Span<T> {}
            let spans: Vec<Span<T>> = chunks.into_iter().map(|(p, n)| Span(p, n)).collect();

            spans.par_iter().for_each(|span| {
                // SAFETY: the world is borrowed shared for the whole scope,
                // so chunk data cannot be mutated concurrently.
                let slice = unsafe { std::slice::from_raw_parts(span.0, span.1) };
                for value in slice {
                    f(value);
                }
            });

            state.info.set_last_world_version(world.world_version);
            Ok(())
        })
    }
}
