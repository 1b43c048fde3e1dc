//! Iteration over the entities of matching archetypes.
//!
//! A query takes one lock bit from its world when it is created and gives it
//! back when it runs out of rows, when [`close`](Query::close) is called, or
//! when it is dropped. While any query is open, structural changes fail with
//! [`EcsError::LockedWorld`].
//!
//! Three sources feed a query: a scan of the archetype graph, the archetype
//! list of a cached filter, or the row ranges produced by a batch operation.

use crate::archetype::{Archetype, ArchetypeId};
use crate::batch::BatchArchetypes;
use crate::component::ComponentId;
use crate::entity::Entity;
use crate::filter::{matches_archetype, Filter};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Where the next archetype comes from.
#[derive(Debug, Clone)]
enum Source {
    /// Walk all graph nodes. `archetype` indexes into the current node's
    /// archetype list.
    Nodes { node: usize, archetype: usize },
    /// Walk the archetype list of a cached filter.
    Cached { index: usize },
    /// Walk the rows a batch operation just produced.
    Batch { index: usize },
}

impl Source {
    fn restart(&self) -> Self {
        match self {
            Source::Nodes { .. } => Source::Nodes { node: 0, archetype: 0 },
            Source::Cached { .. } => Source::Cached { index: 0 },
            Source::Batch { .. } => Source::Batch { index: 0 },
        }
    }
}

/// Iteration state shared by [`Query`] and [`QueryMut`].
struct Cursor<'f> {
    filter: Option<Box<dyn Filter + 'f>>,
    batch: Option<BatchArchetypes>,
    source: Source,
    archetype: Option<ArchetypeId>,
    row: u32,
    end: u32,
}

impl<'f> Cursor<'f> {
    fn filtered(filter: Box<dyn Filter + 'f>) -> Self {
        let source = if filter.cached().is_some() {
            Source::Cached { index: 0 }
        } else {
            Source::Nodes { node: 0, archetype: 0 }
        };
        Self {
            filter: Some(filter),
            batch: None,
            source,
            archetype: None,
            row: 0,
            end: 0,
        }
    }

    fn batch(batch: BatchArchetypes) -> Self {
        Self {
            filter: None,
            batch: Some(batch),
            source: Source::Batch { index: 0 },
            archetype: None,
            row: 0,
            end: 0,
        }
    }

    /// Step to the next row. Returns `false` once everything is visited.
    fn advance(&mut self, world: &World) -> bool {
        if self.archetype.is_some() && self.row + 1 < self.end {
            self.row += 1;
            return true;
        }
        while let Some((archetype, start, end)) =
            walk(&mut self.source, self.filter.as_deref(), self.batch.as_ref(), world)
        {
            if start < end {
                self.archetype = Some(archetype);
                self.row = start;
                self.end = end;
                return true;
            }
        }
        self.archetype = None;
        false
    }

    /// Total rows the cursor visits from the beginning.
    fn count(&self, world: &World) -> usize {
        let mut source = self.source.restart();
        let mut total = 0;
        while let Some((_, start, end)) = walk(&mut source, self.filter.as_deref(), self.batch.as_ref(), world) {
            total += (end - start) as usize;
        }
        total
    }

    fn position(&self) -> Result<(ArchetypeId, u32), EcsError> {
        self.archetype
            .map(|archetype| (archetype, self.row))
            .ok_or(EcsError::InvalidOperation("query is not positioned on a row"))
    }
}

/// One step of the archetype walk for any source.
fn walk(
    source: &mut Source,
    filter: Option<&(dyn Filter + '_)>,
    batch: Option<&BatchArchetypes>,
    world: &World,
) -> Option<(ArchetypeId, u32, u32)> {
    match source {
        Source::Batch { index } => {
            let entry = batch?.entries.get(*index)?;
            *index += 1;
            Some((entry.archetype, entry.start, entry.end))
        }
        Source::Cached { index } => {
            let list = world.cache.archetypes(filter?.cached()?).ok()?;
            let id = *list.get(*index)?;
            *index += 1;
            Some(full_range(world, id))
        }
        Source::Nodes { node, archetype } => {
            let filter = filter?;
            loop {
                let current = world.nodes.get(*node)?;
                if current.is_active() && filter.matches(current.mask()) {
                    let list = current.archetypes();
                    while *archetype < list.len() {
                        let id = list[*archetype];
                        *archetype += 1;
                        let arch = &world.archetypes[id.0 as usize];
                        if arch.is_active() && matches_archetype(filter, arch) {
                            return Some(full_range(world, id));
                        }
                    }
                }
                *node += 1;
                *archetype = 0;
            }
        }
    }
}

fn full_range(world: &World, id: ArchetypeId) -> (ArchetypeId, u32, u32) {
    (id, 0, world.archetypes[id.0 as usize].len() as u32)
}

fn relation_of(archetype: &Archetype, id: ComponentId) -> Result<Entity, EcsError> {
    World::check_relation(archetype, id)?;
    Ok(archetype.target())
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Read-only iteration over matching entities.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(Clone, Default)]
/// struct Health(u32);
/// impl Component for Health {}
///
/// let mut world = World::new();
/// let health = world.component_id::<Health>().unwrap();
/// world.new_entity(&[health]).unwrap();
///
/// let mut query = world.query(Mask::new(&[health])).unwrap();
/// while query.next() {
///     assert_eq!(query.get::<Health>(health).unwrap().0, 0);
/// }
/// assert!(!world.is_locked());
/// ```
pub struct Query<'w> {
    world: &'w World,
    cursor: Cursor<'w>,
    lock: Option<u8>,
}

impl<'w> Query<'w> {
    /// Advance to the next entity. Closes the query and returns `false`
    /// once all entities have been visited.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.lock.is_none() {
            return false;
        }
        if self.cursor.advance(self.world) {
            return true;
        }
        self.close();
        false
    }

    /// The current entity, or [`Entity::ZERO`] before the first and after
    /// the last call to [`next`](Query::next).
    pub fn entity(&self) -> Entity {
        match self.cursor.position() {
            Ok((archetype, row)) => self.world.archetypes[archetype.0 as usize].entity(row),
            Err(_) => Entity::ZERO,
        }
    }

    /// Component `id` of the current entity.
    pub fn get<T: 'static>(&self, id: ComponentId) -> Result<&'w T, EcsError> {
        let (archetype, row) = self.cursor.position()?;
        self.world.archetypes[archetype.0 as usize].get::<T>(row, id)
    }

    /// Whether the current entity has component `id`.
    pub fn has(&self, id: ComponentId) -> bool {
        self.cursor
            .position()
            .is_ok_and(|(archetype, _)| self.world.archetypes[archetype.0 as usize].has(id))
    }

    /// Target of the current entity's relation component `id`.
    pub fn relation(&self, id: ComponentId) -> Result<Entity, EcsError> {
        let (archetype, _) = self.cursor.position()?;
        relation_of(&self.world.archetypes[archetype.0 as usize], id)
    }

    /// Total number of entities the query visits, independent of how far
    /// iteration has progressed.
    pub fn count(&self) -> usize {
        self.cursor.count(self.world)
    }

    /// Release the world lock. Later calls to [`next`](Query::next) return
    /// `false`. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.cursor.archetype = None;
        if let Some(bit) = self.lock.take() {
            self.world.release_lock(bit);
        }
    }
}

impl Drop for Query<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// QueryMut
// ---------------------------------------------------------------------------

/// Iteration with write access to components.
///
/// Queries returned by batch operations also deliver the batch's change
/// events when they close.
pub struct QueryMut<'w> {
    world: &'w mut World,
    cursor: Cursor<'w>,
    lock: Option<u8>,
}

impl<'w> QueryMut<'w> {
    pub(crate) fn batch(world: &'w mut World, batch: BatchArchetypes) -> Result<Self, EcsError> {
        let lock = world.lock()?;
        Ok(Self {
            world,
            cursor: Cursor::batch(batch),
            lock: Some(lock),
        })
    }

    /// Advance to the next entity. Closes the query and returns `false`
    /// once all entities have been visited.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.lock.is_none() {
            return false;
        }
        if self.cursor.advance(self.world) {
            return true;
        }
        self.close();
        false
    }

    /// The current entity, or [`Entity::ZERO`] when not positioned on one.
    pub fn entity(&self) -> Entity {
        match self.cursor.position() {
            Ok((archetype, row)) => self.world.archetypes[archetype.0 as usize].entity(row),
            Err(_) => Entity::ZERO,
        }
    }

    /// Component `id` of the current entity.
    pub fn get<T: 'static>(&self, id: ComponentId) -> Result<&T, EcsError> {
        let (archetype, row) = self.cursor.position()?;
        self.world.archetypes[archetype.0 as usize].get::<T>(row, id)
    }

    /// Component `id` of the current entity, mutably.
    pub fn get_mut<T: 'static>(&mut self, id: ComponentId) -> Result<&mut T, EcsError> {
        let (archetype, row) = self.cursor.position()?;
        self.world.archetypes[archetype.0 as usize].get_mut::<T>(row, id)
    }

    /// Whether the current entity has component `id`.
    pub fn has(&self, id: ComponentId) -> bool {
        self.cursor
            .position()
            .is_ok_and(|(archetype, _)| self.world.archetypes[archetype.0 as usize].has(id))
    }

    /// Target of the current entity's relation component `id`.
    pub fn relation(&self, id: ComponentId) -> Result<Entity, EcsError> {
        let (archetype, _) = self.cursor.position()?;
        relation_of(&self.world.archetypes[archetype.0 as usize], id)
    }

    /// Total number of entities the query visits.
    pub fn count(&self) -> usize {
        self.cursor.count(self.world)
    }

    /// Release the world lock and deliver pending batch events. Closing
    /// twice is a no-op.
    pub fn close(&mut self) {
        self.cursor.archetype = None;
        let Some(bit) = self.lock.take() else {
            return;
        };
        self.world.release_lock(bit);
        if let Some(batch) = self.cursor.batch.take() {
            self.world.notify_batch(&batch);
        }
    }
}

impl Drop for QueryMut<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// World entry points
// ---------------------------------------------------------------------------

impl World {
    /// Iterate over entities matching `filter`.
    ///
    /// Fails with [`EcsError::NotRegistered`] for a stale cached filter and
    /// with [`EcsError::CapacityExceeded`] when too many queries are open.
    pub fn query<'w, F: Filter + 'w>(&'w self, filter: F) -> Result<Query<'w>, EcsError> {
        if let Some(cached) = filter.cached() {
            self.cache.archetypes(cached)?;
        }
        let lock = self.lock()?;
        Ok(Query {
            world: self,
            cursor: Cursor::filtered(Box::new(filter)),
            lock: Some(lock),
        })
    }

    /// Iterate over entities matching `filter` with write access.
    pub fn query_mut<'w, F: Filter + 'w>(&'w mut self, filter: F) -> Result<QueryMut<'w>, EcsError> {
        if let Some(cached) = filter.cached() {
            self.cache.archetypes(cached)?;
        }
        let lock = self.lock()?;
        Ok(QueryMut {
            world: self,
            cursor: Cursor::filtered(Box::new(filter)),
            lock: Some(lock),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Pos(f32);
    impl Component for Pos {}
    #[derive(Debug, Clone, Default, PartialEq)]
    struct Vel(f32);
    impl Component for Vel {}
    #[derive(Debug, Clone, Default)]
    struct Rel;
    impl Component for Rel {
        const IS_RELATION: bool = true;
    }

    fn setup() -> (World, ComponentId, ComponentId) {
        let mut world = World::new();
        let pos = world.component_id::<Pos>().unwrap();
        let vel = world.component_id::<Vel>().unwrap();
        (world, pos, vel)
    }

    fn collect(world: &World, filter: impl Filter) -> HashSet<Entity> {
        let mut query = world.query(filter).unwrap();
        let mut out = HashSet::new();
        while query.next() {
            out.insert(query.entity());
        }
        out
    }

    #[test]
    fn visits_all_matching_entities() {
        let (mut world, pos, vel) = setup();
        let a = world.new_entity(&[pos]).unwrap();
        let b = world.new_entity(&[pos, vel]).unwrap();
        let c = world.new_entity(&[vel]).unwrap();

        assert_eq!(collect(&world, Mask::new(&[pos])), HashSet::from([a, b]));
        assert_eq!(collect(&world, Mask::new(&[vel])), HashSet::from([b, c]));
        assert_eq!(collect(&world, Mask::new(&[pos]).without(&[vel])), HashSet::from([a]));
        assert_eq!(collect(&world, Mask::ZERO), HashSet::from([a, b, c]));
    }

    #[test]
    fn query_locks_until_exhausted() {
        let (mut world, pos, _) = setup();
        world.new_entity(&[pos]).unwrap();
        {
            let mut query = world.query(Mask::new(&[pos])).unwrap();
            assert!(world.is_locked());
            assert!(query.next());
            assert!(!query.next());
            assert!(!world.is_locked());
            assert!(!query.next());
        }
        assert!(!world.is_locked());
    }

    #[test]
    fn dropping_an_open_query_unlocks() {
        let (mut world, pos, _) = setup();
        world.new_entity(&[pos]).unwrap();
        world.new_entity(&[pos]).unwrap();
        {
            let mut query = world.query(Mask::new(&[pos])).unwrap();
            assert!(query.next());
        }
        assert!(!world.is_locked());
        world.new_entity(&[pos]).unwrap();
    }

    #[test]
    fn close_is_idempotent() {
        let (world, pos, _) = setup();
        let mut query = world.query(Mask::new(&[pos])).unwrap();
        query.close();
        query.close();
        assert!(!query.next());
        assert!(!world.is_locked());
    }

    #[test]
    fn nested_queries_hold_separate_locks() {
        let (mut world, pos, vel) = setup();
        world.new_entity(&[pos, vel]).unwrap();
        let mut outer = world.query(Mask::new(&[pos])).unwrap();
        assert!(outer.next());
        let mut inner = world.query(Mask::new(&[vel])).unwrap();
        assert!(inner.next());
        assert!(!inner.next());
        assert!(world.is_locked());
        assert!(!outer.next());
        assert!(!world.is_locked());
    }

    #[test]
    fn query_mut_writes_components() {
        let (mut world, pos, vel) = setup();
        for i in 0..10 {
            let e = world.new_entity(&[pos, vel]).unwrap();
            world.set(e, vel, Vel(i as f32)).unwrap();
        }
        let mut query = world.query_mut(Mask::new(&[pos, vel])).unwrap();
        assert_eq!(query.count(), 10);
        while query.next() {
            let v = query.get::<Vel>(vel).unwrap().0;
            query.get_mut::<Pos>(pos).unwrap().0 += v;
        }
        drop(query);

        let mut total = 0.0;
        let mut query = world.query(Mask::new(&[pos])).unwrap();
        while query.next() {
            total += query.get::<Pos>(pos).unwrap().0;
        }
        assert_eq!(total, 45.0);
    }

    #[test]
    fn count_ignores_progress() {
        let (mut world, pos, _) = setup();
        for _ in 0..5 {
            world.new_entity(&[pos]).unwrap();
        }
        let mut query = world.query(Mask::new(&[pos])).unwrap();
        assert_eq!(query.count(), 5);
        query.next();
        query.next();
        assert_eq!(query.count(), 5);
    }

    #[test]
    fn access_requires_position() {
        let (mut world, pos, vel) = setup();
        world.new_entity(&[pos]).unwrap();
        let mut query = world.query(Mask::new(&[pos])).unwrap();
        assert_eq!(query.entity(), Entity::ZERO);
        assert!(query.get::<Pos>(pos).is_err());
        assert!(query.next());
        assert!(query.has(pos));
        assert!(!query.has(vel));
        assert!(matches!(query.get::<Vel>(vel), Err(EcsError::MissingComponent { .. })));
        assert!(matches!(query.get::<Vel>(pos), Err(EcsError::TypeMismatch { .. })));
    }

    #[test]
    fn relation_filter_and_relation_access() {
        let (mut world, pos, _) = setup();
        let rel = world.component_id::<Rel>().unwrap();
        let t1 = world.new_entity(&[]).unwrap();
        let t2 = world.new_entity(&[]).unwrap();
        let mut children = Vec::new();
        for target in [t1, t1, t2] {
            let e = world.new_entity(&[pos, rel]).unwrap();
            world.relations().set(e, rel, target).unwrap();
            children.push(e);
        }

        let of_t1 = collect(&world, RelationFilter::new(Mask::new(&[rel]), t1));
        assert_eq!(of_t1, HashSet::from([children[0], children[1]]));
        assert_eq!(collect(&world, Mask::new(&[rel])).len(), 3);

        let mut query = world.query(RelationFilter::new(Mask::new(&[rel]), t2)).unwrap();
        assert!(query.next());
        assert_eq!(query.relation(rel).unwrap(), t2);
        assert!(matches!(query.relation(pos), Err(EcsError::NotARelation { .. })));
    }

    #[test]
    fn cached_and_uncached_agree() {
        let (mut world, pos, vel) = setup();
        let filter = world.cache().register(Mask::new(&[pos])).unwrap();
        for i in 0..20 {
            if i % 2 == 0 {
                world.new_entity(&[pos]).unwrap();
            } else {
                world.new_entity(&[pos, vel]).unwrap();
            }
        }
        world.new_entity(&[vel]).unwrap();
        assert_eq!(collect(&world, &filter), collect(&world, Mask::new(&[pos])));
        assert_eq!(world.query(&filter).unwrap().count(), 20);
    }

    #[test]
    fn empty_world_query() {
        let world = World::new();
        let mut query = world.query(Mask::ZERO).unwrap();
        assert_eq!(query.count(), 0);
        assert!(!query.next());
        assert!(!world.is_locked());
    }
}
