//! Operations over many entities at once.
//!
//! Batch operations move whole archetypes instead of single rows. Every
//! source archetype is validated before the first row moves, so a failed
//! batch changes nothing. Listener notifications are sent per entity after
//! the batch completes, or, for the `*_query` variants, when the returned
//! [`QueryMut`] closes.

use tracing::trace;

use crate::archetype::ArchetypeId;
use crate::bitmask::Mask;
use crate::component::{ComponentId, ComponentValue};
use crate::entity::Entity;
use crate::filter::Filter;
use crate::query::QueryMut;
use crate::world::{readded, EntityLocation, OldState, World};
use crate::EcsError;

/// A contiguous range of rows produced by a batch operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchEntry {
    pub(crate) archetype: ArchetypeId,
    pub(crate) start: u32,
    pub(crate) end: u32,
    /// State of the rows before the batch. `None` for new entities.
    pub(crate) old: Option<OldState>,
}

/// The rows a batch operation touched, kept for iteration and events.
#[derive(Debug, Clone, Default)]
pub(crate) struct BatchArchetypes {
    pub(crate) added: Vec<ComponentId>,
    pub(crate) removed: Vec<ComponentId>,
    pub(crate) entries: Vec<BatchEntry>,
}

impl BatchArchetypes {
    pub(crate) fn len(&self) -> usize {
        self.entries.iter().map(|e| (e.end - e.start) as usize).sum()
    }
}

fn batch_count(count: usize) -> Result<u32, EcsError> {
    u32::try_from(count).map_err(|_| EcsError::CapacityExceeded {
        what: "entities per batch",
        limit: u32::MAX as usize,
    })
}

// ---------------------------------------------------------------------------
// Batch handle
// ---------------------------------------------------------------------------

/// Batch operations on a world, obtained from [`World::batch`].
///
/// The `*_query` variants consume the handle and return a [`QueryMut`] over
/// exactly the affected entities.
pub struct Batch<'w> {
    world: &'w mut World,
}

impl<'w> Batch<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self { world }
    }

    /// Create `count` entities with default values for `ids`.
    pub fn new_entities(&mut self, count: usize, ids: &[ComponentId]) -> Result<(), EcsError> {
        let batch = self.world.new_entities_no_notify(batch_count(count)?, ids, None, Vec::new())?;
        self.world.notify_batch(&batch);
        Ok(())
    }

    /// Create `count` entities and iterate over them. Events are sent when
    /// the query closes.
    pub fn new_entities_query(self, count: usize, ids: &[ComponentId]) -> Result<QueryMut<'w>, EcsError> {
        let batch = self.world.new_entities_no_notify(batch_count(count)?, ids, None, Vec::new())?;
        QueryMut::batch(self.world, batch)
    }

    /// Create `count` entities, each with a clone of `values`.
    pub fn new_entities_with(&mut self, count: usize, values: Vec<ComponentValue>) -> Result<(), EcsError> {
        let ids: Vec<ComponentId> = values.iter().map(|v| v.id).collect();
        let batch = self.world.new_entities_no_notify(batch_count(count)?, &ids, None, values)?;
        self.world.notify_batch(&batch);
        Ok(())
    }

    /// Create `count` entities with a clone of `values` and iterate over
    /// them.
    pub fn new_entities_with_query(self, count: usize, values: Vec<ComponentValue>) -> Result<QueryMut<'w>, EcsError> {
        let ids: Vec<ComponentId> = values.iter().map(|v| v.id).collect();
        let batch = self.world.new_entities_no_notify(batch_count(count)?, &ids, None, values)?;
        QueryMut::batch(self.world, batch)
    }

    /// Remove every entity matching `filter`. Returns how many were removed.
    pub fn remove_entities(&mut self, filter: impl Filter) -> Result<usize, EcsError> {
        self.world.remove_entities_impl(&filter)
    }

    /// Add `ids` to every entity matching `filter`.
    pub fn add(&mut self, filter: impl Filter, ids: &[ComponentId]) -> Result<usize, EcsError> {
        self.exchange(filter, ids, &[])
    }

    /// Add `ids` to every entity matching `filter` and iterate over them.
    pub fn add_query(self, filter: impl Filter, ids: &[ComponentId]) -> Result<QueryMut<'w>, EcsError> {
        self.exchange_query(filter, ids, &[])
    }

    /// Remove `ids` from every entity matching `filter`.
    pub fn remove(&mut self, filter: impl Filter, ids: &[ComponentId]) -> Result<usize, EcsError> {
        self.exchange(filter, &[], ids)
    }

    /// Remove `ids` from every entity matching `filter` and iterate over
    /// them.
    pub fn remove_query(self, filter: impl Filter, ids: &[ComponentId]) -> Result<QueryMut<'w>, EcsError> {
        self.exchange_query(filter, &[], ids)
    }

    /// Exchange components of every entity matching `filter`. Returns how
    /// many entities moved.
    pub fn exchange(&mut self, filter: impl Filter, add: &[ComponentId], remove: &[ComponentId]) -> Result<usize, EcsError> {
        let batch = self.world.exchange_batch_no_notify(&filter, add, remove, None)?;
        self.world.notify_batch(&batch);
        Ok(batch.len())
    }

    /// Exchange components of every entity matching `filter` and iterate
    /// over the moved entities.
    pub fn exchange_query(
        self,
        filter: impl Filter,
        add: &[ComponentId],
        remove: &[ComponentId],
    ) -> Result<QueryMut<'w>, EcsError> {
        let batch = self.world.exchange_batch_no_notify(&filter, add, remove, None)?;
        QueryMut::batch(self.world, batch)
    }
}

// ---------------------------------------------------------------------------
// World internals
// ---------------------------------------------------------------------------

impl World {
    /// Create `count` entities in one archetype without notifying.
    pub(crate) fn new_entities_no_notify(
        &mut self,
        count: u32,
        ids: &[ComponentId],
        relation: Option<(ComponentId, Entity)>,
        values: Vec<ComponentValue>,
    ) -> Result<BatchArchetypes, EcsError> {
        self.check_locked()?;
        let mask = self.exchange_mask(&Mask::ZERO, ids, &[])?;
        let target = self.resolve_target(&self.archetypes[0], &mask, relation)?;
        self.check_values(&values)?;

        let root = self.root_node();
        let archetype = self.find_or_create_archetype(root, ids, &[], target);
        let arch = &mut self.archetypes[archetype.0 as usize];
        let end = (arch.len() as u32)
            .checked_add(count)
            .ok_or(EcsError::CapacityExceeded {
                what: "rows in an archetype",
                limit: u32::MAX as usize,
            })?;
        let start = arch.alloc_rows(count)?;
        for row in start..end {
            let entity = self.entity_pool.acquire();
            self.archetypes[archetype.0 as usize].set_entity(row, entity);
            self.set_location(entity, EntityLocation { archetype, row });
        }
        if count > 0 {
            let arch = &mut self.archetypes[archetype.0 as usize];
            for value in values {
                let id = value.id;
                arch.set_value(start, value)?;
                arch.clone_component(id, start, start + 1..end)?;
            }
            if !target.is_zero() {
                self.target_entities.set(target.index, true);
            }
        }
        trace!(count, archetype = archetype.0, "created entity batch");

        Ok(BatchArchetypes {
            added: ids.to_vec(),
            removed: Vec::new(),
            entries: vec![BatchEntry {
                archetype,
                start,
                end,
                old: None,
            }],
        })
    }

    /// Move every entity matching `filter` to the archetype reached by
    /// removing `remove` and adding `add`, optionally setting the relation
    /// target. Archetypes already in the resulting state are skipped unless
    /// the exchange re-adds components it removes.
    pub(crate) fn exchange_batch_no_notify(
        &mut self,
        filter: &dyn Filter,
        add: &[ComponentId],
        remove: &[ComponentId],
        relation: Option<(ComponentId, Entity)>,
    ) -> Result<BatchArchetypes, EcsError> {
        self.check_locked()?;
        let mut plan = Vec::new();
        for archetype in self.matching_archetypes(filter)? {
            let arch = &self.archetypes[archetype.0 as usize];
            if arch.is_empty() {
                continue;
            }
            let mask = self.exchange_mask(arch.mask(), add, remove)?;
            let target = self.resolve_target(arch, &mask, relation)?;
            plan.push((archetype, target));
        }

        let mut batch = BatchArchetypes {
            added: add.to_vec(),
            removed: remove.to_vec(),
            entries: Vec::with_capacity(plan.len()),
        };
        for (source, target) in plan {
            let old = OldState::of(&self.archetypes[source.0 as usize]);
            let node = self.archetypes[source.0 as usize].node();
            let dest = self.find_or_create_archetype(node, add, remove, target);
            if dest == source {
                // Nothing moves, but re-added components still reset.
                if readded(&old.mask, add).next().is_none() {
                    continue;
                }
                let end = self.archetypes[source.0 as usize].len() as u32;
                let arch = &mut self.archetypes[source.0 as usize];
                for id in readded(&old.mask, add) {
                    arch.reset_component(id, 0..end)?;
                }
                batch.entries.push(BatchEntry {
                    archetype: source,
                    start: 0,
                    end,
                    old: Some(old),
                });
                continue;
            }
            let (dest_arch, source_arch) = self.archetype_pair_mut(dest, source)?;
            let (start, count) = dest_arch.move_rows_from(source_arch)?;
            let end = start + count;
            let arch = &mut self.archetypes[dest.0 as usize];
            for id in readded(&old.mask, add) {
                arch.reset_component(id, start..end)?;
            }
            for row in start..end {
                let entity = self.archetypes[dest.0 as usize].entity(row);
                self.set_location(entity, EntityLocation { archetype: dest, row });
            }
            if !target.is_zero() {
                self.target_entities.set(target.index, true);
            }
            self.cleanup_archetype(source);
            batch.entries.push(BatchEntry {
                archetype: dest,
                start,
                end,
                old: Some(old),
            });
        }
        trace!(
            archetypes = batch.entries.len(),
            rows = batch.len(),
            "exchanged entity batch"
        );
        Ok(batch)
    }

    /// Remove every entity matching `filter`, notifying before each removal.
    pub(crate) fn remove_entities_impl(&mut self, filter: &dyn Filter) -> Result<usize, EcsError> {
        self.check_locked()?;
        let archetypes = self.matching_archetypes(filter)?;
        let bit = self.lock()?;
        let mut removed = 0;
        for archetype in archetypes {
            let arch = &self.archetypes[archetype.0 as usize];
            let len = arch.len() as u32;
            if len == 0 {
                continue;
            }
            let old = OldState::of(arch);
            let ids = arch.ids().to_vec();
            for row in 0..len {
                let entity = self.archetypes[archetype.0 as usize].entity(row);
                if self.listener.is_some() {
                    self.emit(&Self::removal_event(entity, &old, &ids));
                }
                self.locations[entity.index as usize] = None;
                if self.target_entities.get(entity.index) {
                    self.cleanup_archetypes(entity);
                    self.target_entities.set(entity.index, false);
                }
                self.entity_pool.release(entity)?;
            }
            self.archetypes[archetype.0 as usize].reset();
            self.cleanup_archetype(archetype);
            removed += len as usize;
        }
        self.unlock(bit)?;
        trace!(removed, "removed entity batch");
        Ok(removed)
    }

    /// Send one event per entity of `batch`.
    pub(crate) fn notify_batch(&mut self, batch: &BatchArchetypes) {
        if self.listener.is_none() {
            return;
        }
        for entry in &batch.entries {
            let template = match &entry.old {
                None => self.creation_event(Entity::ZERO, entry.archetype, &batch.added),
                Some(old) => self.exchange_event(Entity::ZERO, entry.archetype, old, &batch.added, &batch.removed),
            };
            if template.event_types.is_empty() {
                continue;
            }
            for row in entry.start..entry.end {
                let mut event = template;
                event.entity = self.archetypes[entry.archetype.0 as usize].entity(row);
                self.emit(&event);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Pos(f32);
    impl Component for Pos {}
    #[derive(Debug, Clone, Default, PartialEq)]
    struct Vel(f32);
    impl Component for Vel {}
    #[derive(Debug, Clone, Default, PartialEq)]
    struct Tag;
    impl Component for Tag {}

    fn setup() -> (World, ComponentId, ComponentId, ComponentId) {
        let mut world = World::new();
        let pos = world.component_id::<Pos>().unwrap();
        let vel = world.component_id::<Vel>().unwrap();
        let tag = world.component_id::<Tag>().unwrap();
        (world, pos, vel, tag)
    }

    fn count(world: &World, filter: impl Filter) -> usize {
        world.query(filter).unwrap().count()
    }

    #[test]
    fn new_entities_creates_count() {
        let (mut world, pos, vel, _) = setup();
        world.batch().new_entities(100, &[pos, vel]).unwrap();
        assert_eq!(world.entity_count(), 100);
        assert_eq!(count(&world, Mask::new(&[pos, vel])), 100);
        world.batch().new_entities(0, &[pos]).unwrap();
        assert_eq!(world.entity_count(), 100);
    }

    #[test]
    fn oversized_batches_fail_without_side_effects() {
        let (mut world, pos, _, _) = setup();
        let e = world.new_entity(&[pos]).unwrap();
        assert!(matches!(
            world.batch().new_entities(u32::MAX as usize, &[pos]),
            Err(EcsError::CapacityExceeded { .. })
        ));
        assert!(matches!(
            world.batch().new_entities(usize::MAX, &[pos]),
            Err(EcsError::CapacityExceeded { .. })
        ));
        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.location(e).unwrap().row, 0);
        assert!(!world.is_locked());
    }

    #[test]
    fn new_entities_query_visits_new_rows_only() {
        let (mut world, pos, _, _) = setup();
        world.batch().new_entities(5, &[pos]).unwrap();
        let mut query = world.batch().new_entities_query(3, &[pos]).unwrap();
        assert_eq!(query.count(), 3);
        let mut i = 0.0;
        while query.next() {
            query.get_mut::<Pos>(pos).unwrap().0 = i + 1.0;
            i += 1.0;
        }
        drop(query);
        assert!(!world.is_locked());
        let mut sum = 0.0;
        let mut q = world.query(Mask::new(&[pos])).unwrap();
        while q.next() {
            sum += q.get::<Pos>(pos).unwrap().0;
        }
        assert_eq!(sum, 6.0);
    }

    #[test]
    fn new_entities_with_clones_values() {
        let (mut world, pos, vel, _) = setup();
        world
            .batch()
            .new_entities_with(4, vec![ComponentValue::new(pos, Pos(2.5)), ComponentValue::new(vel, Vel(1.0))])
            .unwrap();
        let mut query = world.query(Mask::new(&[pos, vel])).unwrap();
        let mut seen = 0;
        while query.next() {
            assert_eq!(query.get::<Pos>(pos).unwrap(), &Pos(2.5));
            assert_eq!(query.get::<Vel>(vel).unwrap(), &Vel(1.0));
            seen += 1;
        }
        assert_eq!(seen, 4);
    }

    #[test]
    fn remove_entities_by_filter() {
        let (mut world, pos, vel, _) = setup();
        world.batch().new_entities(10, &[pos]).unwrap();
        world.batch().new_entities(5, &[pos, vel]).unwrap();
        let removed = world.batch().remove_entities(Mask::new(&[vel])).unwrap();
        assert_eq!(removed, 5);
        assert_eq!(world.entity_count(), 10);
        assert_eq!(count(&world, Mask::new(&[vel])), 0);
        assert!(world.archetypes().all(|a| a.is_coherent()));
    }

    #[test]
    fn batch_exchange_moves_all_matching() {
        let (mut world, pos, vel, tag) = setup();
        world.batch().new_entities(10, &[pos]).unwrap();
        world.batch().new_entities(10, &[pos, tag]).unwrap();
        world.batch().new_entities(3, &[vel]).unwrap();

        let moved = world.batch().add(Mask::new(&[pos]).without(&[tag]), &[vel]).unwrap();
        assert_eq!(moved, 10);
        assert_eq!(count(&world, Mask::new(&[pos, vel])), 10);

        let moved = world.batch().exchange(Mask::new(&[tag]), &[vel], &[tag]).unwrap();
        assert_eq!(moved, 10);
        assert_eq!(count(&world, Mask::new(&[tag])), 0);
        assert_eq!(count(&world, Mask::new(&[vel])), 23);

        let moved = world.batch().remove(Mask::new(&[vel]), &[vel]).unwrap();
        assert_eq!(moved, 23);
        assert_eq!(count(&world, Mask::new(&[vel])), 0);
    }

    #[test]
    fn batch_exchange_keeps_values_and_locations() {
        let (mut world, pos, vel, _) = setup();
        let mut entities = Vec::new();
        for i in 0..8 {
            let e = world.new_entity(&[pos]).unwrap();
            world.set(e, pos, Pos(i as f32)).unwrap();
            entities.push(e);
        }
        world.batch().add(Mask::new(&[pos]), &[vel]).unwrap();
        for (i, e) in entities.iter().enumerate() {
            assert_eq!(world.get::<Pos>(*e, pos).unwrap(), &Pos(i as f32));
            assert!(world.has(*e, vel).unwrap());
        }
    }

    #[test]
    fn failing_batch_changes_nothing() {
        let (mut world, pos, vel, _) = setup();
        world.batch().new_entities(4, &[pos]).unwrap();
        world.batch().new_entities(4, &[pos, vel]).unwrap();
        let result = world.batch().add(Mask::new(&[pos]), &[vel]);
        assert!(matches!(result, Err(EcsError::DuplicateComponent { .. })));
        assert_eq!(count(&world, Mask::new(&[pos]).without(&[vel])), 4);
        assert_eq!(count(&world, Mask::new(&[pos, vel])), 4);
    }

    #[test]
    fn batch_readd_resets_values() {
        let (mut world, pos, vel, tag) = setup();
        let plain = world.new_entity(&[pos]).unwrap();
        let tagged = world.new_entity(&[pos, tag]).unwrap();
        world.set(plain, pos, Pos(1.0)).unwrap();
        world.set(tagged, pos, Pos(2.0)).unwrap();

        // In place for plain, with a move for tagged.
        let moved = world.batch().exchange(Mask::new(&[pos]), &[pos], &[pos]).unwrap();
        assert_eq!(moved, 2);
        assert_eq!(world.get::<Pos>(plain, pos).unwrap(), &Pos::default());
        assert_eq!(world.get::<Pos>(tagged, pos).unwrap(), &Pos::default());

        world.set(tagged, pos, Pos(3.0)).unwrap();
        let moved = world.batch().exchange(Mask::new(&[tag]), &[pos, vel], &[pos, tag]).unwrap();
        assert_eq!(moved, 1);
        assert!(world.has(tagged, vel).unwrap());
        assert!(!world.has(tagged, tag).unwrap());
        assert_eq!(world.get::<Pos>(tagged, pos).unwrap(), &Pos::default());
        assert!(world.archetypes().all(|a| a.is_coherent()));
    }

    #[test]
    fn exchange_query_defers_unlock() {
        let (mut world, pos, vel, _) = setup();
        world.batch().new_entities(6, &[pos]).unwrap();
        let mut query = world.batch().exchange_query(Mask::new(&[pos]), &[vel], &[]).unwrap();
        assert_eq!(query.count(), 6);
        while query.next() {
            query.get_mut::<Vel>(vel).unwrap().0 = 3.0;
        }
        drop(query);
        assert!(!world.is_locked());
        world.new_entity(&[pos]).unwrap();
    }

    #[test]
    fn batch_ops_fail_when_locked() {
        let (mut world, pos, _, _) = setup();
        let bit = world.lock().unwrap();
        assert!(matches!(world.batch().new_entities(3, &[pos]), Err(EcsError::LockedWorld)));
        assert!(matches!(world.batch().remove_entities(Mask::ZERO), Err(EcsError::LockedWorld)));
        world.unlock(bit).unwrap();
        assert_eq!(world.entity_count(), 0);
    }
}
