//! Entity relations.
//!
//! A relation component ([`Component::IS_RELATION`]) makes its entity point
//! at a target entity. Entities with the same relation component but
//! different targets live in different archetypes of the same graph node, so
//! "all children of X" is a single archetype lookup.
//!
//! [`Component::IS_RELATION`]: crate::component::Component::IS_RELATION

use crate::component::ComponentId;
use crate::entity::Entity;
use crate::filter::Filter;
use crate::query::QueryMut;
use crate::world::World;
use crate::EcsError;

/// Relation access on a world, obtained from [`World::relations`].
pub struct Relations<'w> {
    world: &'w mut World,
}

impl<'w> Relations<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self { world }
    }

    /// Target of `entity`'s relation component `id`.
    pub fn get(&self, entity: Entity, id: ComponentId) -> Result<Entity, EcsError> {
        self.world.relation_target(entity, id)
    }

    /// Like [`get`](Relations::get) but without checking that `entity` is
    /// alive. A recycled handle reads whatever entity now occupies its slot.
    pub fn get_unchecked(&self, entity: Entity, id: ComponentId) -> Result<Entity, EcsError> {
        let location = self
            .world
            .locations
            .get(entity.index() as usize)
            .copied()
            .flatten()
            .ok_or(EcsError::DeadEntity { entity })?;
        let archetype = &self.world.archetypes[location.archetype.0 as usize];
        World::check_relation(archetype, id)?;
        Ok(archetype.target())
    }

    /// Point `entity`'s relation component `id` at `target`. The zero entity
    /// clears the target. Setting the current target again is a no-op.
    pub fn set(&mut self, entity: Entity, id: ComponentId, target: Entity) -> Result<(), EcsError> {
        self.world.check_locked()?;
        if self.world.relation_target(entity, id)? == target {
            return Ok(());
        }
        self.world.exchange_impl(entity, &[], &[], Some((id, target)), Vec::new())
    }

    /// Exchange components of `entity` and set the target of relation `id`
    /// in the resulting schema, all in one move.
    pub fn exchange(
        &mut self,
        entity: Entity,
        add: &[ComponentId],
        remove: &[ComponentId],
        id: ComponentId,
        target: Entity,
    ) -> Result<(), EcsError> {
        self.world.exchange_impl(entity, add, remove, Some((id, target)), Vec::new())
    }

    /// Set the relation target of every entity matching `filter`. Returns how
    /// many entities moved; entities already pointing at `target` are
    /// skipped.
    pub fn set_batch(&mut self, filter: impl Filter, id: ComponentId, target: Entity) -> Result<usize, EcsError> {
        let batch = self.world.exchange_batch_no_notify(&filter, &[], &[], Some((id, target)))?;
        self.world.notify_batch(&batch);
        Ok(batch.len())
    }

    /// Like [`set_batch`](Relations::set_batch), iterating over the moved
    /// entities. Events are sent when the query closes.
    pub fn set_batch_query(self, filter: impl Filter, id: ComponentId, target: Entity) -> Result<QueryMut<'w>, EcsError> {
        let batch = self.world.exchange_batch_no_notify(&filter, &[], &[], Some((id, target)))?;
        QueryMut::batch(self.world, batch)
    }

    /// Exchange components of every entity matching `filter` and set the
    /// target of relation `id` in the resulting schema.
    pub fn exchange_batch(
        &mut self,
        filter: impl Filter,
        add: &[ComponentId],
        remove: &[ComponentId],
        id: ComponentId,
        target: Entity,
    ) -> Result<usize, EcsError> {
        let batch = self.world.exchange_batch_no_notify(&filter, add, remove, Some((id, target)))?;
        self.world.notify_batch(&batch);
        Ok(batch.len())
    }

    /// Like [`exchange_batch`](Relations::exchange_batch), iterating over
    /// the moved entities. Events are sent when the query closes.
    pub fn exchange_batch_query(
        self,
        filter: impl Filter,
        add: &[ComponentId],
        remove: &[ComponentId],
        id: ComponentId,
        target: Entity,
    ) -> Result<QueryMut<'w>, EcsError> {
        let batch = self.world.exchange_batch_no_notify(&filter, add, remove, Some((id, target)))?;
        QueryMut::batch(self.world, batch)
    }
}

impl World {
    /// Target of `entity`'s relation component `id`.
    pub fn relation_target(&self, entity: Entity, id: ComponentId) -> Result<Entity, EcsError> {
        let location = self.location(entity)?;
        let archetype = &self.archetypes[location.archetype.0 as usize];
        Self::check_relation(archetype, id)?;
        Ok(archetype.target())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Debug, Clone, Default)]
    struct ChildOf;
    impl Component for ChildOf {
        const IS_RELATION: bool = true;
    }
    #[derive(Debug, Clone, Default, PartialEq)]
    struct Pos(f32);
    impl Component for Pos {}

    fn setup() -> (World, ComponentId, ComponentId) {
        let mut world = World::new();
        let child_of = world.component_id::<ChildOf>().unwrap();
        let pos = world.component_id::<Pos>().unwrap();
        (world, child_of, pos)
    }

    #[test]
    fn set_and_get_target() {
        let (mut world, child_of, pos) = setup();
        let parent = world.new_entity(&[]).unwrap();
        let child = world.new_entity(&[child_of, pos]).unwrap();
        world.set(child, pos, Pos(7.0)).unwrap();

        assert_eq!(world.relations().get(child, child_of).unwrap(), Entity::ZERO);
        world.relations().set(child, child_of, parent).unwrap();
        assert_eq!(world.relations().get(child, child_of).unwrap(), parent);
        assert_eq!(world.relations().get_unchecked(child, child_of).unwrap(), parent);
        assert_eq!(world.get::<Pos>(child, pos).unwrap(), &Pos(7.0));

        // Same target again does nothing.
        let location = world.location(child).unwrap();
        world.relations().set(child, child_of, parent).unwrap();
        assert_eq!(world.location(child).unwrap(), location);

        world.relations().set(child, child_of, Entity::ZERO).unwrap();
        assert_eq!(world.relations().get(child, child_of).unwrap(), Entity::ZERO);
    }

    #[test]
    fn relation_errors() {
        let (mut world, child_of, pos) = setup();
        let parent = world.new_entity(&[]).unwrap();
        let plain = world.new_entity(&[pos]).unwrap();
        let child = world.new_entity(&[child_of]).unwrap();

        assert!(matches!(
            world.relations().get(plain, child_of),
            Err(EcsError::MissingComponent { .. })
        ));
        assert!(matches!(
            world.relations().set(plain, pos, parent),
            Err(EcsError::NotARelation { .. })
        ));

        let dead = world.new_entity(&[]).unwrap();
        world.remove_entity(dead).unwrap();
        assert!(matches!(
            world.relations().set(child, child_of, dead),
            Err(EcsError::DeadEntity { entity }) if entity == dead
        ));
        assert_eq!(world.relations().get(child, child_of).unwrap(), Entity::ZERO);
    }

    #[test]
    fn removing_target_keeps_children_pointing_at_it() {
        let (mut world, child_of, _) = setup();
        let parent = world.new_entity(&[]).unwrap();
        let child = world.new_entity(&[child_of]).unwrap();
        world.relations().set(child, child_of, parent).unwrap();
        world.remove_entity(parent).unwrap();

        assert_eq!(world.relations().get(child, child_of).unwrap(), parent);
        assert!(!world.alive(parent));
        world.relations().set(child, child_of, Entity::ZERO).unwrap();
        // The orphaned archetype is parked once empty.
        assert!(world
            .archetypes()
            .filter(|a| a.relation().is_some() && a.is_active())
            .all(|a| a.target().is_zero()));
    }

    #[test]
    fn exchange_with_relation() {
        let (mut world, child_of, pos) = setup();
        let parent = world.new_entity(&[]).unwrap();
        let e = world.new_entity(&[pos]).unwrap();
        world.relations().exchange(e, &[child_of], &[], child_of, parent).unwrap();
        assert_eq!(world.relations().get(e, child_of).unwrap(), parent);
        assert!(world.has(e, pos).unwrap());

        assert!(matches!(
            world.relations().exchange(e, &[], &[child_of], child_of, parent),
            Err(EcsError::MissingComponent { .. })
        ));
    }

    #[test]
    fn set_batch_retargets() {
        let (mut world, child_of, _) = setup();
        let a = world.new_entity(&[]).unwrap();
        let b = world.new_entity(&[]).unwrap();
        world.batch().new_entities(5, &[child_of]).unwrap();

        let moved = world.relations().set_batch(Mask::new(&[child_of]), child_of, a).unwrap();
        assert_eq!(moved, 5);
        assert_eq!(world.query(RelationFilter::new(Mask::new(&[child_of]), a)).unwrap().count(), 5);

        // Already at target: skipped.
        let moved = world.relations().set_batch(Mask::new(&[child_of]), child_of, a).unwrap();
        assert_eq!(moved, 0);

        let mut query = world
            .relations()
            .set_batch_query(RelationFilter::new(Mask::new(&[child_of]), a), child_of, b)
            .unwrap();
        let mut seen = 0;
        while query.next() {
            assert_eq!(query.relation(child_of).unwrap(), b);
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[test]
    fn exchange_batch_query_visits_moved_entities() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Count(Arc<AtomicUsize>);
        impl Listener for Count {
            fn notify(&mut self, _world: &World, _event: &EntityEvent<'_>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn subscriptions(&self) -> Subscription {
                Subscription::RELATIONS
            }
        }

        let (mut world, child_of, pos) = setup();
        let parent = world.new_entity(&[]).unwrap();
        world.batch().new_entities(4, &[pos]).unwrap();
        world.batch().new_entities(2, &[]).unwrap();
        let events = Arc::new(AtomicUsize::new(0));
        world.set_listener(Box::new(Count(Arc::clone(&events))));

        let mut query = world
            .relations()
            .exchange_batch_query(Mask::new(&[pos]), &[child_of], &[], child_of, parent)
            .unwrap();
        let mut seen = 0;
        while query.next() {
            assert_eq!(query.relation(child_of).unwrap(), parent);
            assert!(query.has(pos));
            seen += 1;
            assert_eq!(events.load(Ordering::SeqCst), 0);
        }
        drop(query);
        assert_eq!(seen, 4);
        assert_eq!(events.load(Ordering::SeqCst), 4);
        assert!(!world.is_locked());
        assert_eq!(world.query(RelationFilter::new(Mask::new(&[child_of]), parent)).unwrap().count(), 4);
    }

    #[test]
    fn builder_style_creation_with_target() {
        let (mut world, child_of, pos) = setup();
        let parent = world.new_entity(&[]).unwrap();
        let builder = Builder::new(&[child_of, pos]).with_relation(child_of);
        let child = builder.new_entity_with_target(&mut world, parent).unwrap();
        assert_eq!(world.relations().get(child, child_of).unwrap(), parent);
    }
}
