//! Entity builder for a fixed component schema.

use crate::component::ComponentId;
use crate::entity::Entity;
use crate::query::QueryMut;
use crate::world::World;
use crate::EcsError;

/// Creates entities with a fixed set of components, optionally pointing a
/// relation component at a target.
///
/// ```
/// use tessera_ecs::prelude::*;
///
/// #[derive(Clone, Default)]
/// struct ChildOf;
/// impl Component for ChildOf {
///     const IS_RELATION: bool = true;
/// }
///
/// let mut world = World::new();
/// let child_of = world.component_id::<ChildOf>().unwrap();
/// let parent = world.new_entity(&[]).unwrap();
///
/// let children = Builder::new(&[child_of]).with_relation(child_of);
/// children.new_batch(&mut world, 10, Some(parent)).unwrap();
/// let filter = RelationFilter::new(Mask::new(&[child_of]), parent);
/// assert_eq!(world.query(filter).unwrap().count(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct Builder {
    ids: Vec<ComponentId>,
    relation: Option<ComponentId>,
}

impl Builder {
    /// A builder for entities with components `ids`.
    pub fn new(ids: &[ComponentId]) -> Self {
        Self {
            ids: ids.to_vec(),
            relation: None,
        }
    }

    /// Use `id`, which must be one of the builder's components, as the
    /// relation whose target the `*target` methods set.
    pub fn with_relation(mut self, id: ComponentId) -> Self {
        self.relation = Some(id);
        self
    }

    /// The builder's components.
    pub fn ids(&self) -> &[ComponentId] {
        &self.ids
    }

    fn relation_for(&self, target: Option<Entity>) -> Result<Option<(ComponentId, Entity)>, EcsError> {
        match (target, self.relation) {
            (None, _) => Ok(None),
            (Some(target), Some(id)) => Ok(Some((id, target))),
            (Some(_), None) => Err(EcsError::InvalidOperation("builder has no relation component")),
        }
    }

    /// Create one entity.
    pub fn new_entity(&self, world: &mut World) -> Result<Entity, EcsError> {
        world.new_entity(&self.ids)
    }

    /// Create one entity whose relation points at `target`.
    pub fn new_entity_with_target(&self, world: &mut World, target: Entity) -> Result<Entity, EcsError> {
        match self.relation_for(Some(target))? {
            Some((id, target)) => world.new_entity_target(&self.ids, id, target),
            None => world.new_entity(&self.ids),
        }
    }

    /// Create `count` entities, with their relation pointing at `target` if
    /// one is given.
    pub fn new_batch(&self, world: &mut World, count: usize, target: Option<Entity>) -> Result<(), EcsError> {
        let relation = self.relation_for(target)?;
        let count = u32::try_from(count).map_err(|_| EcsError::CapacityExceeded {
            what: "entities per batch",
            limit: u32::MAX as usize,
        })?;
        let batch = world.new_entities_no_notify(count, &self.ids, relation, Vec::new())?;
        world.notify_batch(&batch);
        Ok(())
    }

    /// Like [`new_batch`](Builder::new_batch), iterating over the new
    /// entities. Events are sent when the query closes.
    pub fn new_batch_query<'w>(
        &self,
        world: &'w mut World,
        count: usize,
        target: Option<Entity>,
    ) -> Result<QueryMut<'w>, EcsError> {
        let relation = self.relation_for(target)?;
        let count = u32::try_from(count).map_err(|_| EcsError::CapacityExceeded {
            what: "entities per batch",
            limit: u32::MAX as usize,
        })?;
        let batch = world.new_entities_no_notify(count, &self.ids, relation, Vec::new())?;
        QueryMut::batch(world, batch)
    }

    /// Add the builder's components to an existing entity, with the
    /// relation pointing at `target` if one is given.
    pub fn add(&self, world: &mut World, entity: Entity, target: Option<Entity>) -> Result<(), EcsError> {
        let relation = self.relation_for(target)?;
        world.exchange_impl(entity, &self.ids, &[], relation, Vec::new())
    }
}
