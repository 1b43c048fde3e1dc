//! The [`World`]: entities, their components, and the archetype graph.
//!
//! All component access goes through [`ComponentId`]s handed out by
//! [`World::component_id`]. Structural changes (creating or removing
//! entities, adding or removing components, changing relation targets) move
//! rows between archetypes and are rejected with [`EcsError::LockedWorld`]
//! while any query or manual lock is open.

use std::cell::RefCell;
use std::fmt;

use tracing::{debug, warn};

use crate::archetype::{Archetype, ArchetypeId};
use crate::batch::Batch;
use crate::bitmask::{BitSet, Mask};
use crate::cache::{Cache, FilterCache};
use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry, ComponentValue};
use crate::config::Config;
use crate::entity::{Entity, EntityPool};
use crate::event::{subscribes, EntityEvent, Listener, Subscription};
use crate::filter::{matches_archetype, Filter};
use crate::node::{ArchNode, NodeId};
use crate::pool::LockMask;
use crate::relations::Relations;
use crate::resource::Resources;
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where an entity's components are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// The archetype holding the entity.
    pub archetype: ArchetypeId,
    /// The entity's row within that archetype.
    pub row: u32,
}

/// State of an entity before a structural change, kept for the event.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OldState {
    pub(crate) mask: Mask,
    pub(crate) relation: Option<ComponentId>,
    pub(crate) target: Entity,
}

impl OldState {
    pub(crate) fn of(archetype: &Archetype) -> Self {
        Self {
            mask: *archetype.mask(),
            relation: archetype.relation(),
            target: archetype.target(),
        }
    }
}

/// IDs in `add` that `old` already holds. An exchange removes and re-adds
/// them, which resets their values.
pub(crate) fn readded<'a>(old: &'a Mask, add: &'a [ComponentId]) -> impl Iterator<Item = ComponentId> + 'a {
    add.iter().copied().filter(move |id| old.get(*id))
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Archetype-based entity and component storage.
///
/// A world is single-threaded; run independent worlds on separate threads
/// for parallelism.
pub struct World {
    pub(crate) config: Config,
    pub(crate) registry: ComponentRegistry,
    pub(crate) resources: Resources,
    pub(crate) entity_pool: EntityPool,
    /// Indexed by `Entity::index`. `None` for free slots.
    pub(crate) locations: Vec<Option<EntityLocation>>,
    /// Entities currently used as a relation target.
    pub(crate) target_entities: BitSet,
    pub(crate) archetypes: Vec<Archetype>,
    pub(crate) nodes: Vec<ArchNode>,
    pub(crate) relation_nodes: Vec<NodeId>,
    pub(crate) cache: FilterCache,
    pub(crate) locks: RefCell<LockMask>,
    pub(crate) listener: Option<Box<dyn Listener>>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entity_pool.len())
            .field("components", &self.registry.len())
            .field("nodes", &self.nodes.len())
            .field("archetypes", &self.archetypes.len())
            .field("cache", &self.cache)
            .field("locked", &self.is_locked())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a world with the default [`Config`].
    pub fn new() -> Self {
        Self::build(Config::default())
    }

    /// Create a world with `config`, failing with
    /// [`EcsError::InvalidConfig`] if it is invalid.
    pub fn with_config(config: Config) -> Result<Self, EcsError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: Config) -> Self {
        let mut world = Self {
            config,
            registry: ComponentRegistry::new(),
            resources: Resources::default(),
            entity_pool: EntityPool::new(config.capacity_increment),
            locations: vec![None],
            target_entities: BitSet::default(),
            archetypes: Vec::new(),
            nodes: Vec::new(),
            relation_nodes: Vec::new(),
            cache: FilterCache::default(),
            locks: RefCell::new(LockMask::default()),
            listener: None,
        };
        let root = world.create_node(Mask::ZERO);
        world.archetype_for_target(root, Entity::ZERO);
        world
    }

    /// The node of the empty mask.
    pub(crate) fn root_node(&self) -> NodeId {
        NodeId(0)
    }

    /// The configuration the world was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // -- registration --------------------------------------------------------

    /// The ID of component type `T`, registering it on first use.
    ///
    /// Registering a new type fails with [`EcsError::LockedWorld`] while the
    /// world is locked, and with [`EcsError::CapacityExceeded`] once
    /// [`MASK_TOTAL_BITS`](crate::bitmask::MASK_TOTAL_BITS) types exist.
    pub fn component_id<T: Component>(&mut self) -> Result<ComponentId, EcsError> {
        let (id, created) = self.registry.register::<T>()?;
        if created && self.is_locked() {
            self.registry.unregister_last();
            return Err(EcsError::LockedWorld);
        }
        Ok(id)
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Metadata of a registered component.
    pub fn component_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.registry.info(id)
    }

    /// Global resources.
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Global resources, mutably.
    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    // -- locking -------------------------------------------------------------

    /// Whether any lock bit is held.
    pub fn is_locked(&self) -> bool {
        self.locks.borrow().is_locked()
    }

    /// Take a lock bit, forbidding structural changes until it is released.
    ///
    /// Queries do this on their own; manual locks are for code that hands
    /// out rows outside of a query.
    pub fn lock(&self) -> Result<u8, EcsError> {
        self.locks.borrow_mut().lock()
    }

    /// Release a lock bit taken by [`World::lock`].
    ///
    /// Fails with [`EcsError::UnbalancedUnlock`] if the bit is not held.
    pub fn unlock(&self, bit: u8) -> Result<(), EcsError> {
        self.locks.borrow_mut().unlock(bit)
    }

    pub(crate) fn check_locked(&self) -> Result<(), EcsError> {
        if self.is_locked() {
            Err(EcsError::LockedWorld)
        } else {
            Ok(())
        }
    }

    // -- listener ------------------------------------------------------------

    /// Install `listener`, returning the previous one.
    pub fn set_listener(&mut self, listener: Box<dyn Listener>) -> Option<Box<dyn Listener>> {
        let previous = self.listener.replace(listener);
        if previous.is_some() {
            debug!("replaced world listener");
        }
        previous
    }

    /// Remove and return the listener.
    pub fn remove_listener(&mut self) -> Option<Box<dyn Listener>> {
        self.listener.take()
    }

    /// Whether a listener is installed.
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Hand `event` to the listener if it subscribes to it.
    pub(crate) fn emit(&mut self, event: &EntityEvent<'_>) {
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        let trigger = listener.subscriptions() & event.event_types;
        if subscribes(
            trigger,
            Some(&event.added),
            Some(&event.removed),
            listener.components(),
            event.old_relation,
            event.new_relation,
        ) {
            listener.notify(self, event);
        }
        self.listener = Some(listener);
    }

    // -- locations -----------------------------------------------------------

    /// Location of a live entity.
    pub fn location(&self, entity: Entity) -> Result<EntityLocation, EcsError> {
        if !self.entity_pool.is_alive(entity) {
            return Err(EcsError::DeadEntity { entity });
        }
        self.locations
            .get(entity.index as usize)
            .copied()
            .flatten()
            .ok_or(EcsError::DeadEntity { entity })
    }

    pub(crate) fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        let index = entity.index as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, None);
        }
        self.locations[index] = Some(location);
    }

    /// After a swap-remove of `row`, point the entity now at `row` to it.
    pub(crate) fn fix_swapped(&mut self, archetype: ArchetypeId, row: u32, swapped: bool) {
        if !swapped {
            return;
        }
        let moved = self.archetypes[archetype.0 as usize].entity(row);
        if let Some(Some(location)) = self.locations.get_mut(moved.index as usize) {
            location.row = row;
        }
    }

    /// Two distinct archetypes borrowed mutably at once.
    pub(crate) fn archetype_pair_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> Result<(&mut Archetype, &mut Archetype), EcsError> {
        let (a, b) = (a.0 as usize, b.0 as usize);
        if a == b {
            return Err(EcsError::InvalidOperation("archetype pair must be distinct"));
        }
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            Ok((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            Ok((&mut right[0], &mut left[b]))
        }
    }

    // -- validation ----------------------------------------------------------

    /// The mask that results from removing `remove` and then adding `add` to
    /// `old`, or the reason the exchange is invalid.
    pub(crate) fn exchange_mask(&self, old: &Mask, add: &[ComponentId], remove: &[ComponentId]) -> Result<Mask, EcsError> {
        let mut mask = *old;
        for &id in remove {
            if !mask.get(id) {
                return Err(EcsError::MissingComponent { id });
            }
            mask.set(id, false);
        }
        for &id in add {
            if self.registry.info(id).is_none() {
                return Err(EcsError::UnknownComponent { id });
            }
            if mask.get(id) {
                return Err(EcsError::DuplicateComponent { id });
            }
            mask.set(id, true);
        }
        let relations = mask.and(self.registry.relations());
        if relations.total_bits_set() > 1 {
            let id = add
                .iter()
                .copied()
                .find(|id| relations.get(*id))
                .or_else(|| relations.first_id());
            if let Some(id) = id {
                return Err(EcsError::MultipleRelations { id });
            }
        }
        Ok(mask)
    }

    /// The relation target an archetype change ends up with.
    ///
    /// With an explicit `(relation, target)`, the relation must be present in
    /// `mask` and the target alive or zero. Without one, an entity keeps its
    /// old target as long as it keeps its relation component.
    pub(crate) fn resolve_target(
        &self,
        old: &Archetype,
        mask: &Mask,
        relation: Option<(ComponentId, Entity)>,
    ) -> Result<Entity, EcsError> {
        match relation {
            Some((id, target)) => {
                if !mask.get(id) {
                    return Err(EcsError::MissingComponent { id });
                }
                if !self.registry.is_relation(id) {
                    return Err(EcsError::NotARelation { id });
                }
                if !target.is_zero() && !self.entity_pool.is_alive(target) {
                    return Err(EcsError::DeadEntity { entity: target });
                }
                Ok(target)
            }
            None => Ok(match old.relation() {
                Some(id) if mask.get(id) => old.target(),
                _ => Entity::ZERO,
            }),
        }
    }

    /// Fail unless `id` is exactly the relation component of `archetype`.
    pub(crate) fn check_relation(archetype: &Archetype, id: ComponentId) -> Result<(), EcsError> {
        if archetype.relation() == Some(id) {
            return Ok(());
        }
        if archetype.has(id) {
            Err(EcsError::NotARelation { id })
        } else {
            Err(EcsError::MissingComponent { id })
        }
    }

    /// Check that every value matches the type registered under its ID.
    pub(crate) fn check_values(&self, values: &[ComponentValue]) -> Result<(), EcsError> {
        for value in values {
            let info = self
                .registry
                .info(value.id)
                .ok_or(EcsError::UnknownComponent { id: value.id })?;
            if (*value.value).type_id() != info.type_id {
                return Err(EcsError::TypeMismatch {
                    id: value.id,
                    stored: info.name,
                    requested: "<boxed value>",
                });
            }
        }
        Ok(())
    }

    // -- entity creation -----------------------------------------------------

    /// Create an entity with default values for the components `ids`.
    pub fn new_entity(&mut self, ids: &[ComponentId]) -> Result<Entity, EcsError> {
        self.new_entity_impl(ids, None, Vec::new())
    }

    /// Create an entity with the given component values.
    pub fn new_entity_with(&mut self, values: Vec<ComponentValue>) -> Result<Entity, EcsError> {
        let ids: Vec<ComponentId> = values.iter().map(|v| v.id).collect();
        self.new_entity_impl(&ids, None, values)
    }

    /// Create an entity with components `ids` whose relation component
    /// `relation` points at `target`.
    pub(crate) fn new_entity_target(
        &mut self,
        ids: &[ComponentId],
        relation: ComponentId,
        target: Entity,
    ) -> Result<Entity, EcsError> {
        self.new_entity_impl(ids, Some((relation, target)), Vec::new())
    }

    fn new_entity_impl(
        &mut self,
        ids: &[ComponentId],
        relation: Option<(ComponentId, Entity)>,
        values: Vec<ComponentValue>,
    ) -> Result<Entity, EcsError> {
        self.check_locked()?;
        let root = self.root_node();
        let mask = self.exchange_mask(&Mask::ZERO, ids, &[])?;
        let target = self.resolve_target(&self.archetypes[0], &mask, relation)?;
        self.check_values(&values)?;

        let archetype = self.find_or_create_archetype(root, ids, &[], target);
        let arch = &mut self.archetypes[archetype.0 as usize];
        let row = arch.alloc_row(Entity::ZERO)?;
        let entity = self.entity_pool.acquire();
        arch.set_entity(row, entity);
        for value in values {
            arch.set_value(row, value)?;
        }
        self.set_location(entity, EntityLocation { archetype, row });
        if !target.is_zero() {
            self.target_entities.set(target.index, true);
        }

        if self.listener.is_some() {
            let event = self.creation_event(entity, archetype, ids);
            self.emit(&event);
        }
        Ok(entity)
    }

    /// The event of `entity` being created in `archetype`.
    pub(crate) fn creation_event<'a>(&self, entity: Entity, archetype: ArchetypeId, ids: &'a [ComponentId]) -> EntityEvent<'a> {
        let arch = &self.archetypes[archetype.0 as usize];
        let new_relation = arch.relation();
        EntityEvent {
            entity,
            old_mask: Mask::ZERO,
            added: *arch.mask(),
            removed: Mask::ZERO,
            added_ids: ids,
            removed_ids: &[],
            old_relation: None,
            new_relation,
            old_target: Entity::ZERO,
            event_types: Subscription::of(
                true,
                false,
                !ids.is_empty(),
                false,
                new_relation.is_some(),
                new_relation.is_some(),
            ),
        }
    }

    /// The event of `entity` being removed from a state `old` with
    /// components `ids`.
    pub(crate) fn removal_event<'a>(entity: Entity, old: &OldState, ids: &'a [ComponentId]) -> EntityEvent<'a> {
        EntityEvent {
            entity,
            old_mask: old.mask,
            added: Mask::ZERO,
            removed: old.mask,
            added_ids: &[],
            removed_ids: ids,
            old_relation: old.relation,
            new_relation: None,
            old_target: old.target,
            event_types: Subscription::of(
                false,
                true,
                false,
                !ids.is_empty(),
                old.relation.is_some(),
                old.relation.is_some(),
            ),
        }
    }

    // -- entity removal ------------------------------------------------------

    /// Remove `entity` and drop its components.
    ///
    /// The listener is notified before the row disappears, while the world
    /// is locked.
    pub fn remove_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.check_locked()?;
        let location = self.location(entity)?;
        let archetype = location.archetype;

        if self.listener.is_some() {
            let arch = &self.archetypes[archetype.0 as usize];
            let old = OldState::of(arch);
            let ids = arch.ids().to_vec();
            let bit = self.lock()?;
            self.emit(&Self::removal_event(entity, &old, &ids));
            self.unlock(bit)?;
        }

        let swapped = self.archetypes[archetype.0 as usize].remove_row(location.row);
        self.fix_swapped(archetype, location.row, swapped);
        self.locations[entity.index as usize] = None;
        self.entity_pool.release(entity)?;

        if self.target_entities.get(entity.index) {
            self.cleanup_archetypes(entity);
            self.target_entities.set(entity.index, false);
        }
        self.cleanup_archetype(archetype);
        Ok(())
    }

    // -- queries on single entities ------------------------------------------

    /// Whether `entity` is alive.
    pub fn alive(&self, entity: Entity) -> bool {
        self.entity_pool.is_alive(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entity_pool.len()
    }

    /// Whether `entity` has component `id`.
    pub fn has(&self, entity: Entity, id: ComponentId) -> Result<bool, EcsError> {
        let location = self.location(entity)?;
        Ok(self.archetypes[location.archetype.0 as usize].has(id))
    }

    /// The component mask of `entity`.
    pub fn mask(&self, entity: Entity) -> Result<Mask, EcsError> {
        let location = self.location(entity)?;
        Ok(*self.archetypes[location.archetype.0 as usize].mask())
    }

    /// The component IDs of `entity`, ascending.
    pub fn ids(&self, entity: Entity) -> Result<&[ComponentId], EcsError> {
        let location = self.location(entity)?;
        Ok(self.archetypes[location.archetype.0 as usize].ids())
    }

    /// Component `id` of `entity`, read as `T`.
    pub fn get<T: 'static>(&self, entity: Entity, id: ComponentId) -> Result<&T, EcsError> {
        let location = self.location(entity)?;
        self.archetypes[location.archetype.0 as usize].get::<T>(location.row, id)
    }

    /// Component `id` of `entity`, mutably.
    pub fn get_mut<T: 'static>(&mut self, entity: Entity, id: ComponentId) -> Result<&mut T, EcsError> {
        let location = self.location(entity)?;
        self.archetypes[location.archetype.0 as usize].get_mut::<T>(location.row, id)
    }

    /// Overwrite component `id` of `entity` with `value`. The component must
    /// already be present.
    pub fn set<T: 'static>(&mut self, entity: Entity, id: ComponentId, value: T) -> Result<(), EcsError> {
        *self.get_mut::<T>(entity, id)? = value;
        Ok(())
    }

    // -- exchange ------------------------------------------------------------

    /// Add default-initialized components `ids` to `entity`.
    pub fn add(&mut self, entity: Entity, ids: &[ComponentId]) -> Result<(), EcsError> {
        self.exchange(entity, ids, &[])
    }

    /// Remove components `ids` from `entity`.
    pub fn remove(&mut self, entity: Entity, ids: &[ComponentId]) -> Result<(), EcsError> {
        self.exchange(entity, &[], ids)
    }

    /// Remove `remove` and add `add` in one move.
    pub fn exchange(&mut self, entity: Entity, add: &[ComponentId], remove: &[ComponentId]) -> Result<(), EcsError> {
        self.exchange_impl(entity, add, remove, None, Vec::new())
    }

    /// Add the given component values to `entity` in one move.
    pub fn assign(&mut self, entity: Entity, values: Vec<ComponentValue>) -> Result<(), EcsError> {
        let ids: Vec<ComponentId> = values.iter().map(|v| v.id).collect();
        self.exchange_impl(entity, &ids, &[], None, values)
    }

    pub(crate) fn exchange_impl(
        &mut self,
        entity: Entity,
        add: &[ComponentId],
        remove: &[ComponentId],
        relation: Option<(ComponentId, Entity)>,
        values: Vec<ComponentValue>,
    ) -> Result<(), EcsError> {
        self.check_locked()?;
        let location = self.location(entity)?;
        if add.is_empty() && remove.is_empty() && relation.is_none() {
            return Ok(());
        }
        let old_arch = &self.archetypes[location.archetype.0 as usize];
        let old = OldState::of(old_arch);
        let mask = self.exchange_mask(&old.mask, add, remove)?;
        let target = self.resolve_target(old_arch, &mask, relation)?;
        self.check_values(&values)?;

        let node = old_arch.node();
        let archetype = self.find_or_create_archetype(node, add, remove, target);
        let row = if archetype == location.archetype {
            location.row
        } else {
            let (new_arch, old_arch) = self.archetype_pair_mut(archetype, location.archetype)?;
            let (row, swapped) = new_arch.move_row_from(old_arch, location.row)?;
            self.fix_swapped(location.archetype, location.row, swapped);
            self.set_location(entity, EntityLocation { archetype, row });
            row
        };
        let arch = &mut self.archetypes[archetype.0 as usize];
        for id in readded(&old.mask, add) {
            arch.reset_component(id, row..row + 1)?;
        }
        for value in values {
            arch.set_value(row, value)?;
        }
        if !target.is_zero() {
            self.target_entities.set(target.index, true);
        }
        if archetype != location.archetype {
            self.cleanup_archetype(location.archetype);
        }

        if self.listener.is_some() {
            self.emit_exchange(entity, archetype, &old, add, remove);
        }
        Ok(())
    }

    /// Notify about one entity that moved from a state `old` into
    /// `archetype`.
    pub(crate) fn emit_exchange(
        &mut self,
        entity: Entity,
        archetype: ArchetypeId,
        old: &OldState,
        added_ids: &[ComponentId],
        removed_ids: &[ComponentId],
    ) {
        let event = self.exchange_event(entity, archetype, old, added_ids, removed_ids);
        if !event.event_types.is_empty() {
            self.emit(&event);
        }
    }

    pub(crate) fn exchange_event<'a>(
        &self,
        entity: Entity,
        archetype: ArchetypeId,
        old: &OldState,
        added_ids: &'a [ComponentId],
        removed_ids: &'a [ComponentId],
    ) -> EntityEvent<'a> {
        let arch = &self.archetypes[archetype.0 as usize];
        let new_mask = *arch.mask();
        let changed = old.mask.xor(&new_mask);
        let added = new_mask.and(&changed);
        let removed = old.mask.and(&changed);
        let new_relation = arch.relation();
        let relation_changed = old.relation != new_relation;
        let target_changed = old.target != arch.target();
        EntityEvent {
            entity,
            old_mask: old.mask,
            added,
            removed,
            added_ids,
            removed_ids,
            old_relation: old.relation,
            new_relation,
            old_target: old.target,
            event_types: Subscription::of(
                false,
                false,
                !added.is_zero(),
                !removed.is_zero(),
                relation_changed,
                relation_changed || target_changed,
            ),
        }
    }

    // -- handles -------------------------------------------------------------

    /// Batch operations over many entities.
    pub fn batch(&mut self) -> Batch<'_> {
        Batch::new(self)
    }

    /// Relation getters and setters.
    pub fn relations(&mut self) -> Relations<'_> {
        Relations::new(self)
    }

    /// Registration of cached filters.
    pub fn cache(&mut self) -> Cache<'_> {
        Cache::new(self)
    }

    // -- introspection -------------------------------------------------------

    /// All graph nodes in creation order.
    pub fn nodes(&self) -> &[ArchNode] {
        &self.nodes
    }

    /// The archetype with `id`.
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.0 as usize)
    }

    /// All archetypes, active or not, in creation order.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Active archetypes matching `filter`, found by a full scan of the
    /// graph (or taken from the cache for a cached filter).
    pub(crate) fn matching_archetypes(&self, filter: &dyn Filter) -> Result<Vec<ArchetypeId>, EcsError> {
        if let Some(cached) = filter.cached() {
            return Ok(self.cache.archetypes(cached)?.to_vec());
        }
        let mut out = Vec::new();
        for node in &self.nodes {
            if !node.is_active() || !filter.matches(node.mask()) {
                continue;
            }
            match filter.relation_target() {
                Some(target) if node.has_relation() => out.extend(node.archetype_for(target)),
                _ => out.extend(node.archetypes().iter().copied().filter(|id| {
                    let arch = &self.archetypes[id.0 as usize];
                    arch.is_active() && matches_archetype(filter, arch)
                })),
            }
        }
        Ok(out)
    }

    // -- reset ---------------------------------------------------------------

    /// Remove every entity and resource without firing events.
    ///
    /// Component registrations, graph nodes and cached filters survive;
    /// handles to removed entities stay dead.
    pub fn reset(&mut self) -> Result<(), EcsError> {
        self.check_locked()?;
        let mut parked = Vec::new();
        for arch in &mut self.archetypes {
            if !arch.is_active() {
                continue;
            }
            if arch.relation().is_some() && !arch.target().is_zero() {
                parked.push(arch.id());
            } else {
                arch.reset();
            }
        }
        for id in parked {
            self.deactivate_archetype(id);
        }
        self.entity_pool.reset();
        self.locations.iter_mut().for_each(|l| *l = None);
        self.target_entities.reset();
        self.resources.reset();
        debug!("world reset");
        Ok(())
    }

    /// Release a lock bit held by a closing query, logging instead of
    /// failing.
    pub(crate) fn release_lock(&self, bit: u8) {
        if let Err(error) = self.unlock(bit) {
            warn!(bit, error = %error, "query lock was already released");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
