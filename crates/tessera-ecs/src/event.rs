//! Change events and the listener interface.
//!
//! Every structural change produces an [`EntityEvent`] describing the affected
//! entity, which components were added or removed, and how its relation
//! changed. A world holds at most one [`Listener`]; the world only invokes it
//! when [`subscribes`] says the listener cares about the change.

use bitflags::bitflags;

use crate::bitmask::Mask;
use crate::component::ComponentId;
use crate::entity::Entity;
use crate::world::World;

bitflags! {
    /// Kinds of structural change a listener can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Subscription: u8 {
        /// An entity was created.
        const ENTITY_CREATED = 1 << 0;
        /// An entity was removed.
        const ENTITY_REMOVED = 1 << 1;
        /// Components were added to an entity.
        const COMPONENT_ADDED = 1 << 2;
        /// Components were removed from an entity.
        const COMPONENT_REMOVED = 1 << 3;
        /// The relation component of an entity changed.
        const RELATION_CHANGED = 1 << 4;
        /// The relation target of an entity changed.
        const TARGET_CHANGED = 1 << 5;

        /// Entity creation and removal.
        const ENTITIES = Self::ENTITY_CREATED.bits() | Self::ENTITY_REMOVED.bits();
        /// Component addition and removal.
        const COMPONENTS = Self::COMPONENT_ADDED.bits() | Self::COMPONENT_REMOVED.bits();
        /// Relation and target changes.
        const RELATIONS = Self::RELATION_CHANGED.bits() | Self::TARGET_CHANGED.bits();
    }
}

impl Subscription {
    /// Build the subscription bits that describe one change.
    pub fn of(
        entity_created: bool,
        entity_removed: bool,
        component_added: bool,
        component_removed: bool,
        relation_changed: bool,
        target_changed: bool,
    ) -> Self {
        let mut bits = Subscription::empty();
        bits.set(Subscription::ENTITY_CREATED, entity_created);
        bits.set(Subscription::ENTITY_REMOVED, entity_removed);
        bits.set(Subscription::COMPONENT_ADDED, component_added);
        bits.set(Subscription::COMPONENT_REMOVED, component_removed);
        bits.set(Subscription::RELATION_CHANGED, relation_changed);
        bits.set(Subscription::TARGET_CHANGED, target_changed);
        bits
    }
}

/// Whether a listener subscribed to `component_subs` wants a change of kind
/// `trigger`.
///
/// `trigger` must already be the intersection of the change's kinds with the
/// listener's subscribed kinds. A listener without a component restriction
/// (`None`) wants everything it subscribed to. Otherwise relation and target
/// changes match when the restriction includes the old or new relation
/// component, entity creation and component addition match on `added`, and
/// entity removal and component removal match on `removed`.
pub fn subscribes(
    trigger: Subscription,
    added: Option<&Mask>,
    removed: Option<&Mask>,
    component_subs: Option<&Mask>,
    old_relation: Option<ComponentId>,
    new_relation: Option<ComponentId>,
) -> bool {
    if trigger.is_empty() {
        return false;
    }
    let Some(subs) = component_subs else {
        return true;
    };
    if trigger.intersects(Subscription::RELATIONS) {
        if old_relation.is_some_and(|id| subs.get(id)) || new_relation.is_some_and(|id| subs.get(id)) {
            return true;
        }
    }
    if trigger.intersects(Subscription::ENTITY_CREATED | Subscription::COMPONENT_ADDED)
        && added.is_some_and(|mask| subs.contains_any(mask))
    {
        return true;
    }
    trigger.intersects(Subscription::ENTITY_REMOVED | Subscription::COMPONENT_REMOVED)
        && removed.is_some_and(|mask| subs.contains_any(mask))
}

/// Description of one structural change of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityEvent<'a> {
    /// The affected entity.
    pub entity: Entity,
    /// The entity's mask before the change. Zero for new entities.
    pub old_mask: Mask,
    /// Components added by the change.
    pub added: Mask,
    /// Components removed by the change.
    pub removed: Mask,
    /// IDs of the added components.
    pub added_ids: &'a [ComponentId],
    /// IDs of the removed components.
    pub removed_ids: &'a [ComponentId],
    /// Relation component before the change.
    pub old_relation: Option<ComponentId>,
    /// Relation component after the change.
    pub new_relation: Option<ComponentId>,
    /// Relation target before the change.
    pub old_target: Entity,
    /// Which kinds of change this event describes.
    pub event_types: Subscription,
}

impl EntityEvent<'_> {
    /// The entity's mask after the change.
    pub fn new_mask(&self) -> Mask {
        self.old_mask.and(&self.removed.not()).or(&self.added)
    }

    /// Whether the event reports a newly created entity.
    pub fn entity_added(&self) -> bool {
        self.event_types.contains(Subscription::ENTITY_CREATED)
    }

    /// Whether the event reports a removed entity.
    pub fn entity_removed(&self) -> bool {
        self.event_types.contains(Subscription::ENTITY_REMOVED)
    }
}

/// Receives [`EntityEvent`]s from a [`World`].
///
/// The world reads [`subscriptions`](Listener::subscriptions) and
/// [`components`](Listener::components) before every notification and only
/// calls [`notify`](Listener::notify) when [`subscribes`] holds. The listener
/// gets a shared borrow of the world, so it can inspect but not restructure.
pub trait Listener: Send {
    /// Handle one event.
    fn notify(&mut self, world: &World, event: &EntityEvent<'_>);

    /// Event kinds the listener wants.
    fn subscriptions(&self) -> Subscription;

    /// Component restriction. `None` accepts all components.
    fn components(&self) -> Option<&Mask> {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
