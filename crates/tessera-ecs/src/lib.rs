//! Tessera ECS -- archetype-based entity and component storage with entity
//! relations.
//!
//! Entities with the same set of components share an archetype, which stores
//! each component in its own type-erased column. Archetypes hang off the
//! nodes of an archetype graph whose edges memoize "add component" and
//! "remove component" transitions. Relation components partition a node's
//! entities by target entity, so "all children of X" is one archetype.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! let mut world = World::new();
//! let pos = world.component_id::<Position>().unwrap();
//! let vel = world.component_id::<Velocity>().unwrap();
//!
//! let entity = world.new_entity(&[pos, vel]).unwrap();
//! world.set(entity, vel, Velocity { dx: 1.0, dy: 0.5 }).unwrap();
//!
//! let mut query = world.query_mut(Mask::new(&[pos, vel])).unwrap();
//! while query.next() {
//!     let v = query.get::<Velocity>(vel).unwrap().clone();
//!     let p = query.get_mut::<Position>(pos).unwrap();
//!     p.x += v.dx;
//!     p.y += v.dy;
//! }
//! drop(query);
//!
//! assert_eq!(world.get::<Position>(entity, pos).unwrap(), &Position { x: 1.0, y: 0.5 });
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod archetype;
pub mod batch;
pub mod bitmask;
pub mod builder;
pub mod cache;
pub mod component;
pub mod config;
pub mod entity;
pub mod event;
pub mod filter;
pub mod node;
pub mod pool;
pub mod query;
pub mod relations;
pub mod resource;
pub mod stats;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity was removed, or never existed in this world.
    #[error("entity {entity} is not alive")]
    DeadEntity { entity: entity::Entity },

    /// A structural change was attempted while a query or lock is open.
    #[error("the world is locked by an open query or lock")]
    LockedWorld,

    /// The component is already present, or listed twice.
    #[error("component {id:?} is already present")]
    DuplicateComponent { id: component::ComponentId },

    /// The component is not present.
    #[error("component {id:?} is not present")]
    MissingComponent { id: component::ComponentId },

    /// The change would leave an entity with two relation components.
    #[error("relation component {id:?} would be a second relation on the entity")]
    MultipleRelations { id: component::ComponentId },

    /// The component is not a relation.
    #[error("component {id:?} is not a relation")]
    NotARelation { id: component::ComponentId },

    /// The component ID is not registered in this world.
    #[error("component {id:?} is not registered in this world")]
    UnknownComponent { id: component::ComponentId },

    /// A fixed-size pool ran out of slots.
    #[error("too many {what}: the limit is {limit}")]
    CapacityExceeded { what: &'static str, limit: usize },

    /// A cached filter handle is stale or was never registered.
    #[error("cached filter {id} is not registered")]
    NotRegistered { id: u8 },

    /// A lock bit was released that is not held.
    #[error("lock bit {bit} is not held")]
    UnbalancedUnlock { bit: u8 },

    /// World configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A typed accessor asked for a different type than the one registered.
    #[error("component {id:?} stores '{stored}', not '{requested}'")]
    TypeMismatch {
        id: component::ComponentId,
        stored: &'static str,
        requested: &'static str,
    },

    /// A resource of this type is already stored.
    #[error("resource '{name}' is already present")]
    DuplicateResource { name: &'static str },

    /// No resource of this type is stored.
    #[error("resource '{name}' is not present")]
    MissingResource { name: &'static str },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::batch::Batch;
    pub use crate::bitmask::{Mask, MASK_TOTAL_BITS};
    pub use crate::builder::Builder;
    pub use crate::cache::Cache;
    pub use crate::component::{Component, ComponentId, ComponentInfo, ComponentRegistry, ComponentValue};
    pub use crate::config::Config;
    pub use crate::entity::Entity;
    pub use crate::event::{subscribes, EntityEvent, Listener, Subscription};
    pub use crate::filter::{logic, CachedFilter, Filter, MaskFilter, RelationFilter};
    pub use crate::node::{ArchNode, NodeId};
    pub use crate::query::{Query, QueryMut};
    pub use crate::relations::Relations;
    pub use crate::resource::{ResourceId, Resources};
    pub use crate::stats::{ArchetypeStats, EntityStats, NodeStats, WorldStats};
    pub use crate::world::{EntityLocation, World};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
