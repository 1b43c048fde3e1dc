//! Component type registration and metadata.
//!
//! Every component type is registered at runtime in a [`ComponentRegistry`].
//! Registration hands out a dense [`ComponentId`] (0, 1, 2, ...) that indexes
//! archetype columns and mask bits. IDs are never reused.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::archetype::ComponentVtable;
use crate::bitmask::{Mask, MASK_TOTAL_BITS};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// A data record that can be attached to an entity.
///
/// New rows are initialized with `Default::default()`. Relation components
/// set [`IS_RELATION`](Component::IS_RELATION); their target entity is stored
/// per archetype, not per row.
///
/// ```
/// use tessera_ecs::component::Component;
///
/// #[derive(Debug, Clone, Default)]
/// struct Position { x: f32, y: f32 }
/// impl Component for Position {}
///
/// #[derive(Debug, Clone, Default)]
/// struct ChildOf;
/// impl Component for ChildOf {
///     const IS_RELATION: bool = true;
/// }
/// ```
pub trait Component: Clone + Default + Send + 'static {
    /// Marks the type as a relation component.
    const IS_RELATION: bool = false;
}

// ---------------------------------------------------------------------------
// ComponentId
// ---------------------------------------------------------------------------

/// Dense identifier of a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub(crate) u8);

impl ComponentId {
    /// Position of this ID in a [`Mask`].
    #[inline]
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentInfo
// ---------------------------------------------------------------------------

/// Metadata about a registered component type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    /// ID assigned at registration time.
    pub id: ComponentId,
    /// `std::any::type_name::<T>()`
    pub name: &'static str,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
    /// Whether the type is a relation component.
    pub is_relation: bool,
    pub(crate) vtable: ComponentVtable,
}

// ---------------------------------------------------------------------------
// ComponentValue
// ---------------------------------------------------------------------------

/// A component value paired with its ID, used by assign-style operations.
pub struct ComponentValue {
    pub(crate) id: ComponentId,
    pub(crate) value: Box<dyn Any + Send>,
}

impl ComponentValue {
    /// Wrap `value` for the component registered under `id`.
    ///
    /// The type is checked against the registration when the value is
    /// written; a mismatch fails with [`EcsError::TypeMismatch`].
    pub fn new<T: Component>(id: ComponentId, value: T) -> Self {
        Self {
            id,
            value: Box::new(value),
        }
    }

    /// The component ID this value is written to.
    pub fn id(&self) -> ComponentId {
        self.id
    }
}

impl fmt::Debug for ComponentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentValue").field("id", &self.id).finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry mapping Rust types to [`ComponentId`]s and their metadata.
///
/// A type is registered once; later registrations return the existing ID.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentId>,
    /// Indexed by `ComponentId.0`.
    infos: Vec<ComponentInfo>,
    relations: Mask,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the ID of `T`, registering it first if needed.
    ///
    /// The boolean is `true` when the call created a new registration.
    pub fn register<T: Component>(&mut self) -> Result<(ComponentId, bool), EcsError> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return Ok((existing, false));
        }
        if self.infos.len() >= MASK_TOTAL_BITS {
            return Err(EcsError::CapacityExceeded {
                what: "component types",
                limit: MASK_TOTAL_BITS,
            });
        }

        let id = ComponentId(self.infos.len() as u8);
        self.infos.push(ComponentInfo {
            id,
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            type_id,
            is_relation: T::IS_RELATION,
            vtable: ComponentVtable::new::<T>(),
        });
        self.by_type.insert(type_id, id);
        if T::IS_RELATION {
            self.relations.set(id, true);
        }
        Ok((id, true))
    }

    /// Undo the most recent registration.
    pub(crate) fn unregister_last(&mut self) {
        if let Some(info) = self.infos.pop() {
            self.by_type.remove(&info.type_id);
            self.relations.set(info.id, false);
        }
    }

    /// Look up the ID of a registered type.
    pub fn lookup<T: 'static>(&self) -> Option<ComponentId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for a registered ID.
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.infos.get(id.0 as usize)
    }

    /// Whether `id` names a relation component.
    #[inline]
    pub fn is_relation(&self, id: ComponentId) -> bool {
        self.relations.get(id)
    }

    /// Mask of all relation component IDs.
    pub fn relations(&self) -> &Mask {
        &self.relations
    }

    /// Total number of registered component types.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether any component types have been registered.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Pos {
        x: f32,
        y: f32,
    }
    impl Component for Pos {}

    #[derive(Debug, Clone, Default)]
    struct Vel {
        dx: f32,
        dy: f32,
    }
    impl Component for Vel {}

    #[derive(Debug, Clone, Default)]
    struct ChildOf;
    impl Component for ChildOf {
        const IS_RELATION: bool = true;
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ComponentRegistry::new();
        let (id, created) = reg.register::<Pos>().unwrap();
        assert!(created);
        assert_eq!(reg.lookup::<Pos>(), Some(id));
        assert_eq!(reg.lookup::<Vel>(), None);
    }

    #[test]
    fn same_type_same_id() {
        let mut reg = ComponentRegistry::new();
        let (id1, _) = reg.register::<Pos>().unwrap();
        let (id2, created) = reg.register::<Pos>().unwrap();
        assert_eq!(id1, id2);
        assert!(!created);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn ids_are_dense() {
        let mut reg = ComponentRegistry::new();
        let (p, _) = reg.register::<Pos>().unwrap();
        let (v, _) = reg.register::<Vel>().unwrap();
        assert_eq!(p.index(), 0);
        assert_eq!(v.index(), 1);
    }

    #[test]
    fn relation_flag_is_cached() {
        let mut reg = ComponentRegistry::new();
        let (p, _) = reg.register::<Pos>().unwrap();
        let (c, _) = reg.register::<ChildOf>().unwrap();
        assert!(!reg.is_relation(p));
        assert!(reg.is_relation(c));
        assert!(reg.info(c).unwrap().is_relation);
        assert_eq!(reg.relations(), &Mask::new(&[c]));
    }

    #[test]
    fn info_correctness() {
        let mut reg = ComponentRegistry::new();
        let (id, _) = reg.register::<Pos>().unwrap();
        let info = reg.info(id).unwrap();
        assert!(info.name.ends_with("Pos"));
        assert_eq!(info.size, std::mem::size_of::<Pos>());
        assert_eq!(info.align, std::mem::align_of::<Pos>());
        assert_eq!(info.type_id, TypeId::of::<Pos>());
    }

    #[test]
    fn unregister_last_rolls_back() {
        let mut reg = ComponentRegistry::new();
        reg.register::<Pos>().unwrap();
        let (c, _) = reg.register::<ChildOf>().unwrap();
        reg.unregister_last();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup::<ChildOf>(), None);
        assert!(!reg.is_relation(c));
        let (again, created) = reg.register::<ChildOf>().unwrap();
        assert!(created);
        assert_eq!(again, c);
    }
}
