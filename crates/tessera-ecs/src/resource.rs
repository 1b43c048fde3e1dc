//! Global resources.
//!
//! A resource is a singleton value of a given type stored beside the
//! entities. Resource types get dense [`ResourceId`]s from their own
//! registry, independent of component IDs.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::bitmask::MASK_TOTAL_BITS;
use crate::EcsError;

/// Dense identifier of a registered resource type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u8);

impl ResourceId {
    /// Numeric index of the ID.
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

/// Resource type registry plus the stored values.
#[derive(Default)]
pub struct Resources {
    by_type: HashMap<TypeId, ResourceId>,
    names: Vec<&'static str>,
    /// Indexed by `ResourceId.0`.
    values: Vec<Option<Box<dyn Any + Send>>>,
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("registered", &self.names)
            .field("stored", &self.len())
            .finish()
    }
}

impl Resources {
    /// The ID of resource type `T`, registering it first if needed.
    pub fn id<T: Send + 'static>(&mut self) -> Result<ResourceId, EcsError> {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.by_type.get(&type_id) {
            return Ok(id);
        }
        if self.names.len() >= MASK_TOTAL_BITS {
            return Err(EcsError::CapacityExceeded {
                what: "resource types",
                limit: MASK_TOTAL_BITS,
            });
        }
        let id = ResourceId(self.names.len() as u8);
        self.by_type.insert(type_id, id);
        self.names.push(std::any::type_name::<T>());
        self.values.push(None);
        Ok(id)
    }

    fn lookup<T: 'static>(&self) -> Option<ResourceId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Store `value`. Fails if a resource of that type is already present.
    pub fn add<T: Send + 'static>(&mut self, value: T) -> Result<ResourceId, EcsError> {
        let id = self.id::<T>()?;
        let slot = &mut self.values[id.0 as usize];
        if slot.is_some() {
            return Err(EcsError::DuplicateResource {
                name: std::any::type_name::<T>(),
            });
        }
        *slot = Some(Box::new(value));
        Ok(id)
    }

    /// Take the resource of type `T` out of the store.
    pub fn remove<T: Send + 'static>(&mut self) -> Result<T, EcsError> {
        let missing = EcsError::MissingResource {
            name: std::any::type_name::<T>(),
        };
        let Some(id) = self.lookup::<T>() else {
            return Err(missing);
        };
        let value = self.values[id.0 as usize].take().ok_or(missing)?;
        // Values are only stored under their own type's ID.
        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(EcsError::MissingResource {
                name: std::any::type_name::<T>(),
            }),
        }
    }

    /// Shared access to the resource of type `T`.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        let id = self.lookup::<T>()?;
        self.values[id.0 as usize].as_ref()?.downcast_ref::<T>()
    }

    /// Exclusive access to the resource of type `T`.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        let id = self.lookup::<T>()?;
        self.values[id.0 as usize].as_mut()?.downcast_mut::<T>()
    }

    /// Whether a resource of type `T` is stored.
    pub fn has<T: 'static>(&self) -> bool {
        self.lookup::<T>()
            .is_some_and(|id| self.values[id.0 as usize].is_some())
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Whether no resource is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all stored values. Registrations are kept.
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Gravity(f32);

    #[derive(Debug, PartialEq)]
    struct Tick(u64);

    #[test]
    fn add_get_remove() {
        let mut res = Resources::default();
        let id = res.add(Gravity(9.8)).unwrap();
        assert_eq!(id.index(), 0);
        assert!(res.has::<Gravity>());
        assert_eq!(res.get::<Gravity>(), Some(&Gravity(9.8)));
        res.get_mut::<Gravity>().unwrap().0 = 1.6;
        assert_eq!(res.remove::<Gravity>().unwrap(), Gravity(1.6));
        assert!(!res.has::<Gravity>());
        assert!(res.is_empty());
    }

    #[test]
    fn ids_are_separate_and_stable() {
        let mut res = Resources::default();
        let t = res.id::<Tick>().unwrap();
        let g = res.add(Gravity(1.0)).unwrap();
        assert_ne!(t, g);
        res.remove::<Gravity>().unwrap();
        assert_eq!(res.add(Gravity(2.0)).unwrap(), g);
    }

    #[test]
    fn duplicate_and_missing() {
        let mut res = Resources::default();
        res.add(Tick(1)).unwrap();
        assert!(matches!(res.add(Tick(2)), Err(EcsError::DuplicateResource { .. })));
        assert!(matches!(res.remove::<Gravity>(), Err(EcsError::MissingResource { .. })));
        assert_eq!(res.get::<Gravity>(), None);
    }

    #[test]
    fn reset_keeps_registrations() {
        let mut res = Resources::default();
        let id = res.add(Tick(1)).unwrap();
        res.reset();
        assert!(!res.has::<Tick>());
        assert_eq!(res.id::<Tick>().unwrap(), id);
    }
}
