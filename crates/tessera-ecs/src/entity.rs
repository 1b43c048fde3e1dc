//! Entity handles and allocation.
//!
//! An [`Entity`] is an index plus a *generation* counter. The generation is
//! bumped every time an index is recycled, so a stale handle is detected as
//! dead instead of silently aliasing the new occupant.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A generational entity handle.
///
/// Index 0 is reserved: [`Entity::ZERO`] means "no entity" and is never
/// handed out by a pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Entity {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Entity {
    /// The reserved "no entity" value.
    pub const ZERO: Entity = Entity {
        index: 0,
        generation: 0,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index of the entity.
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Whether this is the reserved zero entity.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.index == 0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// EntityPool
// ---------------------------------------------------------------------------

/// One slot of the pool. `next_free` is only meaningful while the slot is on
/// the free list.
#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    next_free: u32,
}

/// Issues and recycles [`Entity`] handles.
///
/// Free slots form a singly linked list threaded through the slot array
/// itself, so acquire and release are O(1) without side allocations.
#[derive(Debug)]
pub struct EntityPool {
    slots: Vec<Slot>,
    /// Head of the free list. Only valid while `available > 0`.
    next: u32,
    available: u32,
    capacity_increment: usize,
}

impl EntityPool {
    /// Create a pool that grows its slot array by `capacity_increment`.
    pub fn new(capacity_increment: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity_increment.max(1));
        slots.push(Slot {
            generation: u32::MAX,
            next_free: 0,
        });
        Self {
            slots,
            next: 0,
            available: 0,
            capacity_increment: capacity_increment.max(1),
        }
    }

    /// Hand out a recycled or fresh entity.
    pub fn acquire(&mut self) -> Entity {
        if self.available == 0 {
            return self.acquire_fresh();
        }
        let index = self.next;
        let slot = self.slots[index as usize];
        self.next = slot.next_free;
        self.available -= 1;
        Entity::new(index, slot.generation)
    }

    fn acquire_fresh(&mut self) -> Entity {
        if self.slots.len() == self.slots.capacity() {
            self.slots.reserve_exact(self.capacity_increment);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            next_free: 0,
        });
        Entity::new(index, 0)
    }

    /// Return `entity` to the pool, invalidating all copies of the handle.
    pub fn release(&mut self, entity: Entity) -> Result<(), EcsError> {
        if entity.is_zero() {
            return Err(EcsError::InvalidOperation("can't release the zero entity"));
        }
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity { entity });
        }
        let slot = &mut self.slots[entity.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = self.next;
        self.next = entity.index;
        self.available += 1;
        Ok(())
    }

    /// Whether `entity` was issued by this pool and not released since.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        if entity.is_zero() {
            return false;
        }
        self.slots
            .get(entity.index as usize)
            .is_some_and(|slot| slot.generation == entity.generation)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.slots.len() - 1 - self.available as usize
    }

    /// Whether no entity is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots ever allocated, live or free.
    pub fn total(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of free slots waiting to be recycled.
    pub fn available(&self) -> usize {
        self.available as usize
    }

    /// Allocated slot capacity.
    pub fn capacity(&self) -> usize {
        self.slots.capacity() - 1
    }

    /// Release every entity at once. Slots are kept and their generations
    /// bumped, so handles issued before the reset stay dead.
    pub fn reset(&mut self) {
        let total = self.slots.len() as u32;
        for (index, slot) in self.slots.iter_mut().enumerate().skip(1) {
            slot.generation = slot.generation.wrapping_add(1);
            slot.next_free = index as u32 + 1;
        }
        self.next = 1;
        self.available = total - 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_entity_is_not_zero() {
        let mut pool = EntityPool::new(4);
        let e = pool.acquire();
        assert_eq!(e.index(), 1);
        assert_eq!(e.generation(), 0);
        assert!(!e.is_zero());
        assert!(!pool.is_alive(Entity::ZERO));
    }

    #[test]
    fn generation_increments_on_recycle() {
        let mut pool = EntityPool::new(4);
        let e1 = pool.acquire();
        pool.release(e1).unwrap();
        let e2 = pool.acquire();
        assert_eq!(e1.index(), e2.index());
        assert_eq!(e2.generation(), e1.generation() + 1);
    }

    #[test]
    fn stale_id_detection() {
        let mut pool = EntityPool::new(4);
        let e1 = pool.acquire();
        pool.release(e1).unwrap();
        let e2 = pool.acquire();
        assert!(!pool.is_alive(e1));
        assert!(pool.is_alive(e2));
    }

    #[test]
    fn release_zero_fails() {
        let mut pool = EntityPool::new(4);
        assert!(matches!(
            pool.release(Entity::ZERO),
            Err(EcsError::InvalidOperation(_))
        ));
    }

    #[test]
    fn double_release_fails() {
        let mut pool = EntityPool::new(4);
        let e = pool.acquire();
        pool.release(e).unwrap();
        assert!(matches!(pool.release(e), Err(EcsError::DeadEntity { .. })));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut pool = EntityPool::new(4);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a).unwrap();
        pool.release(c).unwrap();
        assert_eq!(pool.acquire().index(), c.index());
        assert_eq!(pool.acquire().index(), a.index());
        assert!(pool.is_alive(b));
        assert_eq!(pool.acquire().index(), 4);
    }

    #[test]
    fn len_and_capacity() {
        let mut pool = EntityPool::new(2);
        assert!(pool.is_empty());
        let es: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.total(), 5);
        assert!(pool.capacity() >= 5);
        pool.release(es[2]).unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.total(), 5);
    }

    #[test]
    fn reset_forgets_everything() {
        let mut pool = EntityPool::new(4);
        let e = pool.acquire();
        pool.acquire();
        pool.reset();
        assert!(pool.is_empty());
        assert!(!pool.is_alive(e));
        let again = pool.acquire();
        assert_eq!(again.index(), 1);
        assert!(!pool.is_alive(e));
        assert_eq!(pool.acquire().index(), 2);
        assert_eq!(pool.acquire().index(), 3);
    }
}
