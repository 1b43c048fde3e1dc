//! The filter cache.
//!
//! A registered filter keeps a list of the archetypes it matches. The world
//! appends every newly created (or reactivated) archetype to the lists whose
//! filter it satisfies and delists deactivated archetypes, so a query over a
//! cached filter never scans the archetype graph.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::archetype::{Archetype, ArchetypeId};
use crate::bitmask::MASK_TOTAL_BITS;
use crate::filter::{matches_archetype, CachedFilter, Filter};
use crate::pool::BitPool;
use crate::world::World;
use crate::EcsError;

/// One registered filter and the archetypes it matches.
struct CacheEntry {
    filter: Arc<dyn Filter>,
    archetypes: Vec<ArchetypeId>,
    positions: HashMap<ArchetypeId, usize>,
}

impl CacheEntry {
    fn push(&mut self, archetype: ArchetypeId) {
        self.positions.insert(archetype, self.archetypes.len());
        self.archetypes.push(archetype);
    }

    fn remove(&mut self, archetype: ArchetypeId) {
        let Some(index) = self.positions.remove(&archetype) else {
            return;
        };
        self.archetypes.swap_remove(index);
        if let Some(&moved) = self.archetypes.get(index) {
            self.positions.insert(moved, index);
        }
    }
}

/// Storage of all registered filters, indexed by slot ID.
pub(crate) struct FilterCache {
    slots: BitPool,
    entries: Vec<Option<CacheEntry>>,
}

impl Default for FilterCache {
    fn default() -> Self {
        Self {
            slots: BitPool::new(),
            entries: (0..MASK_TOTAL_BITS).map(|_| None).collect(),
        }
    }
}

impl std::fmt::Debug for FilterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCache")
            .field("registered", &self.len())
            .finish()
    }
}

impl FilterCache {
    /// The entry behind `handle`, if the handle is still registered.
    fn entry(&self, handle: &CachedFilter) -> Option<&CacheEntry> {
        self.entries[handle.id as usize]
            .as_ref()
            .filter(|entry| Arc::ptr_eq(&entry.filter, &handle.filter))
    }

    /// Archetypes matched by `handle`.
    pub(crate) fn archetypes(&self, handle: &CachedFilter) -> Result<&[ArchetypeId], EcsError> {
        self.entry(handle)
            .map(|entry| entry.archetypes.as_slice())
            .ok_or(EcsError::NotRegistered { id: handle.id })
    }

    /// Append a new archetype to every entry it matches.
    pub(crate) fn add_archetype(&mut self, id: ArchetypeId, archetype: &Archetype) {
        for entry in self.entries.iter_mut().flatten() {
            if matches_archetype(entry.filter.as_ref(), archetype) {
                entry.push(id);
            }
        }
    }

    /// Remove a deactivated archetype from every entry.
    pub(crate) fn remove_archetype(&mut self, id: ArchetypeId) {
        for entry in self.entries.iter_mut().flatten() {
            entry.remove(id);
        }
    }

    /// Number of registered filters.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// Registration surface of the filter cache, obtained from
/// [`World::cache`].
pub struct Cache<'w> {
    world: &'w mut World,
}

impl<'w> Cache<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self { world }
    }

    /// Register `filter` and seed its archetype list with one full scan.
    ///
    /// Fails with [`EcsError::CapacityExceeded`] when all slots are taken and
    /// with [`EcsError::InvalidOperation`] when `filter` is itself a cached
    /// filter.
    pub fn register<F: Filter + 'static>(&mut self, filter: F) -> Result<CachedFilter, EcsError> {
        if filter.cached().is_some() {
            return Err(EcsError::InvalidOperation("filter is already registered"));
        }
        let filter: Arc<dyn Filter> = Arc::new(filter);
        let archetypes = self.world.matching_archetypes(filter.as_ref())?;
        let cache = &mut self.world.cache;
        let id = cache.slots.get("cached filters")?;
        let mut entry = CacheEntry {
            filter: Arc::clone(&filter),
            archetypes: Vec::with_capacity(archetypes.len()),
            positions: HashMap::with_capacity(archetypes.len()),
        };
        for archetype in archetypes {
            entry.push(archetype);
        }
        debug!(id, archetypes = entry.archetypes.len(), "registered cached filter");
        cache.entries[id as usize] = Some(entry);
        Ok(CachedFilter { id, filter })
    }

    /// Release the slot of `handle`.
    ///
    /// Fails with [`EcsError::NotRegistered`] if the handle is stale.
    pub fn unregister(&mut self, handle: &CachedFilter) -> Result<(), EcsError> {
        let cache = &mut self.world.cache;
        if cache.entry(handle).is_none() {
            return Err(EcsError::NotRegistered { id: handle.id });
        }
        cache.entries[handle.id as usize] = None;
        cache.slots.recycle(handle.id);
        debug!(id = handle.id, "unregistered cached filter");
        Ok(())
    }

    /// The archetypes currently matched by `handle`.
    pub fn archetypes(&self, handle: &CachedFilter) -> Result<&[ArchetypeId], EcsError> {
        self.world.cache.archetypes(handle)
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.world.cache.len()
    }

    /// Whether no filter is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
