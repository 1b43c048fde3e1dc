//! The archetype graph.
//!
//! One [`ArchNode`] exists per distinct component mask. Nodes are linked by
//! "add component X" and "remove component X" edges that memoize schema
//! transitions: the first transition from a node over an ID pays for a scan of
//! all nodes, every later one is a single lookup. Edges are never removed.
//!
//! A node without a relation component owns exactly one archetype. A node
//! with a relation component owns one archetype per relation target, plus a
//! free list of deactivated archetypes that are reused for new targets.

use std::collections::HashMap;

use tracing::debug;

use crate::archetype::{Archetype, ArchetypeId};
use crate::bitmask::{Mask, MASK_TOTAL_BITS};
use crate::component::ComponentId;
use crate::entity::Entity;
use crate::world::World;

/// Identifies a graph node. Index into the world's node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

// ---------------------------------------------------------------------------
// IdMap
// ---------------------------------------------------------------------------

const CHUNK_SIZE: usize = 16;
const CHUNKS: usize = MASK_TOTAL_BITS / CHUNK_SIZE;

/// Sparse map from component ID to a small value, allocated in chunks of 16
/// IDs so that nodes with few edges stay small.
#[derive(Debug, Clone)]
pub(crate) struct IdMap<T: Copy> {
    chunks: Vec<Option<Box<[Option<T>; CHUNK_SIZE]>>>,
    used: Mask,
}

impl<T: Copy> Default for IdMap<T> {
    fn default() -> Self {
        Self {
            chunks: vec![None; CHUNKS],
            used: Mask::ZERO,
        }
    }
}

impl<T: Copy> IdMap<T> {
    pub(crate) fn get(&self, id: ComponentId) -> Option<T> {
        if !self.used.get(id) {
            return None;
        }
        let index = id.index() as usize;
        self.chunks[index / CHUNK_SIZE]
            .as_ref()
            .and_then(|chunk| chunk[index % CHUNK_SIZE])
    }

    pub(crate) fn set(&mut self, id: ComponentId, value: T) {
        let index = id.index() as usize;
        let chunk = self.chunks[index / CHUNK_SIZE].get_or_insert_with(|| Box::new([None; CHUNK_SIZE]));
        chunk[index % CHUNK_SIZE] = Some(value);
        self.used.set(id, true);
    }

    pub(crate) fn len(&self) -> usize {
        self.used.total_bits_set() as usize
    }
}

// ---------------------------------------------------------------------------
// ArchNode
// ---------------------------------------------------------------------------

/// Archetypes of a relation node, keyed by target.
#[derive(Debug, Default)]
struct TargetArchetypes {
    by_target: HashMap<Entity, ArchetypeId>,
    /// Every archetype ever created for this node, active or not.
    all: Vec<ArchetypeId>,
    /// Deactivated archetypes, reused last-in first-out.
    free: Vec<ArchetypeId>,
}

/// A vertex of the archetype graph.
#[derive(Debug)]
pub struct ArchNode {
    id: NodeId,
    mask: Mask,
    ids: Vec<ComponentId>,
    relation: Option<ComponentId>,
    single: Option<ArchetypeId>,
    targets: TargetArchetypes,
    pub(crate) add_edges: IdMap<NodeId>,
    pub(crate) remove_edges: IdMap<NodeId>,
    capacity_increment: usize,
}

impl ArchNode {
    fn new(id: NodeId, mask: Mask, relation: Option<ComponentId>, capacity_increment: usize) -> Self {
        Self {
            id,
            mask,
            ids: mask.ids().collect(),
            relation,
            single: None,
            targets: TargetArchetypes::default(),
            add_edges: IdMap::default(),
            remove_edges: IdMap::default(),
            capacity_increment,
        }
    }

    /// The node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The component mask of the node.
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// The component IDs of the node, ascending.
    pub fn ids(&self) -> &[ComponentId] {
        &self.ids
    }

    /// The relation component of the node, if any.
    pub fn relation(&self) -> Option<ComponentId> {
        self.relation
    }

    /// Whether the node carries a relation component.
    pub fn has_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Whether an archetype was ever created for this node.
    pub fn is_active(&self) -> bool {
        self.single.is_some() || !self.targets.all.is_empty()
    }

    /// Capacity increment used by the node's archetypes.
    pub fn capacity_increment(&self) -> usize {
        self.capacity_increment
    }

    /// All archetypes of the node, including deactivated ones.
    pub fn archetypes(&self) -> &[ArchetypeId] {
        match self.single {
            Some(ref single) => std::slice::from_ref(single),
            None => &self.targets.all,
        }
    }

    /// The archetype bound to `target`, if one is active.
    ///
    /// Nodes without a relation ignore `target`.
    pub fn archetype_for(&self, target: Entity) -> Option<ArchetypeId> {
        if self.relation.is_some() {
            self.targets.by_target.get(&target).copied()
        } else {
            self.single
        }
    }

    /// Number of memoized transitions out of this node.
    pub fn edge_count(&self) -> usize {
        self.add_edges.len() + self.remove_edges.len()
    }
}

// ---------------------------------------------------------------------------
// Graph resolution
// ---------------------------------------------------------------------------

impl World {
    /// Resolve the archetype reached from `start` by removing then adding the
    /// given IDs, bound to `target` if the resulting node has a relation.
    ///
    /// The caller validates the transition first (see
    /// [`World::exchange_mask`]); this only walks and extends the graph.
    pub(crate) fn find_or_create_archetype(
        &mut self,
        start: NodeId,
        add: &[ComponentId],
        remove: &[ComponentId],
        target: Entity,
    ) -> ArchetypeId {
        let node = self.find_or_create_node(start, add, remove);
        self.archetype_for_target(node, target)
    }

    fn find_or_create_node(&mut self, start: NodeId, add: &[ComponentId], remove: &[ComponentId]) -> NodeId {
        let mut current = start;
        for &id in remove {
            current = self.follow_edge(current, id, false);
        }
        for &id in add {
            current = self.follow_edge(current, id, true);
        }
        current
    }

    fn follow_edge(&mut self, from: NodeId, id: ComponentId, add: bool) -> NodeId {
        let node = &self.nodes[from.0 as usize];
        let edge = if add {
            node.add_edges.get(id)
        } else {
            node.remove_edges.get(id)
        };
        if let Some(next) = edge {
            return next;
        }

        let mut mask = node.mask;
        mask.set(id, add);
        let next = self.node_for_mask(mask);
        if add {
            self.nodes[from.0 as usize].add_edges.set(id, next);
            self.nodes[next.0 as usize].remove_edges.set(id, from);
        } else {
            self.nodes[from.0 as usize].remove_edges.set(id, next);
            self.nodes[next.0 as usize].add_edges.set(id, from);
        }
        next
    }

    /// Linear scan for the node with `mask`, creating it if missing.
    fn node_for_mask(&mut self, mask: Mask) -> NodeId {
        if let Some(node) = self.nodes.iter().find(|n| n.mask == mask) {
            return node.id;
        }
        self.create_node(mask)
    }

    pub(crate) fn create_node(&mut self, mask: Mask) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let relation = mask.and(self.registry.relations()).first_id();
        let increment = if relation.is_some() {
            self.config.relation_capacity_increment
        } else {
            self.config.capacity_increment
        };
        self.nodes.push(ArchNode::new(id, mask, relation, increment));
        if relation.is_some() {
            self.relation_nodes.push(id);
        }
        debug!(node = id.0, components = mask.total_bits_set(), ?relation, "created archetype graph node");
        id
    }

    /// The archetype of `node` for `target`, creating or reactivating one if
    /// needed.
    pub(crate) fn archetype_for_target(&mut self, node: NodeId, target: Entity) -> ArchetypeId {
        match self.nodes[node.0 as usize].archetype_for(target) {
            Some(archetype) => archetype,
            None => self.create_archetype(node, target),
        }
    }

    fn create_archetype(&mut self, node_id: NodeId, target: Entity) -> ArchetypeId {
        let node = &mut self.nodes[node_id.0 as usize];
        let relation = node.relation;

        let archetype = match node.targets.free.pop() {
            // Only relation nodes ever park archetypes.
            Some(reused) => {
                self.archetypes[reused.0 as usize].activate(target);
                debug!(archetype = reused.0, node = node_id.0, %target, "reactivated relation archetype");
                reused
            }
            _ => {
                let id = ArchetypeId(self.archetypes.len() as u32);
                let columns = node
                    .ids
                    .iter()
                    .filter_map(|&c| self.registry.info(c).map(|info| (c, info.vtable)))
                    .collect();
                let archetype = Archetype::new(
                    id,
                    node_id,
                    node.mask,
                    columns,
                    relation,
                    target,
                    node.capacity_increment,
                );
                self.archetypes.push(archetype);
                if relation.is_some() {
                    node.targets.all.push(id);
                } else {
                    node.single = Some(id);
                }
                debug!(archetype = id.0, node = node_id.0, %target, "created archetype");
                id
            }
        };

        if relation.is_some() {
            node.targets.by_target.insert(target, archetype);
        }
        self.cache
            .add_archetype(archetype, &self.archetypes[archetype.0 as usize]);
        archetype
    }

    /// Park an empty relation archetype for reuse and delist it everywhere.
    pub(crate) fn deactivate_archetype(&mut self, archetype: ArchetypeId) {
        let arch = &mut self.archetypes[archetype.0 as usize];
        let node = &mut self.nodes[arch.node().0 as usize];
        node.targets.by_target.remove(&arch.target());
        node.targets.free.push(archetype);
        debug!(archetype = archetype.0, target = %arch.target(), "deactivated relation archetype");
        arch.deactivate();
        self.cache.remove_archetype(archetype);
    }

    /// Deactivate `archetype` if it is an empty relation archetype whose
    /// target is dead.
    pub(crate) fn cleanup_archetype(&mut self, archetype: ArchetypeId) {
        let arch = &self.archetypes[archetype.0 as usize];
        if !arch.is_empty() || arch.relation().is_none() {
            return;
        }
        let target = arch.target();
        if target.is_zero() || self.entity_pool.is_alive(target) {
            return;
        }
        self.deactivate_archetype(archetype);
    }

    /// Deactivate every empty relation archetype bound to the removed entity
    /// `target`.
    pub(crate) fn cleanup_archetypes(&mut self, target: Entity) {
        let mut orphaned = Vec::new();
        for node in &self.relation_nodes {
            if let Some(archetype) = self.nodes[node.0 as usize].archetype_for(target) {
                if self.archetypes[archetype.0 as usize].is_empty() {
                    orphaned.push(archetype);
                }
            }
        }
        for archetype in orphaned {
            self.deactivate_archetype(archetype);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
