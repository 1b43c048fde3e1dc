//! Read-only statistics about a world.
//!
//! [`World::stats`] walks the archetype graph once and returns plain data.
//! Everything serializes with serde; formatting is up to the caller.

use serde::Serialize;

use crate::archetype::Archetype;
use crate::entity::Entity;
use crate::node::ArchNode;
use crate::world::World;

/// Statistics of the entity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityStats {
    /// Live entities.
    pub used: usize,
    /// Slots ever handed out.
    pub total: usize,
    /// Free slots waiting to be recycled.
    pub recycled: usize,
    /// Allocated slot capacity.
    pub capacity: usize,
}

/// Statistics of one archetype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchetypeStats {
    /// Arena index of the archetype.
    pub id: u32,
    /// Relation target, if the archetype belongs to a relation node and is
    /// bound to a non-zero target.
    pub target: Option<Entity>,
    /// Whether the archetype is in use.
    pub active: bool,
    /// Number of rows.
    pub len: usize,
    /// Allocated rows.
    pub capacity: usize,
}

/// Statistics of one graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    /// Index of the node.
    pub id: u32,
    /// Component IDs of the node's mask.
    pub components: Vec<u8>,
    /// Type names of those components.
    pub component_names: Vec<&'static str>,
    /// The relation component, if any.
    pub relation: Option<u8>,
    /// Whether any archetype was ever created for the node.
    pub active: bool,
    /// Archetypes of the node, active or not.
    pub archetype_count: usize,
    /// Active archetypes of the node.
    pub active_archetype_count: usize,
    /// Bytes per row across all components.
    pub row_size: usize,
    /// Total rows over all archetypes.
    pub len: usize,
    /// Total allocated rows over all archetypes.
    pub capacity: usize,
    /// Per-archetype statistics.
    pub archetypes: Vec<ArchetypeStats>,
}

/// Statistics of a whole world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorldStats {
    /// Entity pool statistics.
    pub entities: EntityStats,
    /// Registered component types.
    pub component_count: usize,
    /// Type names of the registered components, by ID.
    pub component_types: Vec<&'static str>,
    /// Whether the world is locked.
    pub locked: bool,
    /// Registered cached filters.
    pub cached_filters: usize,
    /// Stored resources.
    pub resources: usize,
    /// Number of archetypes, active or not.
    pub archetype_count: usize,
    /// Number of active archetypes.
    pub active_archetype_count: usize,
    /// Per-node statistics, in creation order.
    pub nodes: Vec<NodeStats>,
}

fn archetype_stats(archetype: &Archetype) -> ArchetypeStats {
    let target = archetype.target();
    ArchetypeStats {
        id: archetype.id().0,
        target: (!target.is_zero()).then_some(target),
        active: archetype.is_active(),
        len: archetype.len(),
        capacity: archetype.capacity(),
    }
}

impl World {
    /// Collect statistics about the world.
    pub fn stats(&self) -> WorldStats {
        let nodes: Vec<NodeStats> = self.nodes.iter().map(|node| self.node_stats(node)).collect();
        let active_archetype_count = self.archetypes.iter().filter(|a| a.is_active()).count();
        let component_types = (0..self.registry.len())
            .filter_map(|i| self.registry.info(crate::component::ComponentId(i as u8)))
            .map(|info| info.name)
            .collect();
        WorldStats {
            entities: EntityStats {
                used: self.entity_pool.len(),
                total: self.entity_pool.total(),
                recycled: self.entity_pool.available(),
                capacity: self.entity_pool.capacity(),
            },
            component_count: self.registry.len(),
            component_types,
            locked: self.is_locked(),
            cached_filters: self.cache.len(),
            resources: self.resources.len(),
            archetype_count: self.archetypes.len(),
            active_archetype_count,
            nodes,
        }
    }

    fn node_stats(&self, node: &ArchNode) -> NodeStats {
        let infos: Vec<_> = node.ids().iter().filter_map(|id| self.registry.info(*id)).collect();
        let archetypes: Vec<ArchetypeStats> = node
            .archetypes()
            .iter()
            .map(|id| archetype_stats(&self.archetypes[id.0 as usize]))
            .collect();
        NodeStats {
            id: node.id().0,
            components: node.ids().iter().map(|id| id.index()).collect(),
            component_names: infos.iter().map(|info| info.name).collect(),
            relation: node.relation().map(|id| id.index()),
            active: node.is_active(),
            archetype_count: archetypes.len(),
            active_archetype_count: archetypes.iter().filter(|a| a.active).count(),
            row_size: infos.iter().map(|info| info.size).sum(),
            len: archetypes.iter().map(|a| a.len).sum(),
            capacity: archetypes.iter().map(|a| a.capacity).sum(),
            archetypes,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[derive(Debug, Clone, Default)]
    struct Pos(#[allow(dead_code)] f64);
    impl Component for Pos {}
    #[derive(Debug, Clone, Default)]
    struct Rel;
    impl Component for Rel {
        const IS_RELATION: bool = true;
    }

    #[test]
    fn stats_reflect_world() {
        let mut world = World::new();
        let pos = world.component_id::<Pos>().unwrap();
        let rel = world.component_id::<Rel>().unwrap();
        let target = world.new_entity(&[]).unwrap();
        world.batch().new_entities(10, &[pos]).unwrap();
        let child = world.new_entity(&[rel]).unwrap();
        world.relations().set(child, rel, target).unwrap();
        let gone = world.new_entity(&[pos]).unwrap();
        world.remove_entity(gone).unwrap();

        let stats = world.stats();
        assert_eq!(stats.entities.used, 12);
        assert_eq!(stats.entities.total, 13);
        assert_eq!(stats.entities.recycled, 1);
        assert_eq!(stats.component_count, 2);
        assert!(!stats.locked);
        assert_eq!(stats.nodes.len(), 3);

        let pos_node = stats.nodes.iter().find(|n| n.components == vec![pos.index()]).unwrap();
        assert_eq!(pos_node.len, 10);
        assert_eq!(pos_node.row_size, 8);
        assert!(pos_node.capacity >= 10);

        let rel_node = stats.nodes.iter().find(|n| n.relation == Some(rel.index())).unwrap();
        assert_eq!(rel_node.archetype_count, 2);
        assert!(rel_node.archetypes.iter().any(|a| a.target == Some(target) && a.len == 1));
    }

    #[test]
    fn stats_serialize_to_json() {
        let mut world = World::new();
        let pos = world.component_id::<Pos>().unwrap();
        world.new_entity(&[pos]).unwrap();
        let json = serde_json::to_value(world.stats()).unwrap();
        assert_eq!(json["entities"]["used"], 1);
        assert_eq!(json["component_count"], 1);
        assert!(json["nodes"].as_array().unwrap().len() >= 2);
    }
}
