//! World construction parameters.

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Storage growth settings, validated by [`World::with_config`].
///
/// [`World::with_config`]: crate::world::World::with_config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rows added at a time when a non-relation archetype (or the entity
    /// pool) runs out of space.
    pub capacity_increment: usize,
    /// Rows added at a time when a relation archetype runs out of space.
    /// There tend to be many relation archetypes with few rows each.
    pub relation_capacity_increment: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity_increment: 128,
            relation_capacity_increment: 32,
        }
    }
}

impl Config {
    /// Set [`capacity_increment`](Config::capacity_increment).
    pub fn with_capacity_increment(mut self, increment: usize) -> Self {
        self.capacity_increment = increment;
        self
    }

    /// Set [`relation_capacity_increment`](Config::relation_capacity_increment).
    pub fn with_relation_capacity_increment(mut self, increment: usize) -> Self {
        self.relation_capacity_increment = increment;
        self
    }

    /// Check that both increments are positive.
    pub fn validate(&self) -> Result<(), EcsError> {
        if self.capacity_increment == 0 {
            return Err(EcsError::InvalidConfig(
                "capacity_increment must be positive".to_owned(),
            ));
        }
        if self.relation_capacity_increment == 0 {
            return Err(EcsError::InvalidConfig(
                "relation_capacity_increment must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}
