//! Authoritative entity storage
//!
//! Owns every `Entity` and the world event queue. All mutation happens on
//! the tick loop; components that care about lifecycle changes (interest
//! management, metrics) drain the queue once per tick instead of hooking
//! change callbacks.

use rustc_hash::FxHashMap;

use crate::game::entity::{Archetype, Entity, EntityId, Pose};

/// Hard cap from the 16-bit wire identity field. Allocation fails closed
/// at this boundary instead of wrapping.
pub const MAX_ENTITY_IDS: u32 = u16::MAX as u32 + 1;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("entity id space exhausted ({MAX_ENTITY_IDS} instances constructed)")]
    IdSpaceExhausted,
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("entity {0} is already inactive")]
    InactiveEntity(EntityId),
}

/// Lifecycle notification drained once per tick by interested components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldEvent {
    /// Entity became active (fresh construction or pool reactivation)
    EntityActivated(EntityId),
    /// Entity became inactive (pool release or destruction)
    EntityDeactivated(EntityId),
}

pub struct World {
    entities: FxHashMap<EntityId, Entity>,
    /// Count of instances ever constructed; doubles as the next id.
    /// Kept wider than the id so exhaustion is detectable.
    next_id: u32,
    events: Vec<WorldEvent>,
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: FxHashMap::default(),
            next_id: 0,
            events: Vec::new(),
        }
    }

    /// Construct a brand-new active entity. Fails only when the 16-bit id
    /// space is exhausted.
    pub fn create(&mut self, archetype: Archetype, pose: Pose) -> Result<EntityId, WorldError> {
        if self.next_id >= MAX_ENTITY_IDS {
            return Err(WorldError::IdSpaceExhausted);
        }
        let id = EntityId(self.next_id as u16);
        self.next_id += 1;
        self.entities.insert(id, Entity::new(id, archetype, pose));
        self.events.push(WorldEvent::EntityActivated(id));
        Ok(id)
    }

    /// Reactivate a recycled inactive instance at a fresh pose
    pub fn reactivate(&mut self, id: EntityId, pose: Pose) -> Result<(), WorldError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(WorldError::UnknownEntity(id))?;
        entity.reactivate(pose);
        self.events.push(WorldEvent::EntityActivated(id));
        Ok(())
    }

    /// Deactivate an entity and clear its transient state. The instance
    /// stays in storage so the pool can hand it out again. Deactivating an
    /// already-inactive entity is an error: letting it through would park
    /// the same instance on a free list twice.
    pub fn deactivate(&mut self, id: EntityId) -> Result<Archetype, WorldError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(WorldError::UnknownEntity(id))?;
        if !entity.active {
            return Err(WorldError::InactiveEntity(id));
        }
        entity.deactivate();
        self.events.push(WorldEvent::EntityDeactivated(id));
        Ok(entity.archetype)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.entities.get(&id).map(|e| e.active).unwrap_or(false)
    }

    /// Iterate all currently active entities
    pub fn active_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| e.active)
    }

    pub fn active_count(&self) -> usize {
        self.entities.values().filter(|e| e.active).count()
    }

    /// Total instances ever constructed (pool capacity plus avatars)
    pub fn constructed_count(&self) -> usize {
        self.next_id as usize
    }

    /// Move queued lifecycle events into `out`, leaving the queue empty.
    /// `out` is a reusable buffer owned by the caller.
    pub fn drain_events_into(&mut self, out: &mut Vec<WorldEvent>) {
        out.append(&mut self.events);
    }

    #[cfg(test)]
    pub fn pending_events(&self) -> &[WorldEvent] {
        &self.events
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
