//! Entity instance pool
//!
//! Spawning an entity has to propagate to every interested session, which
//! makes construct/destroy churn expensive relative to field mutation.
//! Released instances therefore park on a per-archetype free list and get
//! reactivated on the next acquire. The free lists only ever hold inactive
//! instances and total capacity never shrinks.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::game::entity::{Archetype, EntityId, Pose};
use crate::game::world::{World, WorldError};

pub struct EntityPool {
    free: FxHashMap<Archetype, Vec<EntityId>>,
}

impl EntityPool {
    pub fn new() -> Self {
        Self {
            free: FxHashMap::default(),
        }
    }

    /// Construct `count` inactive instances ahead of first use
    pub fn prewarm(
        &mut self,
        world: &mut World,
        archetype: Archetype,
        count: usize,
    ) -> Result<(), WorldError> {
        let list = self.free.entry(archetype).or_default();
        list.reserve(count);
        for _ in 0..count {
            let id = world.create(archetype, Pose::default())?;
            world.deactivate(id)?;
            list.push(id);
        }
        debug!("Prewarmed {} {:?} instances", count, archetype);
        Ok(())
    }

    /// Reactivate a free instance at `pose`, or construct a new one when
    /// the free list is empty. An empty list is not an error; the new
    /// instance becomes future pool capacity. The only failure mode is id
    /// space exhaustion, which fails closed.
    pub fn acquire(
        &mut self,
        world: &mut World,
        archetype: Archetype,
        pose: Pose,
    ) -> Result<EntityId, WorldError> {
        if let Some(id) = self.free.entry(archetype).or_default().pop() {
            world.reactivate(id, pose)?;
            return Ok(id);
        }
        world.create(archetype, pose)
    }

    /// Clear transient state, deactivate, and park the instance on its
    /// archetype's free list. Non-pooled archetypes are deactivated but
    /// not recycled. Releasing an already-released instance errors, which
    /// keeps the free list free of duplicates.
    pub fn release(&mut self, world: &mut World, id: EntityId) -> Result<(), WorldError> {
        let archetype = world.deactivate(id)?;
        if archetype.pooled() {
            self.free.entry(archetype).or_default().push(id);
        }
        Ok(())
    }

    /// Free instances currently parked for an archetype
    pub fn free_count(&self, archetype: Archetype) -> usize {
        self.free.get(&archetype).map(|l| l.len()).unwrap_or(0)
    }
}

impl Default for EntityPool {
    fn default() -> Self {
        Self::new()
    }
}
