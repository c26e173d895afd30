use serde::{Deserialize, Serialize};

use crate::util::vec3::{wrap_degrees, Vec3};

/// Stable numeric entity identity, unique for the instance's lifetime.
///
/// Deliberately 16 bits to match the wire record. The world's allocator
/// fails closed once the space is exhausted rather than wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u16);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Category of a pooled entity, determining which free list it returns to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    /// Player-controlled avatar (spawned directly, never pooled back)
    Avatar,
    /// Roaming hostile creature
    Husk,
    /// Placed floor trap
    Trap,
    /// Collectible ember shard
    Shard,
}

impl Archetype {
    pub const ALL: [Archetype; 4] = [
        Archetype::Avatar,
        Archetype::Husk,
        Archetype::Trap,
        Archetype::Shard,
    ];

    /// Whether released instances of this archetype are recycled
    pub fn pooled(&self) -> bool {
        !matches!(self, Archetype::Avatar)
    }
}

/// Spawn placement: position plus facing
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    /// Yaw in degrees, wrapped to [0, 360)
    pub yaw: f32,
}

impl Pose {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            yaw: wrap_degrees(yaw),
        }
    }
}

/// A simulated object replicated to zero or more sessions.
///
/// Entities are created by game logic (directly or through the pool) and
/// deactivated by game logic; the replication core never creates one on
/// its own.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub archetype: Archetype,
    pub position: Vec3,
    yaw: f32,
    pub active: bool,
}

impl Entity {
    pub fn new(id: EntityId, archetype: Archetype, pose: Pose) -> Self {
        Self {
            id,
            archetype,
            position: pose.position,
            yaw: pose.yaw,
            active: true,
        }
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn set_yaw(&mut self, yaw: f32) {
        self.yaw = wrap_degrees(yaw);
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.position = pose.position;
        self.yaw = pose.yaw;
    }

    /// Clear transient state on release back to the pool
    pub fn deactivate(&mut self) {
        self.active = false;
        self.position = Vec3::ZERO;
        self.yaw = 0.0;
    }

    /// Reactivate a recycled instance at a fresh pose
    pub fn reactivate(&mut self, pose: Pose) {
        self.position = pose.position;
        self.yaw = pose.yaw;
        self.active = true;
    }
}
