//! Emberhold Replication Server
//!
//! An authoritative entity-replication server over WebTransport. Entities
//! live in a pooled world; each connected session sees only the entities
//! inside its interest radius (with a hysteresis band against boundary
//! flicker) and receives their full state every tick as quantized,
//! loss-tolerant snapshot batches.

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
