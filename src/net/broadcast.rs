//! Per-tick snapshot broadcast
//!
//! Every broadcast tick each session gets one batch holding the full
//! current state of every entity visible to it. Batches are self-contained
//! by construction: no deltas, no acknowledgements, so a dropped or
//! reordered datagram is simply superseded by the next tick's batch.

use tracing::warn;

use crate::game::world::World;
use crate::net::codec::{SnapshotCodec, SnapshotRecord};
use crate::net::interest::InterestManager;
use crate::net::session::SessionManager;
use crate::net::transport::DeliveryTransport;

/// Assembles and sends one batch per session per tick. Scratch buffers
/// persist across ticks so the steady state allocates nothing.
pub struct SnapshotBroadcaster {
    codec: SnapshotCodec,
    records: Vec<SnapshotRecord>,
    payload: Vec<u8>,
}

impl SnapshotBroadcaster {
    pub fn new(codec: SnapshotCodec) -> Self {
        Self {
            codec,
            records: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn codec(&self) -> &SnapshotCodec {
        &self.codec
    }

    /// Broadcast the current world state. Returns the number of batches
    /// sent. Sessions with an empty interest set get nothing this tick.
    pub fn broadcast(
        &mut self,
        world: &World,
        sessions: &SessionManager,
        interest: &InterestManager,
        transport: &mut dyn DeliveryTransport,
    ) -> usize {
        let mut sent = 0;
        for session in sessions.iter() {
            let Some(visible) = interest.visible_set(session.id) else {
                continue;
            };
            if visible.is_empty() {
                continue;
            }

            self.records.clear();
            for entity_id in visible {
                // Deactivation events may not have drained yet this tick;
                // never snapshot an inactive entity.
                if let Some(entity) = world.get(*entity_id) {
                    if entity.active {
                        self.records.push(self.codec.snapshot(entity));
                    }
                }
            }
            if self.records.is_empty() {
                continue;
            }

            self.codec.encode_batch(&self.records, &mut self.payload);
            match transport.send_batch(session.id, &self.payload) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Batch send to {} failed: {}", session.id, e),
            }
        }
        sent
    }
}
