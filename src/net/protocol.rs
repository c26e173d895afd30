//! Control-channel messages
//!
//! Two logical channels share the datagram stream, distinguished by a
//! leading tag byte. The snapshot channel carries the fixed-layout batch
//! records from `codec`; the control channel carries these bincode
//! messages (join, ping, delivery transitions). Both are best-effort: a
//! newer message supersedes an older one and nothing is retransmitted.

use serde::{Deserialize, Serialize};

use crate::game::entity::{Archetype, EntityId};
use crate::net::session::SessionId;
use crate::util::vec3::Vec3;

/// Tag byte for quantized snapshot batches (payload: codec batch format)
pub const CHANNEL_SNAPSHOT: u8 = 0x01;
/// Tag byte for bincode control messages
pub const CHANNEL_CONTROL: u8 = 0x02;

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// First message on a fresh connection
    Hello { name: String },
    /// Move the session's avatar (authoritative pose comes back in batches)
    Move { position: Vec3, yaw: f32 },
    /// Liveness / latency echo
    Ping { timestamp: u64 },
    /// Orderly leave
    Leave,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Session accepted; avatar spawned and unconditionally visible
    Welcome {
        session_id: SessionId,
        avatar_id: EntityId,
    },
    /// Session rejected (capacity, bad hello)
    Rejected { reason: String },
    /// Start delivering this entity: the client should instantiate its
    /// local representation before snapshot records for it arrive
    BeginDelivery {
        entity_id: EntityId,
        archetype: Archetype,
    },
    /// Stop delivering this entity; the client freezes or discards its
    /// local copy
    EndDelivery { entity_id: EntityId },
    /// Echo of a client ping
    Pong {
        client_timestamp: u64,
        server_timestamp: u64,
    },
    /// Forced disconnect (health eviction, capacity)
    Kicked { reason: String },
}

/// Encode a control message using bincode
/// Uses legacy config for fixed-size integers (stable wire layout)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a control message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

/// Prepend the control channel tag to an encoded message
pub fn frame_control(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(1 + payload.len());
    framed.push(CHANNEL_CONTROL);
    framed.extend_from_slice(payload);
    framed
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
