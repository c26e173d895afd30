//! Transport layer
//!
//! `DeliveryTransport` is the seam between the replication core and the
//! wire: delivery transitions, best-effort batch sends, liveness probes,
//! and an explicit versioned statistics surface. The core never reaches
//! into transport internals for counters.
//!
//! Two implementations: `QuicTransport` (WebTransport datagrams, the
//! production path) and `LoopbackTransport` (in-memory, used by tests and
//! benches and for offline simulation).
//!
//! Inbound traffic never touches core state directly. Connection tasks
//! translate datagrams into `NetCommand`s on an unbounded channel that the
//! tick loop drains at tick boundaries, preserving single-writer semantics.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};
use wtransport::endpoint::IncomingSession;
use wtransport::{Connection, Endpoint, VarInt};

use crate::config::ServerConfig;
use crate::game::entity::{Archetype, EntityId};
use crate::net::protocol::{
    decode, encode, frame_control, ClientMessage, ServerMessage, CHANNEL_CONTROL, CHANNEL_SNAPSHOT,
};
use crate::net::session::SessionId;
use crate::net::tls::TlsIdentity;
use crate::util::vec3::Vec3;

/// Version of the `TransportStats` layout. Bump when fields change so
/// consumers can detect mismatches instead of guessing.
pub const STATS_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no transport registered for session {0}")]
    UnknownSession(SessionId),
    #[error("datagram send failed: {0}")]
    SendFailed(String),
}

/// Statistics the transport commits to exposing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub version: u32,
    pub batches_sent: u64,
    pub batch_bytes_sent: u64,
    pub control_messages_sent: u64,
    pub delivery_begins: u64,
    pub delivery_ends: u64,
    pub probes_sent: u64,
    pub probes_failed: u64,
    pub forced_disconnects: u64,
}

/// Outbound operations the replication core performs against a transport
pub trait DeliveryTransport {
    /// Start delivering `entity` to `session`. Invoked exactly once per
    /// visibility gain transition.
    fn begin_delivery(
        &mut self,
        session: SessionId,
        entity: EntityId,
        archetype: Archetype,
    ) -> Result<(), TransportError>;

    /// Stop delivering `entity` to `session`. Invoked exactly once per
    /// visibility loss transition.
    fn end_delivery(&mut self, session: SessionId, entity: EntityId)
        -> Result<(), TransportError>;

    /// Send one self-contained snapshot batch, best-effort. A lost or
    /// reordered batch is superseded by the next tick's batch.
    fn send_batch(&mut self, session: SessionId, payload: &[u8]) -> Result<(), TransportError>;

    /// Acknowledge a fresh session and tell it which entity it controls
    fn welcome(&mut self, session: SessionId, avatar: EntityId) -> Result<(), TransportError>;

    /// Echo a client ping
    fn pong(&mut self, session: SessionId, client_timestamp: u64) -> Result<(), TransportError>;

    /// Liveness probe; `false` counts toward the session's failure streak
    fn probe(&mut self, session: SessionId) -> bool;

    /// Tear the session's connection down (health eviction, capacity)
    fn force_disconnect(&mut self, session: SessionId, reason: &str);

    fn stats(&self) -> TransportStats;
}

// ============================================================================
// QUIC / WebTransport implementation
// ============================================================================

/// Production transport: one registered QUIC connection per session, all
/// replication traffic over datagrams.
pub struct QuicTransport {
    connections: HashMap<SessionId, Arc<Connection>>,
    /// Reused per send to avoid allocating a tagged datagram each time
    datagram_buf: Vec<u8>,
    stats: TransportStats,
}

impl QuicTransport {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            datagram_buf: Vec::with_capacity(1400),
            stats: TransportStats {
                version: STATS_VERSION,
                ..Default::default()
            },
        }
    }

    pub fn register(&mut self, session: SessionId, connection: Arc<Connection>) {
        self.connections.insert(session, connection);
    }

    pub fn unregister(&mut self, session: SessionId) {
        self.connections.remove(&session);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn send_control(
        &mut self,
        session: SessionId,
        message: &ServerMessage,
    ) -> Result<(), TransportError> {
        let connection = self
            .connections
            .get(&session)
            .ok_or(TransportError::UnknownSession(session))?;
        let payload =
            encode(message).map_err(|e| TransportError::SendFailed(e.to_string()))?;
        connection
            .send_datagram(frame_control(&payload))
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.stats.control_messages_sent += 1;
        Ok(())
    }
}

impl Default for QuicTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryTransport for QuicTransport {
    fn begin_delivery(
        &mut self,
        session: SessionId,
        entity: EntityId,
        archetype: Archetype,
    ) -> Result<(), TransportError> {
        self.send_control(
            session,
            &ServerMessage::BeginDelivery {
                entity_id: entity,
                archetype,
            },
        )?;
        self.stats.delivery_begins += 1;
        Ok(())
    }

    fn end_delivery(
        &mut self,
        session: SessionId,
        entity: EntityId,
    ) -> Result<(), TransportError> {
        self.send_control(session, &ServerMessage::EndDelivery { entity_id: entity })?;
        self.stats.delivery_ends += 1;
        Ok(())
    }

    fn send_batch(&mut self, session: SessionId, payload: &[u8]) -> Result<(), TransportError> {
        let connection = self
            .connections
            .get(&session)
            .ok_or(TransportError::UnknownSession(session))?;

        self.datagram_buf.clear();
        self.datagram_buf.push(CHANNEL_SNAPSHOT);
        self.datagram_buf.extend_from_slice(payload);

        connection
            .send_datagram(&self.datagram_buf[..])
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.stats.batches_sent += 1;
        self.stats.batch_bytes_sent += self.datagram_buf.len() as u64;
        Ok(())
    }

    fn welcome(&mut self, session: SessionId, avatar: EntityId) -> Result<(), TransportError> {
        self.send_control(
            session,
            &ServerMessage::Welcome {
                session_id: session,
                avatar_id: avatar,
            },
        )
    }

    fn pong(&mut self, session: SessionId, client_timestamp: u64) -> Result<(), TransportError> {
        self.send_control(
            session,
            &ServerMessage::Pong {
                client_timestamp,
                server_timestamp: unix_millis(),
            },
        )
    }

    fn probe(&mut self, session: SessionId) -> bool {
        self.stats.probes_sent += 1;
        let alive = match self.connections.get(&session) {
            Some(connection) => {
                let heartbeat = ServerMessage::Pong {
                    client_timestamp: 0,
                    server_timestamp: unix_millis(),
                };
                match encode(&heartbeat) {
                    Ok(payload) => connection.send_datagram(frame_control(&payload)).is_ok(),
                    Err(_) => false,
                }
            }
            None => false,
        };
        if !alive {
            self.stats.probes_failed += 1;
        }
        alive
    }

    fn force_disconnect(&mut self, session: SessionId, reason: &str) {
        if let Some(connection) = self.connections.remove(&session) {
            // Best-effort notice before the close frame
            if let Ok(payload) = encode(&ServerMessage::Kicked {
                reason: reason.to_string(),
            }) {
                let _ = connection.send_datagram(frame_control(&payload));
            }
            connection.close(VarInt::from_u32(1), reason.as_bytes());
            self.stats.forced_disconnects += 1;
            info!("Forced disconnect of session {}: {}", session, reason);
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

// ============================================================================
// Loopback implementation
// ============================================================================

/// In-memory transport for tests, benches, and offline simulation.
/// Records everything the core would have put on the wire.
pub struct LoopbackTransport {
    pub known_sessions: Vec<SessionId>,
    /// (session, payload) per sent batch, in send order
    pub batches: Vec<(SessionId, Vec<u8>)>,
    /// (session, entity, started) per delivery transition, in order
    pub transitions: Vec<(SessionId, EntityId, bool)>,
    /// Sessions whose probes currently fail
    pub failing_probes: Vec<SessionId>,
    pub kicked: Vec<(SessionId, String)>,
    pub welcomes: Vec<(SessionId, EntityId)>,
    pub pongs: Vec<(SessionId, u64)>,
    stats: TransportStats,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            known_sessions: Vec::new(),
            batches: Vec::new(),
            transitions: Vec::new(),
            failing_probes: Vec::new(),
            kicked: Vec::new(),
            welcomes: Vec::new(),
            pongs: Vec::new(),
            stats: TransportStats {
                version: STATS_VERSION,
                ..Default::default()
            },
        }
    }

    pub fn register(&mut self, session: SessionId) {
        if !self.known_sessions.contains(&session) {
            self.known_sessions.push(session);
        }
    }

    pub fn set_probe_failing(&mut self, session: SessionId, failing: bool) {
        if failing {
            if !self.failing_probes.contains(&session) {
                self.failing_probes.push(session);
            }
        } else {
            self.failing_probes.retain(|s| *s != session);
        }
    }

    /// Batches sent to one session, oldest first
    pub fn batches_for(&self, session: SessionId) -> Vec<&Vec<u8>> {
        self.batches
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, payload)| payload)
            .collect()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryTransport for LoopbackTransport {
    fn begin_delivery(
        &mut self,
        session: SessionId,
        entity: EntityId,
        _archetype: Archetype,
    ) -> Result<(), TransportError> {
        if !self.known_sessions.contains(&session) {
            return Err(TransportError::UnknownSession(session));
        }
        self.transitions.push((session, entity, true));
        self.stats.delivery_begins += 1;
        Ok(())
    }

    fn end_delivery(
        &mut self,
        session: SessionId,
        entity: EntityId,
    ) -> Result<(), TransportError> {
        if !self.known_sessions.contains(&session) {
            return Err(TransportError::UnknownSession(session));
        }
        self.transitions.push((session, entity, false));
        self.stats.delivery_ends += 1;
        Ok(())
    }

    fn send_batch(&mut self, session: SessionId, payload: &[u8]) -> Result<(), TransportError> {
        if !self.known_sessions.contains(&session) {
            return Err(TransportError::UnknownSession(session));
        }
        self.batches.push((session, payload.to_vec()));
        self.stats.batches_sent += 1;
        self.stats.batch_bytes_sent += payload.len() as u64;
        Ok(())
    }

    fn welcome(&mut self, session: SessionId, avatar: EntityId) -> Result<(), TransportError> {
        if !self.known_sessions.contains(&session) {
            return Err(TransportError::UnknownSession(session));
        }
        self.welcomes.push((session, avatar));
        self.stats.control_messages_sent += 1;
        Ok(())
    }

    fn pong(&mut self, session: SessionId, client_timestamp: u64) -> Result<(), TransportError> {
        if !self.known_sessions.contains(&session) {
            return Err(TransportError::UnknownSession(session));
        }
        self.pongs.push((session, client_timestamp));
        self.stats.control_messages_sent += 1;
        Ok(())
    }

    fn probe(&mut self, session: SessionId) -> bool {
        self.stats.probes_sent += 1;
        let alive =
            self.known_sessions.contains(&session) && !self.failing_probes.contains(&session);
        if !alive {
            self.stats.probes_failed += 1;
        }
        alive
    }

    fn force_disconnect(&mut self, session: SessionId, reason: &str) {
        self.known_sessions.retain(|s| *s != session);
        self.kicked.push((session, reason.to_string()));
        self.stats.forced_disconnects += 1;
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

// ============================================================================
// Inbound command queue + accept loop
// ============================================================================

/// Inbound events drained by the tick loop at tick boundaries
#[derive(Debug)]
pub enum NetCommand {
    Connected {
        session_id: SessionId,
        name: String,
        connection: Arc<Connection>,
    },
    Disconnected {
        session_id: SessionId,
    },
    MoveAvatar {
        session_id: SessionId,
        position: Vec3,
        yaw: f32,
    },
    Ping {
        session_id: SessionId,
        timestamp: u64,
    },
}

/// WebTransport endpoint: accepts connections and feeds the command queue
pub struct ServerEndpoint {
    config: ServerConfig,
    tls: TlsIdentity,
    commands: Sender<NetCommand>,
}

impl ServerEndpoint {
    pub async fn new(config: ServerConfig, commands: Sender<NetCommand>) -> anyhow::Result<Self> {
        let tls = TlsIdentity::load(&config).await?;
        Ok(Self {
            config,
            tls,
            commands,
        })
    }

    /// Base64 SHA-256 of the active certificate (for browser flags)
    pub fn cert_hash(&self) -> &str {
        self.tls.cert_hash()
    }

    /// Accept connections forever. Each connection gets its own task that
    /// only ever talks to the core through the command queue.
    pub async fn run(self) -> anyhow::Result<()> {
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_default(self.config.port)
            .with_identity(self.tls.into_identity())
            .build();

        let server = Endpoint::server(server_config)?;
        info!("WebTransport endpoint listening on port {}", self.config.port);

        loop {
            let incoming = server.accept().await;
            let commands = self.commands.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, commands).await {
                    warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Strip a client-supplied name down to something displayable
fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(24)
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Drive one connection: wait for Hello, then translate datagrams into
/// commands until the connection dies.
async fn handle_connection(
    incoming: IncomingSession,
    commands: Sender<NetCommand>,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;
    debug!(
        "New connection from {:?}, path {}",
        session_request.authority(),
        session_request.path()
    );
    let connection = Arc::new(session_request.accept().await?);

    let mut session_id: Option<SessionId> = None;

    loop {
        let datagram = match connection.receive_datagram().await {
            Ok(data) => data,
            Err(e) => {
                debug!("Datagram receive error: {}", e);
                break;
            }
        };

        // Clients only speak on the control channel
        let Some((&tag, payload)) = datagram.split_first() else {
            continue;
        };
        if tag != CHANNEL_CONTROL {
            continue;
        }

        let message: ClientMessage = match decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Failed to decode client datagram: {}", e);
                continue;
            }
        };

        match message {
            ClientMessage::Hello { name } => {
                if session_id.is_some() {
                    continue;
                }
                let name = sanitize_name(&name);
                if name.is_empty() {
                    if let Ok(payload) = encode(&ServerMessage::Rejected {
                        reason: "Invalid name".to_string(),
                    }) {
                        let _ = connection.send_datagram(frame_control(&payload));
                    }
                    continue;
                }
                let id = uuid::Uuid::new_v4();
                session_id = Some(id);
                if commands
                    .send(NetCommand::Connected {
                        session_id: id,
                        name,
                        connection: connection.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
            ClientMessage::Move { position, yaw } => {
                if let Some(id) = session_id {
                    if !position.is_finite() || !yaw.is_finite() {
                        debug!("Dropping non-finite move from session {}", id);
                        continue;
                    }
                    if commands
                        .send(NetCommand::MoveAvatar {
                            session_id: id,
                            position,
                            yaw,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            }
            ClientMessage::Ping { timestamp } => {
                if let Some(id) = session_id {
                    if commands
                        .send(NetCommand::Ping {
                            session_id: id,
                            timestamp,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            }
            ClientMessage::Leave => {
                debug!("Session {:?} requested leave", session_id);
                break;
            }
        }
    }

    if let Some(id) = session_id {
        let _ = commands.send(NetCommand::Disconnected { session_id: id });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_loopback_unknown_session_errors() {
        let mut transport = LoopbackTransport::new();
        let session = Uuid::new_v4();
        assert!(matches!(
            transport.send_batch(session, &[0, 0]),
            Err(TransportError::UnknownSession(_))
        ));
        assert!(matches!(
            transport.begin_delivery(session, EntityId(1), Archetype::Husk),
            Err(TransportError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_loopback_records_traffic() {
        let mut transport = LoopbackTransport::new();
        let session = Uuid::new_v4();
        transport.register(session);

        transport
            .begin_delivery(session, EntityId(4), Archetype::Shard)
            .unwrap();
        transport.send_batch(session, &[1, 0]).unwrap();
        transport.end_delivery(session, EntityId(4)).unwrap();

        assert_eq!(transport.transitions.len(), 2);
        assert_eq!(transport.batches_for(session).len(), 1);

        let stats = transport.stats();
        assert_eq!(stats.version, STATS_VERSION);
        assert_eq!(stats.delivery_begins, 1);
        assert_eq!(stats.delivery_ends, 1);
        assert_eq!(stats.batches_sent, 1);
    }

    #[test]
    fn test_loopback_probe_failure_accounting() {
        let mut transport = LoopbackTransport::new();
        let session = Uuid::new_v4();
        transport.register(session);

        assert!(transport.probe(session));
        transport.set_probe_failing(session, true);
        assert!(!transport.probe(session));
        transport.set_probe_failing(session, false);
        assert!(transport.probe(session));

        let stats = transport.stats();
        assert_eq!(stats.probes_sent, 3);
        assert_eq!(stats.probes_failed, 1);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  torch  bearer \u{7}"), "torch bearer");
        assert_eq!(sanitize_name("\t\n"), "");
        assert_eq!(sanitize_name(&"x".repeat(64)).len(), 24);
    }
}
