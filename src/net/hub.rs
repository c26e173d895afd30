//! Replication hub: the tick loop's single-writer core
//!
//! Owns the world, the entity pool, sessions, interest state, the
//! broadcaster, and the health monitor, and drives them in a fixed order
//! every tick. All mutation happens here; connection tasks only feed the
//! command queue that the loop drains at tick boundaries.
//!
//! Tick order: inbound commands, world lifecycle events, interest
//! evaluation, snapshot broadcast, health probes. Events drain before the
//! sweep so despawn revocation never waits on the evaluation cadence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use rand::Rng;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::game::entity::{Archetype, EntityId, Pose};
use crate::game::pool::EntityPool;
use crate::game::world::{World, WorldError};
use crate::metrics::Metrics;
use crate::net::broadcast::SnapshotBroadcaster;
use crate::net::codec::SnapshotCodec;
use crate::net::health::{HealthConfig, HealthMonitor};
use crate::net::interest::{InterestConfig, InterestManager};
use crate::net::session::{Session, SessionId, SessionManager};
use crate::net::transport::{DeliveryTransport, NetCommand, QuicTransport};
use crate::util::vec3::Vec3;

/// New avatars scatter inside this radius around the origin
const SPAWN_RADIUS: f32 = 20.0;

pub struct ReplicationHub<T: DeliveryTransport> {
    config: ServerConfig,
    world: World,
    pool: EntityPool,
    sessions: SessionManager,
    interest: InterestManager,
    broadcaster: SnapshotBroadcaster,
    health: HealthMonitor,
    transport: T,
    metrics: Arc<Metrics>,
    tick: u64,
}

impl<T: DeliveryTransport> ReplicationHub<T> {
    pub fn new(config: ServerConfig, transport: T, metrics: Arc<Metrics>) -> Self {
        let interest = InterestManager::new(InterestConfig {
            radius: config.visibility_radius,
            hysteresis: config.hysteresis_margin,
            eval_interval_ticks: config.visibility_interval_ticks(),
            max_sessions_per_frame: config.max_visibility_updates,
        });
        let health = HealthMonitor::new(HealthConfig {
            probe_interval_ticks: config.health_check_interval_ticks(),
            failure_threshold: config.health_failure_threshold,
        });
        let broadcaster = SnapshotBroadcaster::new(SnapshotCodec::new(config.compression_ratio));

        let mut hub = Self {
            sessions: SessionManager::new(config.max_sessions),
            world: World::new(),
            pool: EntityPool::new(),
            interest,
            broadcaster,
            health,
            transport,
            metrics,
            tick: 0,
            config,
        };
        hub.prewarm_pool();
        hub
    }

    fn prewarm_pool(&mut self) {
        for archetype in Archetype::ALL {
            if !archetype.pooled() {
                continue;
            }
            if let Err(e) =
                self.pool
                    .prewarm(&mut self.world, archetype, self.config.prewarm_count)
            {
                error!("Pool prewarm for {:?} failed: {}", archetype, e);
            }
        }
        // Prewarm only parks instances; nobody is connected yet, so the
        // resulting lifecycle events are drained without observers.
        self.interest
            .apply_world_events(&mut self.world, &mut self.transport);
    }

    /// Activate an entity, reusing a pooled instance when one is free
    pub fn spawn(&mut self, archetype: Archetype, pose: Pose) -> Result<EntityId, WorldError> {
        self.pool.acquire(&mut self.world, archetype, pose)
    }

    /// Deactivate an entity and return it to the pool. Visibility is
    /// revoked for every session on the next event drain, before any
    /// further batch includes it.
    pub fn despawn(&mut self, id: EntityId) -> Result<(), WorldError> {
        self.pool.release(&mut self.world, id)
    }

    pub fn is_visible(&self, session: SessionId, entity: EntityId) -> bool {
        self.interest.is_visible(session, entity)
    }

    pub fn set_anchor(&mut self, session: SessionId, position: Vec3) -> bool {
        self.sessions.set_anchor(session, position)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_entity_count(&self) -> usize {
        self.world.active_count()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Admit a session: register it, spawn its avatar, and run the full
    /// initial sync so it starts with a complete picture.
    pub fn handle_connect(&mut self, id: SessionId, name: String) {
        if self.sessions.connect(id, name.clone()).is_none() {
            warn!("Rejecting session {} ({}): at capacity", id, name);
            self.transport.force_disconnect(id, "Server full");
            return;
        }

        let spawn_pose = random_spawn_pose();
        let avatar = match self.spawn(Archetype::Avatar, spawn_pose) {
            Ok(avatar) => avatar,
            Err(e) => {
                error!("Avatar spawn for session {} failed: {}", id, e);
                self.sessions.disconnect(id);
                self.transport.force_disconnect(id, "Server full");
                return;
            }
        };
        self.sessions.set_controlled(id, Some(avatar));
        self.sessions.set_anchor(id, spawn_pose.position);

        // Avatar activation precedes the sync so the session sees itself
        self.interest
            .apply_world_events(&mut self.world, &mut self.transport);
        if let Some(session) = self.sessions.get(id) {
            let session = session.clone();
            self.interest
                .on_session_connect(&session, &self.world, &mut self.transport);
        }

        if let Err(e) = self.transport.welcome(id, avatar) {
            warn!("Welcome to session {} failed: {}", id, e);
        }
        info!("Session {} ({}) joined as {}", id, name, avatar);
    }

    /// Remove a session and release everything it held
    pub fn handle_disconnect(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.disconnect(id) {
            self.cleanup_session(session);
            info!("Session {} disconnected", id);
        }
    }

    pub fn handle_move(&mut self, id: SessionId, position: Vec3, yaw: f32) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        let Some(controlled) = session.controlled else {
            return;
        };
        if let Some(entity) = self.world.get_mut(controlled) {
            entity.set_pose(Pose::new(position, yaw));
        }
        self.sessions.set_anchor(id, position);
    }

    pub fn handle_ping(&mut self, id: SessionId, timestamp: u64) {
        if !self.sessions.contains(id) {
            return;
        }
        if let Err(e) = self.transport.pong(id, timestamp) {
            warn!("Pong to session {} failed: {}", id, e);
        }
    }

    fn cleanup_session(&mut self, session: Session) {
        self.interest.on_session_disconnect(session.id);
        if let Some(avatar) = session.controlled {
            if let Err(e) = self.pool.release(&mut self.world, avatar) {
                error!("Releasing avatar {} failed: {}", avatar, e);
            }
        }
    }

    /// One replication tick
    pub fn tick(&mut self) {
        self.tick += 1;

        self.interest
            .apply_world_events(&mut self.world, &mut self.transport);
        self.interest
            .evaluate(self.tick, &self.world, &self.sessions, &mut self.transport);
        self.broadcaster.broadcast(
            &self.world,
            &self.sessions,
            &self.interest,
            &mut self.transport,
        );
        let evicted = self
            .health
            .check(self.tick, &mut self.sessions, &mut self.transport);
        for session in evicted {
            self.metrics
                .sessions_evicted_total
                .fetch_add(1, Ordering::Relaxed);
            self.cleanup_session(session);
        }

        self.refresh_metrics();
    }

    #[cfg(test)]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    fn refresh_metrics(&self) {
        let m = &self.metrics;
        m.sessions_active
            .store(self.sessions.len() as u64, Ordering::Relaxed);
        m.entities_active
            .store(self.world.active_count() as u64, Ordering::Relaxed);
        m.entities_constructed
            .store(self.world.constructed_count() as u64, Ordering::Relaxed);

        let pooled: usize = Archetype::ALL
            .iter()
            .map(|a| self.pool.free_count(*a))
            .sum();
        m.entities_pooled.store(pooled as u64, Ordering::Relaxed);

        let pairs: usize = self
            .sessions
            .iter()
            .map(|s| self.interest.visible_count(s.id))
            .sum();
        m.visibility_pairs.store(pairs as u64, Ordering::Relaxed);

        let stats = self.transport.stats();
        m.visibility_gains_total
            .store(stats.delivery_begins, Ordering::Relaxed);
        m.visibility_losses_total
            .store(stats.delivery_ends, Ordering::Relaxed);
        m.batches_sent_total
            .store(stats.batches_sent, Ordering::Relaxed);
        m.batch_bytes_sent_total
            .store(stats.batch_bytes_sent, Ordering::Relaxed);
        m.probes_sent_total
            .store(stats.probes_sent, Ordering::Relaxed);
        m.probes_failed_total
            .store(stats.probes_failed, Ordering::Relaxed);
    }
}

impl ReplicationHub<QuicTransport> {
    /// Apply one inbound command from a connection task
    pub fn apply_command(&mut self, command: NetCommand) {
        match command {
            NetCommand::Connected {
                session_id,
                name,
                connection,
            } => {
                self.transport.register(session_id, connection);
                self.handle_connect(session_id, name);
            }
            NetCommand::Disconnected { session_id } => {
                self.transport.unregister(session_id);
                self.handle_disconnect(session_id);
            }
            NetCommand::MoveAvatar {
                session_id,
                position,
                yaw,
            } => self.handle_move(session_id, position, yaw),
            NetCommand::Ping {
                session_id,
                timestamp,
            } => self.handle_ping(session_id, timestamp),
        }
    }
}

fn random_spawn_pose() -> Pose {
    let mut rng = rand::thread_rng();
    Pose::new(
        Vec3::new(
            rng.gen_range(-SPAWN_RADIUS..SPAWN_RADIUS),
            0.0,
            rng.gen_range(-SPAWN_RADIUS..SPAWN_RADIUS),
        ),
        rng.gen_range(0.0..360.0),
    )
}

/// Start the replication loop background task
pub fn start_tick_loop(mut hub: ReplicationHub<QuicTransport>, commands: Receiver<NetCommand>) {
    tokio::spawn(async move {
        let tick_rate = hub.config.tick_rate;
        let tick_duration = Duration::from_secs_f64(1.0 / tick_rate as f64);
        let mut ticker = interval(tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Replication loop started at {} Hz", tick_rate);
        let start = Instant::now();

        loop {
            ticker.tick().await;
            let tick_start = Instant::now();

            // Inbound first: spawns and moves land before this tick's
            // evaluation and broadcast
            while let Ok(command) = commands.try_recv() {
                hub.apply_command(command);
            }

            hub.tick();
            hub.metrics.record_tick_time(tick_start.elapsed());

            // Log stats periodically (every 30 seconds)
            if hub.tick % (tick_rate as u64 * 30) == 0 {
                info!(
                    "Uptime {}s, tick {}, {} sessions, {} active entities, {} visible pairs",
                    start.elapsed().as_secs(),
                    hub.tick,
                    hub.sessions.len(),
                    hub.world.active_count(),
                    hub.metrics.visibility_pairs.load(Ordering::Relaxed),
                );
            }
        }
    });
}
