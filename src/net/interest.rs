//! Interest management: per-session visibility with hysteresis
//!
//! For every (session, entity) pair the manager decides delivery
//! eligibility and invokes the transport's begin/stop delivery operation
//! exactly on transitions. The rule uses a hysteresis band so entities
//! hovering at the boundary do not flicker:
//!
//! - visible entities stay visible while `d <= R + H`
//! - hidden entities become visible once `d <= R`
//! - a session's own controlled entity is always visible
//!
//! Re-evaluation runs on its own cadence, slower than the broadcast tick,
//! and spreads work across frames with a fixed per-frame session budget
//! and a rotating cursor so no session starves.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::game::entity::{Archetype, EntityId};
use crate::game::world::{World, WorldEvent};
use crate::net::session::{Session, SessionId, SessionManager};
use crate::net::transport::DeliveryTransport;

#[derive(Debug, Clone)]
pub struct InterestConfig {
    /// Base radius `R`: hidden entities become visible at or inside it
    pub radius: f32,
    /// Margin `H`: visible entities stay visible out to `R + H`
    pub hysteresis: f32,
    /// Ticks between evaluation passes (cadence independent of broadcast)
    pub eval_interval_ticks: u64,
    /// Sessions evaluated per frame while a pass is in flight; 0 = all
    pub max_sessions_per_frame: usize,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            radius: 70.0,
            hysteresis: 5.0,
            eval_interval_ticks: 15, // 0.5s at 30 Hz
            max_sessions_per_frame: 50,
        }
    }
}

/// Per-(session, entity) visibility state plus the evaluation scheduler.
/// Interest sets are owned here exclusively; absence from a set means
/// "not visible".
pub struct InterestManager {
    config: InterestConfig,
    interest: FxHashMap<SessionId, FxHashSet<EntityId>>,
    /// Rotating start position over the session list
    cursor: usize,
    /// Next tick an evaluation pass comes due (deadline as data)
    next_eval_tick: u64,
    /// Sessions left to service in the in-flight pass; 0 = idle
    pass_remaining: usize,
    /// Reused buffer for draining world events
    event_buf: Vec<WorldEvent>,
}

impl InterestManager {
    pub fn new(config: InterestConfig) -> Self {
        Self {
            config,
            interest: FxHashMap::default(),
            cursor: 0,
            next_eval_tick: 0,
            pass_remaining: 0,
            event_buf: Vec::new(),
        }
    }

    pub fn config(&self) -> &InterestConfig {
        &self.config
    }

    /// Full initial sync: every currently active entity becomes visible
    /// before incremental hysteresis evaluation takes over.
    pub fn on_session_connect(
        &mut self,
        session: &Session,
        world: &World,
        transport: &mut dyn DeliveryTransport,
    ) {
        let mut set = FxHashSet::default();
        for entity in world.active_entities() {
            set.insert(entity.id);
            if let Err(e) = transport.begin_delivery(session.id, entity.id, entity.archetype) {
                // The invalidating disconnect/despawn cleans the pair up
                // on its own; nothing to propagate here.
                warn!(
                    "begin_delivery({}, {}) on connect failed: {}",
                    session.id, entity.id, e
                );
            }
        }
        debug!(
            "Session {} connected, initial sync of {} entities",
            session.id,
            set.len()
        );
        self.interest.insert(session.id, set);
    }

    /// Discard the session's interest set
    pub fn on_session_disconnect(&mut self, session: SessionId) {
        self.interest.remove(&session);
    }

    /// Drain world lifecycle events. Deactivated entities are revoked from
    /// every session as a stop transition immediately, independent of the
    /// next scheduled evaluation pass. Activated entities become eligible
    /// and get picked up by the sweep.
    pub fn apply_world_events(
        &mut self,
        world: &mut World,
        transport: &mut dyn DeliveryTransport,
    ) {
        world.drain_events_into(&mut self.event_buf);
        for event in self.event_buf.drain(..) {
            match event {
                WorldEvent::EntityActivated(id) => {
                    debug!("Entity {} activated, eligible for visibility", id);
                }
                WorldEvent::EntityDeactivated(id) => {
                    for (session, set) in self.interest.iter_mut() {
                        if set.remove(&id) {
                            if let Err(e) = transport.end_delivery(*session, id) {
                                warn!("end_delivery({}, {}) on despawn failed: {}", session, id, e);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run the evaluation scheduler for this tick. Returns the number of
    /// sessions serviced.
    pub fn evaluate(
        &mut self,
        tick: u64,
        world: &World,
        sessions: &SessionManager,
        transport: &mut dyn DeliveryTransport,
    ) -> usize {
        if self.pass_remaining == 0 {
            if tick < self.next_eval_tick {
                return 0;
            }
            if sessions.is_empty() {
                self.next_eval_tick = tick + self.config.eval_interval_ticks;
                return 0;
            }
            self.pass_remaining = sessions.len();
        }

        let budget = if self.config.max_sessions_per_frame == 0 {
            self.pass_remaining
        } else {
            self.config.max_sessions_per_frame.min(self.pass_remaining)
        };

        let mut serviced = 0;
        for _ in 0..budget {
            let ids = sessions.ordered_ids();
            if ids.is_empty() {
                self.pass_remaining = 0;
                break;
            }
            let id = ids[self.cursor % ids.len()];
            self.cursor = self.cursor.wrapping_add(1);
            if let Some(session) = sessions.get(id) {
                self.evaluate_session(session, world, transport);
            }
            serviced += 1;
            self.pass_remaining -= 1;
        }

        if self.pass_remaining == 0 {
            self.next_eval_tick = tick + self.config.eval_interval_ticks;
        }
        serviced
    }

    /// Apply the hysteresis rule for one session against all active
    /// entities, emitting delivery transitions for every flip.
    fn evaluate_session(
        &mut self,
        session: &Session,
        world: &World,
        transport: &mut dyn DeliveryTransport,
    ) {
        let Some(set) = self.interest.get_mut(&session.id) else {
            return;
        };

        let enter_sq = self.config.radius * self.config.radius;
        let exit = self.config.radius + self.config.hysteresis;
        let exit_sq = exit * exit;

        // (entity, archetype, gained) flips for this session
        let mut flips: SmallVec<[(EntityId, Archetype, bool); 16]> = SmallVec::new();

        for entity in world.active_entities() {
            let currently_visible = set.contains(&entity.id);

            // Own controlled entity bypasses the distance test entirely
            if session.controlled == Some(entity.id) {
                if !currently_visible {
                    set.insert(entity.id);
                    flips.push((entity.id, entity.archetype, true));
                }
                continue;
            }

            let dist_sq = session.anchor.distance_sq_to(entity.position);
            if currently_visible {
                if dist_sq > exit_sq {
                    set.remove(&entity.id);
                    flips.push((entity.id, entity.archetype, false));
                }
            } else if dist_sq <= enter_sq {
                set.insert(entity.id);
                flips.push((entity.id, entity.archetype, true));
            }
        }

        for (entity, archetype, gained) in flips {
            let result = if gained {
                transport.begin_delivery(session.id, entity, archetype)
            } else {
                transport.end_delivery(session.id, entity)
            };
            if let Err(e) = result {
                warn!(
                    "delivery transition ({}, {}, gained={}) failed: {}",
                    session.id, entity, gained, e
                );
            }
        }
    }

    /// Whether `entity` is currently visible to `session`. Absent session
    /// or absent entry both mean not visible.
    pub fn is_visible(&self, session: SessionId, entity: EntityId) -> bool {
        self.interest
            .get(&session)
            .map(|set| set.contains(&entity))
            .unwrap_or(false)
    }

    /// The session's current interest set, for batch assembly
    pub fn visible_set(&self, session: SessionId) -> Option<&FxHashSet<EntityId>> {
        self.interest.get(&session)
    }

    pub fn visible_count(&self, session: SessionId) -> usize {
        self.interest.get(&session).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{Archetype, Pose};
    use crate::net::transport::LoopbackTransport;
    use crate::util::vec3::Vec3;
    use uuid::Uuid;

    const R: f32 = 80.0;
    const H: f32 = 5.0;

    fn test_config() -> InterestConfig {
        InterestConfig {
            radius: R,
            hysteresis: H,
            eval_interval_ticks: 1,
            max_sessions_per_frame: 0,
        }
    }

    struct Fixture {
        world: World,
        sessions: SessionManager,
        interest: InterestManager,
        transport: LoopbackTransport,
        tick: u64,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                world: World::new(),
                sessions: SessionManager::new(64),
                interest: InterestManager::new(test_config()),
                transport: LoopbackTransport::new(),
                tick: 0,
            }
        }

        fn connect(&mut self, name: &str) -> SessionId {
            let id = Uuid::new_v4();
            self.sessions.connect(id, name.to_string()).unwrap();
            self.transport.register(id);
            let session = self.sessions.get(id).unwrap().clone();
            self.interest
                .on_session_connect(&session, &self.world, &mut self.transport);
            id
        }

        fn spawn_at(&mut self, x: f32) -> EntityId {
            self.world
                .create(Archetype::Husk, Pose::new(Vec3::new(x, 0.0, 0.0), 0.0))
                .unwrap()
        }

        fn step(&mut self) {
            self.tick += 1;
            self.interest
                .apply_world_events(&mut self.world, &mut self.transport);
            self.interest.evaluate(
                self.tick,
                &self.world,
                &self.sessions,
                &mut self.transport,
            );
        }

        fn move_entity(&mut self, id: EntityId, x: f32) {
            self.world.get_mut(id).unwrap().position = Vec3::new(x, 0.0, 0.0);
        }
    }

    #[test]
    fn test_hysteresis_losing_visibility() {
        let mut fx = Fixture::new();
        let session = fx.connect("observer");
        let entity = fx.spawn_at(78.0);

        fx.step();
        assert!(fx.interest.is_visible(session, entity), "78 <= R: visible");

        fx.move_entity(entity, 83.0);
        fx.step();
        assert!(
            fx.interest.is_visible(session, entity),
            "83 <= R+H: still visible inside the band"
        );

        fx.move_entity(entity, 86.0);
        fx.step();
        assert!(
            !fx.interest.is_visible(session, entity),
            "86 > R+H: visibility lost"
        );
    }

    #[test]
    fn test_hysteresis_gaining_visibility() {
        let mut fx = Fixture::new();
        let session = fx.connect("observer");
        let entity = fx.spawn_at(86.0);

        fx.step();
        assert!(!fx.interest.is_visible(session, entity), "86 > R: hidden");

        fx.move_entity(entity, 81.0);
        fx.step();
        assert!(
            !fx.interest.is_visible(session, entity),
            "81 > R: the band does not admit entries"
        );

        fx.move_entity(entity, 79.0);
        fx.step();
        assert!(
            fx.interest.is_visible(session, entity),
            "79 <= R: visibility gained"
        );
    }

    #[test]
    fn test_own_entity_always_visible() {
        let mut fx = Fixture::new();
        let session = fx.connect("observer");
        let avatar = fx.spawn_at(0.0);
        fx.sessions.set_controlled(session, Some(avatar));

        fx.step();
        assert!(fx.interest.is_visible(session, avatar));

        // Far beyond R + H
        fx.move_entity(avatar, 5000.0);
        fx.step();
        assert!(
            fx.interest.is_visible(session, avatar),
            "controlled entity bypasses the distance test"
        );
    }

    #[test]
    fn test_new_session_full_initial_sync() {
        let mut fx = Fixture::new();
        let entities: Vec<_> = (0..6).map(|i| fx.spawn_at(i as f32 * 500.0)).collect();

        // Connect happens before any evaluation pass runs
        let session = fx.connect("latecomer");
        for id in &entities {
            assert!(
                fx.interest.is_visible(session, *id),
                "all active entities visible immediately on connect"
            );
        }
        assert_eq!(fx.interest.visible_count(session), entities.len());
        // One begin transition per entity
        let begins = fx
            .transport
            .transitions
            .iter()
            .filter(|(s, _, gained)| *s == session && *gained)
            .count();
        assert_eq!(begins, entities.len());
    }

    #[test]
    fn test_transitions_fire_exactly_once() {
        let mut fx = Fixture::new();
        let session = fx.connect("observer");
        let entity = fx.spawn_at(50.0);

        fx.step();
        fx.step();
        fx.step();

        let begins = fx
            .transport
            .transitions
            .iter()
            .filter(|(s, e, gained)| *s == session && *e == entity && *gained)
            .count();
        assert_eq!(begins, 1, "re-evaluation must not repeat the transition");
    }

    #[test]
    fn test_despawn_revokes_from_all_sessions() {
        let mut fx = Fixture::new();
        let a = fx.connect("a");
        let b = fx.connect("b");
        let entity = fx.spawn_at(10.0);
        fx.step();
        assert!(fx.interest.is_visible(a, entity));
        assert!(fx.interest.is_visible(b, entity));

        fx.world.deactivate(entity).unwrap();
        // Revocation happens when events drain, not on the eval cadence
        fx.interest
            .apply_world_events(&mut fx.world, &mut fx.transport);
        assert!(!fx.interest.is_visible(a, entity));
        assert!(!fx.interest.is_visible(b, entity));

        let ends = fx
            .transport
            .transitions
            .iter()
            .filter(|(_, e, gained)| *e == entity && !*gained)
            .count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_disconnect_discards_interest_set() {
        let mut fx = Fixture::new();
        let session = fx.connect("observer");
        let entity = fx.spawn_at(10.0);
        fx.step();
        assert!(fx.interest.is_visible(session, entity));

        fx.interest.on_session_disconnect(session);
        assert!(!fx.interest.is_visible(session, entity));
        assert!(fx.interest.visible_set(session).is_none());
    }

    #[test]
    fn test_budgeted_sweep_services_all_sessions_across_frames() {
        let mut fx = Fixture::new();
        fx.interest = InterestManager::new(InterestConfig {
            max_sessions_per_frame: 1,
            ..test_config()
        });
        let sessions: Vec<_> = (0..3).map(|i| fx.connect(&format!("s{}", i))).collect();
        let _far = fx.spawn_at(500.0); // hidden for everyone
        let near = fx.spawn_at(10.0);

        // Sessions connected before the spawns saw no initial entities;
        // the near entity only appears through the sweep, one session per
        // frame.
        fx.step();
        fx.step();
        fx.step();
        for s in &sessions {
            assert!(
                fx.interest.is_visible(*s, near),
                "every session serviced within three frames at budget 1"
            );
        }
    }

    #[test]
    fn test_delivery_failure_is_contained() {
        let mut fx = Fixture::new();
        let session = fx.connect("observer");
        // Unregister from the transport so transitions fail
        fx.transport.known_sessions.clear();
        let entity = fx.spawn_at(5.0);
        fx.step();

        // State still updated; the error was logged and swallowed
        assert!(fx.interest.is_visible(session, entity));
    }

    #[test]
    fn test_eval_cadence_respected() {
        let mut fx = Fixture::new();
        fx.interest = InterestManager::new(InterestConfig {
            eval_interval_ticks: 10,
            ..test_config()
        });
        let session = fx.connect("observer");
        let entity = fx.spawn_at(5.0);

        // First pass is due immediately
        fx.interest
            .apply_world_events(&mut fx.world, &mut fx.transport);
        let serviced = fx
            .interest
            .evaluate(0, &fx.world, &fx.sessions, &mut fx.transport);
        assert_eq!(serviced, 1);
        assert!(fx.interest.is_visible(session, entity));

        // Nothing to do again until the deadline passes
        let serviced = fx
            .interest
            .evaluate(5, &fx.world, &fx.sessions, &mut fx.transport);
        assert_eq!(serviced, 0);
        let serviced = fx
            .interest
            .evaluate(10, &fx.world, &fx.sessions, &mut fx.transport);
        assert_eq!(serviced, 1);
    }
}
