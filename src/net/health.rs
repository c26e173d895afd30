//! Connection health monitoring
//!
//! On a fixed cadence every session gets a liveness probe. Consecutive
//! failures accumulate on the session; reaching the threshold forcibly
//! disconnects it so its interest state and controlled entity get cleaned
//! up instead of lingering. Any successful probe resets the streak.

use tracing::{info, warn};

use crate::net::session::{Session, SessionId, SessionManager};
use crate::net::transport::DeliveryTransport;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Ticks between probe rounds
    pub probe_interval_ticks: u64,
    /// Consecutive failures that trigger eviction
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ticks: 60, // 2s at 30 Hz
            failure_threshold: 3,
        }
    }
}

/// Probes sessions on its cadence and reports which ones to evict
pub struct HealthMonitor {
    config: HealthConfig,
    /// Next tick a probe round is due (deadline as data)
    next_probe_tick: u64,
    /// Reused buffer of sessions that crossed the threshold this round
    evicted: Vec<SessionId>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            next_probe_tick: 0,
            evicted: Vec::new(),
        }
    }

    /// Run a probe round if one is due. Sessions that cross the failure
    /// threshold are force-disconnected at the transport, removed from the
    /// session manager, and returned so the caller can release their
    /// entities and interest state.
    pub fn check(
        &mut self,
        tick: u64,
        sessions: &mut SessionManager,
        transport: &mut dyn DeliveryTransport,
    ) -> Vec<Session> {
        self.evicted.clear();
        if tick < self.next_probe_tick {
            return Vec::new();
        }
        self.next_probe_tick = tick + self.config.probe_interval_ticks;

        let ids: Vec<SessionId> = sessions.ordered_ids().to_vec();
        for id in ids {
            let alive = transport.probe(id);
            let Some(session) = sessions.get_mut(id) else {
                continue;
            };
            if alive {
                session.probe_failures = 0;
                continue;
            }
            session.probe_failures += 1;
            warn!(
                "Session {} failed probe ({}/{})",
                id, session.probe_failures, self.config.failure_threshold
            );
            if session.probe_failures >= self.config.failure_threshold {
                self.evicted.push(id);
            }
        }

        let mut removed = Vec::with_capacity(self.evicted.len());
        for id in &self.evicted {
            transport.force_disconnect(*id, "Unresponsive");
            if let Some(session) = sessions.disconnect(*id) {
                removed.push(session);
            }
            info!("Evicted unresponsive session {}", id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::LoopbackTransport;
    use uuid::Uuid;

    fn setup() -> (SessionManager, LoopbackTransport, HealthMonitor, SessionId) {
        let mut sessions = SessionManager::new(16);
        let id = Uuid::new_v4();
        sessions.connect(id, "flaky".to_string()).unwrap();
        let mut transport = LoopbackTransport::new();
        transport.register(id);
        let monitor = HealthMonitor::new(HealthConfig {
            probe_interval_ticks: 1,
            failure_threshold: 3,
        });
        (sessions, transport, monitor, id)
    }

    #[test]
    fn test_three_consecutive_failures_evict() {
        let (mut sessions, mut transport, mut monitor, id) = setup();
        transport.set_probe_failing(id, true);

        assert!(monitor.check(1, &mut sessions, &mut transport).is_empty());
        assert!(monitor.check(2, &mut sessions, &mut transport).is_empty());
        let evicted = monitor.check(3, &mut sessions, &mut transport);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, id);
        assert!(!sessions.contains(id));
        assert_eq!(transport.kicked.len(), 1);
        assert_eq!(transport.kicked[0].0, id);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let (mut sessions, mut transport, mut monitor, id) = setup();

        // Two failures, one success, two failures: never evicted
        transport.set_probe_failing(id, true);
        monitor.check(1, &mut sessions, &mut transport);
        monitor.check(2, &mut sessions, &mut transport);
        transport.set_probe_failing(id, false);
        monitor.check(3, &mut sessions, &mut transport);
        assert_eq!(sessions.get(id).unwrap().probe_failures, 0);
        transport.set_probe_failing(id, true);
        monitor.check(4, &mut sessions, &mut transport);
        let evicted = monitor.check(5, &mut sessions, &mut transport);
        assert!(evicted.is_empty());
        assert!(sessions.contains(id));
        assert_eq!(sessions.get(id).unwrap().probe_failures, 2);
    }

    #[test]
    fn test_probe_cadence_respected() {
        let (mut sessions, mut transport, _monitor, id) = setup();
        let mut monitor_slow = HealthMonitor::new(HealthConfig {
            probe_interval_ticks: 10,
            failure_threshold: 3,
        });
        transport.set_probe_failing(id, true);

        monitor_slow.check(0, &mut sessions, &mut transport);
        monitor_slow.check(5, &mut sessions, &mut transport);
        monitor_slow.check(9, &mut sessions, &mut transport);
        // Only the round at tick 0 ran
        assert_eq!(sessions.get(id).unwrap().probe_failures, 1);
        monitor_slow.check(10, &mut sessions, &mut transport);
        assert_eq!(sessions.get(id).unwrap().probe_failures, 2);
    }

    #[test]
    fn test_healthy_sessions_untouched() {
        let (mut sessions, mut transport, mut monitor, id) = setup();
        for tick in 1..=10 {
            assert!(monitor
                .check(tick, &mut sessions, &mut transport)
                .is_empty());
        }
        assert!(sessions.contains(id));
        assert_eq!(sessions.get(id).unwrap().probe_failures, 0);
        assert_eq!(transport.stats().probes_sent, 10);
        assert_eq!(transport.stats().probes_failed, 0);
    }
}
