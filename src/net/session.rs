use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::game::entity::EntityId;
use crate::util::vec3::Vec3;

/// Stable identity of a connected client
pub type SessionId = Uuid;

/// A connected observer: anchor position, controlled entity, and the
/// liveness failure counter owned by the health monitor.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    /// Interest evaluation measures distances from here; typically the
    /// session's own avatar position.
    pub anchor: Vec3,
    /// Entity this session controls; unconditionally visible to it.
    pub controlled: Option<EntityId>,
    /// Consecutive failed liveness probes; reset to zero on success.
    pub probe_failures: u32,
    pub connected_at: Instant,
}

impl Session {
    pub fn new(id: SessionId, name: String) -> Self {
        Self {
            id,
            name,
            anchor: Vec3::ZERO,
            controlled: None,
            probe_failures: 0,
            connected_at: Instant::now(),
        }
    }
}

/// Tracks connected sessions. Owned by the tick loop; never mutated from
/// anywhere else.
pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    /// Connection order, kept in sync with `sessions`. Gives the interest
    /// sweep a stable list to rotate its cursor over.
    order: Vec<SessionId>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            max_sessions,
        }
    }

    /// Register a session on connect. Returns `None` at capacity.
    pub fn connect(&mut self, id: SessionId, name: String) -> Option<&Session> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }
        if self.sessions.contains_key(&id) {
            return None;
        }
        self.sessions.insert(id, Session::new(id, name));
        self.order.push(id);
        self.sessions.get(&id)
    }

    /// Remove a session on disconnect
    pub fn disconnect(&mut self, id: SessionId) -> Option<Session> {
        let removed = self.sessions.remove(&id);
        if removed.is_some() {
            self.order.retain(|s| *s != id);
        }
        removed
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn set_anchor(&mut self, id: SessionId, anchor: Vec3) -> bool {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.anchor = anchor;
            true
        } else {
            false
        }
    }

    pub fn set_controlled(&mut self, id: SessionId, entity: Option<EntityId>) -> bool {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.controlled = entity;
            true
        } else {
            false
        }
    }

    /// Session ids in connection order (stable across a sweep)
    pub fn ordered_ids(&self) -> &[SessionId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
