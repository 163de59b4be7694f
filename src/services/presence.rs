//! Presence registry — who is connected, in which test room, as what.
//!
//! DESIGN
//! ======
//! One `RwLock`-guarded map set: connections (participant records), outbound
//! senders, per-connection session violation logs, and test rooms. A room
//! holds at most one supervisor connection (last writer wins) plus student
//! connections in join order. Rooms are created lazily on first join and
//! pruned when the last participant leaves.
//!
//! Join and leave emit `peer_joined` / `peer_left` notifications to the
//! monitoring supervisor directly: these are registry side effects, not relay
//! traffic. Delivery is best-effort `try_send`, matching the rest of the
//! real-time layer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::event::{Outbound, Role, RosterStudent, SupervisorEvent, Violation};

// =============================================================================
// TYPES
// =============================================================================

/// One registered connection's participation record.
#[derive(Debug, Clone)]
pub struct SessionParticipant {
    pub connection_id: Uuid,
    pub role: Role,
    pub test_code: String,
    pub user_id: Uuid,
    pub display_name: String,
    /// Present for students only.
    pub attempt_id: Option<Uuid>,
}

impl SessionParticipant {
    #[must_use]
    pub fn roster_entry(&self) -> RosterStudent {
        RosterStudent {
            connection_id: self.connection_id,
            student_id: self.user_id,
            display_name: self.display_name.clone(),
            attempt_id: self.attempt_id.unwrap_or(Uuid::nil()),
        }
    }
}

/// The connections associated with one test code.
#[derive(Debug, Default)]
struct TestRoom {
    supervisor: Option<Uuid>,
    /// Student connection ids in join order.
    students: Vec<Uuid>,
}

impl TestRoom {
    fn is_empty(&self) -> bool {
        self.supervisor.is_none() && self.students.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<Uuid, SessionParticipant>,
    senders: HashMap<Uuid, mpsc::Sender<Outbound>>,
    /// Session-local violation log per student connection. Bounded by
    /// connection lifetime; the durable record lives in the external store.
    session_violations: HashMap<Uuid, Vec<Violation>>,
    rooms: HashMap<String, TestRoom>,
}

/// Shared presence registry. Clone is cheap (Arc inner).
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<tokio::sync::RwLock<Inner>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Register a connection's outbound sender. Called once on upgrade,
    /// before any join.
    pub async fn register(&self, connection_id: Uuid, tx: mpsc::Sender<Outbound>) {
        let mut inner = self.inner.write().await;
        inner.senders.insert(connection_id, tx);
    }

    /// Announce participation for a connection. A supervisor join replaces
    /// any existing supervisor for that test code; a student join notifies
    /// the monitoring supervisor with the student's public identity.
    ///
    /// A repeat join from the same connection overwrites the previous
    /// registration. The old room is not cleaned up until `leave`.
    pub async fn join(&self, participant: SessionParticipant) {
        let mut inner = self.inner.write().await;
        let connection_id = participant.connection_id;
        let test_code = participant.test_code.clone();
        let room = inner.rooms.entry(test_code.clone()).or_default();

        match participant.role {
            Role::Supervisor => {
                room.supervisor = Some(connection_id);
            }
            Role::Student => {
                if !room.students.contains(&connection_id) {
                    room.students.push(connection_id);
                }
                inner
                    .session_violations
                    .entry(connection_id)
                    .or_default();
            }
        }

        let notify = match participant.role {
            Role::Student => inner
                .rooms
                .get(&test_code)
                .and_then(|r| r.supervisor)
                .filter(|sup| *sup != connection_id)
                .map(|sup| (sup, participant.roster_entry())),
            Role::Supervisor => None,
        };

        info!(%connection_id, role = ?participant.role, %test_code, "presence: joined");
        inner.connections.insert(connection_id, participant);

        if let Some((supervisor, student)) = notify {
            try_send(&inner, supervisor, SupervisorEvent::PeerJoined { student }.into());
        }
    }

    /// Remove a connection from every structure referencing it. A departing
    /// student is announced to the room supervisor; a departing supervisor
    /// leaves the room unmonitored with no notification to students.
    pub async fn leave(&self, connection_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.senders.remove(&connection_id);
        inner.session_violations.remove(&connection_id);
        let Some(participant) = inner.connections.remove(&connection_id) else {
            return;
        };

        let mut notify = None;
        if let Some(room) = inner.rooms.get_mut(&participant.test_code) {
            match participant.role {
                Role::Student => {
                    room.students.retain(|id| *id != connection_id);
                    if let Some(supervisor) = room.supervisor {
                        notify = Some((
                            supervisor,
                            SupervisorEvent::PeerLeft {
                                student_id: participant.user_id,
                                display_name: participant.display_name.clone(),
                            },
                        ));
                    }
                }
                Role::Supervisor => {
                    if room.supervisor == Some(connection_id) {
                        room.supervisor = None;
                    }
                }
            }
            if room.is_empty() {
                inner.rooms.remove(&participant.test_code);
            }
        }

        info!(%connection_id, test_code = %participant.test_code, "presence: left");
        if let Some((supervisor, event)) = notify {
            try_send(&inner, supervisor, event.into());
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// The supervisor connection monitoring a test code, if any.
    pub async fn supervisor_of(&self, test_code: &str) -> Option<Uuid> {
        let inner = self.inner.read().await;
        inner.rooms.get(test_code).and_then(|r| r.supervisor)
    }

    /// The user id of the supervisor monitoring a test code, if any.
    pub async fn supervisor_user_of(&self, test_code: &str) -> Option<Uuid> {
        let inner = self.inner.read().await;
        let supervisor = inner.rooms.get(test_code)?.supervisor?;
        inner.connections.get(&supervisor).map(|p| p.user_id)
    }

    /// Students in a test room, in join order. Used for the initial roster.
    pub async fn students_of(&self, test_code: &str) -> Vec<SessionParticipant> {
        let inner = self.inner.read().await;
        let Some(room) = inner.rooms.get(test_code) else {
            return Vec::new();
        };
        room.students
            .iter()
            .filter_map(|id| inner.connections.get(id))
            // A stale id left by a re-registration may point at another room.
            .filter(|p| p.test_code == test_code && p.role == Role::Student)
            .cloned()
            .collect()
    }

    /// Look up a student connection in a room by user id.
    pub async fn student_connection(&self, test_code: &str, student_id: Uuid) -> Option<Uuid> {
        let inner = self.inner.read().await;
        let room = inner.rooms.get(test_code)?;
        room.students
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .find(|p| p.user_id == student_id && p.test_code == test_code)
            .map(|p| p.connection_id)
    }

    /// Snapshot of a connection's participant record.
    pub async fn participant(&self, connection_id: Uuid) -> Option<SessionParticipant> {
        let inner = self.inner.read().await;
        inner.connections.get(&connection_id).cloned()
    }

    /// Session-local violation log for a student connection.
    pub async fn session_violations(&self, connection_id: Uuid) -> Vec<Violation> {
        let inner = self.inner.read().await;
        inner
            .session_violations
            .get(&connection_id)
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================================
    // DELIVERY
    // =========================================================================

    /// Fire-and-forget delivery to one connection. A full or closed channel
    /// drops the event; the real-time layer is best-effort by design.
    pub async fn send_to(&self, connection_id: Uuid, event: Outbound) {
        let inner = self.inner.read().await;
        try_send(&inner, connection_id, event);
    }

    /// Append to a student connection's session-local violation log.
    pub async fn log_session_violation(&self, connection_id: Uuid, violation: Violation) {
        let mut inner = self.inner.write().await;
        inner
            .session_violations
            .entry(connection_id)
            .or_default()
            .push(violation);
    }
}

fn try_send(inner: &Inner, connection_id: Uuid, event: Outbound) {
    if let Some(tx) = inner.senders.get(&connection_id) {
        let _ = tx.try_send(event);
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
