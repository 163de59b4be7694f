//! Signal relay — stateless forwarding over the presence registry.
//!
//! DESIGN
//! ======
//! Pure addressing: frames and violation notices go from a student to that
//! student's room supervisor; peer-media negotiation is routed by direction
//! (student to current supervisor, supervisor to an explicit target
//! connection). Content is never inspected beyond the addressing fields.
//!
//! Delivery is fire-and-forget with no acknowledgement or retry. Ordering is
//! guaranteed per sender only; this is a deliberate scope limit of the
//! real-time layer.

use uuid::Uuid;

use crate::event::{Role, StreamKind, StudentEvent, SupervisorEvent, Violation};
use crate::services::escalation::{ActionOutcome, WaitingRoomSnapshot};
use crate::services::presence::PresenceRegistry;

/// Forward one camera frame or telemetry sample to the room supervisor.
/// No-op if the sender is not a joined student or the room is unmonitored.
pub async fn forward_frame(presence: &PresenceRegistry, from: Uuid, frame_base64: String, ts: i64) {
    let Some(sender) = presence.participant(from).await else {
        return;
    };
    if sender.role != Role::Student {
        return;
    }
    let Some(supervisor) = presence.supervisor_of(&sender.test_code).await else {
        return;
    };

    presence
        .send_to(
            supervisor,
            SupervisorEvent::StudentFrame {
                connection_id: from,
                student_id: sender.user_id,
                display_name: sender.display_name,
                frame_base64,
                ts,
            }
            .into(),
        )
        .await;
}

/// Forward a violation notice to the supervisor and append it to the
/// sender's session-local violation log.
pub async fn forward_violation(presence: &PresenceRegistry, from: Uuid, violation: Violation, score: u32) {
    let Some(sender) = presence.participant(from).await else {
        return;
    };
    if sender.role != Role::Student {
        return;
    }

    presence
        .log_session_violation(from, violation.clone())
        .await;

    let Some(supervisor) = presence.supervisor_of(&sender.test_code).await else {
        return;
    };
    presence
        .send_to(
            supervisor,
            SupervisorEvent::StudentViolation {
                connection_id: from,
                student_id: sender.user_id,
                display_name: sender.display_name,
                violation,
                score,
            }
            .into(),
        )
        .await;
}

// =============================================================================
// PEER-MEDIA NEGOTIATION
// =============================================================================

/// Offer: student to the current room supervisor.
pub async fn forward_offer(presence: &PresenceRegistry, from: Uuid, sdp: String, stream: StreamKind) {
    let Some(sender) = presence.participant(from).await else {
        return;
    };
    if sender.role != Role::Student {
        return;
    }
    let Some(supervisor) = presence.supervisor_of(&sender.test_code).await else {
        return;
    };
    presence
        .send_to(
            supervisor,
            SupervisorEvent::PeerOffer {
                connection_id: from,
                student_id: sender.user_id,
                display_name: sender.display_name,
                sdp,
                stream,
            }
            .into(),
        )
        .await;
}

/// Answer: supervisor to an explicit student connection.
pub async fn forward_answer(presence: &PresenceRegistry, from: Uuid, target: Uuid, sdp: String, stream: StreamKind) {
    let Some(sender) = presence.participant(from).await else {
        return;
    };
    if sender.role != Role::Supervisor {
        return;
    }
    presence
        .send_to(target, StudentEvent::PeerAnswer { sdp, stream }.into())
        .await;
}

/// ICE candidate, routed by sender role: students reach their supervisor,
/// supervisors reach the explicit target connection.
pub async fn forward_candidate(
    presence: &PresenceRegistry,
    from: Uuid,
    target: Option<Uuid>,
    candidate: String,
    stream: StreamKind,
) {
    let Some(sender) = presence.participant(from).await else {
        return;
    };
    match sender.role {
        Role::Student => {
            let Some(supervisor) = presence.supervisor_of(&sender.test_code).await else {
                return;
            };
            presence
                .send_to(
                    supervisor,
                    SupervisorEvent::PeerCandidate { connection_id: from, candidate, stream }.into(),
                )
                .await;
        }
        Role::Supervisor => {
            let Some(target) = target else {
                return;
            };
            presence
                .send_to(target, StudentEvent::PeerCandidate { candidate, stream }.into())
                .await;
        }
    }
}

// =============================================================================
// ESCALATION NOTICES
// =============================================================================

/// Notify both sides that a student entered the waiting room.
pub async fn notify_escalation(presence: &PresenceRegistry, entry: &WaitingRoomSnapshot) {
    if let Some(student) = presence
        .student_connection(&entry.test_code, entry.student_id)
        .await
    {
        presence
            .send_to(
                student,
                StudentEvent::WaitingRoom {
                    reason: entry.last_violation_details.clone(),
                    violation_score: entry.violation_score,
                }
                .into(),
            )
            .await;
    }
    notify_supervisor_update(presence, &entry.test_code, entry.student_id, entry.state.as_str(), entry.violation_score)
        .await;
}

/// Notify both sides of the outcome of a supervisor command. The terminated
/// student receives exactly one notice; the channel is expected to close.
pub async fn notify_action(presence: &PresenceRegistry, test_code: &str, student_id: Uuid, outcome: &ActionOutcome) {
    if let Some(student) = presence.student_connection(test_code, student_id).await {
        let event = match outcome {
            ActionOutcome::Admitted(_) => StudentEvent::Resumed,
            ActionOutcome::Paused(_) => StudentEvent::Suspended,
            ActionOutcome::Terminated => StudentEvent::Terminated { reason: "Test terminated by supervisor".into() },
        };
        presence.send_to(student, event.into()).await;
    }

    let (state, score) = match outcome {
        ActionOutcome::Admitted(entry) | ActionOutcome::Paused(entry) => {
            (entry.state.as_str(), entry.violation_score)
        }
        ActionOutcome::Terminated => ("terminated", 0),
    };
    notify_supervisor_update(presence, test_code, student_id, state, score).await;
}

async fn notify_supervisor_update(
    presence: &PresenceRegistry,
    test_code: &str,
    student_id: Uuid,
    state: &str,
    violation_score: u32,
) {
    let Some(supervisor) = presence.supervisor_of(test_code).await else {
        return;
    };
    presence
        .send_to(
            supervisor,
            SupervisorEvent::WaitingRoomUpdate {
                test_code: test_code.to_string(),
                student_id,
                state: state.to_string(),
                violation_score,
            }
            .into(),
        )
        .await;
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
