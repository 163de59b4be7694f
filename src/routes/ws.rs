//! WebSocket handler — the real-time coordination channel.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID, registers an outbound channel with
//! the presence registry, and enters a `select!` loop:
//! - Incoming client messages → parse into [`ClientEvent`] + dispatch
//! - Events addressed to this connection by peers → forward to the socket
//!
//! Dispatch returns the events owed to the sender; everything addressed to
//! other connections flows through the presence registry inside the relay
//! and escalation paths. Unparseable inbound text yields a structured error
//! event, never a dropped connection.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with `connection_id`
//! 2. Client joins as student or supervisor → room membership + roster
//! 3. Frames, violations, peer negotiation, supervisor commands
//! 4. Close → presence departure (peer_left / room unmonitored)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::event::{ChannelEvent, ClientEvent, Outbound, Role, StudentEvent, SupervisorEvent, Violation};
use crate::services::escalation::{severity_score, ReportOutcome, ReportSubject, SupervisorAction};
use crate::services::generation::AnalysisJob;
use crate::services::presence::SessionParticipant;
use crate::services::queue::QueueClass;
use crate::services::{escalation, relay};
use crate::state::AppState;

const OUTBOUND_BUFFER: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();

    // Per-connection channel for events addressed to this client by peers.
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);
    state.presence.register(connection_id, tx).await;

    let welcome = ChannelEvent::Connected { connection_id }.into();
    if send_event(&mut socket, &welcome).await.is_err() {
        state.presence.leave(connection_id).await;
        return;
    }

    info!(%connection_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = dispatch(&state, connection_id, &text).await;
                        let mut closed = false;
                        for event in replies {
                            if send_event(&mut socket, &event).await.is_err() {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    state.presence.leave(connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse one inbound text message and apply it. Returns events owed to the
/// sender; peer deliveries happen inside the relay/escalation paths.
async fn dispatch(state: &AppState, connection_id: Uuid, text: &str) -> Vec<Outbound> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound event");
            return vec![ChannelEvent::error("E_BAD_EVENT", format!("invalid event: {e}")).into()];
        }
    };

    match event {
        ClientEvent::JoinAsStudent { test_code, student_id, display_name, attempt_id } => {
            handle_student_join(state, connection_id, test_code, student_id, display_name, attempt_id).await
        }
        ClientEvent::JoinAsSupervisor { test_code, supervisor_id, display_name } => {
            handle_supervisor_join(state, connection_id, test_code, supervisor_id, display_name).await
        }
        ClientEvent::SendFrame { frame_base64, ts } => {
            handle_frame(state, connection_id, frame_base64, ts).await;
            vec![]
        }
        ClientEvent::ReportViolation { violation_type, severity, score, description } => {
            let violation = Violation { violation_type, severity, description };
            handle_violation(state, connection_id, violation, score).await
        }
        ClientEvent::SupervisorAdmit { student_id } => {
            handle_supervisor_action(state, connection_id, student_id, SupervisorAction::Admit).await
        }
        ClientEvent::SupervisorPause { student_id } => {
            handle_supervisor_action(state, connection_id, student_id, SupervisorAction::Pause).await
        }
        ClientEvent::SupervisorTerminate { student_id } => {
            handle_supervisor_action(state, connection_id, student_id, SupervisorAction::Terminate).await
        }
        ClientEvent::PeerOffer { sdp, stream } => {
            relay::forward_offer(&state.presence, connection_id, sdp, stream).await;
            vec![]
        }
        ClientEvent::PeerAnswer { target, sdp, stream } => {
            relay::forward_answer(&state.presence, connection_id, target, sdp, stream).await;
            vec![]
        }
        ClientEvent::PeerCandidate { target, candidate, stream } => {
            relay::forward_candidate(&state.presence, connection_id, target, candidate, stream).await;
            vec![]
        }
    }
}

// =============================================================================
// JOIN HANDLERS
// =============================================================================

async fn handle_student_join(
    state: &AppState,
    connection_id: Uuid,
    test_code: String,
    student_id: Uuid,
    display_name: String,
    attempt_id: Uuid,
) -> Vec<Outbound> {
    state
        .presence
        .join(SessionParticipant {
            connection_id,
            role: Role::Student,
            test_code: test_code.clone(),
            user_id: student_id,
            display_name,
            attempt_id: Some(attempt_id),
        })
        .await;

    let mut replies: Vec<Outbound> = vec![StudentEvent::Joined { test_code: test_code.clone() }.into()];

    // A rejoin while escalated lands the student straight back in the
    // waiting room, in whatever state the supervisor left it.
    if let Some(entry) = state.escalation.status(&test_code, student_id).await {
        replies.push(
            StudentEvent::WaitingRoom {
                reason: entry.last_violation_details,
                violation_score: entry.violation_score,
            }
            .into(),
        );
    }
    replies
}

async fn handle_supervisor_join(
    state: &AppState,
    connection_id: Uuid,
    test_code: String,
    supervisor_id: Uuid,
    display_name: String,
) -> Vec<Outbound> {
    state
        .presence
        .join(SessionParticipant {
            connection_id,
            role: Role::Supervisor,
            test_code: test_code.clone(),
            user_id: supervisor_id,
            display_name,
            attempt_id: None,
        })
        .await;

    let students = state
        .presence
        .students_of(&test_code)
        .await
        .iter()
        .map(SessionParticipant::roster_entry)
        .collect();
    vec![SupervisorEvent::MonitoringStarted { test_code, students }.into()]
}

// =============================================================================
// FRAME + VIOLATION HANDLERS
// =============================================================================

async fn handle_frame(state: &AppState, connection_id: Uuid, frame_base64: String, ts: i64) {
    relay::forward_frame(&state.presence, connection_id, frame_base64.clone(), ts).await;

    // When an analyzer is configured, every frame also becomes a queued
    // proctoring job. The relay above stays best-effort either way.
    if state.capabilities.analyzer.is_none() {
        return;
    }
    let Some(sender) = state.presence.participant(connection_id).await else {
        return;
    };
    if sender.role != Role::Student {
        return;
    }
    let Some(attempt_id) = sender.attempt_id else {
        return;
    };
    let job = AnalysisJob {
        test_code: sender.test_code,
        student_id: sender.user_id,
        attempt_id,
        display_name: sender.display_name,
        frame_base64,
    };
    match serde_json::to_value(&job) {
        Ok(payload) => {
            state.queue.submit(QueueClass::Proctoring, 0, payload);
        }
        Err(e) => warn!(%connection_id, error = %e, "ws: analysis job encode failed"),
    }
}

async fn handle_violation(state: &AppState, connection_id: Uuid, violation: Violation, score: u32) -> Vec<Outbound> {
    let Some(sender) = state.presence.participant(connection_id).await else {
        return vec![ChannelEvent::error("E_NOT_JOINED", "join a test before reporting").into()];
    };
    if sender.role != Role::Student {
        return vec![ChannelEvent::error("E_NOT_A_STUDENT", "only students report violations").into()];
    }
    let Some(attempt_id) = sender.attempt_id else {
        return vec![ChannelEvent::error("E_NO_ATTEMPT", "no attempt bound to this session").into()];
    };

    // Clients may omit a score; fall back to the severity schedule.
    let score = if score == 0 { severity_score(violation.severity) } else { score };

    relay::forward_violation(&state.presence, connection_id, violation.clone(), score).await;

    let subject = ReportSubject {
        test_code: sender.test_code,
        student_id: sender.user_id,
        attempt_id,
        display_name: sender.display_name,
    };
    let outcome = state
        .escalation
        .record_report(&*state.store, &subject, &violation, score, json!({ "source": "client_report" }))
        .await;

    match outcome {
        Ok(ReportOutcome::Escalated(entry)) => {
            relay::notify_escalation(&state.presence, &entry).await;
            // notify_escalation already covers the sender; nothing owed here.
            vec![]
        }
        Ok(ReportOutcome::Logged { .. }) => vec![],
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: violation record failed");
            vec![ChannelEvent::error_from(&e).into()]
        }
    }
}

// =============================================================================
// SUPERVISOR COMMANDS
// =============================================================================

async fn handle_supervisor_action(
    state: &AppState,
    connection_id: Uuid,
    student_id: Uuid,
    action: SupervisorAction,
) -> Vec<Outbound> {
    let Some(sender) = state.presence.participant(connection_id).await else {
        return vec![ChannelEvent::error("E_NOT_JOINED", "join a test before acting").into()];
    };
    if sender.role != Role::Supervisor {
        return vec![ChannelEvent::error("E_NOT_ROOM_SUPERVISOR", "only the supervisor may act").into()];
    }
    if let Err(e) = escalation::authorize_supervisor(&state.presence, &sender.test_code, sender.user_id).await {
        return vec![ChannelEvent::error_from(&e).into()];
    }

    match state
        .escalation
        .apply(&*state.store, &sender.test_code, student_id, action, None)
        .await
    {
        Ok(outcome) => {
            relay::notify_action(&state.presence, &sender.test_code, student_id, &outcome).await;
            vec![]
        }
        Err(e) => vec![ChannelEvent::error_from(&e).into()],
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &Outbound) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
