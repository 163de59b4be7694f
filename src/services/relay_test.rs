use super::*;
use tokio::sync::mpsc::{self, Receiver};

use crate::event::{Outbound, Severity};
use crate::services::escalation::WaitingState;
use crate::services::presence::SessionParticipant;

async fn connect(presence: &PresenceRegistry) -> (Uuid, Receiver<Outbound>) {
    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(16);
    presence.register(connection_id, tx).await;
    (connection_id, rx)
}

async fn join_student(presence: &PresenceRegistry, connection_id: Uuid, test_code: &str) -> Uuid {
    let user_id = Uuid::new_v4();
    presence
        .join(SessionParticipant {
            connection_id,
            role: Role::Student,
            test_code: test_code.into(),
            user_id,
            display_name: "Ada".into(),
            attempt_id: Some(Uuid::new_v4()),
        })
        .await;
    user_id
}

async fn join_supervisor(presence: &PresenceRegistry, connection_id: Uuid, test_code: &str) {
    presence
        .join(SessionParticipant {
            connection_id,
            role: Role::Supervisor,
            test_code: test_code.into(),
            user_id: Uuid::new_v4(),
            display_name: "Supervisor".into(),
            attempt_id: None,
        })
        .await;
}

fn violation() -> Violation {
    Violation { violation_type: "tab_switch".into(), severity: Severity::Medium, description: "looked away".into() }
}

#[tokio::test]
async fn frame_reaches_room_supervisor() {
    let presence = PresenceRegistry::new();
    let (sup_conn, mut sup_rx) = connect(&presence).await;
    join_supervisor(&presence, sup_conn, "T1").await;
    let (stu_conn, _stu_rx) = connect(&presence).await;
    let student_id = join_student(&presence, stu_conn, "T1").await;
    let _ = sup_rx.try_recv(); // peer_joined

    forward_frame(&presence, stu_conn, "ZGF0YQ==".into(), 1_700_000_000_000).await;

    match sup_rx.try_recv().expect("supervisor should get the frame") {
        Outbound::Supervisor(SupervisorEvent::StudentFrame { student_id: sid, frame_base64, .. }) => {
            assert_eq!(sid, student_id);
            assert_eq!(frame_base64, "ZGF0YQ==");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn frame_from_unmonitored_room_is_dropped() {
    let presence = PresenceRegistry::new();
    let (stu_conn, mut stu_rx) = connect(&presence).await;
    join_student(&presence, stu_conn, "T1").await;

    forward_frame(&presence, stu_conn, "ZGF0YQ==".into(), 0).await;

    // Nothing comes back to the student either.
    assert!(stu_rx.try_recv().is_err());
}

#[tokio::test]
async fn frame_from_supervisor_is_ignored() {
    let presence = PresenceRegistry::new();
    let (sup_conn, mut sup_rx) = connect(&presence).await;
    join_supervisor(&presence, sup_conn, "T1").await;

    forward_frame(&presence, sup_conn, "ZGF0YQ==".into(), 0).await;

    assert!(sup_rx.try_recv().is_err());
}

#[tokio::test]
async fn violation_is_logged_and_forwarded() {
    let presence = PresenceRegistry::new();
    let (sup_conn, mut sup_rx) = connect(&presence).await;
    join_supervisor(&presence, sup_conn, "T1").await;
    let (stu_conn, _stu_rx) = connect(&presence).await;
    join_student(&presence, stu_conn, "T1").await;
    let _ = sup_rx.try_recv();

    forward_violation(&presence, stu_conn, violation(), 10).await;

    assert_eq!(presence.session_violations(stu_conn).await.len(), 1);
    match sup_rx.try_recv().expect("supervisor should get the notice") {
        Outbound::Supervisor(SupervisorEvent::StudentViolation { violation, score, .. }) => {
            assert_eq!(violation.violation_type, "tab_switch");
            assert_eq!(score, 10);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn candidate_routing_depends_on_role() {
    let presence = PresenceRegistry::new();
    let (sup_conn, mut sup_rx) = connect(&presence).await;
    join_supervisor(&presence, sup_conn, "T1").await;
    let (stu_conn, mut stu_rx) = connect(&presence).await;
    join_student(&presence, stu_conn, "T1").await;
    let _ = sup_rx.try_recv();

    // Student omits target: routed to the supervisor.
    forward_candidate(&presence, stu_conn, None, "candidate:1".into(), StreamKind::Camera).await;
    assert!(matches!(
        sup_rx.try_recv().unwrap(),
        Outbound::Supervisor(SupervisorEvent::PeerCandidate { .. })
    ));

    // Supervisor must name the target connection.
    forward_candidate(&presence, sup_conn, Some(stu_conn), "candidate:2".into(), StreamKind::Screen).await;
    assert!(matches!(
        stu_rx.try_recv().unwrap(),
        Outbound::Student(StudentEvent::PeerCandidate { .. })
    ));

    // Supervisor without a target is dropped.
    forward_candidate(&presence, sup_conn, None, "candidate:3".into(), StreamKind::Screen).await;
    assert!(stu_rx.try_recv().is_err());
}

#[tokio::test]
async fn answer_requires_supervisor_sender() {
    let presence = PresenceRegistry::new();
    let (stu_conn, _stu_rx) = connect(&presence).await;
    join_student(&presence, stu_conn, "T1").await;
    let (other_conn, mut other_rx) = connect(&presence).await;
    join_student(&presence, other_conn, "T1").await;

    forward_answer(&presence, stu_conn, other_conn, "sdp".into(), StreamKind::Camera).await;

    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn escalation_notifies_student_and_supervisor() {
    let presence = PresenceRegistry::new();
    let (sup_conn, mut sup_rx) = connect(&presence).await;
    join_supervisor(&presence, sup_conn, "T1").await;
    let (stu_conn, mut stu_rx) = connect(&presence).await;
    let student_id = join_student(&presence, stu_conn, "T1").await;
    let _ = sup_rx.try_recv();

    let entry = WaitingRoomSnapshot {
        test_code: "T1".into(),
        student_id,
        attempt_id: Uuid::new_v4(),
        display_name: "Ada".into(),
        state: WaitingState::Waiting,
        violation_score: 55,
        last_violation_type: "tab_switch".into(),
        last_violation_details: "looked away".into(),
        entered_at: 0,
        saved_test_state: None,
    };
    notify_escalation(&presence, &entry).await;

    assert!(matches!(
        stu_rx.try_recv().unwrap(),
        Outbound::Student(StudentEvent::WaitingRoom { violation_score: 55, .. })
    ));
    match sup_rx.try_recv().unwrap() {
        Outbound::Supervisor(SupervisorEvent::WaitingRoomUpdate { state, .. }) => assert_eq!(state, "waiting"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn terminate_outcome_sends_single_terminated_notice() {
    let presence = PresenceRegistry::new();
    let (sup_conn, mut sup_rx) = connect(&presence).await;
    join_supervisor(&presence, sup_conn, "T1").await;
    let (stu_conn, mut stu_rx) = connect(&presence).await;
    let student_id = join_student(&presence, stu_conn, "T1").await;
    let _ = sup_rx.try_recv();

    notify_action(&presence, "T1", student_id, &ActionOutcome::Terminated).await;

    assert!(matches!(
        stu_rx.try_recv().unwrap(),
        Outbound::Student(StudentEvent::Terminated { .. })
    ));
    assert!(stu_rx.try_recv().is_err());
    match sup_rx.try_recv().unwrap() {
        Outbound::Supervisor(SupervisorEvent::WaitingRoomUpdate { state, violation_score, .. }) => {
            assert_eq!(state, "terminated");
            assert_eq!(violation_score, 0);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
