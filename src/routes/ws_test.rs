use super::*;

use async_trait::async_trait;
use std::sync::Arc;

use crate::services::analysis::{AnalyzeFrames, FrameAnalysis};
use crate::services::escalation::WaitingState;
use crate::services::attempts::testing::InMemoryAttemptStore;
use crate::state::Capabilities;
use crate::state::test_helpers::{test_app_state, test_app_state_with, test_app_state_with_store};

struct NoopAnalyzer;

#[async_trait]
impl AnalyzeFrames for NoopAnalyzer {
    async fn analyze(&self, _frame_base64: &str) -> FrameAnalysis {
        FrameAnalysis { violations: vec![], faces_detected: 1, head_pose: None, gaze_direction: None }
    }
}

fn student_join_json(test_code: &str, student_id: Uuid, attempt_id: Uuid) -> String {
    json!({
        "event": "join_as_student",
        "test_code": test_code,
        "student_id": student_id,
        "display_name": "Ada",
        "attempt_id": attempt_id,
    })
    .to_string()
}

fn supervisor_join_json(test_code: &str, supervisor_id: Uuid) -> String {
    json!({
        "event": "join_as_supervisor",
        "test_code": test_code,
        "supervisor_id": supervisor_id,
        "display_name": "Supervisor",
    })
    .to_string()
}

fn error_code(event: &Outbound) -> Option<String> {
    match event {
        Outbound::Channel(ChannelEvent::Error { code, .. }) => Some(code.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn invalid_json_yields_structured_error() {
    let state = test_app_state();
    let replies = dispatch(&state, Uuid::new_v4(), "{not json").await;
    assert_eq!(replies.len(), 1);
    assert_eq!(error_code(&replies[0]).as_deref(), Some("E_BAD_EVENT"));
}

#[tokio::test]
async fn student_join_replies_joined() {
    let state = test_app_state();
    let conn = Uuid::new_v4();
    let replies = dispatch(&state, conn, &student_join_json("T1", Uuid::new_v4(), Uuid::new_v4())).await;

    assert_eq!(replies.len(), 1);
    assert!(matches!(
        &replies[0],
        Outbound::Student(StudentEvent::Joined { test_code }) if test_code == "T1"
    ));
    assert!(state.presence.participant(conn).await.is_some());
}

#[tokio::test]
async fn escalated_student_rejoins_into_waiting_room() {
    let state = test_app_state();
    let student_id = Uuid::new_v4();
    state
        .escalation
        .seed_entry(crate::services::escalation::WaitingRoomSnapshot {
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
        })
        .await;

    let replies = dispatch(&state, Uuid::new_v4(), &student_join_json("T1", student_id, Uuid::new_v4())).await;

    assert_eq!(replies.len(), 2);
    assert!(matches!(
        &replies[1],
        Outbound::Student(StudentEvent::WaitingRoom { violation_score: 55, .. })
    ));
}

#[tokio::test]
async fn supervisor_join_receives_current_roster() {
    let state = test_app_state();
    dispatch(&state, Uuid::new_v4(), &student_join_json("T1", Uuid::new_v4(), Uuid::new_v4())).await;
    dispatch(&state, Uuid::new_v4(), &student_join_json("T1", Uuid::new_v4(), Uuid::new_v4())).await;

    let replies = dispatch(&state, Uuid::new_v4(), &supervisor_join_json("T1", Uuid::new_v4())).await;

    assert_eq!(replies.len(), 1);
    match &replies[0] {
        Outbound::Supervisor(SupervisorEvent::MonitoringStarted { test_code, students }) => {
            assert_eq!(test_code, "T1");
            assert_eq!(students.len(), 2);
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn violation_before_join_is_rejected() {
    let state = test_app_state();
    let report = json!({
        "event": "report_violation",
        "violation_type": "tab_switch",
        "severity": "low",
        "score": 5,
        "description": "",
    })
    .to_string();

    let replies = dispatch(&state, Uuid::new_v4(), &report).await;
    assert_eq!(error_code(&replies[0]).as_deref(), Some("E_NOT_JOINED"));
}

#[tokio::test]
async fn report_without_score_uses_the_severity_schedule() {
    let store = Arc::new(InMemoryAttemptStore::new());
    let student_id = Uuid::new_v4();
    let attempt_id = store.seed_attempt("T1", student_id);
    let state = test_app_state_with_store(store.clone());

    let conn = Uuid::new_v4();
    dispatch(&state, conn, &student_join_json("T1", student_id, attempt_id)).await;

    // No "score" field: critical severity alone must escalate at 60.
    let report = json!({
        "event": "report_violation",
        "violation_type": "phone_detected",
        "severity": "critical",
    })
    .to_string();
    let replies = dispatch(&state, conn, &report).await;

    assert!(replies.is_empty(), "escalation notices flow through the registry: {replies:?}");
    let entry = state.escalation.status("T1", student_id).await.unwrap();
    assert_eq!(entry.violation_score, 60);
    assert_eq!(store.log_count(attempt_id), 1);
}

#[tokio::test]
async fn supervisor_command_from_student_is_rejected() {
    let state = test_app_state();
    let conn = Uuid::new_v4();
    dispatch(&state, conn, &student_join_json("T1", Uuid::new_v4(), Uuid::new_v4())).await;

    let command = json!({ "event": "supervisor_admit", "student_id": Uuid::new_v4() }).to_string();
    let replies = dispatch(&state, conn, &command).await;
    assert_eq!(error_code(&replies[0]).as_deref(), Some("E_NOT_ROOM_SUPERVISOR"));
}

#[tokio::test]
async fn supervisor_admit_on_absent_entry_reports_not_in_waiting_room() {
    let state = test_app_state();
    let conn = Uuid::new_v4();
    dispatch(&state, conn, &supervisor_join_json("T1", Uuid::new_v4())).await;

    let command = json!({ "event": "supervisor_admit", "student_id": Uuid::new_v4() }).to_string();
    let replies = dispatch(&state, conn, &command).await;
    assert_eq!(error_code(&replies[0]).as_deref(), Some("E_NOT_IN_WAITING_ROOM"));
}

#[tokio::test]
async fn frames_enqueue_analysis_only_when_analyzer_is_configured() {
    let frame = json!({ "event": "send_frame", "frame_base64": "ZGF0YQ==", "ts": 1 }).to_string();

    // No analyzer: relay only, nothing queued.
    let state = test_app_state();
    let conn = Uuid::new_v4();
    dispatch(&state, conn, &student_join_json("T1", Uuid::new_v4(), Uuid::new_v4())).await;
    dispatch(&state, conn, &frame).await;
    assert_eq!(state.queue.snapshot()[&QueueClass::Proctoring].queued, 0);

    // Analyzer configured: every frame becomes a proctoring job.
    let state = test_app_state_with(Capabilities {
        analyzer: Some(Arc::new(NoopAnalyzer)),
        ..Capabilities::default()
    });
    let conn = Uuid::new_v4();
    dispatch(&state, conn, &student_join_json("T1", Uuid::new_v4(), Uuid::new_v4())).await;
    dispatch(&state, conn, &frame).await;
    assert_eq!(state.queue.snapshot()[&QueueClass::Proctoring].queued, 1);
}
