use super::*;

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::Role;
use crate::services::analysis::{AnalyzeFrames, FrameViolation};
use crate::services::attempts::testing::{FailingAttemptStore, InMemoryAttemptStore};
use crate::services::attempts::AttemptStore;
use crate::services::escalation::WaitingState;
use crate::services::presence::SessionParticipant;
use crate::state::test_helpers::{test_app_state, test_app_state_full, test_app_state_with_store};
use crate::state::Capabilities;

struct CannedAnalyzer {
    verdict: FrameAnalysis,
}

#[async_trait]
impl AnalyzeFrames for CannedAnalyzer {
    async fn analyze(&self, _frame_base64: &str) -> FrameAnalysis {
        self.verdict.clone()
    }
}

fn analyzer_with(violations: Vec<FrameViolation>) -> Arc<CannedAnalyzer> {
    Arc::new(CannedAnalyzer {
        verdict: FrameAnalysis { violations, faces_detected: 1, head_pose: None, gaze_direction: None },
    })
}

async fn join_supervisor(state: &AppState, test_code: &str) -> Uuid {
    let supervisor_id = Uuid::new_v4();
    state
        .presence
        .join(SessionParticipant {
            connection_id: Uuid::new_v4(),
            role: Role::Supervisor,
            test_code: test_code.into(),
            user_id: supervisor_id,
            display_name: "Supervisor".into(),
            attempt_id: None,
        })
        .await;
    supervisor_id
}

fn waiting_entry(test_code: &str, student_id: Uuid) -> WaitingRoomSnapshot {
    WaitingRoomSnapshot {
        test_code: test_code.into(),
        student_id,
        attempt_id: Uuid::new_v4(),
        display_name: "Ada".into(),
        state: WaitingState::Waiting,
        violation_score: 55,
        last_violation_type: "tab_switch".into(),
        last_violation_details: "looked away".into(),
        entered_at: 0,
        saved_test_state: None,
    }
}

// ===== frame analysis =====

#[tokio::test]
async fn analyze_frame_without_analyzer_is_unavailable() {
    let state = test_app_state();
    let result = analyze_frame(
        State(state),
        CallerId(Uuid::new_v4()),
        Json(AnalyzeFrameRequest { attempt_id: Uuid::new_v4(), frame_base64: "ZGF0YQ==".into() }),
    )
    .await;
    assert_eq!(result.err(), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[tokio::test]
async fn frame_for_someone_elses_attempt_is_forbidden() {
    let store = Arc::new(InMemoryAttemptStore::new());
    let attempt_id = store.seed_attempt("T1", Uuid::new_v4());
    let state = test_app_state_full(
        Capabilities { analyzer: Some(analyzer_with(vec![])), ..Capabilities::default() },
        store,
    );

    let result = analyze_frame(
        State(state),
        CallerId(Uuid::new_v4()), // not the attempt's student
        Json(AnalyzeFrameRequest { attempt_id, frame_base64: "ZGF0YQ==".into() }),
    )
    .await;
    assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
}

#[tokio::test]
async fn frame_analysis_records_every_violation_in_the_verdict() {
    let store = Arc::new(InMemoryAttemptStore::new());
    let student_id = Uuid::new_v4();
    let attempt_id = store.seed_attempt("T1", student_id);
    let analyzer = analyzer_with(vec![
        FrameViolation { violation_type: "looking_away".into(), severity: Severity::Medium, details: "gaze off screen".into() },
        FrameViolation { violation_type: "phone_detected".into(), severity: Severity::Critical, details: "phone in frame".into() },
    ]);
    let state = test_app_state_full(
        Capabilities { analyzer: Some(analyzer), ..Capabilities::default() },
        store.clone(),
    );

    let Json(response) = analyze_frame(
        State(state.clone()),
        CallerId(student_id),
        Json(AnalyzeFrameRequest { attempt_id, frame_base64: "ZGF0YQ==".into() }),
    )
    .await
    .unwrap();

    assert!(response.escalated);
    assert_eq!(response.analysis.violations.len(), 2);
    assert_eq!(store.log_count(attempt_id), 2);
    assert_eq!(store.attempt(attempt_id).unwrap().proctoring_violations, 2);
    let entry = state.escalation.status("T1", student_id).await.unwrap();
    assert_eq!(entry.violation_score, 70);
}

#[tokio::test]
async fn clean_frame_reports_no_escalation() {
    let store = Arc::new(InMemoryAttemptStore::new());
    let student_id = Uuid::new_v4();
    let attempt_id = store.seed_attempt("T1", student_id);
    let state = test_app_state_full(
        Capabilities { analyzer: Some(analyzer_with(vec![])), ..Capabilities::default() },
        store.clone(),
    );

    let Json(response) = analyze_frame(
        State(state),
        CallerId(student_id),
        Json(AnalyzeFrameRequest { attempt_id, frame_base64: "ZGF0YQ==".into() }),
    )
    .await
    .unwrap();

    assert!(!response.escalated);
    assert!(response.analysis.is_clean());
    assert_eq!(store.log_count(attempt_id), 0);
}

// ===== violation reporting =====

fn report(attempt_id: Uuid, severity: Severity, score: u32) -> ReportViolationRequest {
    ReportViolationRequest {
        attempt_id,
        violation_type: "tab_switch".into(),
        severity,
        score,
        description: "looked away".into(),
        metadata: serde_json::json!({}),
    }
}

#[tokio::test]
async fn report_on_unknown_attempt_is_not_found() {
    let state = test_app_state();
    let result = report_violation(
        State(state),
        CallerId(Uuid::new_v4()),
        Json(report(Uuid::new_v4(), Severity::Low, 5)),
    )
    .await;
    assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn report_for_someone_elses_attempt_is_forbidden() {
    let store = Arc::new(InMemoryAttemptStore::new());
    let attempt_id = store.seed_attempt("T1", Uuid::new_v4());
    let state = test_app_state_with_store(store.clone());

    let result = report_violation(
        State(state),
        CallerId(Uuid::new_v4()),
        Json(report(attempt_id, Severity::Low, 5)),
    )
    .await;
    assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
    assert_eq!(store.log_count(attempt_id), 0);
}

#[tokio::test]
async fn report_from_the_owner_is_logged() {
    let store = Arc::new(InMemoryAttemptStore::new());
    let student_id = Uuid::new_v4();
    let attempt_id = store.seed_attempt("T1", student_id);
    let state = test_app_state_with_store(store.clone());

    let Json(response) = report_violation(
        State(state),
        CallerId(student_id),
        Json(report(attempt_id, Severity::Medium, 0)), // 0: severity schedule decides
    )
    .await
    .unwrap();

    assert!(!response.escalated);
    assert_eq!(response.cumulative_score, 10);
    assert_eq!(response.total_violations, 1);
}

#[tokio::test]
async fn report_on_terminated_attempt_is_a_conflict() {
    let store = Arc::new(InMemoryAttemptStore::new());
    let student_id = Uuid::new_v4();
    let attempt_id = store.seed_attempt("T1", student_id);
    store.terminate_attempt(attempt_id).await.unwrap();
    let state = test_app_state_with_store(store.clone());

    let result = report_violation(
        State(state.clone()),
        CallerId(student_id),
        Json(report(attempt_id, Severity::Critical, 60)),
    )
    .await;

    assert_eq!(result.err(), Some(StatusCode::CONFLICT));
    // A terminated attempt never re-enters the waiting room.
    assert!(state.escalation.status("T1", student_id).await.is_none());
    assert_eq!(store.log_count(attempt_id), 0);
}

// ===== waiting room =====

#[tokio::test]
async fn waiting_room_status_absent_is_not_found() {
    let state = test_app_state();
    let student_id = Uuid::new_v4();
    let result = waiting_room_status(State(state), CallerId(student_id), Path(("T1".to_string(), student_id))).await;
    assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn student_reads_their_own_waiting_room_entry() {
    let state = test_app_state();
    let student_id = Uuid::new_v4();
    state.escalation.seed_entry(waiting_entry("T1", student_id)).await;

    let Json(entry) = waiting_room_status(State(state), CallerId(student_id), Path(("T1".to_string(), student_id)))
        .await
        .unwrap();
    assert_eq!(entry.violation_score, 55);
    assert_eq!(entry.state, WaitingState::Waiting);
}

#[tokio::test]
async fn supervisor_reads_any_waiting_room_entry() {
    let state = test_app_state();
    let supervisor_id = join_supervisor(&state, "T1").await;
    let student_id = Uuid::new_v4();
    state.escalation.seed_entry(waiting_entry("T1", student_id)).await;

    let Json(entry) =
        waiting_room_status(State(state), CallerId(supervisor_id), Path(("T1".to_string(), student_id)))
            .await
            .unwrap();
    assert_eq!(entry.student_id, student_id);
}

#[tokio::test]
async fn waiting_room_status_hides_entries_from_other_callers() {
    let state = test_app_state();
    let student_id = Uuid::new_v4();
    state.escalation.seed_entry(waiting_entry("T1", student_id)).await;

    // Neither the entry's student nor the room supervisor.
    let result =
        waiting_room_status(State(state), CallerId(Uuid::new_v4()), Path(("T1".to_string(), student_id))).await;
    assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
}

#[tokio::test]
async fn roster_requires_the_room_supervisor() {
    let state = test_app_state();
    join_supervisor(&state, "T1").await;

    let result = waiting_room_roster(
        State(state),
        CallerId(Uuid::new_v4()), // some other user
        Path("T1".to_string()),
    )
    .await;
    assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
}

#[tokio::test]
async fn roster_lists_entries_for_the_supervisor() {
    let state = test_app_state();
    let supervisor_id = join_supervisor(&state, "T1").await;
    state
        .escalation
        .seed_entry(waiting_entry("T1", Uuid::new_v4()))
        .await;

    let Json(roster) = waiting_room_roster(State(state), CallerId(supervisor_id), Path("T1".to_string()))
        .await
        .unwrap();
    assert_eq!(roster.len(), 1);
}

#[tokio::test]
async fn action_on_unmonitored_room_is_forbidden() {
    let state = test_app_state();
    let student_id = Uuid::new_v4();
    state.escalation.seed_entry(waiting_entry("T1", student_id)).await;

    let result = waiting_room_action(
        State(state),
        CallerId(Uuid::new_v4()),
        Path(("T1".to_string(), student_id)),
        Json(WaitingRoomActionRequest { action: SupervisorAction::Admit, saved_test_state: None }),
    )
    .await;
    assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
}

#[tokio::test]
async fn admit_action_returns_admitted_state() {
    let state = test_app_state();
    let supervisor_id = join_supervisor(&state, "T1").await;
    let student_id = Uuid::new_v4();
    state.escalation.seed_entry(waiting_entry("T1", student_id)).await;

    let Json(response) = waiting_room_action(
        State(state),
        CallerId(supervisor_id),
        Path(("T1".to_string(), student_id)),
        Json(WaitingRoomActionRequest { action: SupervisorAction::Admit, saved_test_state: None }),
    )
    .await
    .unwrap();

    assert_eq!(response.state, "admitted");
    assert!(response.entry.is_some());
}

#[tokio::test]
async fn action_on_absent_entry_is_not_found() {
    let state = test_app_state();
    let supervisor_id = join_supervisor(&state, "T1").await;

    let result = waiting_room_action(
        State(state),
        CallerId(supervisor_id),
        Path(("T1".to_string(), Uuid::new_v4())),
        Json(WaitingRoomActionRequest { action: SupervisorAction::Admit, saved_test_state: None }),
    )
    .await;
    assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
}

// ===== audit =====

#[tokio::test]
async fn audit_queries_against_dead_store_are_500() {
    let state = test_app_state_with_store(Arc::new(FailingAttemptStore));
    let result = list_violations(State(state), Path(Uuid::new_v4())).await;
    assert_eq!(result.err(), Some(StatusCode::INTERNAL_SERVER_ERROR));
}
