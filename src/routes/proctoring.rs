//! Proctoring REST surface — frame analysis, violation reporting, and the
//! waiting room.
//!
//! ERROR HANDLING
//! ==============
//! Handlers return `Result<Json<T>, StatusCode>`; service errors map to
//! status codes through one mapper so the translation stays consistent:
//! missing attempt/entry → 404, wrong caller → 403, report against a
//! terminated attempt → 409, store failures → 500. Bodies carry no error
//! details beyond the status.
//!
//! Frame and violation submissions are accepted only from the student who
//! owns the attempt; waiting-room reads are limited to that student and the
//! test's supervisor.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::event::{Severity, Violation};
use crate::routes::identity::CallerId;
use crate::services::analysis::FrameAnalysis;
use crate::services::attempts::{AttemptError, AttemptRow, ViolationLogRow, ViolationSummary};
use crate::services::escalation::{
    self, severity_score, EscalationError, ReportOutcome, ReportSubject, SupervisorAction, WaitingRoomSnapshot,
};
use crate::services::relay;
use crate::state::AppState;

// =============================================================================
// ERROR MAPPING
// =============================================================================

fn escalation_error_to_status(err: &EscalationError) -> StatusCode {
    match err {
        EscalationError::NotInWaitingRoom { .. } => StatusCode::NOT_FOUND,
        EscalationError::NotRoomSupervisor(_) => StatusCode::FORBIDDEN,
        EscalationError::Attempt(inner) => attempt_error_to_status(inner),
    }
}

fn attempt_error_to_status(err: &AttemptError) -> StatusCode {
    match err {
        AttemptError::NotFound(_) => StatusCode::NOT_FOUND,
        AttemptError::Terminated(_) => StatusCode::CONFLICT,
        AttemptError::Database(e) => {
            error!(error = %e, "attempt store error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Fetch an attempt and verify the caller owns it: 404 when absent, 403 when
/// owned by someone else.
async fn owned_attempt(state: &AppState, attempt_id: Uuid, caller: Uuid) -> Result<AttemptRow, StatusCode> {
    let attempt = state
        .store
        .get_attempt(attempt_id)
        .await
        .map_err(|e| attempt_error_to_status(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    if attempt.student_id != caller {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(attempt)
}

// =============================================================================
// FRAME ANALYSIS
// =============================================================================

#[derive(Deserialize)]
pub struct AnalyzeFrameRequest {
    pub attempt_id: Uuid,
    pub frame_base64: String,
}

#[derive(Serialize)]
pub struct AnalyzeFrameResponse {
    pub analysis: FrameAnalysis,
    pub escalated: bool,
}

/// Analyze one frame synchronously and run every violation in the verdict
/// through the escalation path. 503 when no analyzer is configured.
pub async fn analyze_frame(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(req): Json<AnalyzeFrameRequest>,
) -> Result<Json<AnalyzeFrameResponse>, StatusCode> {
    let Some(analyzer) = &state.capabilities.analyzer else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let attempt = owned_attempt(&state, req.attempt_id, caller).await?;
    let analysis = analyzer.analyze(&req.frame_base64).await;
    if analysis.is_clean() {
        return Ok(Json(AnalyzeFrameResponse { analysis, escalated: false }));
    }

    let subject = subject_for(&state, &attempt).await;
    let metadata = json!({
        "source": "frame_analysis",
        "faces_detected": analysis.faces_detected,
        "head_pose": analysis.head_pose,
        "gaze_direction": analysis.gaze_direction,
    });
    let mut escalated = false;
    for found in &analysis.violations {
        let violation = Violation {
            violation_type: found.violation_type.clone(),
            severity: found.severity,
            description: found.details.clone(),
        };
        let outcome =
            record_and_notify(&state, &subject, &violation, severity_score(found.severity), metadata.clone()).await?;
        escalated |= matches!(outcome, ReportOutcome::Escalated(_));
    }

    Ok(Json(AnalyzeFrameResponse { analysis, escalated }))
}

// =============================================================================
// VIOLATION REPORTING
// =============================================================================

#[derive(Deserialize)]
pub struct ReportViolationRequest {
    pub attempt_id: Uuid,
    pub violation_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Serialize)]
pub struct ReportViolationResponse {
    pub escalated: bool,
    pub cumulative_score: u32,
    pub total_violations: i32,
}

pub async fn report_violation(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Json(req): Json<ReportViolationRequest>,
) -> Result<Json<ReportViolationResponse>, StatusCode> {
    let attempt = owned_attempt(&state, req.attempt_id, caller).await?;
    let violation =
        Violation { violation_type: req.violation_type, severity: req.severity, description: req.description };
    let score = if req.score == 0 { severity_score(req.severity) } else { req.score };

    let subject = subject_for(&state, &attempt).await;
    let outcome = record_and_notify(&state, &subject, &violation, score, req.metadata).await?;
    let response = match outcome {
        ReportOutcome::Logged { total_violations, cumulative_score } => {
            ReportViolationResponse { escalated: false, cumulative_score, total_violations }
        }
        ReportOutcome::Escalated(entry) => ReportViolationResponse {
            escalated: true,
            cumulative_score: entry.violation_score,
            // The audit count lives on the attempt; re-fetch for the reply.
            total_violations: state
                .store
                .get_attempt(req.attempt_id)
                .await
                .map_err(|e| attempt_error_to_status(&e))?
                .map_or(0, |a| a.proctoring_violations),
        },
    };
    Ok(Json(response))
}

/// Resolve the attempt's room context for the report path.
async fn subject_for(state: &AppState, attempt: &AttemptRow) -> ReportSubject {
    let display_name = match state
        .presence
        .student_connection(&attempt.test_code, attempt.student_id)
        .await
    {
        Some(conn) => state
            .presence
            .participant(conn)
            .await
            .map(|p| p.display_name)
            .unwrap_or_default(),
        None => String::new(),
    };

    ReportSubject {
        test_code: attempt.test_code.clone(),
        student_id: attempt.student_id,
        attempt_id: attempt.id,
        display_name,
    }
}

/// Record the report and emit the real-time notices for any escalation.
async fn record_and_notify(
    state: &AppState,
    subject: &ReportSubject,
    violation: &Violation,
    score: u32,
    metadata: serde_json::Value,
) -> Result<ReportOutcome, StatusCode> {
    let outcome = state
        .escalation
        .record_report(&*state.store, subject, violation, score, metadata)
        .await
        .map_err(|e| escalation_error_to_status(&e))?;

    if let ReportOutcome::Escalated(entry) = &outcome {
        relay::notify_escalation(&state.presence, entry).await;
    }
    Ok(outcome)
}

// =============================================================================
// VIOLATION AUDIT
// =============================================================================

pub async fn list_violations(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<Vec<ViolationLogRow>>, StatusCode> {
    state
        .store
        .list_violations(attempt_id)
        .await
        .map(Json)
        .map_err(|e| attempt_error_to_status(&e))
}

pub async fn violation_summary(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<ViolationSummary>, StatusCode> {
    state
        .store
        .violation_summary(attempt_id)
        .await
        .map(Json)
        .map_err(|e| attempt_error_to_status(&e))
}

// =============================================================================
// WAITING ROOM
// =============================================================================

pub async fn waiting_room_roster(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(test_code): Path<String>,
) -> Result<Json<Vec<WaitingRoomSnapshot>>, StatusCode> {
    escalation::authorize_supervisor(&state.presence, &test_code, caller)
        .await
        .map_err(|e| escalation_error_to_status(&e))?;
    Ok(Json(state.escalation.roster(&test_code).await))
}

/// A student may read their own entry; the test's supervisor may read any.
pub async fn waiting_room_status(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path((test_code, student_id)): Path<(String, Uuid)>,
) -> Result<Json<WaitingRoomSnapshot>, StatusCode> {
    if caller != student_id {
        escalation::authorize_supervisor(&state.presence, &test_code, caller)
            .await
            .map_err(|e| escalation_error_to_status(&e))?;
    }

    state
        .escalation
        .status(&test_code, student_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
pub struct WaitingRoomActionRequest {
    pub action: SupervisorAction,
    #[serde(default)]
    pub saved_test_state: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct WaitingRoomActionResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<WaitingRoomSnapshot>,
}

pub async fn waiting_room_action(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path((test_code, student_id)): Path<(String, Uuid)>,
    Json(req): Json<WaitingRoomActionRequest>,
) -> Result<Json<WaitingRoomActionResponse>, StatusCode> {
    escalation::authorize_supervisor(&state.presence, &test_code, caller)
        .await
        .map_err(|e| escalation_error_to_status(&e))?;

    let outcome = state
        .escalation
        .apply(&*state.store, &test_code, student_id, req.action, req.saved_test_state)
        .await
        .map_err(|e| escalation_error_to_status(&e))?;

    relay::notify_action(&state.presence, &test_code, student_id, &outcome).await;

    let response = match outcome {
        escalation::ActionOutcome::Admitted(entry) | escalation::ActionOutcome::Paused(entry) => {
            WaitingRoomActionResponse { state: entry.state.as_str().to_string(), entry: Some(entry) }
        }
        escalation::ActionOutcome::Terminated => {
            WaitingRoomActionResponse { state: "terminated".to_string(), entry: None }
        }
    };
    Ok(Json(response))
}

#[cfg(test)]
#[path = "proctoring_test.rs"]
mod tests;
