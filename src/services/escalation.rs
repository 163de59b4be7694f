//! Escalation coordinator — the waiting-room state machine.
//!
//! ARCHITECTURE
//! ============
//! One entry per (test_code, student_id), keyed map behind a single async
//! mutex. Every read-then-write on an entry happens under that guard,
//! including the store call made by `terminate`, so transitions for a key
//! are totally ordered. Ties between a racing violation report and a
//! supervisor command are broken by arrival order at the coordinator.
//!
//! STATE MACHINE
//! =============
//! waiting  -> admitted | paused | terminated
//! paused   -> admitted | terminated
//! admitted -> paused | terminated
//! terminated is absorbing: the entry is removed and the attempt is marked
//! terminated at the store; a later report for the same attempt does not
//! resurrect it.
//!
//! Students can only trigger automatic entry (threshold or critical
//! severity); admit, pause, and terminate require the test's supervisor.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::event::{now_ms, Severity, Violation};
use crate::services::attempts::{AttemptError, AttemptStore};

/// Default cumulative score at which a student is escalated.
pub const DEFAULT_VIOLATION_THRESHOLD: u32 = 50;

/// Score contribution used for automated (frame-analysis) violations.
#[must_use]
pub fn severity_score(severity: Severity) -> u32 {
    match severity {
        Severity::Low => 5,
        Severity::Medium => 10,
        Severity::High => 20,
        Severity::Critical => 60,
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitingState {
    Waiting,
    Admitted,
    Paused,
}

impl WaitingState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Admitted => "admitted",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorAction {
    Admit,
    Pause,
    Terminate,
}

/// One waiting-room entry. `saved_test_state` is opaque to the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct WaitingRoomSnapshot {
    pub test_code: String,
    pub student_id: Uuid,
    pub attempt_id: Uuid,
    pub display_name: String,
    pub state: WaitingState,
    pub violation_score: u32,
    pub last_violation_type: String,
    pub last_violation_details: String,
    pub entered_at: i64,
    pub saved_test_state: Option<serde_json::Value>,
}

/// Result of feeding one violation report through the coordinator.
#[derive(Debug, Clone)]
pub enum ReportOutcome {
    /// Logged for audit; the state machine did not move.
    Logged { total_violations: i32, cumulative_score: u32 },
    /// Threshold crossed or critical severity: a waiting-room entry was
    /// created (or overwritten) in state `waiting`.
    Escalated(WaitingRoomSnapshot),
}

/// Result of a supervisor command.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Admitted(WaitingRoomSnapshot),
    Paused(WaitingRoomSnapshot),
    /// Entry removed; the attempt is terminated at the store.
    Terminated,
}

#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("student {student_id} is not in the waiting room for test {test_code}")]
    NotInWaitingRoom { test_code: String, student_id: Uuid },
    #[error("caller is not the supervisor of test {0}")]
    NotRoomSupervisor(String),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
}

impl crate::event::ErrorCode for EscalationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotInWaitingRoom { .. } => "E_NOT_IN_WAITING_ROOM",
            Self::NotRoomSupervisor(_) => "E_NOT_ROOM_SUPERVISOR",
            Self::Attempt(err) => err.error_code(),
        }
    }
}

/// The identity and context of a violation report's subject.
#[derive(Debug, Clone)]
pub struct ReportSubject {
    pub test_code: String,
    pub student_id: Uuid,
    pub attempt_id: Uuid,
    pub display_name: String,
}

// =============================================================================
// COORDINATOR
// =============================================================================

type EntryKey = (String, Uuid);

#[derive(Default)]
struct Inner {
    entries: HashMap<EntryKey, WaitingRoomSnapshot>,
    /// Cumulative violation score per key, independent of escalation.
    scores: HashMap<EntryKey, u32>,
}

#[derive(Clone)]
pub struct EscalationCoordinator {
    inner: Arc<Mutex<Inner>>,
    threshold: u32,
}

impl EscalationCoordinator {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), threshold }
    }

    /// Threshold from `VIOLATION_THRESHOLD`, defaulting to 50.
    #[must_use]
    pub fn from_env() -> Self {
        let threshold = std::env::var("VIOLATION_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_VIOLATION_THRESHOLD);
        Self::new(threshold)
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Feed one violation report through the coordinator: persist the log
    /// entry, bump the attempt counter, accumulate the score, and escalate
    /// when the threshold is crossed or the severity is critical.
    ///
    /// # Errors
    ///
    /// `NotFound` if the attempt does not exist, `Terminated` if it already
    /// ended, or a database error. Escalation state is not touched when the
    /// store refuses the report.
    pub async fn record_report(
        &self,
        store: &dyn AttemptStore,
        subject: &ReportSubject,
        violation: &Violation,
        score: u32,
        metadata: serde_json::Value,
    ) -> Result<ReportOutcome, EscalationError> {
        let total_violations = store
            .record_violation(subject.attempt_id, subject.student_id, violation, metadata)
            .await?;

        let mut inner = self.inner.lock().await;
        let key = (subject.test_code.clone(), subject.student_id);
        let cumulative = inner.scores.entry(key.clone()).or_insert(0);
        // Scores are client-influenced; saturate instead of wrapping.
        *cumulative = cumulative.saturating_add(score);
        let cumulative = *cumulative;

        if cumulative < self.threshold && violation.severity != Severity::Critical {
            return Ok(ReportOutcome::Logged { total_violations, cumulative_score: cumulative });
        }

        // A later escalation for the same key overwrites the former entry.
        let entry = WaitingRoomSnapshot {
            test_code: subject.test_code.clone(),
            student_id: subject.student_id,
            attempt_id: subject.attempt_id,
            display_name: subject.display_name.clone(),
            state: WaitingState::Waiting,
            violation_score: cumulative,
            last_violation_type: violation.violation_type.clone(),
            last_violation_details: violation.description.clone(),
            entered_at: now_ms(),
            saved_test_state: None,
        };
        inner.entries.insert(key, entry.clone());

        warn!(
            test_code = %subject.test_code,
            student_id = %subject.student_id,
            violation_type = %violation.violation_type,
            score = cumulative,
            "student escalated to waiting room"
        );
        Ok(ReportOutcome::Escalated(entry))
    }

    /// Apply a supervisor command to a waiting-room entry. `saved_state`
    /// accompanies `pause` and is stored opaquely on the entry.
    ///
    /// Admit is idempotent on an admitted entry; pause is idempotent on a
    /// paused entry. Terminate marks the attempt terminated at the store
    /// (atomically) before removing the entry, so a failed store call leaves
    /// the entry intact for retry.
    ///
    /// # Errors
    ///
    /// `NotInWaitingRoom` when there is no live entry for the key, or a
    /// database error from the terminate transition.
    pub async fn apply(
        &self,
        store: &dyn AttemptStore,
        test_code: &str,
        student_id: Uuid,
        action: SupervisorAction,
        saved_state: Option<serde_json::Value>,
    ) -> Result<ActionOutcome, EscalationError> {
        let mut inner = self.inner.lock().await;
        let key = (test_code.to_string(), student_id);
        let Some(entry) = inner.entries.get_mut(&key) else {
            return Err(EscalationError::NotInWaitingRoom { test_code: test_code.to_string(), student_id });
        };

        let outcome = match action {
            SupervisorAction::Admit => {
                entry.state = WaitingState::Admitted;
                ActionOutcome::Admitted(entry.clone())
            }
            SupervisorAction::Pause => {
                entry.state = WaitingState::Paused;
                if saved_state.is_some() {
                    entry.saved_test_state = saved_state;
                }
                ActionOutcome::Paused(entry.clone())
            }
            SupervisorAction::Terminate => {
                let attempt_id = entry.attempt_id;
                // Store transition first: if it fails the entry survives and
                // the supervisor can retry.
                store.terminate_attempt(attempt_id).await?;
                inner.entries.remove(&key);
                inner.scores.remove(&key);
                ActionOutcome::Terminated
            }
        };

        info!(%test_code, %student_id, ?action, "supervisor action applied");
        Ok(outcome)
    }

    /// All live entries for a test, supervisor roster view.
    pub async fn roster(&self, test_code: &str) -> Vec<WaitingRoomSnapshot> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<_> = inner
            .entries
            .values()
            .filter(|e| e.test_code == test_code)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.entered_at);
        entries
    }

    /// A single student's live entry, if any. Absence after terminate is the
    /// expected answer, not an error.
    pub async fn status(&self, test_code: &str, student_id: Uuid) -> Option<WaitingRoomSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(&(test_code.to_string(), student_id))
            .cloned()
    }

    /// Place an entry directly, bypassing the report path.
    #[cfg(test)]
    pub(crate) async fn seed_entry(&self, entry: WaitingRoomSnapshot) {
        let mut inner = self.inner.lock().await;
        let key = (entry.test_code.clone(), entry.student_id);
        inner.scores.insert(key.clone(), entry.violation_score);
        inner.entries.insert(key, entry);
    }

    #[cfg(test)]
    pub(crate) async fn score_of(&self, test_code: &str, student_id: Uuid) -> Option<u32> {
        let inner = self.inner.lock().await;
        inner
            .scores
            .get(&(test_code.to_string(), student_id))
            .copied()
    }
}

/// Authority rule: only the connected supervisor of a test may command its
/// waiting room. An unmonitored room rejects every command.
///
/// # Errors
///
/// `NotRoomSupervisor` when the caller is not the test's supervisor.
pub async fn authorize_supervisor(
    presence: &crate::services::presence::PresenceRegistry,
    test_code: &str,
    caller_id: Uuid,
) -> Result<(), EscalationError> {
    match presence.supervisor_user_of(test_code).await {
        Some(supervisor_id) if supervisor_id == caller_id => Ok(()),
        _ => Err(EscalationError::NotRoomSupervisor(test_code.to_string())),
    }
}

#[cfg(test)]
#[path = "escalation_test.rs"]
mod tests;
