//! Attempt persistence — the external store contract for attempts and
//! violation logs.
//!
//! DESIGN
//! ======
//! The coordination layer talks to the store through the [`AttemptStore`]
//! trait (the same seam pattern as `AnalyzeFrames` and `ExtractText`), so
//! escalation paths are testable without a live database. The production
//! implementation is a thin sqlx layer over two tables: `test_attempts` and
//! `violation_logs`. The two operations the coordination layer depends on
//! are atomic at the store: violation recording locks the attempt row and
//! refuses terminated attempts, and the terminal status transition
//! (`UPDATE ... WHERE status <> 'terminated'`) can never double-apply.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::event::{Severity, Violation};

/// Terminal attempt status. Reports against an attempt in this status are
/// refused; the transition is one-way.
pub const STATUS_TERMINATED: &str = "terminated";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("test attempt not found: {0}")]
    NotFound(Uuid),
    #[error("test attempt already terminated: {0}")]
    Terminated(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::event::ErrorCode for AttemptError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_ATTEMPT_NOT_FOUND",
            Self::Terminated(_) => "E_ATTEMPT_TERMINATED",
            Self::Database(_) => "E_DATABASE",
        }
    }
}

/// Row from `test_attempts`.
#[derive(Debug, Clone)]
pub struct AttemptRow {
    pub id: Uuid,
    pub test_code: String,
    pub student_id: Uuid,
    pub status: String,
    pub proctoring_violations: i32,
}

/// Row from `violation_logs`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ViolationLogRow {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub student_id: Uuid,
    pub violation_type: String,
    pub severity: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub ts: i64,
}

/// Per-attempt violation rollup for the audit surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ViolationSummary {
    pub total_violations: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub violation_types: std::collections::HashMap<String, usize>,
}

// =============================================================================
// STORE CONTRACT
// =============================================================================

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Fetch one attempt.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<AttemptRow>, AttemptError>;

    /// Insert a violation log entry and atomically bump the attempt's
    /// violation counter. Returns the new counter value.
    ///
    /// # Errors
    ///
    /// `NotFound` if the attempt does not exist, `Terminated` if it has
    /// already been terminated, or a database error.
    async fn record_violation(
        &self,
        attempt_id: Uuid,
        student_id: Uuid,
        violation: &Violation,
        metadata: serde_json::Value,
    ) -> Result<i32, AttemptError>;

    /// Atomically transition an attempt to `terminated` with an end-time
    /// stamp. Returns `false` when the attempt was already terminated or
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    async fn terminate_attempt(&self, attempt_id: Uuid) -> Result<bool, AttemptError>;

    /// All violation log entries for an attempt, most recent first.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    async fn list_violations(&self, attempt_id: Uuid) -> Result<Vec<ViolationLogRow>, AttemptError>;

    /// Severity/type rollup of an attempt's violation log.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    async fn violation_summary(&self, attempt_id: Uuid) -> Result<ViolationSummary, AttemptError> {
        Ok(summarize(&self.list_violations(attempt_id).await?))
    }
}

// =============================================================================
// POSTGRES IMPLEMENTATION
// =============================================================================

#[async_trait]
impl AttemptStore for PgPool {
    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<AttemptRow>, AttemptError> {
        let row = sqlx::query(
            "SELECT id, test_code, student_id, status, proctoring_violations
             FROM test_attempts WHERE id = $1",
        )
        .bind(attempt_id)
        .fetch_optional(self)
        .await?;

        Ok(row.map(|r| AttemptRow {
            id: r.get("id"),
            test_code: r.get("test_code"),
            student_id: r.get("student_id"),
            status: r.get("status"),
            proctoring_violations: r.get("proctoring_violations"),
        }))
    }

    async fn record_violation(
        &self,
        attempt_id: Uuid,
        student_id: Uuid,
        violation: &Violation,
        metadata: serde_json::Value,
    ) -> Result<i32, AttemptError> {
        let mut tx = self.begin().await?;

        // Lock the attempt row for the duration of the transaction so the
        // status check and the counter bump are one atomic step.
        let row = sqlx::query("SELECT status FROM test_attempts WHERE id = $1 FOR UPDATE")
            .bind(attempt_id)
            .fetch_optional(tx.as_mut())
            .await?;
        let Some(row) = row else {
            return Err(AttemptError::NotFound(attempt_id));
        };
        let status: String = row.get("status");
        if status == STATUS_TERMINATED {
            return Err(AttemptError::Terminated(attempt_id));
        }

        sqlx::query(
            "INSERT INTO violation_logs (id, attempt_id, student_id, violation_type, severity, description, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(attempt_id)
        .bind(student_id)
        .bind(&violation.violation_type)
        .bind(violation.severity.as_str())
        .bind(&violation.description)
        .bind(&metadata)
        .execute(tx.as_mut())
        .await?;

        let row = sqlx::query(
            "UPDATE test_attempts
             SET proctoring_violations = proctoring_violations + 1
             WHERE id = $1
             RETURNING proctoring_violations",
        )
        .bind(attempt_id)
        .fetch_one(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(row.get("proctoring_violations"))
    }

    async fn terminate_attempt(&self, attempt_id: Uuid) -> Result<bool, AttemptError> {
        let result = sqlx::query(
            "UPDATE test_attempts
             SET status = 'terminated', end_time = now()
             WHERE id = $1 AND status <> 'terminated'",
        )
        .bind(attempt_id)
        .execute(self)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_violations(&self, attempt_id: Uuid) -> Result<Vec<ViolationLogRow>, AttemptError> {
        let rows = sqlx::query(
            "SELECT id, attempt_id, student_id, violation_type, severity, description, metadata,
                    (extract(epoch FROM created_at) * 1000)::bigint AS ts
             FROM violation_logs
             WHERE attempt_id = $1
             ORDER BY created_at DESC",
        )
        .bind(attempt_id)
        .fetch_all(self)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ViolationLogRow {
                id: r.get("id"),
                attempt_id: r.get("attempt_id"),
                student_id: r.get("student_id"),
                violation_type: r.get("violation_type"),
                severity: r.get("severity"),
                description: r.get("description"),
                metadata: r.get("metadata"),
                ts: r.get("ts"),
            })
            .collect())
    }
}

/// Build the rollup from fetched rows. Split out for unit testing.
#[must_use]
pub fn summarize(logs: &[ViolationLogRow]) -> ViolationSummary {
    let mut summary = ViolationSummary { total_violations: logs.len(), ..ViolationSummary::default() };
    for log in logs {
        match log.severity.as_str() {
            s if s == Severity::Critical.as_str() => summary.critical += 1,
            s if s == Severity::High.as_str() => summary.high += 1,
            s if s == Severity::Medium.as_str() => summary.medium += 1,
            s if s == Severity::Low.as_str() => summary.low += 1,
            _ => {}
        }
        *summary
            .violation_types
            .entry(log.violation_type.clone())
            .or_insert(0) += 1;
    }
    summary
}

// =============================================================================
// TEST DOUBLES
// =============================================================================


#[cfg(test)]
#[path = "attempts_test.rs"]
mod tests;
