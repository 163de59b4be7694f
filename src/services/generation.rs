//! Content generation — quiz and course synthesis, plus the task processors
//! that execute queued work.
//!
//! DESIGN
//! ======
//! Generation calls go through the [`Generate`] trait with JSON-only
//! prompts. Models wrap JSON in markdown code fences often enough that the
//! response is unfenced before parsing; anything that still fails to parse
//! is a malformed-content error carrying a preview for the logs, never a
//! panic.
//!
//! Two processors bridge the queue to the services: [`GenerationProcessor`]
//! handles quiz/course/material jobs, [`AnalysisProcessor`] handles queued
//! frame analysis and feeds verdicts through the escalation coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::event::Violation;
use crate::llm::{GenError, Generate};
use crate::services::analysis::AnalyzeFrames;
use crate::services::attempts::AttemptStore;
use crate::services::escalation::{severity_score, EscalationCoordinator, ReportOutcome, ReportSubject};
use crate::services::presence::PresenceRegistry;
use crate::services::queue::{ClaimedTask, ProcessTask, TaskFailure};
use crate::services::relay;

const QUIZ_MAX_TOKENS: u32 = 4000;
const COURSE_MAX_TOKENS: u32 = 8000;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Gen(#[from] GenError),
    #[error("model returned malformed content")]
    MalformedContent,
}

impl crate::event::ErrorCode for GenerationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Gen(err) => err.error_code(),
            Self::MalformedContent => "E_MALFORMED_CONTENT",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Gen(err) => err.retryable(),
            // A fresh completion may parse fine.
            Self::MalformedContent => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSpec {
    pub topic: String,
    pub question_count: u32,
    pub difficulty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseSpec {
    pub topic: String,
    pub module_count: u32,
}

/// Queued generation work, one variant per job shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum GenerationJob {
    Quiz { spec: QuizSpec },
    Course { spec: CourseSpec },
    /// Quiz built from extracted material text rather than a bare topic.
    MaterialsQuiz { text: String, question_count: u32 },
}

// =============================================================================
// FENCE STRIPPING
// =============================================================================

/// Remove a surrounding markdown code fence, if present. Handles both
/// ```` ```json ```` and bare ```` ``` ```` fences.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn parse_model_json(raw: &str) -> Result<Value, GenerationError> {
    let unfenced = strip_code_fences(raw);
    serde_json::from_str(unfenced).map_err(|err| {
        let preview: String = unfenced.chars().take(200).collect();
        warn!(error = %err, %preview, "generation output failed to parse");
        GenerationError::MalformedContent
    })
}

// =============================================================================
// GENERATION CALLS
// =============================================================================

const QUIZ_SYSTEM: &str = "You are an assessment author. Respond with a single JSON object and nothing else: \
    {\"title\": string, \"questions\": [{\"question\": string, \"options\": [string, string, string, string], \
    \"correct_index\": number, \"explanation\": string}]}. No markdown, no commentary.";

const COURSE_SYSTEM: &str = "You are a curriculum author. Respond with a single JSON object and nothing else: \
    {\"title\": string, \"description\": string, \"modules\": [{\"title\": string, \"summary\": string, \
    \"lessons\": [{\"title\": string, \"content\": string}]}]}. No markdown, no commentary.";

/// Generate a quiz on a topic.
///
/// # Errors
///
/// Provider errors, or `MalformedContent` when the output is not valid JSON.
pub async fn generate_quiz(generator: &dyn Generate, spec: &QuizSpec) -> Result<Value, GenerationError> {
    let prompt = format!(
        "Write a {difficulty} quiz with {count} multiple-choice questions on the topic: {topic}",
        difficulty = spec.difficulty,
        count = spec.question_count,
        topic = spec.topic,
    );
    let raw = generator
        .complete(QUIZ_MAX_TOKENS, QUIZ_SYSTEM, &prompt)
        .await?;
    parse_model_json(&raw)
}

/// Generate a course outline on a topic.
///
/// # Errors
///
/// Provider errors, or `MalformedContent` when the output is not valid JSON.
pub async fn generate_course(generator: &dyn Generate, spec: &CourseSpec) -> Result<Value, GenerationError> {
    let prompt = format!(
        "Design a course with {count} modules on the topic: {topic}",
        count = spec.module_count,
        topic = spec.topic,
    );
    let raw = generator
        .complete(COURSE_MAX_TOKENS, COURSE_SYSTEM, &prompt)
        .await?;
    parse_model_json(&raw)
}

/// Generate a quiz grounded in extracted material text.
///
/// # Errors
///
/// Provider errors, or `MalformedContent` when the output is not valid JSON.
pub async fn generate_materials_quiz(
    generator: &dyn Generate,
    text: &str,
    question_count: u32,
) -> Result<Value, GenerationError> {
    let prompt = format!(
        "Write {question_count} multiple-choice questions testing comprehension of the following material. \
         Base every question strictly on the material.\n\n---\n{text}"
    );
    let raw = generator
        .complete(QUIZ_MAX_TOKENS, QUIZ_SYSTEM, &prompt)
        .await?;
    parse_model_json(&raw)
}

/// Random join code for a generated test: six uppercase alphanumerics.
#[must_use]
pub fn generate_test_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    (0..6)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

// =============================================================================
// QUEUE PROCESSORS
// =============================================================================

/// Executes generation-class and test-processing-class jobs.
pub struct GenerationProcessor {
    generator: Arc<dyn Generate>,
}

impl GenerationProcessor {
    #[must_use]
    pub fn new(generator: Arc<dyn Generate>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl ProcessTask for GenerationProcessor {
    async fn process(&self, task: &ClaimedTask) -> Result<Value, TaskFailure> {
        let job: GenerationJob =
            serde_json::from_value(task.payload.clone()).map_err(|e| TaskFailure::new(format!("bad payload: {e}")))?;

        let result = match job {
            GenerationJob::Quiz { spec } => generate_quiz(self.generator.as_ref(), &spec).await,
            GenerationJob::Course { spec } => generate_course(self.generator.as_ref(), &spec).await,
            GenerationJob::MaterialsQuiz { text, question_count } => {
                generate_materials_quiz(self.generator.as_ref(), &text, question_count).await
            }
        };

        match result {
            Ok(content) => Ok(json!({ "test_code": generate_test_code(), "content": content })),
            Err(err) => Err(TaskFailure::new(err.to_string())),
        }
    }
}

/// Subject fields carried in a queued frame-analysis job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub test_code: String,
    pub student_id: uuid::Uuid,
    pub attempt_id: uuid::Uuid,
    pub display_name: String,
    pub frame_base64: String,
}

/// Executes proctoring-class jobs: analyze a frame, record every violation
/// in the verdict, and run the escalation/notification path.
pub struct AnalysisProcessor {
    analyzer: Arc<dyn AnalyzeFrames>,
    presence: PresenceRegistry,
    escalation: EscalationCoordinator,
    store: Arc<dyn AttemptStore>,
}

impl AnalysisProcessor {
    #[must_use]
    pub fn new(
        analyzer: Arc<dyn AnalyzeFrames>,
        presence: PresenceRegistry,
        escalation: EscalationCoordinator,
        store: Arc<dyn AttemptStore>,
    ) -> Self {
        Self { analyzer, presence, escalation, store }
    }
}

#[async_trait]
impl ProcessTask for AnalysisProcessor {
    async fn process(&self, task: &ClaimedTask) -> Result<Value, TaskFailure> {
        let job: AnalysisJob =
            serde_json::from_value(task.payload.clone()).map_err(|e| TaskFailure::new(format!("bad payload: {e}")))?;

        let analysis = self.analyzer.analyze(&job.frame_base64).await;
        if analysis.is_clean() {
            return Ok(json!({ "clean": true, "faces_detected": analysis.faces_detected }));
        }

        let subject = ReportSubject {
            test_code: job.test_code.clone(),
            student_id: job.student_id,
            attempt_id: job.attempt_id,
            display_name: job.display_name.clone(),
        };
        let metadata = json!({
            "source": "frame_analysis",
            "faces_detected": analysis.faces_detected,
            "head_pose": analysis.head_pose,
            "gaze_direction": analysis.gaze_direction,
        });
        let student = self
            .presence
            .student_connection(&job.test_code, job.student_id)
            .await;

        let mut escalated = false;
        for found in &analysis.violations {
            let violation = Violation {
                violation_type: found.violation_type.clone(),
                severity: found.severity,
                description: found.details.clone(),
            };
            let score = severity_score(found.severity);

            let outcome = self
                .escalation
                .record_report(&*self.store, &subject, &violation, score, metadata.clone())
                .await
                .map_err(|e| TaskFailure::new(e.to_string()))?;

            if let Some(student) = student {
                relay::forward_violation(&self.presence, student, violation, score).await;
            }
            if let ReportOutcome::Escalated(entry) = &outcome {
                relay::notify_escalation(&self.presence, entry).await;
                escalated = true;
            }
        }

        Ok(json!({
            "clean": false,
            "faces_detected": analysis.faces_detected,
            "violations": analysis.violations.len(),
            "escalated": escalated,
        }))
    }
}

#[cfg(test)]
#[path = "generation_test.rs"]
mod tests;
