//! Content-generation REST surface — quiz, course, and material uploads.
//!
//! DESIGN
//! ======
//! Generation is never synchronous: each endpoint validates, enqueues a job,
//! and answers 202 with a task id for polling. Material uploads are the one
//! exception in shape: text extraction runs inline (the uploaded bytes are
//! not worth queueing), then the quiz job is enqueued like the others.
//! Endpoints answer 503 when the capability they need is not configured.

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::services::generation::{CourseSpec, GenerationJob, QuizSpec};
use crate::services::ocr::{ExtractError, MaterialKind};
use crate::services::queue::QueueClass;
use crate::state::AppState;

const DEFAULT_QUESTION_COUNT: u32 = 10;
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Serialize)]
pub struct QueuedResponse {
    pub task_id: Uuid,
    pub status: &'static str,
}

fn queued(task_id: Uuid) -> (StatusCode, Json<QueuedResponse>) {
    (StatusCode::ACCEPTED, Json(QueuedResponse { task_id, status: "queued" }))
}

// =============================================================================
// QUIZ + COURSE
// =============================================================================

#[derive(Deserialize)]
pub struct QuizRequest {
    #[serde(flatten)]
    pub spec: QuizSpec,
    #[serde(default)]
    pub priority: i32,
}

pub async fn create_quiz(
    State(state): State<AppState>,
    Json(req): Json<QuizRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>), StatusCode> {
    if state.capabilities.generator.is_none() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let payload = encode_job(&GenerationJob::Quiz { spec: req.spec })?;
    Ok(queued(state.queue.submit(QueueClass::Generation, req.priority, payload)))
}

#[derive(Deserialize)]
pub struct CourseRequest {
    #[serde(flatten)]
    pub spec: CourseSpec,
    #[serde(default)]
    pub priority: i32,
}

pub async fn create_course(
    State(state): State<AppState>,
    Json(req): Json<CourseRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>), StatusCode> {
    if state.capabilities.generator.is_none() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    let payload = encode_job(&GenerationJob::Course { spec: req.spec })?;
    Ok(queued(state.queue.submit(QueueClass::Generation, req.priority, payload)))
}

// =============================================================================
// MATERIAL UPLOADS
// =============================================================================

/// Accept a PDF or image, extract its text inline, and enqueue a quiz job
/// grounded in that text.
pub async fn upload_materials(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<QueuedResponse>), StatusCode> {
    let Some(extractor) = &state.capabilities.extractor else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    if state.capabilities.generator.is_none() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let mut file: Option<(MaterialKind, String, Vec<u8>)> = None;
    let mut question_count = DEFAULT_QUESTION_COUNT;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("file") => {
                let kind = field
                    .content_type()
                    .and_then(MaterialKind::from_mime)
                    .ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| StatusCode::BAD_REQUEST)?
                    .to_vec();
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE);
                }
                file = Some((kind, filename, bytes));
            }
            Some("question_count") => {
                let text = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                question_count = text.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
            }
            _ => {}
        }
    }

    let Some((kind, filename, bytes)) = file else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let text = extractor
        .extract(kind, &filename, bytes)
        .await
        .map_err(|e| extract_error_to_status(&e))?;

    let payload = encode_job(&GenerationJob::MaterialsQuiz { text, question_count })?;
    Ok(queued(state.queue.submit(QueueClass::TestProcessing, 0, payload)))
}

fn extract_error_to_status(err: &ExtractError) -> StatusCode {
    match err {
        ExtractError::NoText => StatusCode::UNPROCESSABLE_ENTITY,
        ExtractError::Transport(e) => {
            warn!(error = %e, "extraction backend unreachable");
            StatusCode::BAD_GATEWAY
        }
        ExtractError::Backend(detail) => {
            warn!(detail = %detail, "extraction backend error");
            StatusCode::BAD_GATEWAY
        }
    }
}

fn encode_job(job: &GenerationJob) -> Result<serde_json::Value, StatusCode> {
    serde_json::to_value(job).map_err(|e| {
        warn!(error = %e, "generation job encode failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
#[path = "ai_routes_test.rs"]
mod tests;
