//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the websocket channel and the REST surface under a single Axum
//! router: proctoring (frames, violations, waiting room), the task queue,
//! and content generation. CORS is open; identity arrives pre-verified in
//! the `x-user-id` header.

pub mod ai;
pub mod identity;
pub mod proctoring;
pub mod queue;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/proctoring/frames", post(proctoring::analyze_frame))
        .route("/api/proctoring/violations", post(proctoring::report_violation))
        .route(
            "/api/proctoring/attempts/{attempt_id}/violations",
            get(proctoring::list_violations),
        )
        .route(
            "/api/proctoring/attempts/{attempt_id}/summary",
            get(proctoring::violation_summary),
        )
        .route(
            "/api/proctoring/waiting-room/{test_code}",
            get(proctoring::waiting_room_roster),
        )
        .route(
            "/api/proctoring/waiting-room/{test_code}/{student_id}",
            get(proctoring::waiting_room_status),
        )
        .route(
            "/api/proctoring/waiting-room/{test_code}/{student_id}/action",
            post(proctoring::waiting_room_action),
        )
        .route("/api/queue/status", get(queue::queue_status))
        .route("/api/queue/tasks/{task_id}", get(queue::task_status))
        .route("/api/ai/quiz", post(ai::create_quiz))
        .route("/api/ai/course", post(ai::create_course))
        .route("/api/ai/materials", post(ai::upload_materials))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
