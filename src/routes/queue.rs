//! Queue REST surface — system status and task polling.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

/// Coarse system status plus per-class depth and running counts.
pub async fn queue_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let classes: serde_json::Map<String, serde_json::Value> = state
        .queue
        .snapshot()
        .into_iter()
        .map(|(class, snap)| (class.as_str().to_string(), json!(snap)))
        .collect();
    Json(json!({
        "status": state.queue.system_status(),
        "classes": classes,
    }))
}

/// Poll one task. An unknown or expired id answers 200 with a `not_found`
/// status so pollers do not have to distinguish expiry from absence.
pub async fn task_status(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> Json<serde_json::Value> {
    match state.queue.lookup(task_id) {
        Some(view) => Json(json!(view)),
        None => Json(json!({ "status": "not_found" })),
    }
}

#[cfg(test)]
#[path = "queue_routes_test.rs"]
mod tests;
