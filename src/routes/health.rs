//! Liveness, readiness, stats, and the worker readiness callback.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::error::HubError;
use crate::state::AppState;
use crate::types::ModelReadyNotice;

/// Liveness check, unconditionally OK.
///
/// GET /ping
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: OK once every model has at least one loaded worker.
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.manager.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Dispatch counters and per-model pool depth.
///
/// GET /stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pool_depth: serde_json::Map<String, Value> = state
        .manager
        .pool_depths()
        .into_iter()
        .map(|(model, depth)| (model.to_string(), Value::from(depth)))
        .collect();

    Json(json!({
        "ready": state.manager.is_ready(),
        "requests": state.stats.snapshot(),
        "pool_depth": pool_depth,
    }))
}

/// Readiness callback invoked by a worker once its model is loaded.
/// Callbacks for unknown ids are accepted and ignored.
///
/// POST /model-ready
pub async fn model_ready(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ModelReadyNotice>, JsonRejection>,
) -> Result<StatusCode, HubError> {
    let Json(notice) =
        payload.map_err(|e| HubError::RequestMalformed(e.body_text()))?;
    state.manager.mark_worker_ready(&notice.worker_id);
    Ok(StatusCode::OK)
}
