//! The dispatch path.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::Value;
use tracing::info;

use crate::error::HubError;
use crate::state::AppState;
use crate::types::PredictRequest;

/// Forward a prediction to an idle worker of the requested model.
///
/// POST /predict
///
/// Blocks until a ready worker is available; if the client gives up while
/// waiting, the request future is dropped and the wait is abandoned.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Value>, HubError> {
    state.stats.record_received();
    match dispatch(&state, payload).await {
        Ok(response) => {
            state.stats.record_success();
            Ok(Json(response))
        }
        Err(e) => {
            state.stats.record_failed();
            Err(e)
        }
    }
}

async fn dispatch(
    state: &AppState,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Value, HubError> {
    let Json(request) =
        payload.map_err(|e| HubError::RequestMalformed(e.body_text()))?;
    let model = request.model_name().ok_or_else(|| {
        HubError::RequestMalformed("model parameter is missing or not a string".into())
    })?;

    let worker = state.manager.acquire(&model).await?;
    info!(model = %model, worker_id = %worker.id(), "dispatching predict");

    // The worker goes back to its pool whatever the forwarding outcome; if
    // its process actually died, the exit observer evicts it shortly after.
    let result = worker.predict(&request).await;
    state.manager.release(worker.id());
    result
}
