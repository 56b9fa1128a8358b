use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use conveyor_core::TaskStatus;
use serde_json::json;
use tracing::{debug, warn};

use super::dto::{EnqueueRequest, EnqueueResponse};
use super::errors::json_error;
use super::router::AppState;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn enqueue(State(state): State<AppState>, body: Body) -> Response {
    let read = tokio::time::timeout(state.read_timeout, axum::body::to_bytes(body, MAX_BODY_BYTES));
    let bytes = match read.await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            debug!(error = %err, "failed to read request body");
            return json_error(StatusCode::BAD_REQUEST, "invalid request body");
        }
        Err(_) => return json_error(StatusCode::REQUEST_TIMEOUT, "request body read timed out"),
    };

    let req: EnqueueRequest = match serde_json::from_slice(&bytes) {
        Ok(req) => req,
        Err(err) => {
            debug!(error = %err, "request body is not a valid enqueue request");
            return json_error(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    let max_retries = match req.validate() {
        Ok(max_retries) => max_retries,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let id = req.id;
    match state.service.submit(id.clone(), req.payload, max_retries).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(EnqueueResponse {
                id,
                status: TaskStatus::Queued,
            }),
        )
            .into_response(),
        Err(err) => {
            warn!(task_id = %err.task_id(), error = %err, "enqueue rejected");
            json_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
    }
}
