//! Worker roster handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use tracing::info;

use swarmrun_core::WorkerId;

use crate::http::responses::{http_status, StatusResponse, WorkerResponse};
use crate::state::AppState;

/// List workers as JSON.
pub async fn list_workers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response: Vec<WorkerResponse> = state
        .colony()
        .roster()
        .await
        .into_iter()
        .map(WorkerResponse::from)
        .collect();
    Json(response)
}

/// Remove a worker, requeueing whatever it held.
pub async fn deregister_worker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let worker_id = WorkerId::new(id);
    match state
        .colony()
        .deregister_worker(&worker_id, Utc::now())
        .await
    {
        Ok(requeued) => {
            info!(worker_id = %worker_id, "Worker removed by operator");
            let response = StatusResponse {
                task_id: requeued.map(|t| t.into_inner()),
                ..StatusResponse::accepted()
            };
            (StatusCode::ACCEPTED, Json(response))
        }
        Err(e) => (http_status(e.ack_status()), Json(StatusResponse::from(&e))),
    }
}
