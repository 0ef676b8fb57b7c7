//! Task control handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use tracing::{info, warn};

use swarmrun_core::{TaskId, TaskSpec};
use swarmrun_proto::AckStatus;

use crate::http::responses::{http_status, StatusResponse, TaskResponse};
use crate::state::AppState;

/// Enqueue a new task.
pub async fn enqueue_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TaskSpec>, JsonRejection>,
) -> impl IntoResponse {
    let spec = match body {
        Ok(Json(spec)) => spec,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected malformed task body");
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::rejected(
                    AckStatus::RejectedInvalid,
                    rejection.body_text(),
                )),
            );
        }
    };

    match state.colony().enqueue_task(spec, Utc::now()).await {
        Ok(task_id) => {
            info!(task_id = %task_id, "Task accepted");
            let response = StatusResponse {
                task_id: Some(task_id.into_inner()),
                ..StatusResponse::accepted()
            };
            (StatusCode::ACCEPTED, Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Task rejected");
            (http_status(e.ack_status()), Json(StatusResponse::from(&e)))
        }
    }
}

/// Get a task's current state.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.colony().get_task(&TaskId::new(id.clone())).await {
        Some(task) => (StatusCode::OK, Json(TaskResponse::from(task))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(StatusResponse::rejected(
                AckStatus::NotFound,
                format!("task {} not found", id),
            )),
        )
            .into_response(),
    }
}

/// Cancel a task.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let task_id = TaskId::new(id);
    match state.colony().cancel_task(&task_id, Utc::now()).await {
        Ok(task_status) => {
            let response = StatusResponse {
                task_id: Some(task_id.into_inner()),
                task_status: Some(task_status),
                ..StatusResponse::accepted()
            };
            (StatusCode::ACCEPTED, Json(response))
        }
        Err(e) => (http_status(e.ack_status()), Json(StatusResponse::from(&e))),
    }
}
