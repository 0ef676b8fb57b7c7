//! HTTP request and response types.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use swarmrun_core::{FailureReason, Task, TaskStatus, WorkerRecord, WorkerStatus};
use swarmrun_proto::AckStatus;

use crate::error::ColonyError;

/// HTTP status used for each ack status.
pub fn http_status(status: AckStatus) -> StatusCode {
    match status {
        AckStatus::Accepted => StatusCode::ACCEPTED,
        AckStatus::RejectedCapacity => StatusCode::TOO_MANY_REQUESTS,
        AckStatus::RejectedInvalid => StatusCode::BAD_REQUEST,
        AckStatus::NotFound => StatusCode::NOT_FOUND,
        AckStatus::Stale => StatusCode::CONFLICT,
    }
}

// ============================================================================
// Status types
// ============================================================================

/// Outcome of a control operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: AckStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusResponse {
    pub fn accepted() -> Self {
        Self {
            status: AckStatus::Accepted,
            task_id: None,
            task_status: None,
            detail: None,
        }
    }

    pub fn rejected(status: AckStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            task_id: None,
            task_status: None,
            detail: Some(detail.into()),
        }
    }
}

impl From<&ColonyError> for StatusResponse {
    fn from(e: &ColonyError) -> Self {
        Self::rejected(e.ack_status(), e.to_string())
    }
}

// ============================================================================
// Task types
// ============================================================================

/// Response for a single task.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub payload: Value,
    pub assigned_worker: Option<String>,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub deadline_ms: u64,
    pub cancel_requested: bool,
    pub output: Option<Value>,
    pub last_failure: Option<FailureReason>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id.into_inner(),
            status: task.status,
            payload: task.payload,
            assigned_worker: task.assigned_worker.map(|w| w.into_inner()),
            attempt_count: task.attempt_count,
            max_retries: task.max_retries,
            deadline_ms: task.deadline_ms,
            cancel_requested: task.cancel_requested,
            output: task.output,
            last_failure: task.last_failure,
            last_error: task.last_error,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// Worker list types
// ============================================================================

/// Response for a single worker.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub current_task: Option<String>,
    pub completed_tasks: u64,
    pub last_heartbeat: String,
    pub registered_at: String,
}

impl From<WorkerRecord> for WorkerResponse {
    fn from(worker: WorkerRecord) -> Self {
        Self {
            worker_id: worker.id.into_inner(),
            status: worker.status,
            current_task: worker.current_task.map(|t| t.into_inner()),
            completed_tasks: worker.completed_tasks,
            last_heartbeat: worker.last_heartbeat.to_rfc3339(),
            registered_at: worker.registered_at.to_rfc3339(),
        }
    }
}
