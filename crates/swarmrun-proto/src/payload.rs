//! Typed payloads carried inside the envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use swarmrun_core::{TaskId, TaskOutcome};

/// REGISTER_WORKER: a worker announces itself.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegisterWorker {
    /// Hostname of the worker machine.
    #[serde(default)]
    pub hostname: String,

    /// Worker binary version.
    #[serde(default)]
    pub version: String,
}

/// HEARTBEAT: periodic liveness signal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Task the worker believes it is executing.
    #[serde(default)]
    pub current_task: Option<TaskId>,
}

/// CLAIM_REQUEST: ask for the next pending task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClaimRequest {}

/// A task handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub payload: Value,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Per-attempt deadline in milliseconds.
    pub deadline_ms: u64,
}

/// CLAIM_GRANT: reply to CLAIM_REQUEST. `task` is empty when nothing is pending.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClaimGrant {
    #[serde(default)]
    pub task: Option<Assignment>,
}

/// TASK_STARTED: the worker began executing a granted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: TaskId,
}

/// TASK_RESULT: outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub outcome: TaskOutcome,
}

/// CANCEL: the queen withdraws a task from the worker holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancel {
    pub task_id: TaskId,
    #[serde(default)]
    pub reason: String,
}

/// DEREGISTER: a worker leaves the colony.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Deregister {}

/// Status code carried by an ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckStatus {
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "rejected:capacity")]
    RejectedCapacity,
    #[serde(rename = "rejected:invalid")]
    RejectedInvalid,
    #[serde(rename = "not_found")]
    NotFound,
    #[serde(rename = "stale")]
    Stale,
}

impl AckStatus {
    /// Wire label of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::RejectedCapacity => "rejected:capacity",
            Self::RejectedInvalid => "rejected:invalid",
            Self::NotFound => "not_found",
            Self::Stale => "stale",
        }
    }
}

/// ACK: generic reply with a status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Ack {
    /// Accepted, no detail.
    pub fn accepted() -> Self {
        Self {
            status: AckStatus::Accepted,
            detail: None,
        }
    }

    /// Any status with a human-readable detail.
    pub fn with_detail(status: AckStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_status_wire_names() {
        let json = serde_json::to_string(&AckStatus::RejectedCapacity).unwrap();
        assert_eq!(json, "\"rejected:capacity\"");
        assert_eq!(AckStatus::NotFound.as_str(), "not_found");
    }

    #[test]
    fn test_empty_grant_deserializes_from_empty_object() {
        let grant: ClaimGrant = serde_json::from_str("{}").unwrap();
        assert!(grant.task.is_none());
    }
}
