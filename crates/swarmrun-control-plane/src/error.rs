//! Colony errors.

use thiserror::Error;

use swarmrun_core::{CoreError, TaskId, WorkerId};
use swarmrun_proto::AckStatus;

/// Errors returned by colony operations. An `Err` never leaves a partial
/// mutation behind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColonyError {
    #[error("Worker already registered: {0}")]
    DuplicateWorker(WorkerId),

    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// The worker does not hold the task it reported on.
    #[error("Stale claim: worker {worker_id} does not hold task {task_id}")]
    StaleClaim { worker_id: WorkerId, task_id: TaskId },

    #[error("Capacity exceeded: {active} of {max_concurrent} workers busy")]
    CapacityExceeded { active: u64, max_concurrent: u64 },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task already terminal: {0}")]
    AlreadyTerminal(TaskId),
}

impl ColonyError {
    /// Status code reported to remote callers.
    pub fn ack_status(&self) -> AckStatus {
        match self {
            Self::DuplicateWorker(_) | Self::InvalidTask(_) => AckStatus::RejectedInvalid,
            Self::UnknownWorker(_) | Self::TaskNotFound(_) => AckStatus::NotFound,
            Self::StaleClaim { .. } | Self::AlreadyTerminal(_) => AckStatus::Stale,
            Self::CapacityExceeded { .. } => AckStatus::RejectedCapacity,
        }
    }
}

impl From<CoreError> for ColonyError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidInput(msg) => Self::InvalidTask(msg),
            other => Self::InvalidTask(other.to_string()),
        }
    }
}
