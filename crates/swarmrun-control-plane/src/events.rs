//! Colony change notifications.

use serde::Serialize;

use swarmrun_core::{TaskId, TaskStatus, WorkerId, WorkerStatus};

/// A state change inside the colony, broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ColonyEvent {
    TaskStatusChanged {
        task_id: TaskId,
        status: TaskStatus,
        attempt: u32,
    },
    WorkerStatusChanged {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
    WorkerRemoved {
        worker_id: WorkerId,
    },
}

impl ColonyEvent {
    /// Task id and status, if this is a task event.
    pub fn task_status(&self) -> Option<(&TaskId, TaskStatus)> {
        match self {
            Self::TaskStatusChanged {
                task_id, status, ..
            } => Some((task_id, *status)),
            _ => None,
        }
    }
}
