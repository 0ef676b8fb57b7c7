//! Status enums for Tasks and Workers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Task in the colony.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the pending index for a worker to claim it.
    #[default]
    Pending,
    /// Claimed by a worker, execution not yet started.
    Assigned,
    /// Worker reported that execution started.
    Running,
    /// Execution finished successfully.
    Succeeded,
    /// Last attempt failed; waiting for its retry delay to elapse.
    Failed,
    /// Retry budget exhausted. Never claimed again.
    Dead,
    /// Cancelled by an operator. Never retried.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task will never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Dead | Self::Cancelled)
    }

    /// Returns true while a worker holds the task.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }

    /// Lowercase label used in metrics and HTTP responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dead => "dead",
            Self::Cancelled => "cancelled",
        }
    }

    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 7] = [
        Self::Pending,
        Self::Assigned,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Dead,
        Self::Cancelled,
    ];
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a Worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Registered, no heartbeat seen yet.
    #[default]
    Registered,
    /// Alive and not holding a task.
    Idle,
    /// Holding exactly one task.
    Busy,
    /// Heartbeat lost. Reaped after the grace period.
    Offline,
}

impl WorkerStatus {
    /// Returns true if the worker may claim a task.
    pub fn can_claim(&self) -> bool {
        matches!(self, Self::Registered | Self::Idle)
    }

    /// Returns true unless the worker has gone silent.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Offline)
    }

    /// Lowercase label used in metrics and HTTP responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    /// Every status, in lifecycle order.
    pub const ALL: [WorkerStatus; 4] = [Self::Registered, Self::Idle, Self::Busy, Self::Offline];
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_is_not_terminal() {
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Dead.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_busy_worker_cannot_claim() {
        assert!(WorkerStatus::Registered.can_claim());
        assert!(WorkerStatus::Idle.can_claim());
        assert!(!WorkerStatus::Busy.can_claim());
        assert!(!WorkerStatus::Offline.can_claim());
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&TaskStatus::Dead).unwrap();
        assert_eq!(json, "\"DEAD\"");
    }
}
