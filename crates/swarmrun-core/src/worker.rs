//! Worker records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TaskId, WorkerId, WorkerStatus};

/// The colony's view of one logical agent instance.
///
/// A worker holds a task if and only if its status is BUSY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Unique worker identifier.
    pub id: WorkerId,

    /// Current worker status.
    pub status: WorkerStatus,

    /// Timestamp of last heartbeat (registration counts as one).
    pub last_heartbeat: DateTime<Utc>,

    /// Task currently held.
    pub current_task: Option<TaskId>,

    /// When the worker registered.
    pub registered_at: DateTime<Utc>,

    /// When the worker was marked OFFLINE.
    pub offline_since: Option<DateTime<Utc>>,

    /// Task the worker must abandon; delivered as CANCEL on its next heartbeat.
    pub pending_cancel: Option<TaskId>,

    /// Tasks this worker finished (any outcome).
    pub completed_tasks: u64,
}

impl WorkerRecord {
    /// Create a new REGISTERED worker.
    pub fn new(id: WorkerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: WorkerStatus::Registered,
            last_heartbeat: now,
            current_task: None,
            registered_at: now,
            offline_since: None,
            pending_cancel: None,
            completed_tasks: 0,
        }
    }

    /// Take a task: IDLE/REGISTERED -> BUSY.
    pub fn occupy(&mut self, task_id: TaskId) {
        self.status = WorkerStatus::Busy;
        self.current_task = Some(task_id);
    }

    /// Drop the held task: BUSY -> IDLE.
    pub fn vacate(&mut self) -> Option<TaskId> {
        self.status = WorkerStatus::Idle;
        self.current_task.take()
    }

    /// Heartbeat lost. Returns the task that was held, if any.
    pub fn go_offline(&mut self, now: DateTime<Utc>) -> Option<TaskId> {
        self.status = WorkerStatus::Offline;
        self.offline_since = Some(now);
        self.current_task.take()
    }

    /// Back from OFFLINE (or first contact): -> IDLE.
    pub fn revive(&mut self, now: DateTime<Utc>) {
        self.status = WorkerStatus::Idle;
        self.offline_since = None;
        self.last_heartbeat = now;
    }

    /// Whether the heartbeat is older than `timeout`.
    pub fn is_silent(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.status.is_live() && now - self.last_heartbeat > timeout
    }
}
