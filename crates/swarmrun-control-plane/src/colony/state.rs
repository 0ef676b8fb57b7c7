//! Colony state: the task table, the worker table and the pending index.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use swarmrun_core::{Task, TaskId, TaskStatus, WorkerId, WorkerRecord, WorkerStatus};

/// Everything the colony knows.
///
/// `pending` holds exactly the ids of PENDING tasks, each once, in FIFO order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColonyState {
    pub tasks: HashMap<TaskId, Task>,
    pub workers: HashMap<WorkerId, WorkerRecord>,
    pub pending: VecDeque<TaskId>,
}

/// What [`ColonyState::recover`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    pub requeued_tasks: usize,
    pub cancelled_tasks: usize,
    pub offlined_workers: usize,
}

impl ColonyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workers currently BUSY.
    pub fn busy_workers(&self) -> u64 {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Busy)
            .count() as u64
    }

    /// Number of tasks with the given status.
    pub fn count_tasks(&self, status: TaskStatus) -> u64 {
        self.tasks.values().filter(|t| t.status == status).count() as u64
    }

    /// Bring a loaded snapshot back to a consistent state.
    ///
    /// Nobody holds anything after a restart. In-flight tasks return to
    /// PENDING, or settle CANCELLED if an operator asked for that. Every
    /// worker is OFFLINE until it heartbeats again, and the pending index is
    /// rebuilt from the task table.
    pub fn recover(&mut self, now: DateTime<Utc>) -> Recovery {
        let mut report = Recovery::default();

        for task in self.tasks.values_mut() {
            if task.status.is_in_flight() {
                match task.requeue(now) {
                    TaskStatus::Pending => report.requeued_tasks += 1,
                    _ => report.cancelled_tasks += 1,
                }
            }
        }

        for worker in self.workers.values_mut() {
            worker.pending_cancel = None;
            if worker.status.is_live() {
                worker.go_offline(now);
                report.offlined_workers += 1;
            } else {
                worker.current_task = None;
            }
        }

        self.rebuild_pending();

        info!(
            requeued_tasks = report.requeued_tasks,
            cancelled_tasks = report.cancelled_tasks,
            offlined_workers = report.offlined_workers,
            pending = self.pending.len(),
            "Recovered colony state"
        );
        report
    }

    /// Keep the saved order for ids that are still PENDING, then append any
    /// other PENDING task oldest first.
    fn rebuild_pending(&mut self) {
        let mut seen = HashSet::new();
        let mut pending: VecDeque<TaskId> = self
            .pending
            .drain(..)
            .filter(|id| {
                self.tasks
                    .get(id)
                    .is_some_and(|t| t.status == TaskStatus::Pending)
            })
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut missing: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && !seen.contains(&t.id))
            .collect();
        missing.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.extend(missing.into_iter().map(|t| t.id.clone()));

        self.pending = pending;
    }
}
