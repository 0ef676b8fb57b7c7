//! The colony: shared task and worker state behind one serialization point.
//!
//! Every operation takes the single lock, validates, and only then mutates,
//! so an `Err` leaves the state untouched and no two callers ever observe a
//! half-applied change. The capacity governor lives under the same lock.

mod state;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use swarmrun_core::{
    CoreError, FailureReason, RetryPolicy, Task, TaskId, TaskOutcome, TaskSpec, TaskStatus,
    WorkerId, WorkerRecord, WorkerStatus,
};

use crate::config::Config;
use crate::error::ColonyError;
use crate::events::ColonyEvent;
use crate::governor::CapacityGovernor;

pub use state::{ColonyState, Recovery};

/// Counters exposed to operators and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColonyStats {
    pub tasks: BTreeMap<&'static str, u64>,
    pub workers: BTreeMap<&'static str, u64>,
    pub pending: u64,
    pub capacity_reserved: u64,
    pub max_concurrent: u64,
    pub total_population: u64,
    pub admissions_total: u64,
    pub admissions_rejected_total: u64,
}

struct Inner {
    state: ColonyState,
    governor: CapacityGovernor,
}

/// Shared colony state.
pub struct Colony {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ColonyEvent>,
    retry_policy: RetryPolicy,
    default_max_retries: u32,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365_000))
}

impl Colony {
    /// Create an empty colony. Fails if the population target is invalid.
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        config.population.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            inner: Mutex::new(Inner {
                state: ColonyState::new(),
                governor: CapacityGovernor::new(config.population),
            }),
            events,
            retry_policy: config.retry_policy,
            default_max_retries: config.default_max_retries,
        })
    }

    /// Replace the state with a recovered snapshot.
    pub fn with_state(mut self, mut state: ColonyState, now: DateTime<Utc>) -> Self {
        state.recover(now);
        let inner = self.inner.get_mut();
        inner.state = state;
        inner.governor.reset();
        self
    }

    /// Receive colony events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ColonyEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ColonyEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn emit_task(&self, task: &Task) {
        self.emit(ColonyEvent::TaskStatusChanged {
            task_id: task.id.clone(),
            status: task.status,
            attempt: task.attempt_count,
        });
    }

    fn emit_worker(&self, worker: &WorkerRecord) {
        self.emit(ColonyEvent::WorkerStatusChanged {
            worker_id: worker.id.clone(),
            status: worker.status,
        });
    }

    /// Emit the events for a settled failure. A DEAD task passes through
    /// FAILED first.
    fn emit_failure(&self, task: &Task) {
        if task.status == TaskStatus::Dead {
            self.emit(ColonyEvent::TaskStatusChanged {
                task_id: task.id.clone(),
                status: TaskStatus::Failed,
                attempt: task.attempt_count,
            });
        }
        self.emit_task(task);
    }

    // ========================================================================
    // Workers
    // ========================================================================

    /// Register a worker as REGISTERED.
    ///
    /// An OFFLINE record with the same id is replaced. A live one is a
    /// duplicate.
    pub async fn register_worker(
        &self,
        worker_id: WorkerId,
        now: DateTime<Utc>,
    ) -> Result<WorkerRecord, ColonyError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.state.workers.get(&worker_id) {
            if existing.status.is_live() {
                return Err(ColonyError::DuplicateWorker(worker_id));
            }
        }

        let record = WorkerRecord::new(worker_id.clone(), now);
        inner.state.workers.insert(worker_id.clone(), record.clone());

        info!(worker_id = %worker_id, "Worker registered");
        self.emit_worker(&record);
        Ok(record)
    }

    /// Record a heartbeat.
    ///
    /// Moves REGISTERED and OFFLINE workers to IDLE. Returns a task the worker
    /// must abandon: either one the colony revoked, or the one the worker
    /// claims to run but no longer holds.
    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        reported_task: Option<&TaskId>,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskId>, ColonyError> {
        let mut guard = self.inner.lock().await;
        let Inner { state, .. } = &mut *guard;

        let worker = state
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| ColonyError::UnknownWorker(worker_id.clone()))?;

        worker.last_heartbeat = now;
        match worker.status {
            WorkerStatus::Registered => {
                worker.status = WorkerStatus::Idle;
                self.emit_worker(worker);
            }
            WorkerStatus::Offline => {
                worker.revive(now);
                info!(worker_id = %worker_id, "Worker back online");
                self.emit_worker(worker);
            }
            WorkerStatus::Idle | WorkerStatus::Busy => {}
        }

        // A revocation only stands while the worker no longer holds the task
        // or an operator asked for the cancellation.
        if let Some(task_id) = worker.pending_cancel.take() {
            let stands = state
                .tasks
                .get(&task_id)
                .map_or(true, |t| !t.is_held_by(worker_id) || t.cancel_requested);
            if stands {
                return Ok(Some(task_id));
            }
            debug!(worker_id = %worker_id, task_id = %task_id, "Dropped stale cancel for a reclaimed task");
        }

        let orphan = reported_task.filter(|task_id| {
            !state
                .tasks
                .get(*task_id)
                .is_some_and(|t| t.is_held_by(worker_id))
        });
        if let Some(task_id) = orphan {
            debug!(worker_id = %worker_id, task_id = %task_id, "Worker runs a task it no longer holds");
        }
        Ok(orphan.cloned())
    }

    /// Remove a worker. A held task goes back to the front of the pending
    /// index, or settles CANCELLED if an operator cancelled it. The worker's
    /// capacity slot is released.
    pub async fn deregister_worker(
        &self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskId>, ColonyError> {
        let mut guard = self.inner.lock().await;
        let Inner { state, governor } = &mut *guard;

        let mut worker = state
            .workers
            .remove(worker_id)
            .ok_or_else(|| ColonyError::UnknownWorker(worker_id.clone()))?;

        if worker.status == WorkerStatus::Busy {
            governor.release();
        }
        let held = worker.go_offline(now).filter(|task_id| {
            state
                .tasks
                .get(task_id)
                .is_some_and(|t| t.is_held_by(worker_id))
        });
        let mut requeued = None;
        if let Some(task_id) = held {
            if let Some(task) = state.tasks.get_mut(&task_id) {
                if task.requeue(now) == TaskStatus::Pending {
                    state.pending.push_front(task_id.clone());
                    requeued = Some(task_id);
                }
                self.emit_task(task);
            }
        }

        info!(worker_id = %worker_id, requeued = ?requeued, "Worker deregistered");
        self.emit(ColonyEvent::WorkerRemoved {
            worker_id: worker_id.clone(),
        });
        Ok(requeued)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Validate a task and append it to the pending index.
    pub async fn enqueue_task(
        &self,
        spec: TaskSpec,
        now: DateTime<Utc>,
    ) -> Result<TaskId, ColonyError> {
        let task = Task::from_spec(spec, self.default_max_retries, now)?;
        self.enqueue(task).await
    }

    /// Append an already built PENDING task.
    pub async fn enqueue(&self, task: Task) -> Result<TaskId, ColonyError> {
        if task.status != TaskStatus::Pending {
            return Err(ColonyError::InvalidTask(format!(
                "new tasks must be pending, got {}",
                task.status
            )));
        }

        let mut inner = self.inner.lock().await;
        if inner.state.tasks.contains_key(&task.id) {
            return Err(ColonyError::InvalidTask(format!(
                "task id already in use: {}",
                task.id
            )));
        }

        let task_id = task.id.clone();
        debug!(task_id = %task_id, "Task enqueued");
        self.emit_task(&task);
        inner.state.pending.push_back(task_id.clone());
        inner.state.tasks.insert(task_id.clone(), task);
        Ok(task_id)
    }

    /// Hand the oldest PENDING task to `worker_id`.
    ///
    /// Returns `None` when nothing is pending. The governor is consulted
    /// before the worker becomes BUSY.
    pub async fn claim_next_task(
        &self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, ColonyError> {
        let mut guard = self.inner.lock().await;
        let Inner { state, governor } = &mut *guard;

        let worker = state
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| ColonyError::UnknownWorker(worker_id.clone()))?;

        if let (WorkerStatus::Busy, Some(task_id)) = (worker.status, &worker.current_task) {
            return Err(ColonyError::StaleClaim {
                worker_id: worker_id.clone(),
                task_id: task_id.clone(),
            });
        }
        // Any message is a sign of life.
        let revived = worker.status == WorkerStatus::Offline;

        let Some(task_id) = state.pending.front().cloned() else {
            if revived {
                worker.revive(now);
                self.emit_worker(worker);
            }
            return Ok(None);
        };

        let admission = governor.admit();
        if !admission.accepted {
            debug!(worker_id = %worker_id, ceiling = admission.ceiling, "Claim rejected: capacity");
            return Err(ColonyError::CapacityExceeded {
                active: governor.reserved(),
                max_concurrent: admission.ceiling,
            });
        }

        let Some(task) = state.tasks.get_mut(&task_id) else {
            governor.release();
            return Err(ColonyError::TaskNotFound(task_id));
        };
        if let Err(e) = task.assign(worker_id.clone(), now) {
            governor.release();
            return Err(e.into());
        }
        state.pending.pop_front();
        if revived {
            worker.revive(now);
        }
        worker.pending_cancel = None;
        worker.occupy(task_id.clone());

        debug!(
            task_id = %task_id,
            worker_id = %worker_id,
            attempt = task.attempt_count,
            "Task assigned"
        );
        self.emit_task(task);
        self.emit_worker(worker);
        Ok(Some(task.clone()))
    }

    /// ASSIGNED -> RUNNING for the task `worker_id` holds.
    pub async fn start_task(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<(), ColonyError> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ColonyError::TaskNotFound(task_id.clone()))?;

        if !task.is_held_by(worker_id) {
            return Err(ColonyError::StaleClaim {
                worker_id: worker_id.clone(),
                task_id: task_id.clone(),
            });
        }
        if task.status == TaskStatus::Running {
            return Ok(());
        }

        task.start(now)?;
        self.emit_task(task);
        Ok(())
    }

    /// Apply the outcome of an attempt and return the worker to IDLE.
    ///
    /// Returns the status the task settled in.
    pub async fn report_result(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, ColonyError> {
        let mut guard = self.inner.lock().await;
        let Inner { state, governor } = &mut *guard;

        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ColonyError::TaskNotFound(task_id.clone()))?;
        let worker = match state.workers.get_mut(worker_id) {
            Some(worker) if task.is_held_by(worker_id) => worker,
            _ => {
                return Err(ColonyError::StaleClaim {
                    worker_id: worker_id.clone(),
                    task_id: task_id.clone(),
                })
            }
        };

        match outcome {
            TaskOutcome::Succeeded { output } => {
                task.succeed(output, now);
                info!(task_id = %task_id, worker_id = %worker_id, "Task succeeded");
                self.emit_task(task);
            }
            TaskOutcome::Failed { reason, message } => {
                let status = task.fail(reason, message, &self.retry_policy, now);
                match status {
                    TaskStatus::Dead => warn!(
                        task_id = %task_id,
                        attempts = task.attempt_count,
                        error = ?task.last_error,
                        "Task dead: retry budget exhausted"
                    ),
                    _ => info!(
                        task_id = %task_id,
                        worker_id = %worker_id,
                        reason = ?reason,
                        status = %status,
                        "Task failed"
                    ),
                }
                self.emit_failure(task);
            }
        }

        if worker.pending_cancel.as_ref() == Some(task_id) {
            worker.pending_cancel = None;
        }
        worker.vacate();
        worker.completed_tasks += 1;
        governor.release();
        self.emit_worker(worker);

        Ok(task.status)
    }

    /// Cancel a task.
    ///
    /// PENDING and FAILED tasks become CANCELLED at once. An in-flight task is
    /// flagged, and its worker is told to abandon it on its next heartbeat.
    /// Returns the task's status after the call.
    pub async fn cancel_task(
        &self,
        task_id: &TaskId,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, ColonyError> {
        let mut guard = self.inner.lock().await;
        let Inner { state, .. } = &mut *guard;

        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ColonyError::TaskNotFound(task_id.clone()))?;
        if task.is_terminal() {
            return Err(ColonyError::AlreadyTerminal(task_id.clone()));
        }

        match task.status {
            TaskStatus::Pending | TaskStatus::Failed => {
                if task.status == TaskStatus::Pending {
                    state.pending.retain(|id| id != task_id);
                }
                task.cancel(now);
                info!(task_id = %task_id, "Task cancelled");
                self.emit_task(task);
            }
            _ => {
                task.cancel_requested = true;
                task.updated_at = now;
                if let Some(worker) = task
                    .assigned_worker
                    .as_ref()
                    .and_then(|id| state.workers.get_mut(id))
                {
                    worker.pending_cancel = Some(task_id.clone());
                }
                info!(task_id = %task_id, "Cancellation requested for in-flight task");
            }
        }

        Ok(task.status)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Mark workers silent for longer than `timeout` OFFLINE and requeue
    /// whatever they held. Held tasks an operator cancelled settle CANCELLED.
    pub async fn mark_silent_workers_offline(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<WorkerId> {
        let timeout = chrono_duration(timeout);
        let mut guard = self.inner.lock().await;
        let Inner { state, governor } = &mut *guard;

        let mut offlined = Vec::new();
        for worker in state.workers.values_mut() {
            if !worker.is_silent(now, timeout) {
                continue;
            }
            if worker.status == WorkerStatus::Busy {
                governor.release();
            }
            worker.pending_cancel = None;
            if let Some(task_id) = worker.go_offline(now) {
                let status = state
                    .tasks
                    .get_mut(&task_id)
                    .filter(|task| task.is_held_by(&worker.id))
                    .map(|task| {
                        let status = task.requeue(now);
                        self.emit_task(task);
                        status
                    });
                if status == Some(TaskStatus::Pending) {
                    state.pending.push_front(task_id.clone());
                }
                warn!(worker_id = %worker.id, task_id = %task_id, status = ?status, "Worker went silent, task released");
            } else {
                warn!(worker_id = %worker.id, "Worker went silent");
            }
            self.emit_worker(worker);
            offlined.push(worker.id.clone());
        }
        offlined
    }

    /// Fail in-flight tasks whose deadline elapsed and revoke them from their
    /// workers.
    pub async fn expire_deadlines(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut guard = self.inner.lock().await;
        let Inner { state, governor } = &mut *guard;

        let mut expired = Vec::new();
        for worker in state.workers.values_mut() {
            let Some(task_id) = worker.current_task.clone() else {
                continue;
            };
            let Some(task) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            if !task.deadline_elapsed(now) {
                continue;
            }

            let message = format!("deadline of {}ms elapsed", task.deadline_ms);
            let status = task.fail(FailureReason::Timeout, message, &self.retry_policy, now);
            warn!(
                task_id = %task_id,
                worker_id = %worker.id,
                attempt = task.attempt_count,
                status = %status,
                "Task timed out"
            );
            self.emit_failure(task);

            worker.vacate();
            worker.pending_cancel = Some(task_id.clone());
            governor.release();
            self.emit_worker(worker);
            expired.push(task_id);
        }
        expired
    }

    /// Move FAILED tasks whose retry delay elapsed back to PENDING.
    pub async fn release_due_retries(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut guard = self.inner.lock().await;
        let Inner { state, .. } = &mut *guard;

        let mut due: Vec<&mut Task> = state
            .tasks
            .values_mut()
            .filter(|t| t.status == TaskStatus::Failed && t.retry_at.is_some_and(|at| at <= now))
            .collect();
        due.sort_by(|a, b| a.retry_at.cmp(&b.retry_at).then(a.id.cmp(&b.id)));

        let mut released = Vec::with_capacity(due.len());
        for task in due {
            if task.retry(now).is_ok() {
                debug!(task_id = %task.id, attempt = task.attempt_count, "Retrying task");
                self.emit_task(task);
                state.pending.push_back(task.id.clone());
                released.push(task.id.clone());
            }
        }
        released
    }

    /// Remove workers that stayed OFFLINE longer than `grace`.
    pub async fn reap_offline_workers(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Vec<WorkerId> {
        let grace = chrono_duration(grace);
        let mut inner = self.inner.lock().await;

        let reaped: Vec<WorkerId> = inner
            .state
            .workers
            .values()
            .filter(|w| {
                w.status == WorkerStatus::Offline
                    && w.offline_since.is_some_and(|since| now - since > grace)
            })
            .map(|w| w.id.clone())
            .collect();

        for worker_id in &reaped {
            inner.state.workers.remove(worker_id);
            info!(worker_id = %worker_id, "Reaped offline worker");
            self.emit(ColonyEvent::WorkerRemoved {
                worker_id: worker_id.clone(),
            });
        }
        reaped
    }

    /// Drop terminal tasks last updated more than `retention` ago.
    pub async fn purge_terminal_tasks(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let retention = chrono_duration(retention);
        let mut inner = self.inner.lock().await;
        let before = inner.state.tasks.len();
        inner
            .state
            .tasks
            .retain(|_, t| !(t.is_terminal() && now - t.updated_at > retention));
        before - inner.state.tasks.len()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        self.inner.lock().await.state.tasks.get(task_id).cloned()
    }

    pub async fn get_worker(&self, worker_id: &WorkerId) -> Option<WorkerRecord> {
        self.inner.lock().await.state.workers.get(worker_id).cloned()
    }

    /// All workers, sorted by id.
    pub async fn roster(&self) -> Vec<WorkerRecord> {
        let inner = self.inner.lock().await;
        let mut workers: Vec<WorkerRecord> = inner.state.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Point-in-time copy of the whole state.
    pub async fn snapshot(&self) -> ColonyState {
        self.inner.lock().await.state.clone()
    }

    pub async fn stats(&self) -> ColonyStats {
        Self::stats_of(&*self.inner.lock().await)
    }

    /// Counters and state taken under one lock, so they describe the same
    /// moment.
    pub async fn snapshot_with_stats(&self) -> (ColonyStats, ColonyState) {
        let inner = self.inner.lock().await;
        (Self::stats_of(&inner), inner.state.clone())
    }

    fn stats_of(inner: &Inner) -> ColonyStats {
        let mut tasks: BTreeMap<&'static str, u64> =
            TaskStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        for task in inner.state.tasks.values() {
            *tasks.entry(task.status.as_str()).or_default() += 1;
        }

        let mut workers: BTreeMap<&'static str, u64> =
            WorkerStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        for worker in inner.state.workers.values() {
            *workers.entry(worker.status.as_str()).or_default() += 1;
        }

        let target = inner.governor.target();
        ColonyStats {
            tasks,
            workers,
            pending: inner.state.pending.len() as u64,
            capacity_reserved: inner.governor.reserved(),
            max_concurrent: target.max_concurrent,
            total_population: target.total_population,
            admissions_total: inner.governor.admitted_total(),
            admissions_rejected_total: inner.governor.rejected_total(),
        }
    }

    /// Output of a finished task, if it succeeded.
    pub async fn task_output(&self, task_id: &TaskId) -> Option<Value> {
        self.inner
            .lock()
            .await
            .state
            .tasks
            .get(task_id)
            .and_then(|t| t.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swarmrun_core::PopulationTarget;

    fn config(total: u64, max: u64) -> Config {
        Config {
            population: PopulationTarget {
                total_population: total,
                max_concurrent: max,
            },
            retry_policy: RetryPolicy::immediate(),
            ..Default::default()
        }
    }

    fn colony(max: u64) -> Colony {
        Colony::new(&config(1_000, max)).unwrap()
    }

    fn spec(n: u64) -> TaskSpec {
        TaskSpec::new(json!({ "n": n }), 1_000)
    }

    async fn worker(colony: &Colony, id: &str, now: DateTime<Utc>) -> WorkerId {
        let id = WorkerId::new(id);
        colony.register_worker(id.clone(), now).await.unwrap();
        colony.heartbeat(&id, None, now).await.unwrap();
        id
    }

    fn failed(message: &str) -> TaskOutcome {
        TaskOutcome::execution_error(message)
    }

    #[test]
    fn test_invalid_population_rejected() {
        let err = Colony::new(&config(500, 1_000)).err().unwrap();
        assert!(matches!(err, CoreError::InvalidPopulation { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_live_worker_rejected() {
        let colony = colony(10);
        let now = Utc::now();
        let id = worker(&colony, "w1", now).await;

        assert_eq!(
            colony.register_worker(id.clone(), now).await.unwrap_err(),
            ColonyError::DuplicateWorker(id.clone())
        );
        assert_eq!(colony.roster().await.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_worker_may_register_again() {
        let colony = colony(10);
        let now = Utc::now();
        let id = worker(&colony, "w1", now).await;

        let later = now + chrono::Duration::seconds(60);
        colony
            .mark_silent_workers_offline(later, Duration::from_secs(15))
            .await;
        let record = colony.register_worker(id, later).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Registered);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_worker() {
        let colony = colony(10);
        let id = WorkerId::new("ghost");
        assert_eq!(
            colony.heartbeat(&id, None, Utc::now()).await.unwrap_err(),
            ColonyError::UnknownWorker(id)
        );
    }

    #[tokio::test]
    async fn test_invalid_task_leaves_state_untouched() {
        let colony = colony(10);
        let err = colony
            .enqueue_task(TaskSpec::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ColonyError::InvalidTask(_)));
        assert_eq!(colony.snapshot().await, ColonyState::new());
    }

    #[tokio::test]
    async fn test_claim_is_fifo_and_marks_busy() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let first = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.enqueue_task(spec(2), now).await.unwrap();

        let task = colony.claim_next_task(&w, now).await.unwrap().unwrap();
        assert_eq!(task.id, first);
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.attempt_count, 1);

        let record = colony.get_worker(&w).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Busy);
        assert_eq!(record.current_task, Some(first));
        assert_eq!(colony.stats().await.capacity_reserved, 1);
    }

    #[tokio::test]
    async fn test_claim_on_empty_index() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        assert!(colony.claim_next_task(&w, now).await.unwrap().is_none());
        assert_eq!(colony.stats().await.capacity_reserved, 0);
    }

    #[tokio::test]
    async fn test_capacity_ceiling_blocks_claims() {
        let colony = colony(1);
        let now = Utc::now();
        let a = worker(&colony, "a", now).await;
        let b = worker(&colony, "b", now).await;
        colony.enqueue_task(spec(1), now).await.unwrap();
        colony.enqueue_task(spec(2), now).await.unwrap();

        let held = colony.claim_next_task(&a, now).await.unwrap().unwrap();
        let err = colony.claim_next_task(&b, now).await.unwrap_err();
        assert_eq!(
            err,
            ColonyError::CapacityExceeded {
                active: 1,
                max_concurrent: 1
            }
        );
        assert_eq!(colony.stats().await.pending, 1);
        assert_eq!(
            colony.get_worker(&b).await.unwrap().status,
            WorkerStatus::Idle
        );

        colony
            .report_result(&a, &held.id, TaskOutcome::Succeeded { output: json!(1) }, now)
            .await
            .unwrap();
        assert!(colony.claim_next_task(&b, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_busy_worker_cannot_claim_twice() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        colony.enqueue_task(spec(1), now).await.unwrap();
        colony.enqueue_task(spec(2), now).await.unwrap();

        colony.claim_next_task(&w, now).await.unwrap();
        assert!(matches!(
            colony.claim_next_task(&w, now).await,
            Err(ColonyError::StaleClaim { .. })
        ));
        assert_eq!(colony.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn test_success_frees_worker_and_capacity() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();
        colony.start_task(&w, &id, now).await.unwrap();

        let status = colony
            .report_result(&w, &id, TaskOutcome::Succeeded { output: json!("ok") }, now)
            .await
            .unwrap();

        assert_eq!(status, TaskStatus::Succeeded);
        assert_eq!(colony.task_output(&id).await, Some(json!("ok")));
        let record = colony.get_worker(&w).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Idle);
        assert_eq!(record.completed_tasks, 1);
        assert_eq!(colony.stats().await.capacity_reserved, 0);
    }

    #[tokio::test]
    async fn test_duplicate_result_is_stale() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();

        let outcome = TaskOutcome::Succeeded { output: json!(1) };
        colony
            .report_result(&w, &id, outcome.clone(), now)
            .await
            .unwrap();
        let before = colony.snapshot().await;

        assert!(matches!(
            colony.report_result(&w, &id, outcome, now).await,
            Err(ColonyError::StaleClaim { .. })
        ));
        assert_eq!(colony.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_result_from_other_worker_is_stale() {
        let colony = colony(10);
        let now = Utc::now();
        let a = worker(&colony, "a", now).await;
        let b = worker(&colony, "b", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&a, now).await.unwrap();

        let err = colony
            .report_result(&b, &id, TaskOutcome::Succeeded { output: json!(1) }, now)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ColonyError::StaleClaim {
                worker_id: b,
                task_id: id.clone()
            }
        );
        assert_eq!(
            colony.get_task(&id).await.unwrap().status,
            TaskStatus::Assigned
        );
    }

    #[tokio::test]
    async fn test_retry_bound_then_dead() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony
            .enqueue_task(spec(1).with_max_retries(2), now)
            .await
            .unwrap();

        for attempt in 1..=3 {
            let task = colony.claim_next_task(&w, now).await.unwrap().unwrap();
            assert_eq!(task.attempt_count, attempt);
            let status = colony
                .report_result(&w, &id, failed("boom"), now)
                .await
                .unwrap();
            if attempt < 3 {
                assert_eq!(status, TaskStatus::Failed);
                assert_eq!(colony.release_due_retries(now).await, vec![id.clone()]);
            } else {
                assert_eq!(status, TaskStatus::Dead);
            }
        }

        assert!(colony.release_due_retries(now).await.is_empty());
        assert!(colony.claim_next_task(&w, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff() {
        let mut cfg = config(1_000, 10);
        cfg.retry_policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        let colony = Colony::new(&cfg).unwrap();
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();
        colony
            .report_result(&w, &id, failed("boom"), now)
            .await
            .unwrap();

        assert!(colony.release_due_retries(now).await.is_empty());
        let later = now + chrono::Duration::milliseconds(1_001);
        assert_eq!(colony.release_due_retries(later).await, vec![id]);
    }

    #[tokio::test]
    async fn test_silent_worker_task_requeued() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();

        let later = now + chrono::Duration::seconds(16);
        let offlined = colony
            .mark_silent_workers_offline(later, Duration::from_secs(15))
            .await;
        assert_eq!(offlined, vec![w.clone()]);

        let task = colony.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 0);
        let stats = colony.stats().await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.capacity_reserved, 0);

        // Reaping releases nothing further.
        let reaped = colony
            .reap_offline_workers(later + chrono::Duration::seconds(61), Duration::from_secs(60))
            .await;
        assert_eq!(reaped, vec![w]);
        assert_eq!(colony.stats().await.capacity_reserved, 0);
    }

    #[tokio::test]
    async fn test_returning_worker_told_to_drop_requeued_task() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();

        let later = now + chrono::Duration::seconds(16);
        colony
            .mark_silent_workers_offline(later, Duration::from_secs(15))
            .await;

        let cancel = colony.heartbeat(&w, Some(&id), later).await.unwrap();
        assert_eq!(cancel, Some(id));
        assert_eq!(
            colony.get_worker(&w).await.unwrap().status,
            WorkerStatus::Idle
        );
    }

    #[tokio::test]
    async fn test_deadline_expiry_fails_and_revokes() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony
            .enqueue_task(spec(1).with_max_retries(0), now)
            .await
            .unwrap();
        colony.claim_next_task(&w, now).await.unwrap();
        colony.start_task(&w, &id, now).await.unwrap();

        assert!(colony.expire_deadlines(now).await.is_empty());
        let later = now + chrono::Duration::milliseconds(1_001);
        assert_eq!(colony.expire_deadlines(later).await, vec![id.clone()]);

        let task = colony.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Dead);
        assert_eq!(task.last_failure, Some(FailureReason::Timeout));
        assert_eq!(colony.stats().await.capacity_reserved, 0);
        assert_eq!(colony.heartbeat(&w, Some(&id), later).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_expired_attempt_revocation_spares_the_retry() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony
            .enqueue_task(spec(1).with_max_retries(3), now)
            .await
            .unwrap();
        colony.claim_next_task(&w, now).await.unwrap();
        colony.start_task(&w, &id, now).await.unwrap();

        let later = now + chrono::Duration::milliseconds(1_001);
        assert_eq!(colony.expire_deadlines(later).await, vec![id.clone()]);
        assert_eq!(colony.release_due_retries(later).await, vec![id.clone()]);

        // The same worker picks the retry up before its next heartbeat.
        let task = colony.claim_next_task(&w, later).await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.attempt_count, 2);
        assert_eq!(colony.heartbeat(&w, Some(&id), later).await.unwrap(), None);

        // A worker-side cancel nobody asked for is an ordinary failure.
        let status = colony
            .report_result(
                &w,
                &id,
                TaskOutcome::Failed {
                    reason: FailureReason::Cancelled,
                    message: "cancelled".to_string(),
                },
                later,
            )
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(colony.release_due_retries(later).await, vec![id]);
    }

    #[tokio::test]
    async fn test_cancel_requested_before_silence_settles_cancelled() {
        let colony = colony(10);
        let now = Utc::now();
        let a = worker(&colony, "a", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&a, now).await.unwrap();
        assert_eq!(
            colony.cancel_task(&id, now).await.unwrap(),
            TaskStatus::Assigned
        );

        let later = now + chrono::Duration::seconds(20);
        let b = worker(&colony, "b", later).await;
        colony
            .mark_silent_workers_offline(later, Duration::from_secs(15))
            .await;

        let task = colony.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.assigned_worker.is_none());
        let stats = colony.stats().await;
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.capacity_reserved, 0);
        assert!(colony.claim_next_task(&b, later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_requested_before_deregister_settles_cancelled() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();
        colony.cancel_task(&id, now).await.unwrap();

        assert_eq!(colony.deregister_worker(&w, now).await.unwrap(), None);
        assert_eq!(
            colony.get_task(&id).await.unwrap().status,
            TaskStatus::Cancelled
        );
        let stats = colony.stats().await;
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.capacity_reserved, 0);
    }

    #[tokio::test]
    async fn test_snapshot_with_stats_agree() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        for n in 0..3 {
            colony.enqueue_task(spec(n), now).await.unwrap();
        }
        colony.claim_next_task(&w, now).await.unwrap();

        let (stats, state) = colony.snapshot_with_stats().await;
        assert_eq!(stats.pending, state.pending.len() as u64);
        assert_eq!(stats.tasks["pending"], 2);
        assert_eq!(stats.tasks["assigned"], 1);
        assert_eq!(stats.workers["busy"], 1);
        assert_eq!(state.tasks.len(), 3);
        assert_eq!(stats.capacity_reserved, 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let colony = colony(10);
        let now = Utc::now();
        let id = colony.enqueue_task(spec(1), now).await.unwrap();

        assert_eq!(
            colony.cancel_task(&id, now).await.unwrap(),
            TaskStatus::Cancelled
        );
        assert_eq!(colony.stats().await.pending, 0);
        assert_eq!(
            colony.cancel_task(&id, now).await.unwrap_err(),
            ColonyError::AlreadyTerminal(id)
        );
    }

    #[tokio::test]
    async fn test_cancel_running_task_goes_through_worker() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();
        colony.start_task(&w, &id, now).await.unwrap();

        assert_eq!(
            colony.cancel_task(&id, now).await.unwrap(),
            TaskStatus::Running
        );
        assert_eq!(
            colony.heartbeat(&w, Some(&id), now).await.unwrap(),
            Some(id.clone())
        );

        let status = colony
            .report_result(
                &w,
                &id,
                TaskOutcome::Failed {
                    reason: FailureReason::Cancelled,
                    message: "cancelled".to_string(),
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Cancelled);
        assert!(colony.release_due_retries(now).await.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_requeues_held_task() {
        let colony = colony(10);
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.claim_next_task(&w, now).await.unwrap();

        assert_eq!(
            colony.deregister_worker(&w, now).await.unwrap(),
            Some(id.clone())
        );
        assert!(colony.get_worker(&w).await.is_none());
        assert_eq!(
            colony.get_task(&id).await.unwrap().status,
            TaskStatus::Pending
        );
        assert_eq!(colony.stats().await.capacity_reserved, 0);
        assert_eq!(
            colony.deregister_worker(&w, now).await.unwrap_err(),
            ColonyError::UnknownWorker(w)
        );
    }

    #[tokio::test]
    async fn test_purge_terminal_tasks() {
        let colony = colony(10);
        let now = Utc::now();
        let cancelled = colony.enqueue_task(spec(1), now).await.unwrap();
        colony.enqueue_task(spec(2), now).await.unwrap();
        colony.cancel_task(&cancelled, now).await.unwrap();

        let later = now + chrono::Duration::seconds(120);
        assert_eq!(
            colony
                .purge_terminal_tasks(later, Duration::from_secs(60))
                .await,
            1
        );
        assert!(colony.get_task(&cancelled).await.is_none());
        assert_eq!(colony.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn test_events_for_dead_task() {
        let colony = colony(10);
        let mut events = colony.subscribe();
        let now = Utc::now();
        let w = worker(&colony, "w1", now).await;
        let id = colony
            .enqueue_task(spec(1).with_max_retries(0), now)
            .await
            .unwrap();
        colony.claim_next_task(&w, now).await.unwrap();
        colony.start_task(&w, &id, now).await.unwrap();
        colony
            .report_result(&w, &id, failed("boom"), now)
            .await
            .unwrap();

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Some((_, status)) = event.task_status() {
                statuses.push(status);
            }
        }
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Pending,
                TaskStatus::Assigned,
                TaskStatus::Running,
                TaskStatus::Failed,
                TaskStatus::Dead,
            ]
        );
    }
}
