//! Task types and the per-task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retry::millis;
use crate::{CoreError, RetryPolicy, TaskId, TaskStatus, WorkerId};

/// Request to create a task. Fields are optional so that a missing payload or
/// deadline can be reported instead of silently defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Opaque payload handed to the task executor.
    #[serde(default)]
    pub payload: Option<Value>,

    /// Per-attempt deadline in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    /// Maximum number of retries after the first attempt.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    /// Create a spec with a payload and per-attempt deadline.
    pub fn new(payload: Value, deadline_ms: u64) -> Self {
        Self {
            payload: Some(payload),
            deadline_ms: Some(deadline_ms),
            max_retries: None,
        }
    }

    /// Builder method to set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The task executor returned an error.
    Execution,
    /// The per-attempt deadline elapsed.
    Timeout,
    /// The task was cancelled. Not retried.
    Cancelled,
}

/// Outcome of one attempt, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The executor produced a result.
    Succeeded {
        #[serde(default)]
        output: Value,
    },
    /// The attempt failed.
    Failed { reason: FailureReason, message: String },
}

impl TaskOutcome {
    /// Convenience constructor for an execution failure.
    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::Failed {
            reason: FailureReason::Execution,
            message: message.into(),
        }
    }

    /// Returns true for a successful outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// A Task is one unit of work tracked by the colony.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Opaque payload handed to the executor.
    pub payload: Value,

    /// Current task status.
    pub status: TaskStatus,

    /// Worker currently holding the task.
    pub assigned_worker: Option<WorkerId>,

    /// Number of attempts started so far.
    pub attempt_count: u32,

    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// Per-attempt deadline in milliseconds.
    pub deadline_ms: u64,

    /// When the current attempt times out.
    pub attempt_deadline: Option<DateTime<Utc>>,

    /// When a FAILED task becomes eligible again.
    pub retry_at: Option<DateTime<Utc>>,

    /// Set when an operator asked for cancellation of an in-flight task.
    pub cancel_requested: bool,

    /// Executor output of the successful attempt.
    pub output: Option<Value>,

    /// Reason of the most recent failure.
    pub last_failure: Option<FailureReason>,

    /// Message of the most recent failure.
    pub last_error: Option<String>,

    /// Last time the status changed.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Validate a spec and build a PENDING task from it.
    pub fn from_spec(
        spec: TaskSpec,
        default_max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let payload = match spec.payload {
            Some(Value::Null) | None => {
                return Err(CoreError::InvalidInput("payload is required".to_string()))
            }
            Some(payload) => payload,
        };
        let deadline_ms = match spec.deadline_ms {
            Some(ms) if ms > 0 => ms,
            _ => {
                return Err(CoreError::InvalidInput(
                    "deadline_ms is required and must be positive".to_string(),
                ))
            }
        };

        Ok(Self {
            id: TaskId::generate(),
            payload,
            status: TaskStatus::Pending,
            assigned_worker: None,
            attempt_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            created_at: now,
            deadline_ms,
            attempt_deadline: None,
            retry_at: None,
            cancel_requested: false,
            output: None,
            last_failure: None,
            last_error: None,
            updated_at: now,
        })
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True if another attempt may be started after a failure.
    pub fn can_retry(&self) -> bool {
        self.attempt_count <= self.max_retries
    }

    /// True if the current attempt's deadline has elapsed.
    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status.is_in_flight() && self.attempt_deadline.is_some_and(|d| now > d)
    }

    /// True if `worker_id` currently holds this task.
    pub fn is_held_by(&self, worker_id: &WorkerId) -> bool {
        self.status.is_in_flight() && self.assigned_worker.as_ref() == Some(worker_id)
    }

    /// PENDING -> ASSIGNED. Starts a new attempt.
    pub fn assign(&mut self, worker_id: WorkerId, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.expect_status(TaskStatus::Pending, TaskStatus::Assigned)?;
        self.status = TaskStatus::Assigned;
        self.assigned_worker = Some(worker_id);
        self.attempt_count += 1;
        self.attempt_deadline = Some(now + millis(self.deadline_ms));
        self.retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// ASSIGNED -> RUNNING.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.expect_status(TaskStatus::Assigned, TaskStatus::Running)?;
        self.status = TaskStatus::Running;
        self.updated_at = now;
        Ok(())
    }

    /// In-flight -> SUCCEEDED.
    pub fn succeed(&mut self, output: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Succeeded;
        self.assigned_worker = None;
        self.attempt_deadline = None;
        self.output = Some(output);
        self.updated_at = now;
    }

    /// In-flight -> FAILED, then decide what happens next.
    ///
    /// Returns the status the task settles in: FAILED (with `retry_at` set),
    /// DEAD once the retry budget is spent, or CANCELLED when an operator
    /// asked for the cancellation. A `Cancelled` reason nobody requested is an
    /// ordinary failure.
    pub fn fail(
        &mut self,
        reason: FailureReason,
        message: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> TaskStatus {
        self.assigned_worker = None;
        self.attempt_deadline = None;
        self.last_failure = Some(reason);
        self.last_error = Some(message.into());
        self.updated_at = now;

        self.status = if self.cancel_requested {
            TaskStatus::Cancelled
        } else if self.can_retry() {
            self.retry_at = Some(now + policy.chrono_delay_after(self.attempt_count));
            TaskStatus::Failed
        } else {
            TaskStatus::Dead
        };
        self.status
    }

    /// FAILED -> PENDING once the retry delay has elapsed.
    pub fn retry(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.expect_status(TaskStatus::Failed, TaskStatus::Pending)?;
        self.status = TaskStatus::Pending;
        self.retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// In-flight -> PENDING after its worker vanished, or CANCELLED if a
    /// cancellation was already requested.
    ///
    /// The interrupted attempt produced no outcome, so it is not charged
    /// against the retry budget. Returns the resulting status.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> TaskStatus {
        self.attempt_count = self.attempt_count.saturating_sub(1);
        if self.cancel_requested {
            self.cancel(now);
            return self.status;
        }
        self.status = TaskStatus::Pending;
        self.assigned_worker = None;
        self.attempt_deadline = None;
        self.updated_at = now;
        self.status
    }

    /// PENDING -> CANCELLED.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.cancel_requested = true;
        self.assigned_worker = None;
        self.attempt_deadline = None;
        self.retry_at = None;
        self.last_failure = Some(FailureReason::Cancelled);
        self.updated_at = now;
    }

    fn expect_status(&self, from: TaskStatus, to: TaskStatus) -> Result<(), CoreError> {
        if self.status != from {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}
