//! The worker loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use swarmrun_core::{FailureReason, TaskId, TaskOutcome, WorkerId};
use swarmrun_proto::{
    AckStatus, Assignment, Body, ClaimGrant, ClaimRequest, Deregister, Heartbeat, Message,
    QueenLink, RegisterWorker, TaskResult, TaskStarted,
};

use crate::config::{BackpressurePolicy, Config};
use crate::error::WorkerError;
use crate::executor::TaskExecutor;

/// Why the worker loop stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitReason {
    #[default]
    Shutdown,
    CapacityRejected,
}

/// Tally of what a worker did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub exit: ExitReason,
}

/// The task currently executing, shared with the heartbeat task.
struct Running {
    task_id: TaskId,
    cancel: CancellationToken,
}

type Current = Arc<Mutex<Option<Running>>>;

fn kind_of(body: &Body) -> String {
    body.kind().to_string()
}

/// A worker bound to one queen link and one executor.
pub struct Worker<L, E> {
    config: Config,
    link: Arc<L>,
    executor: Arc<E>,
    current: Current,
}

impl<L, E> Worker<L, E>
where
    L: QueenLink + 'static,
    E: TaskExecutor + 'static,
{
    pub fn new(config: Config, link: Arc<L>, executor: Arc<E>) -> Self {
        Self {
            config,
            link,
            executor,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.config.worker_id
    }

    async fn exchange(&self, message: Message) -> Result<Body, WorkerError> {
        let correlation_id = message.correlation_id().clone();
        let reply = self.link.exchange(message).await?;
        if reply.correlation_id() != &correlation_id {
            return Err(WorkerError::UnexpectedReply {
                expected: format!("reply to {}", correlation_id),
                got: format!("reply to {}", reply.correlation_id()),
            });
        }
        Ok(reply.into_body())
    }

    async fn send(&self, body: Body) -> Result<Body, WorkerError> {
        self.exchange(Message::request(self.id().as_str(), body))
            .await
    }

    /// Announce this worker to the queen.
    pub async fn register(&self) -> Result<(), WorkerError> {
        let body = Body::RegisterWorker(RegisterWorker {
            hostname: self.config.hostname.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });
        match self.send(body).await? {
            Body::Ack(ack) if ack.status == AckStatus::Accepted => {
                info!(worker_id = %self.id(), "Registered with queen");
                Ok(())
            }
            Body::Ack(ack) => Err(WorkerError::Rejected {
                status: ack.status,
                detail: ack.detail.unwrap_or_default(),
            }),
            other => Err(WorkerError::UnexpectedReply {
                expected: "ACK".to_string(),
                got: kind_of(&other),
            }),
        }
    }

    async fn deregister(&self) -> Result<(), WorkerError> {
        self.send(Body::Deregister(Deregister {})).await?;
        info!(worker_id = %self.id(), "Deregistered");
        Ok(())
    }

    /// Register, then claim and execute tasks until `shutdown` fires or the
    /// backpressure policy says to stop. Deregisters on the way out.
    pub async fn run(self, shutdown: CancellationToken) -> Result<WorkerSummary, WorkerError> {
        self.register().await?;

        let heartbeat_stop = shutdown.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.link.clone(),
            self.id().clone(),
            self.config.heartbeat_interval,
            self.current.clone(),
            heartbeat_stop.clone(),
        ));

        let summary = self.claim_loop(&shutdown).await;

        heartbeat_stop.cancel();
        if let Err(e) = heartbeat.await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }
        if let Err(e) = self.deregister().await {
            warn!(worker_id = %self.id(), error = %e, "Deregistration failed");
        }

        info!(
            worker_id = %self.id(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            exit = ?summary.exit,
            "Worker stopped"
        );
        Ok(summary)
    }

    async fn claim_loop(&self, shutdown: &CancellationToken) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        let idle_poll = self.config.idle_poll;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let wait = match self.send(Body::ClaimRequest(ClaimRequest {})).await {
                Ok(Body::ClaimGrant(ClaimGrant {
                    task: Some(assignment),
                })) => {
                    match self.execute(assignment, shutdown).await {
                        Some(TaskOutcome::Succeeded { .. }) => summary.succeeded += 1,
                        Some(TaskOutcome::Failed {
                            reason: FailureReason::Cancelled,
                            ..
                        }) => summary.cancelled += 1,
                        Some(TaskOutcome::Failed { .. }) => summary.failed += 1,
                        None => {}
                    }
                    None
                }
                Ok(Body::ClaimGrant(ClaimGrant { task: None })) => Some(idle_poll),
                Ok(Body::Ack(ack)) => match ack.status {
                    AckStatus::RejectedCapacity => match self.config.backpressure {
                        BackpressurePolicy::Retry { delay } => {
                            debug!(worker_id = %self.id(), "Claim rejected for capacity, retrying");
                            Some(delay)
                        }
                        BackpressurePolicy::Exit => {
                            info!(worker_id = %self.id(), "Claim rejected for capacity, exiting");
                            summary.exit = ExitReason::CapacityRejected;
                            break;
                        }
                    },
                    AckStatus::NotFound => {
                        warn!(worker_id = %self.id(), "Queen no longer knows this worker, registering again");
                        match self.register().await {
                            Ok(()) => None,
                            Err(e) => {
                                warn!(error = %e, "Re-registration failed");
                                Some(idle_poll)
                            }
                        }
                    }
                    status => {
                        warn!(
                            worker_id = %self.id(),
                            status = status.as_str(),
                            detail = ?ack.detail,
                            "Claim refused"
                        );
                        Some(idle_poll)
                    }
                },
                Ok(other) => {
                    warn!(kind = %other.kind(), "Unexpected reply to claim");
                    Some(idle_poll)
                }
                Err(e) => {
                    warn!(worker_id = %self.id(), error = %e, "Claim failed");
                    Some(idle_poll)
                }
            };

            if let Some(delay) = wait {
                if pause(shutdown, delay).await {
                    break;
                }
            }
        }
        summary
    }

    /// Run one granted task and report it. `None` if the task was abandoned
    /// without a result.
    async fn execute(
        &self,
        assignment: Assignment,
        shutdown: &CancellationToken,
    ) -> Option<TaskOutcome> {
        let cancel = CancellationToken::new();
        *self.current.lock().await = Some(Running {
            task_id: assignment.task_id.clone(),
            cancel: cancel.clone(),
        });

        let outcome = self.run_assignment(&assignment, &cancel, shutdown).await;
        *self.current.lock().await = None;

        let outcome = outcome?;
        self.report(&assignment.task_id, outcome.clone()).await;
        Some(outcome)
    }

    async fn run_assignment(
        &self,
        assignment: &Assignment,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Option<TaskOutcome> {
        let task_id = &assignment.task_id;

        match self
            .send(Body::TaskStarted(TaskStarted {
                task_id: task_id.clone(),
            }))
            .await
        {
            Ok(Body::Ack(ack)) if ack.status == AckStatus::Accepted => {}
            Ok(Body::Ack(ack)) => {
                warn!(task_id = %task_id, status = ack.status.as_str(), "Task withdrawn before start");
                return None;
            }
            Ok(other) => {
                warn!(task_id = %task_id, kind = %other.kind(), "Unexpected reply to TASK_STARTED");
            }
            Err(e) => {
                // The result is still accepted while the task is held.
                warn!(task_id = %task_id, error = %e, "Could not report task start");
            }
        }

        debug!(task_id = %task_id, attempt = assignment.attempt, "Executing task");
        let deadline = Duration::from_millis(assignment.deadline_ms);

        let outcome = tokio::select! {
            result = self.executor.execute(&assignment.payload) => match result {
                Ok(output) => TaskOutcome::Succeeded { output },
                Err(e) => TaskOutcome::Failed {
                    reason: FailureReason::Execution,
                    message: e.to_string(),
                },
            },
            _ = cancel.cancelled() => TaskOutcome::Failed {
                reason: FailureReason::Cancelled,
                message: "cancelled by queen".to_string(),
            },
            _ = tokio::time::sleep(deadline) => TaskOutcome::Failed {
                reason: FailureReason::Timeout,
                message: format!("deadline of {}ms elapsed", assignment.deadline_ms),
            },
            _ = shutdown.cancelled() => {
                info!(task_id = %task_id, "Abandoning task on shutdown");
                return None;
            }
        };
        Some(outcome)
    }

    /// Deliver a result, redelivering the same message on transport errors.
    async fn report(&self, task_id: &TaskId, outcome: TaskOutcome) {
        let message = Message::request(
            self.id().as_str(),
            Body::TaskResult(TaskResult {
                task_id: task_id.clone(),
                outcome,
            }),
        );

        for attempt in 1..=self.config.result_attempts.max(1) {
            match self.exchange(message.clone()).await {
                Ok(Body::Ack(ack)) => {
                    match ack.status {
                        AckStatus::Accepted => debug!(task_id = %task_id, "Result accepted"),
                        status => debug!(
                            task_id = %task_id,
                            status = status.as_str(),
                            "Result ignored by queen"
                        ),
                    }
                    return;
                }
                Ok(other) => {
                    warn!(task_id = %task_id, kind = %other.kind(), "Unexpected reply to TASK_RESULT");
                    return;
                }
                Err(e) => {
                    warn!(task_id = %task_id, attempt, error = %e, "Result delivery failed");
                    tokio::time::sleep(self.config.idle_poll).await;
                }
            }
        }
        warn!(task_id = %task_id, "Giving up on result delivery");
    }
}

/// Sleep for `delay`. Returns true if `shutdown` fired first.
async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Heartbeat on a fixed period, independent of task execution.
async fn heartbeat_loop<L: QueenLink>(
    link: Arc<L>,
    worker_id: WorkerId,
    interval: Duration,
    current: Current,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current_task = current.lock().await.as_ref().map(|r| r.task_id.clone());
        let message = Message::request(worker_id.as_str(), Body::Heartbeat(Heartbeat { current_task }));

        match link.exchange(message).await.map(Message::into_body) {
            Ok(Body::Cancel(cancel)) => {
                if let Some(running) = current.lock().await.as_ref() {
                    if running.task_id == cancel.task_id {
                        info!(task_id = %cancel.task_id, reason = %cancel.reason, "Cancelling task");
                        running.cancel.cancel();
                    }
                }
            }
            Ok(Body::Ack(ack)) if ack.status == AckStatus::Accepted => {}
            Ok(Body::Ack(ack)) => {
                warn!(worker_id = %worker_id, status = ack.status.as_str(), "Heartbeat refused")
            }
            Ok(other) => warn!(kind = %other.kind(), "Unexpected reply to heartbeat"),
            Err(e) => warn!(worker_id = %worker_id, error = %e, "Heartbeat failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use swarmrun_proto::{Ack, LinkError};

    use crate::executor::ExecutionError;

    /// Accepts everything and refuses every claim for capacity.
    #[derive(Default)]
    struct FullQueen {
        claims: AtomicUsize,
        deregistered: AtomicUsize,
    }

    #[async_trait]
    impl QueenLink for FullQueen {
        async fn exchange(&self, message: Message) -> Result<Message, LinkError> {
            let body = match message.body() {
                Body::ClaimRequest(_) => {
                    self.claims.fetch_add(1, Ordering::SeqCst);
                    Body::Ack(Ack::with_detail(AckStatus::RejectedCapacity, "full"))
                }
                Body::Deregister(_) => {
                    self.deregistered.fetch_add(1, Ordering::SeqCst);
                    Body::Ack(Ack::accepted())
                }
                _ => Body::Ack(Ack::accepted()),
            };
            Ok(message.reply("queen", body))
        }
    }

    struct Echo;

    #[async_trait]
    impl TaskExecutor for Echo {
        async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
            Ok(payload.clone())
        }
    }

    fn config(backpressure: BackpressurePolicy) -> Config {
        Config {
            worker_id: WorkerId::new("w-test"),
            heartbeat_interval: Duration::from_millis(50),
            idle_poll: Duration::from_millis(10),
            backpressure,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_exit_policy_stops_on_capacity_rejection() {
        let queen = Arc::new(FullQueen::default());
        let worker = Worker::new(
            config(BackpressurePolicy::Exit),
            queen.clone(),
            Arc::new(Echo),
        );

        let summary = worker.run(CancellationToken::new()).await.unwrap();
        assert_eq!(summary.exit, ExitReason::CapacityRejected);
        assert_eq!(queen.claims.load(Ordering::SeqCst), 1);
        assert_eq!(queen.deregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_policy_keeps_claiming_until_shutdown() {
        let queen = Arc::new(FullQueen::default());
        let worker = Worker::new(
            config(BackpressurePolicy::Retry {
                delay: Duration::from_millis(5),
            }),
            queen.clone(),
            Arc::new(Echo),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.exit, ExitReason::Shutdown);
        assert!(queen.claims.load(Ordering::SeqCst) > 1);
        assert_eq!(queen.deregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registration_rejection_is_an_error() {
        struct Refusing;

        #[async_trait]
        impl QueenLink for Refusing {
            async fn exchange(&self, message: Message) -> Result<Message, LinkError> {
                let body = Body::Ack(Ack::with_detail(AckStatus::RejectedInvalid, "duplicate"));
                Ok(message.reply("queen", body))
            }
        }

        let worker = Worker::new(
            config(BackpressurePolicy::Exit),
            Arc::new(Refusing),
            Arc::new(Echo),
        );
        match worker.run(CancellationToken::new()).await {
            Err(WorkerError::Rejected { status, detail }) => {
                assert_eq!(status, AckStatus::RejectedInvalid);
                assert_eq!(detail, "duplicate");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mismatched_correlation_id_rejected() {
        struct Confused;

        #[async_trait]
        impl QueenLink for Confused {
            async fn exchange(&self, _message: Message) -> Result<Message, LinkError> {
                Ok(Message::request("queen", Body::Ack(Ack::accepted())))
            }
        }

        let worker = Worker::new(
            config(BackpressurePolicy::Exit),
            Arc::new(Confused),
            Arc::new(Echo),
        );
        assert!(matches!(
            worker.register().await,
            Err(WorkerError::UnexpectedReply { .. })
        ));
    }
}
