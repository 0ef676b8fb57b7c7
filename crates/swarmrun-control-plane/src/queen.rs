//! The queen: protocol dispatch and the reconciliation loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use swarmrun_core::{CorrelationId, Task, WorkerId};
use swarmrun_proto::{
    Ack, AckStatus, Assignment, Body, Cancel, ClaimGrant, LinkError, Message, QueenLink,
};

use crate::colony::Colony;
use crate::config::Config;
use crate::error::ColonyError;
use crate::persistence::SnapshotStore;

/// Sender id the queen puts on its replies.
pub const QUEEN_SENDER: &str = "queen";

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub offlined: usize,
    pub expired: usize,
    pub retried: usize,
    pub reaped: usize,
    pub purged: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Remembers the reply given to recent TASK_RESULT deliveries.
struct ResultDedup {
    replies: HashMap<CorrelationId, Ack>,
    order: VecDeque<CorrelationId>,
    capacity: usize,
}

impl ResultDedup {
    fn new(capacity: usize) -> Self {
        Self {
            replies: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, id: &CorrelationId) -> Option<Ack> {
        self.replies.get(id).cloned()
    }

    fn remember(&mut self, id: CorrelationId, ack: Ack) {
        if self.capacity == 0 || self.replies.contains_key(&id) {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.replies.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.replies.insert(id, ack);
    }
}

fn ack(result: Result<(), ColonyError>) -> Body {
    match result {
        Ok(()) => Body::Ack(Ack::accepted()),
        Err(e) => reject(e),
    }
}

fn reject(e: ColonyError) -> Body {
    Body::Ack(Ack::with_detail(e.ack_status(), e.to_string()))
}

fn assignment(task: Task) -> Assignment {
    Assignment {
        task_id: task.id,
        payload: task.payload,
        attempt: task.attempt_count,
        deadline_ms: task.deadline_ms,
    }
}

/// Coordinates workers through the colony.
pub struct Queen {
    colony: Arc<Colony>,
    config: Config,
    snapshots: Option<SnapshotStore>,
    dedup: Mutex<ResultDedup>,
}

impl Queen {
    pub fn new(colony: Arc<Colony>, config: Config) -> Self {
        let snapshots = config.snapshot_path.clone().map(SnapshotStore::new);
        let dedup = Mutex::new(ResultDedup::new(config.dedup_window));
        Self {
            colony,
            config,
            snapshots,
            dedup,
        }
    }

    pub fn colony(&self) -> &Arc<Colony> {
        &self.colony
    }

    /// Answer one protocol message.
    pub async fn handle(&self, message: Message) -> Message {
        self.handle_at(message, Utc::now()).await
    }

    /// Answer one protocol message at a given instant.
    pub async fn handle_at(&self, message: Message, now: DateTime<Utc>) -> Message {
        let worker_id = WorkerId::new(message.sender());
        let colony = &self.colony;

        let body = match message.body() {
            Body::RegisterWorker(register) => {
                let result = colony.register_worker(worker_id.clone(), now).await;
                if result.is_ok() {
                    info!(
                        worker_id = %worker_id,
                        hostname = %register.hostname,
                        version = %register.version,
                        "Worker joined"
                    );
                }
                ack(result.map(|_| ()))
            }
            Body::Heartbeat(heartbeat) => {
                debug!(worker_id = %worker_id, "Heartbeat");
                match colony
                    .heartbeat(&worker_id, heartbeat.current_task.as_ref(), now)
                    .await
                {
                    Ok(Some(task_id)) => Body::Cancel(Cancel {
                        task_id,
                        reason: "task revoked by queen".to_string(),
                    }),
                    Ok(None) => Body::Ack(Ack::accepted()),
                    Err(e) => reject(e),
                }
            }
            Body::ClaimRequest(_) => match colony.claim_next_task(&worker_id, now).await {
                Ok(task) => Body::ClaimGrant(ClaimGrant {
                    task: task.map(assignment),
                }),
                Err(e) => reject(e),
            },
            Body::TaskStarted(started) => {
                ack(colony.start_task(&worker_id, &started.task_id, now).await)
            }
            Body::TaskResult(result) => {
                let correlation_id = message.correlation_id();
                // Held until the answer is remembered so a concurrent
                // redelivery waits for it instead of applying the result twice.
                let mut dedup = self.dedup.lock().await;
                if let Some(previous) = dedup.get(correlation_id) {
                    debug!(
                        correlation_id = %correlation_id,
                        task_id = %result.task_id,
                        "Duplicate result delivery"
                    );
                    return message.reply(QUEEN_SENDER, Body::Ack(previous));
                }

                let reply = match colony
                    .report_result(&worker_id, &result.task_id, result.outcome.clone(), now)
                    .await
                {
                    Ok(_) => Ack::accepted(),
                    Err(e) => {
                        if matches!(e, ColonyError::StaleClaim { .. }) {
                            debug!(worker_id = %worker_id, task_id = %result.task_id, "Stale result ignored");
                        }
                        Ack::with_detail(e.ack_status(), e.to_string())
                    }
                };
                dedup.remember(correlation_id.clone(), reply.clone());
                Body::Ack(reply)
            }
            Body::Deregister(_) => ack(colony
                .deregister_worker(&worker_id, now)
                .await
                .map(|_| ())),
            Body::ClaimGrant(_) | Body::Cancel(_) | Body::Ack(_) => {
                warn!(
                    worker_id = %worker_id,
                    kind = %message.kind(),
                    "Unexpected message type sent to queen"
                );
                Body::Ack(Ack::with_detail(
                    AckStatus::RejectedInvalid,
                    format!("{} is not accepted by the queen", message.kind()),
                ))
            }
        };

        message.reply(QUEEN_SENDER, body)
    }

    /// One reconciliation pass at `now`.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let colony = &self.colony;
        let mut report = ReconcileReport {
            offlined: colony
                .mark_silent_workers_offline(now, self.config.heartbeat_timeout)
                .await
                .len(),
            expired: colony.expire_deadlines(now).await.len(),
            retried: colony.release_due_retries(now).await.len(),
            reaped: colony
                .reap_offline_workers(now, self.config.offline_grace)
                .await
                .len(),
            purged: 0,
        };
        if let Some(retention) = self.config.terminal_retention {
            report.purged = colony.purge_terminal_tasks(now, retention).await;
        }

        if !report.is_empty() {
            info!(
                offlined = report.offlined,
                expired = report.expired,
                retried = report.retried,
                reaped = report.reaped,
                purged = report.purged,
                "Reconciliation pass"
            );
        }
        report
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.reconcile_at(Utc::now()).await
    }

    /// Write a snapshot if a store is configured.
    pub async fn write_snapshot(&self) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let state = self.colony.snapshot().await;
        if let Err(e) = store.save(&state, Utc::now()).await {
            error!(error = %e, path = %store.path().display(), "Failed to write snapshot");
        }
    }

    /// Reconcile and snapshot periodically until `shutdown` fires, then write
    /// a final snapshot.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.config.reconcile_interval.max(Duration::from_millis(1));
        let mut reconcile = tokio::time::interval(period);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let snapshot_period = self.config.snapshot_interval.max(Duration::from_millis(1));
        let mut snapshot =
            tokio::time::interval_at(tokio::time::Instant::now() + snapshot_period, snapshot_period);
        snapshot.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            reconcile_interval_ms = period.as_millis() as u64,
            snapshots = self.snapshots.is_some(),
            "Queen running"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = reconcile.tick() => {
                    self.reconcile().await;
                }
                _ = snapshot.tick(), if self.snapshots.is_some() => {
                    self.write_snapshot().await;
                }
            }
        }

        self.write_snapshot().await;
        info!("Queen stopped");
    }
}

#[async_trait]
impl QueenLink for Queen {
    async fn exchange(&self, message: Message) -> Result<Message, LinkError> {
        Ok(self.handle(message).await)
    }
}
