//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use swarmrun_control_plane::{Colony, Config, Queen};
use swarmrun_core::{PopulationTarget, RetryPolicy, TaskId, TaskStatus, WorkerId};
use swarmrun_proto::QueenLink;
use swarmrun_worker::{
    BackpressurePolicy, Config as WorkerConfig, ExecutionError, TaskExecutor, Worker,
    WorkerError, WorkerSummary,
};

/// Queen config with immediate retries and a fast reconciliation tick.
pub fn queen_config(total_population: u64, max_concurrent: u64) -> Config {
    Config {
        population: PopulationTarget {
            total_population,
            max_concurrent,
        },
        retry_policy: RetryPolicy::immediate(),
        reconcile_interval: Duration::from_millis(5),
        heartbeat_timeout: Duration::from_secs(60),
        ..Config::default()
    }
}

pub fn queen(config: Config) -> Arc<Queen> {
    let colony = Arc::new(Colony::new(&config).expect("valid population target"));
    Arc::new(Queen::new(colony, config))
}

/// Start the queen's reconciliation loop.
pub fn spawn_queen(queen: &Arc<Queen>, shutdown: &CancellationToken) -> JoinHandle<()> {
    let queen = queen.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move { queen.run(shutdown).await })
}

pub fn worker_config(id: impl Into<String>) -> WorkerConfig {
    WorkerConfig {
        worker_id: WorkerId::new(id),
        heartbeat_interval: Duration::from_millis(20),
        idle_poll: Duration::from_millis(5),
        backpressure: BackpressurePolicy::Retry {
            delay: Duration::from_millis(5),
        },
        ..WorkerConfig::default()
    }
}

/// Run a worker loop in the background.
pub fn spawn_worker<L, E>(
    config: WorkerConfig,
    link: Arc<L>,
    executor: Arc<E>,
    shutdown: &CancellationToken,
) -> JoinHandle<Result<WorkerSummary, WorkerError>>
where
    L: QueenLink + 'static,
    E: TaskExecutor + 'static,
{
    let worker = Worker::new(config, link, executor);
    tokio::spawn(worker.run(shutdown.clone()))
}

/// Poll until the task reaches `status`. Panics after `timeout`.
pub async fn wait_for_status(colony: &Colony, task_id: &TaskId, status: TaskStatus, timeout: Duration) {
    let waited = tokio::time::timeout(timeout, async {
        loop {
            if colony.get_task(task_id).await.map(|t| t.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if waited.is_err() {
        let task = colony.get_task(task_id).await;
        panic!("task {} never reached {:?}: {:?}", task_id, status, task);
    }
}

/// Returns the payload. Fails when the payload has `"fail": true`.
pub struct Echo;

#[async_trait]
impl TaskExecutor for Echo {
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
        if payload.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(ExecutionError::Failed("asked to fail".to_string()));
        }
        Ok(payload.clone())
    }
}

/// Always fails.
pub struct AlwaysFails;

#[async_trait]
impl TaskExecutor for AlwaysFails {
    async fn execute(&self, _payload: &Value) -> Result<Value, ExecutionError> {
        Err(ExecutionError::Failed("boom".to_string()))
    }
}

/// Never finishes on its own.
pub struct Stuck;

#[async_trait]
impl TaskExecutor for Stuck {
    async fn execute(&self, _payload: &Value) -> Result<Value, ExecutionError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(Value::Null)
    }
}

/// Echo that records the highest number of executions running at once.
#[derive(Default)]
pub struct PeakTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    pub executed: AtomicUsize,
}

impl PeakTracker {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for PeakTracker {
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutionError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.executed.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_micros(500)).await;
        let result = Echo.execute(payload).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
