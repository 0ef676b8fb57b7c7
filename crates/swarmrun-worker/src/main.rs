//! SwarmRun Worker Daemon

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swarmrun_core::WorkerId;
use swarmrun_worker::{BackpressurePolicy, CommandExecutor, Config, HttpLink, Worker};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnCapacityRejected {
    Retry,
    Exit,
}

/// SwarmRun worker
#[derive(Parser, Debug)]
#[command(name = "swarmrun-worker")]
#[command(about = "Claims and executes tasks from a SwarmRun queen", long_about = None)]
struct Args {
    /// Queen base URL
    #[arg(long, default_value = "http://127.0.0.1:7070")]
    queen_url: String,

    /// Worker ID (generated if omitted)
    #[arg(long)]
    worker_id: Option<String>,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 5)]
    heartbeat_interval_secs: u64,

    /// Milliseconds to wait when no task is pending
    #[arg(long, default_value_t = 500)]
    idle_poll_ms: u64,

    /// Reaction when the queen is at capacity
    #[arg(long, value_enum, default_value = "retry")]
    on_capacity_rejected: OnCapacityRejected,

    /// Milliseconds to wait before claiming again after a capacity rejection
    #[arg(long, default_value_t = 1_000)]
    capacity_retry_ms: u64,

    /// Command run for each task. Receives the payload as JSON on stdin
    #[arg(long)]
    command: String,
}

impl Args {
    fn config(&self) -> Config {
        let backpressure = match self.on_capacity_rejected {
            OnCapacityRejected::Retry => BackpressurePolicy::Retry {
                delay: Duration::from_millis(self.capacity_retry_ms),
            },
            OnCapacityRejected::Exit => BackpressurePolicy::Exit,
        };
        let defaults = Config::default();
        Config {
            queen_url: self.queen_url.clone(),
            worker_id: self
                .worker_id
                .clone()
                .map(WorkerId::new)
                .unwrap_or(defaults.worker_id),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            backpressure,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let executor = CommandExecutor::from_command_line(&args.command)
        .ok_or("--command must not be empty")?;
    let config = args.config();
    let link = HttpLink::new(&config.queen_url, config.request_timeout)?;

    info!(
        worker_id = %config.worker_id,
        queen = %config.queen_url,
        "Starting SwarmRun worker"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        }
    });

    let worker = Worker::new(config, Arc::new(link), Arc::new(executor));
    let summary = worker.run(shutdown).await?;
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Worker exited"
    );
    Ok(())
}
