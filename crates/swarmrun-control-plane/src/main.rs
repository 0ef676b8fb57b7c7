//! SwarmRun Control Plane Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use swarmrun_core::{PopulationTarget, RetryPolicy};
use swarmrun_control_plane::{http, AppState, Colony, Config, Queen, SnapshotStore};

/// SwarmRun control plane
#[derive(Parser, Debug)]
#[command(name = "swarmrun-control-plane")]
#[command(about = "Coordinates a SwarmRun colony of workers", long_about = None)]
struct Args {
    /// HTTP bind address
    #[arg(long, default_value = "127.0.0.1:7070")]
    bind_addr: String,

    /// Number of agents the swarm intends to spawn
    #[arg(long, default_value_t = 1_000)]
    total_population: u64,

    /// Ceiling on simultaneously busy workers
    #[arg(long, default_value_t = 100)]
    max_concurrent: u64,

    /// Seconds of silence before a worker is marked offline
    #[arg(long, default_value_t = 15)]
    heartbeat_timeout_secs: u64,

    /// Seconds an offline worker is kept before being reaped
    #[arg(long, default_value_t = 60)]
    offline_grace_secs: u64,

    /// Reconciliation period in milliseconds
    #[arg(long, default_value_t = 500)]
    reconcile_interval_ms: u64,

    /// Snapshot file. Loaded at startup if present
    #[arg(long)]
    snapshot_path: Option<PathBuf>,

    /// Seconds between snapshots
    #[arg(long, default_value_t = 30)]
    snapshot_interval_secs: u64,

    /// Delay before the first retry, in milliseconds
    #[arg(long, default_value_t = 1_000)]
    base_retry_delay_ms: u64,

    /// Upper bound on the retry delay, in milliseconds
    #[arg(long, default_value_t = 60_000)]
    max_retry_delay_ms: u64,

    /// Retry budget for tasks that do not set one
    #[arg(long, default_value_t = 3)]
    default_max_retries: u32,

    /// Seconds terminal tasks are kept before being purged
    #[arg(long)]
    terminal_retention_secs: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<Config, Box<dyn std::error::Error>> {
        let population = PopulationTarget::new(self.total_population, self.max_concurrent)?;
        Ok(Config {
            bind_addr: self.bind_addr,
            population,
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            offline_grace: Duration::from_secs(self.offline_grace_secs),
            reconcile_interval: Duration::from_millis(self.reconcile_interval_ms),
            snapshot_path: self.snapshot_path,
            snapshot_interval: Duration::from_secs(self.snapshot_interval_secs),
            retry_policy: RetryPolicy::new(
                Duration::from_millis(self.base_retry_delay_ms),
                Duration::from_millis(self.max_retry_delay_ms),
            ),
            default_max_retries: self.default_max_retries,
            terminal_retention: self.terminal_retention_secs.map(Duration::from_secs),
            ..Config::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Args::parse().into_config()?;
    let addr: SocketAddr = config.bind_addr.parse()?;

    let mut colony = Colony::new(&config)?;
    if let Some(path) = &config.snapshot_path {
        if let Some(state) = SnapshotStore::new(path).load(Utc::now()).await? {
            colony = colony.with_state(state, Utc::now());
        }
    }

    let queen = Arc::new(Queen::new(Arc::new(colony), config.clone()));
    let router = http::create_router(AppState::new(queen.clone()));

    info!(
        addr = %addr,
        total_population = config.population.total_population,
        max_concurrent = config.population.max_concurrent,
        "Starting SwarmRun control plane"
    );

    let shutdown = CancellationToken::new();
    let queen_task = tokio::spawn({
        let queen = queen.clone();
        let shutdown = shutdown.clone();
        async move { queen.run(shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        }
    });

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let server_shutdown = shutdown.clone();
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
    {
        error!(error = %e, "HTTP server error");
    }

    shutdown.cancel();
    queen_task.await?;
    Ok(())
}
