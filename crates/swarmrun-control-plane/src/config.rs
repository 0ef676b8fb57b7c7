//! Control plane configuration.

use std::path::PathBuf;
use std::time::Duration;

use swarmrun_core::{PopulationTarget, RetryPolicy};

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub bind_addr: String,

    /// Population target enforced by the capacity governor.
    pub population: PopulationTarget,

    /// Silence after which a worker is marked OFFLINE.
    pub heartbeat_timeout: Duration,

    /// Time an OFFLINE worker is kept before its record is reaped.
    pub offline_grace: Duration,

    /// Period of the reconciliation pass.
    pub reconcile_interval: Duration,

    /// Where snapshots are written. No snapshots when unset.
    pub snapshot_path: Option<PathBuf>,

    /// Period between snapshots.
    pub snapshot_interval: Duration,

    /// Backoff applied between failed attempts.
    pub retry_policy: RetryPolicy,

    /// Retry budget for tasks that do not specify one.
    pub default_max_retries: u32,

    /// How long terminal tasks are kept. Forever when unset.
    pub terminal_retention: Option<Duration>,

    /// Number of TASK_RESULT correlation ids remembered for dedup.
    pub dedup_window: usize,

    /// Capacity of the colony event channel.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7070".to_string(),
            population: PopulationTarget {
                total_population: 1_000,
                max_concurrent: 100,
            },
            heartbeat_timeout: Duration::from_secs(15),
            offline_grace: Duration::from_secs(60),
            reconcile_interval: Duration::from_millis(500),
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            default_max_retries: 3,
            terminal_retention: None,
            dedup_window: 4_096,
            event_capacity: 1_024,
        }
    }
}
