//! Worker configuration.

use std::time::Duration;

use swarmrun_core::WorkerId;

/// What to do when the queen refuses a claim for lack of capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Wait and claim again.
    Retry { delay: Duration },
    /// Stop the worker.
    Exit,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::Retry {
            delay: Duration::from_secs(1),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Queen base URL.
    pub queen_url: String,

    /// Worker ID.
    pub worker_id: WorkerId,

    /// Heartbeat period.
    pub heartbeat_interval: Duration,

    /// Wait between claims when nothing is pending.
    pub idle_poll: Duration,

    /// Reaction to capacity rejections.
    pub backpressure: BackpressurePolicy,

    /// Attempts at delivering one TASK_RESULT before giving up.
    pub result_attempts: u32,

    /// Timeout of a single HTTP exchange.
    pub request_timeout: Duration,

    /// Hostname reported at registration.
    pub hostname: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queen_url: "http://127.0.0.1:7070".to_string(),
            worker_id: WorkerId::generate(),
            heartbeat_interval: Duration::from_secs(5),
            idle_poll: Duration::from_millis(500),
            backpressure: BackpressurePolicy::default(),
            result_attempts: 5,
            request_timeout: Duration::from_secs(10),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}
