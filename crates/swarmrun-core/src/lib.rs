//! SwarmRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Persistence
//! - Runtime specifics
//!
//! All types here represent the coordination domain of a SwarmRun colony:
//! tasks, workers, the population target and the retry policy.

pub mod error;
pub mod ids;
pub mod population;
pub mod retry;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{CorrelationId, TaskId, WorkerId};
pub use population::PopulationTarget;
pub use retry::RetryPolicy;
pub use status::{TaskStatus, WorkerStatus};
pub use task::{FailureReason, Task, TaskOutcome, TaskSpec};
pub use worker::WorkerRecord;
