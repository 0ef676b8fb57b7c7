//! SwarmRun Worker Library
//!
//! A worker registers with the queen, heartbeats on its own timer, and loops
//! claiming tasks and running them through a [`TaskExecutor`].

pub mod config;
pub mod error;
pub mod executor;
pub mod link;
pub mod worker;

pub use config::{BackpressurePolicy, Config};
pub use error::WorkerError;
pub use executor::{CommandExecutor, ExecutionError, TaskExecutor};
pub use link::HttpLink;
pub use worker::{ExitReason, Worker, WorkerSummary};
