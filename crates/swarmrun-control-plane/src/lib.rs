//! SwarmRun Control Plane Library
//!
//! This crate provides the coordination side of a SwarmRun colony: the
//! colony state and its atomic operations, the capacity governor, the queen's
//! protocol dispatch and reconciliation loop, snapshot persistence, and the
//! HTTP remote-control surface.

pub mod colony;
pub mod config;
pub mod error;
pub mod events;
pub mod governor;
pub mod http;
pub mod metrics;
pub mod persistence;
pub mod queen;
pub mod state;

pub use colony::{Colony, ColonyState, ColonyStats};
pub use config::Config;
pub use error::ColonyError;
pub use events::ColonyEvent;
pub use governor::{Admission, CapacityGovernor};
pub use persistence::{SnapshotError, SnapshotStore};
pub use queen::{Queen, ReconcileReport};
pub use state::AppState;
