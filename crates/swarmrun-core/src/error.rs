//! Core domain errors.

use thiserror::Error;

/// Core domain errors for SwarmRun.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Population target whose concurrency ceiling exceeds the population.
    #[error("Invalid population target: max_concurrent {max_concurrent} > total_population {total_population}")]
    InvalidPopulation {
        total_population: u64,
        max_concurrent: u64,
    },

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}
