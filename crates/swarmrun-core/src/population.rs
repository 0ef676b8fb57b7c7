//! Population target for a swarm.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// How many agents the swarm intends to spawn over its lifetime, and how many
/// of them may be BUSY at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationTarget {
    /// Overall number of agents the swarm intends to spawn.
    pub total_population: u64,

    /// Ceiling on simultaneously BUSY workers.
    pub max_concurrent: u64,
}

impl PopulationTarget {
    /// Create a validated population target.
    ///
    /// Fails when `max_concurrent > total_population`.
    pub fn new(total_population: u64, max_concurrent: u64) -> Result<Self, CoreError> {
        let target = Self {
            total_population,
            max_concurrent,
        };
        target.validate()?;
        Ok(target)
    }

    /// Check the `max_concurrent <= total_population` invariant.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent > self.total_population {
            return Err(CoreError::InvalidPopulation {
                total_population: self.total_population,
                max_concurrent: self.max_concurrent,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_above_population_is_rejected() {
        let err = PopulationTarget::new(500, 1000).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidPopulation {
                total_population: 500,
                max_concurrent: 1000
            }
        );
    }

    #[test]
    fn test_large_population_small_ceiling() {
        let target = PopulationTarget::new(500_000, 500).unwrap();
        assert_eq!(target.max_concurrent, 500);
    }
}
