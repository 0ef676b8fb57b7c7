//! Capacity governor.
//!
//! Bounds the number of simultaneously BUSY workers. The governor is owned by
//! the colony and only touched inside its critical section, so a reservation
//! and the worker's BUSY transition always happen together.

use serde::Serialize;
use tracing::warn;

use swarmrun_core::PopulationTarget;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub accepted: bool,
    /// Effective concurrency ceiling.
    pub ceiling: u64,
}

/// Tracks reserved concurrency slots against a population target.
#[derive(Debug, Clone)]
pub struct CapacityGovernor {
    target: PopulationTarget,
    reserved: u64,
    admitted_total: u64,
    rejected_total: u64,
}

impl CapacityGovernor {
    pub fn new(target: PopulationTarget) -> Self {
        Self {
            target,
            reserved: 0,
            admitted_total: 0,
            rejected_total: 0,
        }
    }

    /// Admit one more active worker if the target allows it.
    ///
    /// Rejects when `max_concurrent > requested_population` or when
    /// `current_active + 1 > max_concurrent`. An accepted admission increments
    /// the reservation.
    pub fn validate_and_reserve(
        &mut self,
        requested_population: u64,
        max_concurrent: u64,
        current_active: u64,
    ) -> Admission {
        let ceiling = max_concurrent.min(requested_population);

        if max_concurrent > requested_population {
            warn!(
                requested_population,
                max_concurrent, "Rejecting admission: concurrency above population"
            );
            self.rejected_total += 1;
            return Admission {
                accepted: false,
                ceiling,
            };
        }

        if current_active.saturating_add(1) > max_concurrent {
            self.rejected_total += 1;
            return Admission {
                accepted: false,
                ceiling,
            };
        }

        self.reserved += 1;
        self.admitted_total += 1;
        Admission {
            accepted: true,
            ceiling,
        }
    }

    /// Admission check against the configured target and current reservation.
    pub fn admit(&mut self) -> Admission {
        let target = self.target;
        self.validate_and_reserve(target.total_population, target.max_concurrent, self.reserved)
    }

    /// Give back one slot.
    pub fn release(&mut self) {
        if self.reserved == 0 {
            warn!("Capacity release without a matching reservation");
            return;
        }
        self.reserved -= 1;
    }

    /// Drop all reservations. Used when restoring from a snapshot, where no
    /// worker is BUSY.
    pub fn reset(&mut self) {
        self.reserved = 0;
    }

    pub fn target(&self) -> PopulationTarget {
        self.target
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn admitted_total(&self) -> u64 {
        self.admitted_total
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(total: u64, max: u64) -> CapacityGovernor {
        CapacityGovernor::new(PopulationTarget {
            total_population: total,
            max_concurrent: max,
        })
    }

    #[test]
    fn test_accepts_below_ceiling() {
        let mut gov = governor(10, 2);
        assert!(gov.admit().accepted);
        assert!(gov.admit().accepted);
        assert_eq!(gov.reserved(), 2);

        let third = gov.admit();
        assert!(!third.accepted);
        assert_eq!(third.ceiling, 2);
        assert_eq!(gov.reserved(), 2);
        assert_eq!(gov.rejected_total(), 1);
    }

    #[test]
    fn test_release_frees_a_slot() {
        let mut gov = governor(10, 1);
        assert!(gov.admit().accepted);
        assert!(!gov.admit().accepted);
        gov.release();
        assert!(gov.admit().accepted);
        assert_eq!(gov.admitted_total(), 2);
    }

    #[test]
    fn test_concurrency_above_population_rejected() {
        let mut gov = governor(500, 1000);
        let admission = gov.validate_and_reserve(500, 1000, 0);
        assert!(!admission.accepted);
        assert_eq!(admission.ceiling, 500);
        assert_eq!(gov.reserved(), 0);
    }

    #[test]
    fn test_release_never_underflows() {
        let mut gov = governor(10, 5);
        gov.release();
        assert_eq!(gov.reserved(), 0);
    }

    #[test]
    fn test_capacity_law() {
        for max in 1..20u64 {
            let mut gov = governor(100, max);
            let accepted = (0..50).filter(|_| gov.admit().accepted).count() as u64;
            assert_eq!(accepted, max);
            assert_eq!(gov.reserved(), max);
        }
    }
}
