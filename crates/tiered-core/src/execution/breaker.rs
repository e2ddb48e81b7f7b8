//! Per-unit circuit breakers.
//!
//! One breaker per registered unit, created closed when the run starts. Every
//! failure increments the unit's counter; once the counter reaches the
//! threshold the breaker is open for the rest of the run. There is no reset
//! and no half-open probe.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::task::SkipReason;

/// Atomic failure counter that latches open at `threshold`.
#[derive(Debug)]
pub struct CircuitBreaker {
    failures: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            failures: AtomicU32::new(0),
            threshold,
        }
    }

    pub fn is_open(&self) -> bool {
        self.failures.load(Ordering::Acquire) >= self.threshold
    }

    /// Record a failure. Returns the new failure count.
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Snapshot of one unit's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub unit_id: String,
    pub failure_count: u32,
    pub open: bool,
}

/// Run-scoped breakers keyed by unit identity. The map is fixed at
/// construction; only the counters change during the run.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: BTreeMap<String, CircuitBreaker>,
    threshold: u32,
}

impl CircuitBreakerRegistry {
    pub fn new<I, S>(unit_ids: I, threshold: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let breakers = unit_ids
            .into_iter()
            .map(|id| (id.into(), CircuitBreaker::new(threshold)))
            .collect();
        Self {
            breakers,
            threshold,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// `Some(reason)` when tasks for `unit_id` must be skipped.
    pub fn check(&self, unit_id: &str) -> Option<SkipReason> {
        let breaker = self.breakers.get(unit_id)?;
        breaker.is_open().then(|| SkipReason::CircuitOpen {
            failures: breaker.failure_count(),
            threshold: breaker.threshold(),
        })
    }

    pub fn is_open(&self, unit_id: &str) -> bool {
        self.check(unit_id).is_some()
    }

    /// Record a failure for `unit_id`. Returns the new count, or `None` for
    /// an unknown unit.
    pub fn record_failure(&self, unit_id: &str) -> Option<u32> {
        let breaker = self.breakers.get(unit_id)?;
        let count = breaker.record_failure();
        if count == breaker.threshold() {
            warn!(
                event = "breaker.opened",
                unit = %unit_id,
                failures = count,
                threshold = breaker.threshold(),
            );
        }
        Some(count)
    }

    pub fn open_units(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|(_, b)| b.is_open())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn states(&self) -> Vec<CircuitBreakerState> {
        self.breakers
            .iter()
            .map(|(id, b)| CircuitBreakerState {
                unit_id: id.clone(),
                failure_count: b.failure_count(),
                open: b.is_open(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_starts_closed() {
        let cb = CircuitBreaker::new(3);
        assert!(!cb.is_open());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let cb = CircuitBreaker::new(3);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        assert_eq!(cb.record_failure(), 3);
        assert!(cb.is_open());
    }

    #[test]
    fn test_breaker_stays_open() {
        let cb = CircuitBreaker::new(1);
        cb.record_failure();
        for _ in 0..10 {
            assert!(cb.is_open());
        }
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn test_registry_isolates_units() {
        let reg = CircuitBreakerRegistry::new(["X", "Y"], 2);
        reg.record_failure("X");
        reg.record_failure("X");
        assert!(reg.is_open("X"));
        assert!(!reg.is_open("Y"));
        assert_eq!(reg.open_units(), vec!["X".to_string()]);
    }

    #[test]
    fn test_check_reports_skip_reason() {
        let reg = CircuitBreakerRegistry::new(["X"], 1);
        assert!(reg.check("X").is_none());
        reg.record_failure("X");
        assert_eq!(
            reg.check("X"),
            Some(SkipReason::CircuitOpen {
                failures: 1,
                threshold: 1
            })
        );
    }

    #[test]
    fn test_unknown_unit_is_ignored() {
        let reg = CircuitBreakerRegistry::new(["X"], 1);
        assert_eq!(reg.record_failure("nope"), None);
        assert!(!reg.is_open("nope"));
    }

    #[test]
    fn test_states_snapshot() {
        let reg = CircuitBreakerRegistry::new(["A", "B"], 2);
        reg.record_failure("B");
        let states = reg.states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].unit_id, "B");
        assert_eq!(states[1].failure_count, 1);
        assert!(!states[1].open);
    }
}
