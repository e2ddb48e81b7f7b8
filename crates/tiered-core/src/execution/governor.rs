//! Task admission: a counting semaphore plus an optional rate budget.
//!
//! Admission happens in two steps so the dispatcher can consult the circuit
//! breakers in between: [`AdmissionGate::acquire`] waits for a concurrency
//! permit, [`AdmissionGate::pace`] waits for the rate budget. Both give up as
//! soon as the run is aborted.

use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::abort::AbortSignal;
use crate::config::tunables::RateBudget;

pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    limit: usize,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("limit", &self.limit)
            .field("in_flight", &self.in_flight())
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl AdmissionGate {
    /// `max_concurrent` is clamped to at least one permit.
    pub fn new(max_concurrent: usize, budget: Option<RateBudget>) -> Self {
        let limit = max_concurrent.max(1);
        let limiter = budget.and_then(|b| {
            let per_second = b.per_second()?;
            let burst = b.burst().unwrap_or(per_second);
            Some(RateLimiter::direct(
                Quota::per_second(per_second).allow_burst(burst),
            ))
        });
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            limiter,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently held by running tasks.
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Wait for a concurrency permit. `None` once the run is aborted.
    pub async fn acquire(&self, abort: &AbortSignal) -> Option<OwnedSemaphorePermit> {
        if abort.is_aborted() {
            return None;
        }
        let permit = tokio::select! {
            biased;
            _ = abort.aborted() => return None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok()?,
        };
        if abort.is_aborted() {
            return None;
        }
        Some(permit)
    }

    /// Wait for the rate budget. `false` if the run was aborted meanwhile.
    pub async fn pace(&self, abort: &AbortSignal) -> bool {
        let Some(limiter) = &self.limiter else {
            return !abort.is_aborted();
        };
        if limiter.check().is_err() {
            debug!("rate budget exhausted, waiting");
            tokio::select! {
                biased;
                _ = abort.aborted() => return false,
                _ = limiter.until_ready() => {}
            }
        }
        !abort.is_aborted()
    }
}
