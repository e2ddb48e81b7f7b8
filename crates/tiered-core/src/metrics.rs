//! Run-scoped atomic counters.
//!
//! One [`PipelineMetrics`] is created per orchestrator run and shared by
//! `Arc`. Counters are incremented silently at the call site; call
//! [`PipelineMetrics::flush`] to emit the current values as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lightweight atomic counters; no allocations, no locking.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    tasks_dispatched: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_skipped: AtomicU64,
    results_discarded: AtomicU64,
    groups_aggregated: AtomicU64,
    groups_failed: AtomicU64,
    resource_warnings: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tasks_dispatched: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_skipped: u64,
    pub results_discarded: u64,
    pub groups_aggregated: u64,
    pub groups_failed: u64,
    pub resource_warnings: u64,
}

fn bump(counter: &AtomicU64, metric: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric, "counter incremented");
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_dispatched(&self) {
        bump(&self.tasks_dispatched, "tasks_dispatched");
    }

    pub fn inc_succeeded(&self) {
        bump(&self.tasks_succeeded, "tasks_succeeded");
    }

    pub fn inc_failed(&self) {
        bump(&self.tasks_failed, "tasks_failed");
    }

    pub fn inc_skipped(&self) {
        bump(&self.tasks_skipped, "tasks_skipped");
    }

    pub fn inc_discarded(&self) {
        bump(&self.results_discarded, "results_discarded");
    }

    pub fn add_groups_aggregated(&self, n: u64) {
        self.groups_aggregated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_groups_failed(&self, n: u64) {
        self.groups_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_resource_warnings(&self) {
        bump(&self.resource_warnings, "resource_warnings");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_skipped: self.tasks_skipped.load(Ordering::Relaxed),
            results_discarded: self.results_discarded.load(Ordering::Relaxed),
            groups_aggregated: self.groups_aggregated.load(Ordering::Relaxed),
            groups_failed: self.groups_failed.load(Ordering::Relaxed),
            resource_warnings: self.resource_warnings.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call at the end of a run rather than on every increment.
    pub fn flush(&self, run_id: &str) -> MetricsSnapshot {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            run_id = %run_id,
            tasks_dispatched = s.tasks_dispatched,
            tasks_succeeded = s.tasks_succeeded,
            tasks_failed = s.tasks_failed,
            tasks_skipped = s.tasks_skipped,
            results_discarded = s.results_discarded,
            groups_aggregated = s.groups_aggregated,
            groups_failed = s.groups_failed,
            resource_warnings = s.resource_warnings,
        );
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = PipelineMetrics::new();
        m.inc_dispatched();
        m.inc_dispatched();
        m.inc_succeeded();
        m.inc_failed();
        m.inc_skipped();
        m.add_groups_aggregated(4);
        m.add_groups_failed(1);
        let s = m.snapshot();
        assert_eq!(s.tasks_dispatched, 2);
        assert_eq!(s.tasks_succeeded, 1);
        assert_eq!(s.tasks_failed, 1);
        assert_eq!(s.tasks_skipped, 1);
        assert_eq!(s.groups_aggregated, 4);
        assert_eq!(s.groups_failed, 1);
    }

    #[test]
    fn separate_runs_do_not_share_counters() {
        let a = PipelineMetrics::new();
        let b = PipelineMetrics::new();
        a.inc_discarded();
        assert_eq!(a.snapshot().results_discarded, 1);
        assert_eq!(b.snapshot().results_discarded, 0);
    }

    #[test]
    fn flush_returns_snapshot() {
        let m = PipelineMetrics::new();
        m.inc_resource_warnings();
        assert_eq!(m.flush("run-test").resource_warnings, 1);
    }
}
