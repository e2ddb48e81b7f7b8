//! Structured observability hooks for the run lifecycle.
//!
//! - [`RunSpan`]: RAII guard entering a run-scoped span
//! - `emit_*`: one function per lifecycle event, all with an `event` field
//! - [`ObservabilitySink`]: pluggable receiver for stage instrumentation;
//!   [`TracingSink`] forwards everything to `tracing`

use tracing::{info, warn};

use crate::execution::resources::ResourceUsageSnapshot;
use crate::pipeline::instrument::{StageMetrics, StageOutcome};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(invocation_id: &str) -> Self {
        Self {
            _span: run_span(invocation_id).entered(),
        }
    }
}

/// The run-scoped span itself, for attaching to a future with
/// `tracing::Instrument` where an entered guard cannot be held.
pub fn run_span(invocation_id: &str) -> tracing::Span {
    tracing::info_span!("tiered.run", invocation_id = %invocation_id)
}

/// Receiver for per-stage instrumentation. Implementations must be cheap;
/// they are called inline on the sequencer's task.
pub trait ObservabilitySink: Send + Sync {
    fn stage_started(&self, invocation_id: &str, index: usize, label: &str);

    fn stage_finished(&self, invocation_id: &str, metrics: &StageMetrics);

    fn resource_warning(&self, run_id: &str, snapshot: &ResourceUsageSnapshot, message: &str) {
        let _ = (run_id, snapshot, message);
    }
}

/// Default sink: every callback becomes a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn stage_started(&self, invocation_id: &str, index: usize, label: &str) {
        emit_stage_started(invocation_id, index, label);
    }

    fn stage_finished(&self, invocation_id: &str, metrics: &StageMetrics) {
        emit_stage_finished(invocation_id, metrics);
    }

    fn resource_warning(&self, run_id: &str, snapshot: &ResourceUsageSnapshot, message: &str) {
        warn!(
            event = "resource.warning",
            run_id = %run_id,
            memory_bytes = ?snapshot.memory_bytes,
            cpu_percent = ?snapshot.cpu_percent,
            %message,
        );
    }
}

pub fn emit_run_started(invocation_id: &str, stages: usize) {
    info!(event = "run.started", invocation_id = %invocation_id, stages = stages);
}

pub fn emit_run_finished(invocation_id: &str, run_id: &str, status: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        invocation_id = %invocation_id,
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_run_failed(invocation_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", invocation_id = %invocation_id, error = %error);
}

pub fn emit_stage_started(invocation_id: &str, index: usize, label: &str) {
    info!(event = "stage.started", invocation_id = %invocation_id, index = index, label = %label);
}

pub fn emit_stage_finished(invocation_id: &str, m: &StageMetrics) {
    match m.outcome {
        StageOutcome::Completed => info!(
            event = "stage.finished",
            invocation_id = %invocation_id,
            index = m.index,
            label = %m.label,
            elapsed_ms = m.elapsed_ms,
            items = m.items,
            warnings = m.warnings.len(),
            errors = m.errors.len(),
        ),
        StageOutcome::TimedOut | StageOutcome::Failed => warn!(
            event = "stage.finished",
            invocation_id = %invocation_id,
            index = m.index,
            label = %m.label,
            outcome = ?m.outcome,
            elapsed_ms = m.elapsed_ms,
            errors = ?m.errors,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::ExecutionMode;
    use tracing_test::traced_test;

    fn metrics(outcome: StageOutcome) -> StageMetrics {
        StageMetrics {
            index: 2,
            label: "execute_tasks".to_string(),
            mode: ExecutionMode::Async,
            started_at: chrono::Utc::now(),
            elapsed_ms: 12,
            items: 30,
            warnings: vec![],
            errors: vec![],
            outcome,
        }
    }

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("inv-1");
    }

    #[test]
    #[traced_test]
    fn test_tracing_sink_emits_stage_events() {
        let sink = TracingSink;
        sink.stage_started("inv-1", 2, "execute_tasks");
        sink.stage_finished("inv-1", &metrics(StageOutcome::Completed));
        assert!(logs_contain("stage.started"));
        assert!(logs_contain("stage.finished"));
        assert!(logs_contain("execute_tasks"));
    }

    #[test]
    #[traced_test]
    fn test_failed_stage_logs_at_warn() {
        emit_stage_finished("inv-2", &metrics(StageOutcome::TimedOut));
        assert!(logs_contain("WARN"));
        assert!(logs_contain("TimedOut"));
    }
}
