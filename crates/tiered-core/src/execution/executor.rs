//! Bounded, fair, breaker-aware task execution.
//!
//! Dispatch order per task: round-robin pick → concurrency permit → abort
//! check → breaker check → rate budget → breaker check → spawn. The permit is held by the
//! spawned task and released only after its result (and any breaker update)
//! is recorded, so the next admission always sees the latest breaker state.
//!
//! Tasks are spawned onto the runtime and tracked through their join handles.
//! If the surrounding stage is dropped (timeout), the handles are dropped with
//! it and the tasks keep running detached; their results go nowhere.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use crate::config::tunables::PipelineTunables;
use crate::domain::task::{ExecutionSummary, TaskDescriptor, TaskOutcome, TaskResult};
use crate::execution::breaker::{CircuitBreakerRegistry, CircuitBreakerState};
use crate::execution::governor::AdmissionGate;
use crate::execution::registry::{AnalyticalUnit, UnitContext, UnitRegistry};
use crate::execution::resources::ResourceMonitor;
use crate::execution::scheduler::FairScheduler;
use crate::metrics::PipelineMetrics;
use crate::obs::ObservabilitySink;

/// Everything the execution stage hands downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Recorded results in completion order; skips appear at admission time.
    pub results: Vec<TaskResult>,
    pub summary: ExecutionSummary,
    pub breakers: Vec<CircuitBreakerState>,
    /// Resource soft-limit breaches observed while executing.
    pub warnings: Vec<String>,
}

pub struct TaskExecutor {
    registry: Arc<UnitRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    gate: AdmissionGate,
    metrics: Arc<PipelineMetrics>,
    sink: Arc<dyn ObservabilitySink>,
    tunables: PipelineTunables,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<UnitRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        tunables: &PipelineTunables,
        metrics: Arc<PipelineMetrics>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        Self {
            registry,
            breakers,
            gate: AdmissionGate::new(tunables.max_concurrent_tasks, tunables.rate_budget),
            metrics,
            sink,
            tunables: tunables.clone(),
        }
    }

    /// Run every task in `tasks`, returning once all admitted tasks finished
    /// or the run was aborted and the in-flight ones drained.
    pub async fn execute(&self, tasks: &[TaskDescriptor], ctx: UnitContext) -> ExecutionOutput {
        let planned = tasks.len();
        let abort = ctx.abort.clone();
        let ctx = Arc::new(ctx);

        let mut scheduler = FairScheduler::new();
        for task in tasks {
            scheduler.push(&task.unit_id, task.clone());
        }
        info!(
            run_id = %ctx.run_id,
            tasks = planned,
            units = scheduler.unit_count(),
            max_concurrent = self.gate.limit(),
            "dispatching analytical tasks"
        );

        let monitor = ResourceMonitor::spawn(
            ctx.run_id.clone(),
            self.tunables.resources,
            Arc::clone(&self.metrics),
            Arc::clone(&self.sink),
        );

        let mut results = Vec::with_capacity(planned);
        let mut in_flight = FuturesUnordered::new();
        let mut not_admitted = 0;

        while let Some((unit_id, task)) = scheduler.next_task() {
            let Some(permit) = self.gate.acquire(&abort).await else {
                not_admitted = scheduler.len() + 1;
                break;
            };

            if let Some(skipped) = self.skip_if_open(&task, &unit_id) {
                results.push(skipped);
                continue;
            }

            if !self.gate.pace(&abort).await {
                not_admitted = scheduler.len() + 1;
                break;
            }

            // In-flight tasks may have opened the breaker while this one waited
            // on the rate budget.
            if let Some(skipped) = self.skip_if_open(&task, &unit_id) {
                results.push(skipped);
                continue;
            }

            self.metrics.inc_dispatched();
            let handle = tokio::spawn(run_task(
                task.clone(),
                self.registry.get(&unit_id),
                Arc::clone(&ctx),
                Arc::clone(&self.breakers),
                permit,
            ));
            in_flight.push(async move { (task, handle.await) });
        }

        let mut discarded = 0;
        while let Some((task, joined)) = in_flight.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => TaskResult {
                    task_id: task.task_id,
                    unit_id: task.unit_id,
                    outcome: TaskOutcome::Failed {
                        error: format!("task join failed: {e}"),
                    },
                    duration_ms: 0,
                    aborted: abort.is_aborted(),
                },
            };
            if result.aborted {
                debug!(task = %result.task_id, "result discarded after abort");
                self.metrics.inc_discarded();
                discarded += 1;
                continue;
            }
            match &result.outcome {
                TaskOutcome::Succeeded { .. } => self.metrics.inc_succeeded(),
                TaskOutcome::Failed { error } => {
                    warn!(task = %result.task_id, unit = %result.unit_id, %error, "task failed");
                    self.metrics.inc_failed();
                }
                TaskOutcome::Skipped { .. } => self.metrics.inc_skipped(),
            }
            results.push(result);
        }

        let warnings = monitor.finish().await;

        let mut summary = ExecutionSummary::from_results(planned, &results);
        summary.discarded = discarded;
        summary.not_admitted = not_admitted;
        info!(
            run_id = %ctx.run_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            discarded = summary.discarded,
            not_admitted = summary.not_admitted,
            "analytical execution finished"
        );

        ExecutionOutput {
            results,
            summary,
            breakers: self.breakers.states(),
            warnings,
        }
    }

    /// A synthesized skip when the unit's breaker is open.
    fn skip_if_open(&self, task: &TaskDescriptor, unit_id: &str) -> Option<TaskResult> {
        let reason = self.breakers.check(unit_id)?;
        debug!(task = %task.task_id, unit = %unit_id, %reason, "task skipped");
        self.metrics.inc_skipped();
        Some(TaskResult {
            task_id: task.task_id.clone(),
            unit_id: unit_id.to_string(),
            outcome: TaskOutcome::Skipped { reason },
            duration_ms: 0,
            aborted: false,
        })
    }
}

async fn run_task(
    task: TaskDescriptor,
    unit: Option<Arc<dyn AnalyticalUnit>>,
    ctx: Arc<UnitContext>,
    breakers: Arc<CircuitBreakerRegistry>,
    permit: OwnedSemaphorePermit,
) -> TaskResult {
    let started = Instant::now();
    let outcome = match unit {
        None => Err(format!("no unit registered for '{}'", task.unit_id)),
        Some(unit) => match AssertUnwindSafe(unit.execute(&task, &ctx)).catch_unwind().await {
            Ok(Ok(evidence)) => Ok(evidence),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => Err(format!("unit panicked: {}", panic_message(&*panic))),
        },
    };
    let outcome = match outcome {
        Ok(evidence) => TaskOutcome::Succeeded { evidence },
        Err(error) => {
            breakers.record_failure(&task.unit_id);
            TaskOutcome::Failed { error }
        }
    };
    let aborted = ctx.abort.is_aborted();
    let duration_ms = started.elapsed().as_millis() as u64;
    debug!(task = %task.task_id, unit = %task.unit_id, duration_ms, aborted, "task completed");
    drop(permit);

    TaskResult {
        task_id: task.task_id,
        unit_id: task.unit_id,
        outcome,
        duration_ms,
        aborted,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
