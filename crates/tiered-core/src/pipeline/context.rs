//! Run-scoped shared state.

use std::sync::Arc;

use crate::abort::AbortSignal;
use crate::config::tunables::PipelineTunables;
use crate::execution::breaker::CircuitBreakerRegistry;
use crate::execution::registry::UnitRegistry;
use crate::metrics::PipelineMetrics;
use crate::obs::ObservabilitySink;
use crate::scoring::Scorer;

/// Everything a stage handler may reach. Owned by exactly one run; breakers
/// and counters are never shared between runs.
pub struct RunContext {
    /// Unique per invocation, unlike the content-addressed run id.
    pub invocation_id: String,
    pub tunables: PipelineTunables,
    pub registry: Arc<UnitRegistry>,
    pub scorer: Arc<dyn Scorer>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub metrics: Arc<PipelineMetrics>,
    pub abort: AbortSignal,
    pub sink: Arc<dyn ObservabilitySink>,
}

impl RunContext {
    /// Fresh context: new invocation id, closed breakers for every registered
    /// unit, zeroed counters.
    pub fn new(
        tunables: PipelineTunables,
        registry: Arc<UnitRegistry>,
        scorer: Arc<dyn Scorer>,
        sink: Arc<dyn ObservabilitySink>,
        abort: AbortSignal,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            registry.unit_ids().map(str::to_string).collect::<Vec<_>>(),
            tunables.failure_threshold,
        ));
        Self {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            tunables,
            registry,
            scorer,
            breakers,
            metrics: Arc::new(PipelineMetrics::new()),
            abort,
            sink,
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("invocation_id", &self.invocation_id)
            .field("registry", &self.registry)
            .field("aborted", &self.abort.is_aborted())
            .finish_non_exhaustive()
    }
}
