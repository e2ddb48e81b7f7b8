//! The fixed eight-stage pipeline and its driver.
//!
//! | # | label                 | mode  | phase                    |
//! |---|-----------------------|-------|--------------------------|
//! | 0 | `validate_config`     | sync  | → ConfigValidated        |
//! | 1 | `ingest_document`     | sync  | → Ingested               |
//! | 2 | `execute_tasks`       | async | Executing                |
//! | 3 | `score_results`       | sync  | → Scored                 |
//! | 4 | `aggregate_dimension` | sync  | Aggregating(Dimension)   |
//! | 5 | `aggregate_area`      | sync  | Aggregating(Area)        |
//! | 6 | `aggregate_cluster`   | sync  | Aggregating(Cluster)     |
//! | 7 | `aggregate_macro`     | sync  | Aggregating(Macro)       |
//!
//! [`Orchestrator::run`] builds a fresh [`RunContext`] per call, so breakers,
//! counters and the abort flag never leak between runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn, Instrument};

use crate::abort::AbortSignal;
use crate::aggregation::error::GroupFailure;
use crate::aggregation::hierarchy::{
    aggregate_areas, aggregate_clusters, aggregate_dimensions, aggregate_macro_level,
};
use crate::aggregation::level::LevelOutcome;
use crate::config::gate::{validate_specification, RawSpecification};
use crate::config::tunables::PipelineTunables;
use crate::domain::document::Document;
use crate::domain::error::Result;
use crate::domain::score::{Level, LevelScore, MacroScore, ScoredResult};
use crate::domain::task::{ExecutionSummary, TaskResult};
use crate::execution::breaker::CircuitBreakerState;
use crate::execution::executor::TaskExecutor;
use crate::execution::registry::{UnitContext, UnitRegistry};
use crate::metrics::MetricsSnapshot;
use crate::obs::{emit_run_failed, emit_run_finished, emit_run_started, run_span, ObservabilitySink, TracingSink};
use crate::pipeline::context::RunContext;
use crate::pipeline::instrument::StageMetrics;
use crate::pipeline::sequencer::{PhaseSequencer, SequenceOutcome};
use crate::pipeline::stage::{
    Artifact, ArtifactKey, AsyncStage, ExecutionMode, StageDefinition, StageHandler, StageInputs,
    StagePlanEntry, SyncStage,
};
use crate::pipeline::state::{RunPhase, RunStatus};
use crate::scoring::Scorer;

pub const STAGE_VALIDATE_CONFIG: &str = "validate_config";
pub const STAGE_INGEST_DOCUMENT: &str = "ingest_document";
pub const STAGE_EXECUTE_TASKS: &str = "execute_tasks";
pub const STAGE_SCORE_RESULTS: &str = "score_results";
pub const STAGE_AGGREGATE_DIMENSION: &str = "aggregate_dimension";
pub const STAGE_AGGREGATE_AREA: &str = "aggregate_area";
pub const STAGE_AGGREGATE_CLUSTER: &str = "aggregate_cluster";
pub const STAGE_AGGREGATE_MACRO: &str = "aggregate_macro";

/// Artifacts the caller supplies before stage 0.
pub const SEED_ARTIFACTS: [ArtifactKey; 2] =
    [ArtifactKey::RawSpecification, ArtifactKey::SourceDocument];

struct ValidateConfigStage;

impl SyncStage for ValidateConfigStage {
    fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact> {
        let raw = inputs.raw_specification()?;
        let config = validate_specification(&raw)?;
        ctx.registry.validate_against(&config)?;
        Ok(Artifact::Config(Arc::new(config)))
    }
}

struct IngestDocumentStage;

impl SyncStage for IngestDocumentStage {
    fn run(&self, inputs: StageInputs, _ctx: &RunContext) -> Result<Artifact> {
        let document = inputs.source_document()?;
        document.validate()?;
        info!(
            chunks = document.chunk_count(),
            digest = %document.digest(),
            "document ingested"
        );
        Ok(Artifact::Document(document))
    }
}

struct ExecuteTasksStage;

#[async_trait]
impl AsyncStage for ExecuteTasksStage {
    async fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact> {
        let config = inputs.config()?;
        let document = inputs.document()?;
        let executor = TaskExecutor::new(
            Arc::clone(&ctx.registry),
            Arc::clone(&ctx.breakers),
            &ctx.tunables,
            Arc::clone(&ctx.metrics),
            Arc::clone(&ctx.sink),
        );
        let unit_ctx = UnitContext {
            run_id: config.run_id.clone(),
            document,
            config: Arc::clone(&config),
            abort: ctx.abort.clone(),
        };
        let output = executor.execute(&config.tasks, unit_ctx).await;
        Ok(Artifact::TaskResults(Arc::new(output)))
    }
}

struct ScoreResultsStage;

impl SyncStage for ScoreResultsStage {
    fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact> {
        let config = inputs.config()?;
        let execution = inputs.task_results()?;
        let by_id: HashMap<&str, &TaskResult> = execution
            .results
            .iter()
            .map(|r| (r.task_id.as_str(), r))
            .collect();

        // Questionnaire order, not completion order.
        let scored: Vec<ScoredResult> = config
            .tasks
            .iter()
            .filter_map(|task| {
                by_id
                    .get(task.task_id.as_str())
                    .map(|result| ctx.scorer.score(result, task))
            })
            .collect();
        info!(
            scored = scored.iter().filter(|s| s.is_valid()).count(),
            unscored = scored.iter().filter(|s| !s.is_valid()).count(),
            "task results scored"
        );
        Ok(Artifact::ScoredResults(Arc::new(scored)))
    }
}

fn record_level(ctx: &RunContext, outcome: &LevelOutcome) {
    ctx.metrics.add_groups_aggregated(outcome.scores.len() as u64);
    ctx.metrics.add_groups_failed(outcome.failures.len() as u64);
    info!(
        level = %outcome.level,
        groups = outcome.scores.len(),
        failed = outcome.failures.len(),
        "level aggregated"
    );
}

struct AggregateDimensionStage;

impl SyncStage for AggregateDimensionStage {
    fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact> {
        let scored = inputs.scored_results()?;
        let outcome = aggregate_dimensions(&scored, &ctx.tunables);
        record_level(ctx, &outcome);
        Ok(Artifact::DimensionScores(Arc::new(outcome)))
    }
}

struct AggregateAreaStage;

impl SyncStage for AggregateAreaStage {
    fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact> {
        let scored = inputs.scored_results()?;
        let dimensions = inputs.dimension_scores()?;
        let outcome = aggregate_areas(&scored, &dimensions, &ctx.tunables);
        record_level(ctx, &outcome);
        Ok(Artifact::AreaScores(Arc::new(outcome)))
    }
}

struct AggregateClusterStage;

impl SyncStage for AggregateClusterStage {
    fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact> {
        let scored = inputs.scored_results()?;
        let areas = inputs.area_scores()?;
        let outcome = aggregate_clusters(&scored, &areas, &ctx.tunables);
        record_level(ctx, &outcome);
        Ok(Artifact::ClusterScores(Arc::new(outcome)))
    }
}

struct AggregateMacroStage;

impl SyncStage for AggregateMacroStage {
    fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact> {
        let scored = inputs.scored_results()?;
        let clusters = inputs.cluster_scores()?;
        let outcome = aggregate_macro_level(&scored, &clusters, &ctx.tunables);
        ctx.metrics
            .add_groups_aggregated(u64::from(outcome.score.is_some()));
        ctx.metrics.add_groups_failed(outcome.failures.len() as u64);
        Ok(Artifact::MacroScore(Arc::new(outcome)))
    }
}

fn sync_stage(
    index: usize,
    label: &str,
    inputs: Vec<ArtifactKey>,
    output: ArtifactKey,
    handler: Arc<dyn SyncStage>,
) -> StageDefinition {
    StageDefinition::new(
        index,
        label,
        ExecutionMode::Sync,
        inputs,
        output,
        StageHandler::Sync(handler),
    )
}

/// The fixed stage list.
pub fn standard_stages() -> Vec<StageDefinition> {
    use ArtifactKey::*;
    vec![
        sync_stage(
            0,
            STAGE_VALIDATE_CONFIG,
            vec![RawSpecification],
            Config,
            Arc::new(ValidateConfigStage),
        )
        .settling(RunPhase::ConfigValidated),
        sync_stage(
            1,
            STAGE_INGEST_DOCUMENT,
            vec![SourceDocument],
            Document,
            Arc::new(IngestDocumentStage),
        )
        .settling(RunPhase::Ingested),
        StageDefinition::new(
            2,
            STAGE_EXECUTE_TASKS,
            ExecutionMode::Async,
            vec![Config, Document],
            TaskResults,
            StageHandler::Async(Arc::new(ExecuteTasksStage)),
        )
        .entering(RunPhase::Executing),
        sync_stage(
            3,
            STAGE_SCORE_RESULTS,
            vec![Config, TaskResults],
            ScoredResults,
            Arc::new(ScoreResultsStage),
        )
        .settling(RunPhase::Scored),
        sync_stage(
            4,
            STAGE_AGGREGATE_DIMENSION,
            vec![ScoredResults],
            DimensionScores,
            Arc::new(AggregateDimensionStage),
        )
        .entering(RunPhase::Aggregating(Level::Dimension)),
        sync_stage(
            5,
            STAGE_AGGREGATE_AREA,
            vec![ScoredResults, DimensionScores],
            AreaScores,
            Arc::new(AggregateAreaStage),
        )
        .entering(RunPhase::Aggregating(Level::Area)),
        sync_stage(
            6,
            STAGE_AGGREGATE_CLUSTER,
            vec![ScoredResults, AreaScores],
            ClusterScores,
            Arc::new(AggregateClusterStage),
        )
        .entering(RunPhase::Aggregating(Level::Cluster)),
        sync_stage(
            7,
            STAGE_AGGREGATE_MACRO,
            vec![ScoredResults, ClusterScores],
            MacroScore,
            Arc::new(AggregateMacroStage),
        )
        .entering(RunPhase::Aggregating(Level::Macro)),
    ]
}

/// Everything a finished (complete or aborted) run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub invocation_id: String,
    /// Absent only when the run was aborted before the configuration gate.
    pub run_id: Option<String>,
    pub spec_digest: Option<String>,
    pub document_digest: String,
    pub status: RunStatus,
    pub phase_history: Vec<RunPhase>,
    pub abort_reason: Option<String>,
    pub summary: ExecutionSummary,
    pub task_results: Vec<TaskResult>,
    pub scored: Vec<ScoredResult>,
    pub dimensions: Vec<LevelScore>,
    pub areas: Vec<LevelScore>,
    pub clusters: Vec<LevelScore>,
    pub macro_score: Option<MacroScore>,
    pub group_failures: Vec<GroupFailure>,
    pub breakers: Vec<CircuitBreakerState>,
    pub stages: Vec<StageMetrics>,
    /// Resource soft-limit breaches.
    pub warnings: Vec<String>,
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    pub fn level(&self, level: Level) -> &[LevelScore] {
        match level {
            Level::Dimension => &self.dimensions,
            Level::Area => &self.areas,
            Level::Cluster => &self.clusters,
            Level::Macro => &[],
        }
    }

    fn assemble(
        invocation_id: String,
        document_digest: String,
        outcome: SequenceOutcome,
        metrics: MetricsSnapshot,
    ) -> Self {
        let config = match outcome.artifact(ArtifactKey::Config) {
            Some(Artifact::Config(c)) => Some(Arc::clone(c)),
            _ => None,
        };
        let level = |key: ArtifactKey| match outcome.artifact(key) {
            Some(
                Artifact::DimensionScores(o) | Artifact::AreaScores(o) | Artifact::ClusterScores(o),
            ) => Some(Arc::clone(o)),
            _ => None,
        };
        let dimensions = level(ArtifactKey::DimensionScores);
        let areas = level(ArtifactKey::AreaScores);
        let clusters = level(ArtifactKey::ClusterScores);
        let macro_outcome = match outcome.artifact(ArtifactKey::MacroScore) {
            Some(Artifact::MacroScore(m)) => Some(Arc::clone(m)),
            _ => None,
        };

        let mut group_failures = Vec::new();
        for o in [&dimensions, &areas, &clusters].into_iter().flatten() {
            group_failures.extend(o.failures.iter().cloned());
        }
        if let Some(m) = &macro_outcome {
            group_failures.extend(m.failures.iter().cloned());
        }

        let (summary, task_results, breakers, warnings) =
            match outcome.artifact(ArtifactKey::TaskResults) {
                Some(Artifact::TaskResults(out)) => (
                    out.summary.clone(),
                    out.results.clone(),
                    out.breakers.clone(),
                    out.warnings.clone(),
                ),
                _ => Default::default(),
            };
        let scored = match outcome.artifact(ArtifactKey::ScoredResults) {
            Some(Artifact::ScoredResults(s)) => s.as_ref().clone(),
            _ => Vec::new(),
        };

        Self {
            invocation_id,
            run_id: config.as_ref().map(|c| c.run_id.clone()),
            spec_digest: config.as_ref().map(|c| c.spec_digest.clone()),
            document_digest,
            status: outcome.status,
            phase_history: outcome.phase_history,
            abort_reason: outcome.abort_reason,
            summary,
            task_results,
            scored,
            dimensions: dimensions.map(|o| o.scores.clone()).unwrap_or_default(),
            areas: areas.map(|o| o.scores.clone()).unwrap_or_default(),
            clusters: clusters.map(|o| o.scores.clone()).unwrap_or_default(),
            macro_score: macro_outcome.and_then(|m| m.score.clone()),
            group_failures,
            breakers,
            stages: outcome.stages,
            warnings,
            metrics,
        }
    }
}

/// Drives one specification and document through the fixed stage list.
pub struct Orchestrator {
    tunables: PipelineTunables,
    registry: Arc<UnitRegistry>,
    scorer: Arc<dyn Scorer>,
    sink: Arc<dyn ObservabilitySink>,
    sequencer: PhaseSequencer,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("stages", &self.sequencer.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Validate the tunables and the stage list. Nothing runs on error.
    pub fn new(
        tunables: PipelineTunables,
        registry: UnitRegistry,
        scorer: Arc<dyn Scorer>,
    ) -> Result<Self> {
        tunables.validate()?;
        let sequencer = PhaseSequencer::new(
            standard_stages(),
            SEED_ARTIFACTS.to_vec(),
            RunPhase::Idle,
        )?;
        Ok(Self {
            tunables,
            registry: Arc::new(registry),
            scorer,
            sink: Arc::new(TracingSink),
            sequencer,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn stage_plan(&self) -> Vec<StagePlanEntry> {
        self.sequencer.plan()
    }

    pub fn tunables(&self) -> &PipelineTunables {
        &self.tunables
    }

    pub async fn run(&self, raw: RawSpecification, document: Document) -> Result<RunReport> {
        self.run_with_abort(raw, document, AbortSignal::new()).await
    }

    /// Like [`Orchestrator::run`], with a caller-held abort handle.
    #[instrument(skip_all, fields(stages = self.sequencer.len()))]
    pub async fn run_with_abort(
        &self,
        raw: RawSpecification,
        document: Document,
        abort: AbortSignal,
    ) -> Result<RunReport> {
        let ctx = Arc::new(RunContext::new(
            self.tunables.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.scorer),
            Arc::clone(&self.sink),
            abort,
        ));
        let invocation_id = ctx.invocation_id.clone();
        let document_digest = document.digest();
        let seeds = vec![
            Artifact::RawSpecification(Arc::new(raw)),
            Artifact::SourceDocument(Arc::new(document)),
        ];

        let started = Instant::now();
        emit_run_started(&invocation_id, self.sequencer.len());
        let outcome = self
            .sequencer
            .run(seeds, Arc::clone(&ctx))
            .instrument(run_span(&invocation_id))
            .await;

        match outcome {
            Ok(outcome) => {
                let metrics = ctx.metrics.flush(&invocation_id);
                let report = RunReport::assemble(invocation_id, document_digest, outcome, metrics);
                if let Some(reason) = &report.abort_reason {
                    warn!(invocation_id = %report.invocation_id, %reason, "run ended early");
                }
                emit_run_finished(
                    &report.invocation_id,
                    report.run_id.as_deref().unwrap_or("-"),
                    report.status.as_str(),
                    started.elapsed().as_millis() as u64,
                );
                Ok(report)
            }
            Err(e) => {
                ctx.metrics.flush(&invocation_id);
                emit_run_failed(&invocation_id, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::TieredError;
    use crate::execution::registry::AnalyticalUnit;
    use crate::scoring::EvidenceFieldScorer;
    use crate::domain::task::{Evidence, TaskDescriptor};

    struct Echo;

    #[async_trait]
    impl AnalyticalUnit for Echo {
        async fn execute(&self, task: &TaskDescriptor, _ctx: &UnitContext) -> anyhow::Result<Evidence> {
            Ok(task.payload.clone())
        }
    }

    fn spec() -> RawSpecification {
        RawSpecification::new(
            serde_json::json!({
                "expected_items": 2,
                "items": [
                    { "id": "Q1", "unit": "U1", "dimension": "D1", "area": "PA01", "cluster": "CL01",
                      "payload": { "score": 60 } },
                    { "id": "Q2", "unit": "U1", "dimension": "D1", "area": "PA01", "cluster": "CL01",
                      "payload": { "score": 80 } }
                ]
            }),
            serde_json::json!({ "U1": {} }),
        )
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            PipelineTunables::new(2, 3),
            UnitRegistry::new().with("U1", Arc::new(Echo)),
            Arc::new(EvidenceFieldScorer::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_stage_plan_is_fixed() {
        let plan = orchestrator().stage_plan();
        let labels: Vec<&str> = plan.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                STAGE_VALIDATE_CONFIG,
                STAGE_INGEST_DOCUMENT,
                STAGE_EXECUTE_TASKS,
                STAGE_SCORE_RESULTS,
                STAGE_AGGREGATE_DIMENSION,
                STAGE_AGGREGATE_AREA,
                STAGE_AGGREGATE_CLUSTER,
                STAGE_AGGREGATE_MACRO,
            ]
        );
        assert_eq!(plan[2].mode, ExecutionMode::Async);
        assert!(plan.iter().filter(|p| p.index != 2).all(|p| p.mode == ExecutionMode::Sync));
    }

    #[test]
    fn test_invalid_tunables_rejected_up_front() {
        let err = Orchestrator::new(
            PipelineTunables::new(0, 3),
            UnitRegistry::new(),
            Arc::new(EvidenceFieldScorer::default()),
        )
        .unwrap_err();
        assert!(matches!(err, TieredError::FatalConfiguration(_)));
    }

    #[tokio::test]
    async fn test_small_run_completes() {
        let report = orchestrator()
            .run(spec(), Document::from_paragraphs("One.\n\nTwo."))
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.dimensions[0].score, 70.0);
        assert_eq!(report.macro_score.as_ref().unwrap().score, 70.0);
        assert_eq!(report.stages.len(), 8);
        assert_eq!(report.phase_history.first(), Some(&RunPhase::Idle));
        assert_eq!(report.phase_history.last(), Some(&RunPhase::Complete));
        assert_eq!(report.metrics.groups_aggregated, 4);
    }

    #[tokio::test]
    async fn test_unregistered_unit_is_fatal() {
        let orch = Orchestrator::new(
            PipelineTunables::new(2, 3),
            UnitRegistry::new(),
            Arc::new(EvidenceFieldScorer::default()),
        )
        .unwrap();
        let err = orch
            .run(spec(), Document::from_paragraphs("text"))
            .await
            .unwrap_err();
        assert!(matches!(err, TieredError::FatalConfiguration(_)));
    }
}
