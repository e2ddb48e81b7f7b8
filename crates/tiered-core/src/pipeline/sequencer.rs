//! Fixed-order stage execution.
//!
//! Each stage is dispatched with exactly its declared inputs, bounded by its
//! timeout, and reported to the observability sink on both ends. The abort
//! flag is checked before every dispatch; once tripped no further stage runs
//! and the sequence ends `Aborted` with whatever artifacts exist so far.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{info, instrument, warn};

use crate::domain::error::{Result, TieredError};
use crate::pipeline::context::RunContext;
use crate::pipeline::instrument::{StageMetrics, StageOutcome, StageTimer};
use crate::pipeline::stage::{
    validate_stage_list, Artifact, ArtifactKey, StageDefinition, StageHandler, StageInputs,
    StagePlanEntry,
};
use crate::pipeline::state::{RunPhase, RunStateMachine, RunStatus};

/// What a sequence run leaves behind when it did not fail.
#[derive(Debug)]
pub struct SequenceOutcome {
    pub status: RunStatus,
    pub phase_history: Vec<RunPhase>,
    pub artifacts: BTreeMap<ArtifactKey, Artifact>,
    pub stages: Vec<StageMetrics>,
    pub abort_reason: Option<String>,
}

impl SequenceOutcome {
    pub fn artifact(&self, key: ArtifactKey) -> Option<&Artifact> {
        self.artifacts.get(&key)
    }
}

#[derive(Debug)]
pub struct PhaseSequencer {
    stages: Vec<StageDefinition>,
    seeds: Vec<ArtifactKey>,
    initial: RunPhase,
}

impl PhaseSequencer {
    /// Validate the stage list against the seed keys. Nothing runs on error.
    pub fn new(stages: Vec<StageDefinition>, seeds: Vec<ArtifactKey>, initial: RunPhase) -> Result<Self> {
        validate_stage_list(&stages, &seeds)?;
        Ok(Self {
            stages,
            seeds,
            initial,
        })
    }

    pub fn plan(&self) -> Vec<StagePlanEntry> {
        self.stages
            .iter()
            .map(|s| StagePlanEntry {
                index: s.index,
                label: s.label.clone(),
                mode: s.mode,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(&self, seeds: Vec<Artifact>, ctx: Arc<RunContext>) -> Result<SequenceOutcome> {
        let mut artifacts: BTreeMap<ArtifactKey, Artifact> =
            seeds.into_iter().map(|a| (a.key(), a)).collect();
        for key in &self.seeds {
            if !artifacts.contains_key(key) {
                return Err(TieredError::config(format!("seed artifact '{key}' was not supplied")));
            }
        }

        let mut state = RunStateMachine::starting_at(self.initial);
        let mut stages = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            if ctx.abort.is_aborted() {
                let reason = ctx.abort.reason();
                info!(
                    invocation_id = %ctx.invocation_id,
                    next_stage = %stage.label,
                    reason = ?reason,
                    "run aborted before stage dispatch"
                );
                state.advance(RunPhase::Aborted)?;
                return Ok(SequenceOutcome {
                    status: RunStatus::Aborted,
                    phase_history: state.history().to_vec(),
                    artifacts,
                    stages,
                    abort_reason: reason,
                });
            }

            if let Some(phase) = stage.enters {
                state.advance(phase)?;
            }

            let mut inputs = StageInputs::new(stage.index, &stage.label);
            for key in &stage.inputs {
                match artifacts.get(key) {
                    Some(artifact) => inputs.insert(artifact.clone()),
                    None => {
                        state.fail();
                        return Err(TieredError::StageContract {
                            index: stage.index,
                            label: stage.label.clone(),
                            detail: format!("declared input '{key}' is missing"),
                        });
                    }
                }
            }

            match run_stage(stage, inputs, Arc::clone(&ctx)).await {
                Ok((artifact, metrics)) => {
                    stages.push(metrics);
                    artifacts.insert(stage.output, artifact);
                }
                Err(e) => {
                    state.fail();
                    return Err(e);
                }
            }

            if let Some(phase) = stage.settles {
                state.advance(phase)?;
            }
        }

        let (status, abort_reason) = if ctx.abort.is_aborted() {
            state.advance(RunPhase::Aborted)?;
            (RunStatus::Aborted, ctx.abort.reason())
        } else {
            state.advance(RunPhase::Complete)?;
            (RunStatus::Complete, None)
        };
        Ok(SequenceOutcome {
            status,
            phase_history: state.history().to_vec(),
            artifacts,
            stages,
            abort_reason,
        })
    }
}

#[instrument(skip_all, fields(index = stage.index, label = %stage.label))]
async fn run_stage(
    stage: &StageDefinition,
    inputs: StageInputs,
    ctx: Arc<RunContext>,
) -> Result<(Artifact, StageMetrics)> {
    let limit_ms = ctx.tunables.stage_timeouts.for_stage(&stage.label);
    ctx.sink.stage_started(&ctx.invocation_id, stage.index, &stage.label);
    let timer = StageTimer::start(stage.index, &stage.label, stage.mode);

    let dispatched = dispatch(
        stage.handler.clone(),
        inputs,
        Arc::clone(&ctx),
        stage.index,
        &stage.label,
    );
    let outcome = match tokio::time::timeout(Duration::from_millis(limit_ms), dispatched).await {
        Err(_) => Err((
            StageOutcome::TimedOut,
            TieredError::StageTimeout {
                index: stage.index,
                label: stage.label.clone(),
                limit_ms,
            },
        )),
        Ok(Err(e)) => Err((StageOutcome::Failed, e)),
        Ok(Ok(artifact)) if artifact.key() != stage.output => Err((
            StageOutcome::Failed,
            TieredError::StageContract {
                index: stage.index,
                label: stage.label.clone(),
                detail: format!(
                    "produced '{}' but declares '{}'",
                    artifact.key(),
                    stage.output
                ),
            },
        )),
        Ok(Ok(artifact)) => Ok(artifact),
    };

    match outcome {
        Ok(artifact) => {
            let metrics = timer.finish(
                StageOutcome::Completed,
                artifact.item_count(),
                artifact.warnings(),
                Vec::new(),
            );
            ctx.sink.stage_finished(&ctx.invocation_id, &metrics);
            Ok((artifact, metrics))
        }
        Err((kind, error)) => {
            warn!(error = %error, kind = error.kind(), "stage halted the run");
            let metrics = timer.finish(kind, 0, Vec::new(), vec![error.to_string()]);
            ctx.sink.stage_finished(&ctx.invocation_id, &metrics);
            Err(error)
        }
    }
}

async fn dispatch(
    handler: StageHandler,
    inputs: StageInputs,
    ctx: Arc<RunContext>,
    index: usize,
    label: &str,
) -> Result<Artifact> {
    let failed = |reason: String| TieredError::StageFailed {
        index,
        label: label.to_string(),
        reason,
    };
    match handler {
        StageHandler::Sync(handler) => {
            tokio::task::spawn_blocking(move || handler.run(inputs, &ctx))
                .await
                .map_err(|e| failed(format!("handler did not complete: {e}")))?
        }
        StageHandler::Async(handler) => AssertUnwindSafe(handler.run(inputs, &ctx))
            .catch_unwind()
            .await
            .map_err(|_| failed("handler panicked".to_string()))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortSignal;
    use crate::config::gate::RawSpecification;
    use crate::config::tunables::PipelineTunables;
    use crate::domain::score::Level;
    use crate::execution::registry::UnitRegistry;
    use crate::obs::TracingSink;
    use crate::pipeline::stage::{AsyncStage, ExecutionMode, SyncStage};
    use crate::scoring::EvidenceFieldScorer;
    use async_trait::async_trait;

    struct Passthrough;

    impl SyncStage for Passthrough {
        fn run(&self, inputs: StageInputs, _ctx: &RunContext) -> Result<Artifact> {
            Ok(Artifact::RawSpecification(inputs.raw_specification()?))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl AsyncStage for Sleeper {
        async fn run(&self, inputs: StageInputs, _ctx: &RunContext) -> Result<Artifact> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Artifact::RawSpecification(inputs.raw_specification()?))
        }
    }

    struct Exploder;

    impl SyncStage for Exploder {
        fn run(&self, _inputs: StageInputs, _ctx: &RunContext) -> Result<Artifact> {
            panic!("stage bug");
        }
    }

    fn ctx(tunables: PipelineTunables) -> Arc<RunContext> {
        Arc::new(RunContext::new(
            tunables,
            Arc::new(UnitRegistry::new()),
            Arc::new(EvidenceFieldScorer::default()),
            Arc::new(TracingSink),
            AbortSignal::new(),
        ))
    }

    fn seed() -> Vec<Artifact> {
        vec![Artifact::RawSpecification(Arc::new(RawSpecification::new(
            serde_json::json!({}),
            serde_json::json!({}),
        )))]
    }

    fn single(handler: StageHandler, mode: ExecutionMode, output: ArtifactKey) -> PhaseSequencer {
        let stage = StageDefinition::new(
            0,
            "only",
            mode,
            vec![ArtifactKey::RawSpecification],
            output,
            handler,
        );
        // Start one step before `Complete` so a single stage can finish the run.
        let initial = RunPhase::Aggregating(Level::Macro);
        PhaseSequencer::new(vec![stage], vec![ArtifactKey::RawSpecification], initial).unwrap()
    }

    #[tokio::test]
    async fn test_wrong_artifact_is_contract_violation() {
        let seq = single(
            StageHandler::Sync(Arc::new(Passthrough)),
            ExecutionMode::Sync,
            ArtifactKey::Config,
        );
        let err = seq.run(seed(), ctx(PipelineTunables::new(1, 1))).await.unwrap_err();
        assert!(matches!(err, TieredError::StageContract { index: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_halts_run() {
        let mut tunables = PipelineTunables::new(1, 1);
        tunables.stage_timeouts.per_stage.insert("only".to_string(), 50);
        let seq = single(
            StageHandler::Async(Arc::new(Sleeper)),
            ExecutionMode::Async,
            ArtifactKey::Config,
        );
        let err = seq.run(seed(), ctx(tunables)).await.unwrap_err();
        assert!(matches!(err, TieredError::StageTimeout { limit_ms: 50, .. }));
    }

    #[tokio::test]
    async fn test_panicking_sync_stage_is_stage_failure() {
        let seq = single(
            StageHandler::Sync(Arc::new(Exploder)),
            ExecutionMode::Sync,
            ArtifactKey::Config,
        );
        let err = seq.run(seed(), ctx(PipelineTunables::new(1, 1))).await.unwrap_err();
        assert!(matches!(err, TieredError::StageFailed { .. }));
    }

    #[tokio::test]
    async fn test_abort_before_first_stage() {
        let stage = StageDefinition::new(
            0,
            "only",
            ExecutionMode::Sync,
            vec![],
            ArtifactKey::Config,
            StageHandler::Sync(Arc::new(Passthrough)),
        );
        let seq = PhaseSequencer::new(vec![stage], vec![], RunPhase::Idle).unwrap();
        let ctx = ctx(PipelineTunables::new(1, 1));
        ctx.abort.abort("operator");
        let outcome = seq.run(vec![], ctx).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.abort_reason.as_deref(), Some("operator"));
        assert!(outcome.stages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_seed_rejected() {
        let seq = single(
            StageHandler::Sync(Arc::new(Passthrough)),
            ExecutionMode::Sync,
            ArtifactKey::Config,
        );
        let err = seq.run(vec![], ctx(PipelineTunables::new(1, 1))).await.unwrap_err();
        assert!(err.to_string().contains("seed artifact"));
    }
}
