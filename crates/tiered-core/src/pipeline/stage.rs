//! Stage definitions, typed artifacts and stage-list validation.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::aggregation::{LevelOutcome, MacroOutcome};
use crate::config::gate::{RawSpecification, ValidatedConfig};
use crate::domain::document::Document;
use crate::domain::error::{Result, TieredError};
use crate::domain::score::ScoredResult;
use crate::execution::executor::ExecutionOutput;
use crate::pipeline::context::RunContext;
use crate::pipeline::state::RunPhase;

/// Names of the artifacts passed between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKey {
    RawSpecification,
    SourceDocument,
    Config,
    Document,
    TaskResults,
    ScoredResults,
    DimensionScores,
    AreaScores,
    ClusterScores,
    MacroScore,
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactKey::RawSpecification => "raw_specification",
            ArtifactKey::SourceDocument => "source_document",
            ArtifactKey::Config => "config",
            ArtifactKey::Document => "document",
            ArtifactKey::TaskResults => "task_results",
            ArtifactKey::ScoredResults => "scored_results",
            ArtifactKey::DimensionScores => "dimension_scores",
            ArtifactKey::AreaScores => "area_scores",
            ArtifactKey::ClusterScores => "cluster_scores",
            ArtifactKey::MacroScore => "macro_score",
        };
        f.write_str(name)
    }
}

/// A stage output. Payloads are shared, never mutated after creation.
#[derive(Debug, Clone)]
pub enum Artifact {
    RawSpecification(Arc<RawSpecification>),
    SourceDocument(Arc<Document>),
    Config(Arc<ValidatedConfig>),
    Document(Arc<Document>),
    TaskResults(Arc<ExecutionOutput>),
    ScoredResults(Arc<Vec<ScoredResult>>),
    DimensionScores(Arc<LevelOutcome>),
    AreaScores(Arc<LevelOutcome>),
    ClusterScores(Arc<LevelOutcome>),
    MacroScore(Arc<MacroOutcome>),
}

impl Artifact {
    pub fn key(&self) -> ArtifactKey {
        match self {
            Artifact::RawSpecification(_) => ArtifactKey::RawSpecification,
            Artifact::SourceDocument(_) => ArtifactKey::SourceDocument,
            Artifact::Config(_) => ArtifactKey::Config,
            Artifact::Document(_) => ArtifactKey::Document,
            Artifact::TaskResults(_) => ArtifactKey::TaskResults,
            Artifact::ScoredResults(_) => ArtifactKey::ScoredResults,
            Artifact::DimensionScores(_) => ArtifactKey::DimensionScores,
            Artifact::AreaScores(_) => ArtifactKey::AreaScores,
            Artifact::ClusterScores(_) => ArtifactKey::ClusterScores,
            Artifact::MacroScore(_) => ArtifactKey::MacroScore,
        }
    }

    /// Item count reported in stage instrumentation.
    pub fn item_count(&self) -> usize {
        match self {
            Artifact::RawSpecification(_) | Artifact::Config(_) => 1,
            Artifact::SourceDocument(d) | Artifact::Document(d) => d.chunk_count(),
            Artifact::TaskResults(out) => out.results.len(),
            Artifact::ScoredResults(s) => s.len(),
            Artifact::DimensionScores(o) | Artifact::AreaScores(o) | Artifact::ClusterScores(o) => {
                o.scores.len()
            }
            Artifact::MacroScore(m) => usize::from(m.score.is_some()),
        }
    }

    /// Contained problems worth surfacing as stage warnings.
    pub fn warnings(&self) -> Vec<String> {
        match self {
            Artifact::TaskResults(out) => {
                let mut w = out.warnings.clone();
                if out.summary.failed > 0 {
                    w.push(format!("{} task(s) failed", out.summary.failed));
                }
                if out.summary.skipped > 0 {
                    w.push(format!("{} task(s) skipped by open breakers", out.summary.skipped));
                }
                w
            }
            Artifact::ScoredResults(s) => {
                let unscored = s.iter().filter(|r| !r.is_valid()).count();
                if unscored > 0 {
                    vec![format!("{unscored} result(s) without a score")]
                } else {
                    Vec::new()
                }
            }
            Artifact::DimensionScores(o) | Artifact::AreaScores(o) | Artifact::ClusterScores(o) => {
                o.failures.iter().map(|f| f.to_string()).collect()
            }
            Artifact::MacroScore(m) => m.failures.iter().map(|f| f.to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Whether a stage handler is run on the blocking pool or awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl FromStr for ExecutionMode {
    type Err = TieredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sync" => Ok(ExecutionMode::Sync),
            "async" => Ok(ExecutionMode::Async),
            other => Err(TieredError::config(format!(
                "unknown execution mode '{other}' (expected 'sync' or 'async')"
            ))),
        }
    }
}

impl TryFrom<String> for ExecutionMode {
    type Error = TieredError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ExecutionMode> for String {
    fn from(mode: ExecutionMode) -> Self {
        mode.as_str().to_string()
    }
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sync => "sync",
            ExecutionMode::Async => "async",
        }
    }
}

/// Exactly the declared inputs of one stage.
#[derive(Debug, Clone)]
pub struct StageInputs {
    index: usize,
    label: String,
    artifacts: BTreeMap<ArtifactKey, Artifact>,
}

macro_rules! input_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Result<$ty> {
            match self.artifacts.get(&ArtifactKey::$variant) {
                Some(Artifact::$variant(value)) => Ok(Arc::clone(value)),
                _ => Err(self.missing(ArtifactKey::$variant)),
            }
        }
    };
}

impl StageInputs {
    pub fn new(index: usize, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts.insert(artifact.key(), artifact);
    }

    pub fn keys(&self) -> impl Iterator<Item = ArtifactKey> + '_ {
        self.artifacts.keys().copied()
    }

    fn missing(&self, key: ArtifactKey) -> TieredError {
        TieredError::StageContract {
            index: self.index,
            label: self.label.clone(),
            detail: format!("input '{key}' was not declared or not produced"),
        }
    }

    input_accessor!(raw_specification, RawSpecification, Arc<RawSpecification>);
    input_accessor!(source_document, SourceDocument, Arc<Document>);
    input_accessor!(config, Config, Arc<ValidatedConfig>);
    input_accessor!(document, Document, Arc<Document>);
    input_accessor!(task_results, TaskResults, Arc<ExecutionOutput>);
    input_accessor!(scored_results, ScoredResults, Arc<Vec<ScoredResult>>);
    input_accessor!(dimension_scores, DimensionScores, Arc<LevelOutcome>);
    input_accessor!(area_scores, AreaScores, Arc<LevelOutcome>);
    input_accessor!(cluster_scores, ClusterScores, Arc<LevelOutcome>);
}

/// CPU-bound stage, run on the blocking pool.
pub trait SyncStage: Send + Sync {
    fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact>;
}

/// Stage that awaits external work.
#[async_trait]
pub trait AsyncStage: Send + Sync {
    async fn run(&self, inputs: StageInputs, ctx: &RunContext) -> Result<Artifact>;
}

#[derive(Clone)]
pub enum StageHandler {
    Sync(Arc<dyn SyncStage>),
    Async(Arc<dyn AsyncStage>),
}

impl StageHandler {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            StageHandler::Sync(_) => ExecutionMode::Sync,
            StageHandler::Async(_) => ExecutionMode::Async,
        }
    }
}

impl std::fmt::Debug for StageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StageHandler::{:?}", self.mode())
    }
}

/// One entry of the fixed stage list.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub index: usize,
    pub label: String,
    pub mode: ExecutionMode,
    pub inputs: Vec<ArtifactKey>,
    pub output: ArtifactKey,
    /// Phase entered when the stage starts.
    pub enters: Option<RunPhase>,
    /// Phase entered when the stage completes.
    pub settles: Option<RunPhase>,
    pub handler: StageHandler,
}

impl StageDefinition {
    pub fn new(
        index: usize,
        label: impl Into<String>,
        mode: ExecutionMode,
        inputs: Vec<ArtifactKey>,
        output: ArtifactKey,
        handler: StageHandler,
    ) -> Self {
        Self {
            index,
            label: label.into(),
            mode,
            inputs,
            output,
            enters: None,
            settles: None,
            handler,
        }
    }

    pub fn entering(mut self, phase: RunPhase) -> Self {
        self.enters = Some(phase);
        self
    }

    pub fn settling(mut self, phase: RunPhase) -> Self {
        self.settles = Some(phase);
        self
    }
}

/// Index, label and mode of one stage; the public shape of a stage plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlanEntry {
    pub index: usize,
    pub label: String,
    pub mode: ExecutionMode,
}

/// Reject malformed stage lists before anything runs.
pub fn validate_stage_list(stages: &[StageDefinition], seeds: &[ArtifactKey]) -> Result<()> {
    if stages.is_empty() {
        return Err(TieredError::config("stage list is empty"));
    }

    let mut indices = BTreeSet::new();
    for stage in stages {
        if !indices.insert(stage.index) {
            return Err(TieredError::config(format!(
                "duplicate stage index {} ({})",
                stage.index, stage.label
            )));
        }
    }
    for (position, stage) in stages.iter().enumerate() {
        if stage.index != position {
            return Err(TieredError::config(format!(
                "stage indices must be contiguous from 0: position {position} holds index {} ({})",
                stage.index, stage.label
            )));
        }
    }

    let mut labels = BTreeSet::new();
    let mut available: BTreeSet<ArtifactKey> = seeds.iter().copied().collect();
    for stage in stages {
        if stage.label.trim().is_empty() {
            return Err(TieredError::config(format!("stage {} has an empty label", stage.index)));
        }
        if !labels.insert(stage.label.as_str()) {
            return Err(TieredError::config(format!("duplicate stage label '{}'", stage.label)));
        }
        if stage.handler.mode() != stage.mode {
            return Err(TieredError::config(format!(
                "stage {} ({}) declares mode '{}' but its handler is '{}'",
                stage.index,
                stage.label,
                stage.mode.as_str(),
                stage.handler.mode().as_str()
            )));
        }
        for input in &stage.inputs {
            if !available.contains(input) {
                return Err(TieredError::config(format!(
                    "stage {} ({}) consumes '{input}' which no earlier stage or seed produces",
                    stage.index, stage.label
                )));
            }
        }
        if !available.insert(stage.output) {
            return Err(TieredError::config(format!(
                "stage {} ({}) produces '{}' which already exists",
                stage.index, stage.label, stage.output
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl SyncStage for Noop {
        fn run(&self, inputs: StageInputs, _ctx: &RunContext) -> Result<Artifact> {
            Ok(Artifact::Config(inputs.config()?))
        }
    }

    struct NoopAsync;

    #[async_trait]
    impl AsyncStage for NoopAsync {
        async fn run(&self, inputs: StageInputs, _ctx: &RunContext) -> Result<Artifact> {
            Ok(Artifact::Document(inputs.document()?))
        }
    }

    fn sync_stage(index: usize, label: &str, inputs: Vec<ArtifactKey>, output: ArtifactKey) -> StageDefinition {
        StageDefinition::new(
            index,
            label,
            ExecutionMode::Sync,
            inputs,
            output,
            StageHandler::Sync(Arc::new(Noop)),
        )
    }

    #[test]
    fn test_valid_list_passes() {
        let stages = vec![
            sync_stage(0, "a", vec![ArtifactKey::RawSpecification], ArtifactKey::Config),
            sync_stage(1, "b", vec![ArtifactKey::Config], ArtifactKey::Document),
        ];
        validate_stage_list(&stages, &[ArtifactKey::RawSpecification]).unwrap();
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let stages = vec![
            sync_stage(0, "a", vec![], ArtifactKey::Config),
            sync_stage(0, "b", vec![], ArtifactKey::Document),
        ];
        let err = validate_stage_list(&stages, &[]).unwrap_err();
        assert!(err.to_string().contains("duplicate stage index 0"));
    }

    #[test]
    fn test_gap_rejected() {
        let stages = vec![
            sync_stage(0, "a", vec![], ArtifactKey::Config),
            sync_stage(2, "b", vec![], ArtifactKey::Document),
        ];
        let err = validate_stage_list(&stages, &[]).unwrap_err();
        assert!(err.to_string().contains("contiguous"));
    }

    #[test]
    fn test_mode_mismatch_rejected() {
        let mut stage = sync_stage(0, "a", vec![], ArtifactKey::Config);
        stage.handler = StageHandler::Async(Arc::new(NoopAsync));
        let err = validate_stage_list(&[stage], &[]).unwrap_err();
        assert!(err.to_string().contains("handler is 'async'"));
    }

    #[test]
    fn test_unproduced_input_rejected() {
        let stages = vec![sync_stage(0, "a", vec![ArtifactKey::TaskResults], ArtifactKey::Config)];
        let err = validate_stage_list(&stages, &[ArtifactKey::RawSpecification]).unwrap_err();
        assert!(err.to_string().contains("task_results"));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert_eq!("sync".parse::<ExecutionMode>().unwrap(), ExecutionMode::Sync);
        assert!("parallel".parse::<ExecutionMode>().is_err());
        let parsed: std::result::Result<ExecutionMode, _> = serde_json::from_str("\"threaded\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_inputs_only_expose_declared_artifacts() {
        let inputs = StageInputs::new(3, "score_results");
        let err = inputs.task_results().unwrap_err();
        assert!(matches!(err, TieredError::StageContract { index: 3, .. }));
    }
}
