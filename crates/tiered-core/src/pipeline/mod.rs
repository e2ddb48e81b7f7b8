//! Stage sequencing: definitions, run state, instrumentation.

pub mod context;
pub mod instrument;
pub mod sequencer;
pub mod stage;
pub mod state;

pub use context::RunContext;
pub use instrument::{StageMetrics, StageOutcome};
pub use sequencer::{PhaseSequencer, SequenceOutcome};
pub use stage::{
    validate_stage_list, Artifact, ArtifactKey, AsyncStage, ExecutionMode, StageDefinition,
    StageHandler, StageInputs, StagePlanEntry, SyncStage,
};
pub use state::{RunPhase, RunStateMachine, RunStatus};
