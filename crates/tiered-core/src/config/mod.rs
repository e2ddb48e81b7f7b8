//! Configuration: the specification gate and run tunables.

pub mod gate;
pub mod tunables;

pub use gate::{validate_specification, RawSpecification, ValidatedConfig};
pub use tunables::{
    CoverageThresholds, ExpectedChildren, LevelWeights, PipelineTunables, RateBudget,
    ResourceLimits, StageTimeouts,
};
