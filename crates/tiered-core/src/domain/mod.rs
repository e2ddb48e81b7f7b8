//! Domain models for a pipeline run.
//!
//! - `TaskDescriptor` / `TaskResult`: analytical work and its outcome
//! - `ScoredResult`: a task result after rubric application
//! - `LevelScore` / `MacroScore`: the four aggregation levels
//! - `Document`: the ingested input

pub mod digest;
pub mod document;
pub mod error;
pub mod score;
pub mod task;

pub use document::{Chunk, Document};
pub use error::{Result, TieredError};
pub use score::{
    Level, LevelScore, MacroScore, QualityTier, ScoredResult, SystemicGap, ValidationReport,
};
pub use task::{
    Evidence, ExecutionSummary, GroupKeys, SkipReason, TaskDescriptor, TaskOutcome, TaskResult,
};
