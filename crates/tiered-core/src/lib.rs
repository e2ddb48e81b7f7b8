//! Tiered core library
//!
//! Fixed-stage orchestration with bounded, fair, breaker-aware task execution,
//! and the four-level score hierarchy (dimension, area, cluster, macro) built
//! on top of it.

pub mod abort;
pub mod aggregation;
pub mod config;
pub mod domain;
pub mod execution;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod pipeline;
pub mod scoring;
pub mod telemetry;

pub use abort::AbortSignal;

pub use aggregation::{
    aggregate_hierarchy, AggregationGroupError, GroupFailure, HierarchyReport, LevelOutcome,
    MacroOutcome, QualityThresholds,
};

pub use config::{
    validate_specification, CoverageThresholds, ExpectedChildren, LevelWeights, PipelineTunables,
    RateBudget, RawSpecification, ResourceLimits, StageTimeouts, ValidatedConfig,
};

pub use domain::digest::{canonical_json, compute_digest};
pub use domain::{
    Chunk, Document, Evidence, ExecutionSummary, GroupKeys, Level, LevelScore, MacroScore,
    QualityTier, Result, ScoredResult, SkipReason, SystemicGap, TaskDescriptor, TaskOutcome,
    TaskResult, TieredError, ValidationReport,
};

pub use execution::{
    AnalyticalUnit, CircuitBreakerRegistry, CircuitBreakerState, ExecutionOutput, ResourceUsageSnapshot,
    UnitContext, UnitRegistry,
};

pub use metrics::{MetricsSnapshot, PipelineMetrics};

pub use obs::{
    emit_run_failed, emit_run_finished, emit_run_started, emit_stage_finished, emit_stage_started,
    run_span, ObservabilitySink, RunSpan, TracingSink,
};

pub use orchestrator::{standard_stages, Orchestrator, RunReport};

pub use pipeline::{
    ExecutionMode, RunPhase, RunStatus, StageMetrics, StageOutcome, StagePlanEntry,
};

pub use scoring::{EvidenceFieldScorer, Scorer};

pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
