//! Hierarchical aggregation: Dimension → Area → Cluster → Macro.
//!
//! Every level sorts its children by id before summing, so the same scored
//! results always produce bit-identical aggregates.

pub mod error;
pub mod hierarchy;
pub mod level;
pub mod macro_level;
pub mod quality;
pub mod weights;

pub use error::{AggregationGroupError, GroupFailure};
pub use hierarchy::{
    aggregate_areas, aggregate_clusters, aggregate_dimensions, aggregate_hierarchy,
    aggregate_macro_level, HierarchyReport, Lineage,
};
pub use level::{aggregate_level, ChildScore, GroupInput, LevelOutcome, LevelPolicy};
pub use macro_level::{aggregate_macro, coherence, systemic_gaps, MacroOutcome, MACRO_GROUP_ID};
pub use quality::QualityThresholds;
pub use weights::{equal_weights, resolve_weights};
