//! Errors contained to a single aggregation group.

use serde::{Deserialize, Serialize};

use crate::domain::score::Level;

/// Why one group could not be aggregated. Siblings are unaffected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationGroupError {
    #[error("explicit weights sum to {sum} (tolerance {tolerance})")]
    WeightSum { sum: f64, tolerance: f64 },

    #[error("child '{child}' has no explicit weight")]
    UnweightedChild { child: String },

    #[error("weight for '{child}' is {weight}; weights must be finite and non-negative")]
    InvalidWeight { child: String, weight: f64 },

    #[error("scored children carry zero total weight")]
    ZeroWeightMass,

    #[error("no child produced a valid score")]
    NoValidChildren,

    #[error("children disagree on the parent group: {parents:?}")]
    InconsistentParent { parents: Vec<String> },

    #[error("no parent group could be determined")]
    MissingParent,
}

/// Record of a skipped group, kept in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFailure {
    pub level: Level,
    pub group_id: String,
    pub error: String,
}

impl GroupFailure {
    pub fn new(level: Level, group_id: impl Into<String>, error: &AggregationGroupError) -> Self {
        Self {
            level,
            group_id: group_id.into(),
            error: error.to_string(),
        }
    }
}

impl std::fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} group '{}' skipped: {}", self.level, self.group_id, self.error)
    }
}
