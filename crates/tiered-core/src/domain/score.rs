//! Scored results and the four levels of aggregate scores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::task::GroupKeys;

/// Discrete quality classification, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Insufficient,
    Acceptable,
    Good,
    Excellent,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Insufficient,
        QualityTier::Acceptable,
        QualityTier::Good,
        QualityTier::Excellent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Insufficient => "insufficient",
            QualityTier::Acceptable => "acceptable",
            QualityTier::Good => "good",
            QualityTier::Excellent => "excellent",
        }
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score attached to a single task after rubric application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub task_id: String,
    /// 0–100, `None` when the task produced no usable evidence.
    pub score: Option<f64>,
    /// `score / 100`.
    pub normalized_score: Option<f64>,
    pub quality: Option<QualityTier>,
    pub groups: GroupKeys,
    pub error: Option<String>,
}

impl ScoredResult {
    /// A result with no score, carrying the reason.
    pub fn unscored(task_id: impl Into<String>, groups: GroupKeys, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            score: None,
            normalized_score: None,
            quality: None,
            groups,
            error: Some(error.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.score.is_some()
    }
}

/// Aggregation level, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Dimension,
    Area,
    Cluster,
    Macro,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Dimension => "dimension",
            Level::Area => "area",
            Level::Cluster => "cluster",
            Level::Macro => "macro",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the per-group validation checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub details: Vec<String>,
}

impl ValidationReport {
    pub fn passing() -> Self {
        Self {
            passed: true,
            details: Vec::new(),
        }
    }

    /// Record a failed check.
    pub fn fail(&mut self, detail: impl Into<String>) {
        self.passed = false;
        self.details.push(detail.into());
    }

    /// Record an informational note without failing.
    pub fn note(&mut self, detail: impl Into<String>) {
        self.details.push(detail.into());
    }
}

/// Aggregate score for one group at the dimension, area or cluster level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelScore {
    pub level: Level,
    pub group_id: String,
    /// Group at the next level up; `None` only for clusters, which feed macro.
    pub parent_id: Option<String>,
    pub score: f64,
    pub quality: QualityTier,
    /// Children whose scores went into `score`, in id order.
    pub contributing: Vec<String>,
    /// Effective weight per contributing child.
    pub weights: BTreeMap<String, f64>,
    pub expected_children: usize,
    pub validation: ValidationReport,
}

impl LevelScore {
    pub fn coverage(&self) -> f64 {
        if self.expected_children == 0 {
            return 0.0;
        }
        self.contributing.len() as f64 / self.expected_children as f64
    }
}

/// A top-level group scoring materially below the mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemicGap {
    pub group_id: String,
    pub score: f64,
    /// Mean minus score.
    pub deficit: f64,
}

/// The single macro-level synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroScore {
    pub score: f64,
    pub quality: QualityTier,
    /// 1.0 means every cluster scored identically.
    pub coherence: f64,
    pub systemic_gaps: Vec<SystemicGap>,
    pub contributing: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    pub expected_children: usize,
    pub validation: ValidationReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_tiers_are_ordered() {
        assert!(QualityTier::Excellent > QualityTier::Good);
        assert!(QualityTier::Good > QualityTier::Acceptable);
        assert!(QualityTier::Acceptable > QualityTier::Insufficient);
        let mut sorted = QualityTier::ALL;
        sorted.sort();
        assert_eq!(sorted, QualityTier::ALL);
    }

    #[test]
    fn test_validation_report_fail_flips_passed() {
        let mut report = ValidationReport::passing();
        report.note("weights: equal");
        assert!(report.passed);
        report.fail("coverage 2/5 below minimum 3");
        assert!(!report.passed);
        assert_eq!(report.details.len(), 2);
    }

    #[test]
    fn test_level_score_coverage() {
        let score = LevelScore {
            level: Level::Dimension,
            group_id: "D1".to_string(),
            parent_id: Some("PA01".to_string()),
            score: 70.0,
            quality: QualityTier::Good,
            contributing: vec!["Q1".to_string(), "Q2".to_string()],
            weights: BTreeMap::new(),
            expected_children: 4,
            validation: ValidationReport::passing(),
        };
        assert!((score.coverage() - 0.5).abs() < f64::EPSILON);
    }
}
