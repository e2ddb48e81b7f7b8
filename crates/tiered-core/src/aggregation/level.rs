//! The per-level aggregation algorithm shared by dimension, area and cluster.
//!
//! For each group: sort children by id, drop the ones without a usable score,
//! resolve weights, take the weighted sum, check coverage, classify. A group
//! that cannot be aggregated is logged, recorded as a [`GroupFailure`] and
//! skipped; its siblings continue.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregation::error::{AggregationGroupError, GroupFailure};
use crate::aggregation::quality::QualityThresholds;
use crate::aggregation::weights::resolve_weights;
use crate::domain::score::{Level, LevelScore, QualityTier, ValidationReport};

/// One child of a group. `score` is `None` when the child produced nothing
/// usable (unscored task, or a lower-level group that was skipped).
#[derive(Debug, Clone, PartialEq)]
pub struct ChildScore {
    pub id: String,
    pub score: Option<f64>,
}

impl ChildScore {
    pub fn new(id: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }

    fn usable(&self) -> Option<f64> {
        self.score
            .filter(|s| s.is_finite() && (0.0..=100.0).contains(s))
    }
}

/// Children of one group and the parent ids they point at.
#[derive(Debug, Clone, Default)]
pub struct GroupInput {
    pub children: Vec<ChildScore>,
    pub parents: BTreeSet<String>,
}

/// Static knobs for one level.
#[derive(Debug, Clone, Copy)]
pub struct LevelPolicy<'a> {
    pub level: Level,
    pub min_coverage: usize,
    /// Group id → child id → weight.
    pub weights: &'a BTreeMap<String, BTreeMap<String, f64>>,
    /// Group id → declared child count.
    pub expected: &'a BTreeMap<String, usize>,
    pub tolerance: f64,
    pub quality: &'a QualityThresholds,
}

/// All group scores for one level, plus the groups that were skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelOutcome {
    pub level: Level,
    /// Sorted by group id.
    pub scores: Vec<LevelScore>,
    pub failures: Vec<GroupFailure>,
}

impl LevelOutcome {
    pub fn get(&self, group_id: &str) -> Option<&LevelScore> {
        self.scores
            .binary_search_by(|s| s.group_id.as_str().cmp(group_id))
            .ok()
            .map(|i| &self.scores[i])
    }
}

/// Level-independent result of aggregating one group.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GroupAggregate {
    pub score: f64,
    pub quality: QualityTier,
    pub contributing: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    pub expected_children: usize,
    pub validation: ValidationReport,
}

/// Core weighted rollup over one group's children.
pub(crate) fn aggregate_group(
    children: &[ChildScore],
    explicit: Option<&BTreeMap<String, f64>>,
    declared: Option<usize>,
    min_coverage: usize,
    tolerance: f64,
    quality: &QualityThresholds,
) -> Result<GroupAggregate, AggregationGroupError> {
    let mut sorted: Vec<&ChildScore> = children.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let all: Vec<&str> = sorted.iter().map(|c| c.id.as_str()).collect();
    let valid: Vec<(&str, f64)> = sorted
        .iter()
        .filter_map(|c| c.usable().map(|s| (c.id.as_str(), s)))
        .collect();
    if valid.is_empty() {
        return Err(AggregationGroupError::NoValidChildren);
    }
    let scored: Vec<&str> = valid.iter().map(|(id, _)| *id).collect();

    let weights = resolve_weights(&all, &scored, explicit, tolerance)?;
    let score = valid
        .iter()
        .map(|(id, s)| weights.get(*id).copied().unwrap_or(0.0) * s)
        .sum::<f64>()
        .clamp(0.0, 100.0);

    let expected_children = declared.unwrap_or(0).max(all.len());
    let mut validation = ValidationReport::passing();
    if valid.len() < min_coverage {
        validation.fail(format!(
            "coverage {}/{} below minimum {}",
            valid.len(),
            expected_children,
            min_coverage
        ));
    }
    let unscored: Vec<&str> = sorted
        .iter()
        .filter(|c| c.usable().is_none())
        .map(|c| c.id.as_str())
        .collect();
    if !unscored.is_empty() {
        validation.note(format!("unscored children: {}", unscored.join(", ")));
    }
    if expected_children > all.len() {
        validation.note(format!(
            "{} expected child(ren) never reported",
            expected_children - all.len()
        ));
    }
    validation.note(if explicit.is_some() {
        "weights: explicit"
    } else {
        "weights: equal"
    });

    Ok(GroupAggregate {
        score,
        quality: quality.classify(score),
        contributing: scored.iter().map(|id| id.to_string()).collect(),
        weights,
        expected_children,
        validation,
    })
}

fn resolve_parent(level: Level, parents: &BTreeSet<String>) -> Result<Option<String>, AggregationGroupError> {
    if level == Level::Cluster {
        return Ok(None);
    }
    match parents.len() {
        0 => Err(AggregationGroupError::MissingParent),
        1 => Ok(parents.iter().next().cloned()),
        _ => Err(AggregationGroupError::InconsistentParent {
            parents: parents.iter().cloned().collect(),
        }),
    }
}

/// Aggregate every group of one level. Groups are processed in id order.
pub fn aggregate_level(policy: &LevelPolicy<'_>, groups: BTreeMap<String, GroupInput>) -> LevelOutcome {
    let mut scores = Vec::with_capacity(groups.len());
    let mut failures = Vec::new();

    for (group_id, input) in groups {
        let built = resolve_parent(policy.level, &input.parents).and_then(|parent_id| {
            let agg = aggregate_group(
                &input.children,
                policy.weights.get(&group_id),
                policy.expected.get(&group_id).copied(),
                policy.min_coverage,
                policy.tolerance,
                policy.quality,
            )?;
            Ok(LevelScore {
                level: policy.level,
                group_id: group_id.clone(),
                parent_id,
                score: agg.score,
                quality: agg.quality,
                contributing: agg.contributing,
                weights: agg.weights,
                expected_children: agg.expected_children,
                validation: agg.validation,
            })
        });
        match built {
            Ok(score) => {
                debug!(
                    level = %policy.level,
                    group = %score.group_id,
                    score = score.score,
                    quality = %score.quality,
                    passed = score.validation.passed,
                    "group aggregated"
                );
                scores.push(score);
            }
            Err(error) => {
                warn!(level = %policy.level, group = %group_id, %error, "aggregation group skipped");
                failures.push(GroupFailure::new(policy.level, group_id, &error));
            }
        }
    }

    LevelOutcome {
        level: policy.level,
        scores,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn children(spec: &[(&str, Option<f64>)]) -> Vec<ChildScore> {
        spec.iter().map(|(id, s)| ChildScore::new(*id, *s)).collect()
    }

    fn group(spec: &[(&str, Option<f64>)], parent: &str) -> GroupInput {
        GroupInput {
            children: children(spec),
            parents: [parent.to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_equal_weighted_mean() {
        let q = QualityThresholds::default();
        let agg = aggregate_group(
            &children(&[("b", Some(80.0)), ("a", Some(60.0))]),
            None,
            None,
            1,
            1e-6,
            &q,
        )
        .unwrap();
        assert_eq!(agg.score, 70.0);
        assert_eq!(agg.quality, QualityTier::Good);
        assert_eq!(agg.contributing, vec!["a", "b"]);
        assert!(agg.validation.passed);
    }

    #[test]
    fn test_low_coverage_still_scores() {
        let q = QualityThresholds::default();
        let agg = aggregate_group(
            &children(&[("a", Some(40.0)), ("b", Some(60.0))]),
            None,
            Some(5),
            3,
            1e-6,
            &q,
        )
        .unwrap();
        assert!(!agg.validation.passed);
        assert_eq!(agg.score, 50.0);
        assert_eq!(agg.expected_children, 5);
        assert!(agg.validation.details[0].contains("coverage 2/5"));
    }

    #[test]
    fn test_null_children_excluded_from_provenance() {
        let q = QualityThresholds::default();
        let agg = aggregate_group(
            &children(&[("a", Some(90.0)), ("b", None), ("c", Some(f64::NAN))]),
            None,
            None,
            1,
            1e-6,
            &q,
        )
        .unwrap();
        assert_eq!(agg.contributing, vec!["a"]);
        assert_eq!(agg.score, 90.0);
        assert_eq!(agg.expected_children, 3);
    }

    #[test]
    fn test_all_null_is_group_error() {
        let q = QualityThresholds::default();
        let err = aggregate_group(&children(&[("a", None)]), None, None, 1, 1e-6, &q).unwrap_err();
        assert_eq!(err, AggregationGroupError::NoValidChildren);
    }

    #[test]
    fn test_failing_group_does_not_stop_siblings() {
        let q = QualityThresholds::default();
        let mut weights = BTreeMap::new();
        weights.insert(
            "D2".to_string(),
            [("x".to_string(), 0.9)].into_iter().collect::<BTreeMap<_, _>>(),
        );
        let expected = BTreeMap::new();
        let policy = LevelPolicy {
            level: Level::Dimension,
            min_coverage: 1,
            weights: &weights,
            expected: &expected,
            tolerance: 1e-6,
            quality: &q,
        };
        let mut groups = BTreeMap::new();
        groups.insert("D1".to_string(), group(&[("q1", Some(50.0))], "PA01"));
        groups.insert("D2".to_string(), group(&[("x", Some(50.0))], "PA01"));
        groups.insert("D3".to_string(), group(&[("q3", Some(70.0))], "PA02"));

        let out = aggregate_level(&policy, groups);
        assert_eq!(out.scores.len(), 2);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].group_id, "D2");
        assert_eq!(out.get("D3").unwrap().parent_id.as_deref(), Some("PA02"));
        assert!(out.get("D2").is_none());
    }

    #[test]
    fn test_inconsistent_parent_is_group_error() {
        let q = QualityThresholds::default();
        let empty = BTreeMap::new();
        let expected = BTreeMap::new();
        let policy = LevelPolicy {
            level: Level::Area,
            min_coverage: 1,
            weights: &empty,
            expected: &expected,
            tolerance: 1e-6,
            quality: &q,
        };
        let mut input = group(&[("D1", Some(50.0))], "CL01");
        input.parents.insert("CL02".to_string());
        let out = aggregate_level(&policy, [("PA01".to_string(), input)].into_iter().collect());
        assert!(out.scores.is_empty());
        assert!(out.failures[0].error.contains("disagree"));
    }

    #[test]
    fn test_cluster_level_has_no_parent() {
        let q = QualityThresholds::default();
        let empty = BTreeMap::new();
        let expected = BTreeMap::new();
        let policy = LevelPolicy {
            level: Level::Cluster,
            min_coverage: 1,
            weights: &empty,
            expected: &expected,
            tolerance: 1e-6,
            quality: &q,
        };
        let input = GroupInput {
            children: children(&[("PA01", Some(75.0))]),
            parents: BTreeSet::new(),
        };
        let out = aggregate_level(&policy, [("CL01".to_string(), input)].into_iter().collect());
        assert_eq!(out.scores[0].parent_id, None);
    }
}
