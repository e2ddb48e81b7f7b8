//! Macro synthesis: one weighted score over all clusters, plus coherence and
//! systemic gaps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregation::error::GroupFailure;
use crate::aggregation::level::{aggregate_group, ChildScore};
use crate::aggregation::quality::QualityThresholds;
use crate::domain::score::{Level, MacroScore, SystemicGap};

/// Group id used for the single macro group in failure records.
pub const MACRO_GROUP_ID: &str = "macro";

/// Largest possible population standard deviation on a 0–100 scale.
const MAX_STD_DEV: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroOutcome {
    pub score: Option<MacroScore>,
    pub failures: Vec<GroupFailure>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// `clamp(1 − σ/50, 0, 1)` with σ the population standard deviation.
/// An empty or single-element input is perfectly coherent.
pub fn coherence(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 1.0;
    }
    let m = mean(scores);
    let variance = scores.iter().map(|s| (s - m).powi(2)).sum::<f64>() / scores.len() as f64;
    (1.0 - variance.sqrt() / MAX_STD_DEV).clamp(0.0, 1.0)
}

/// Groups scoring more than `margin` points below the mean, largest deficit
/// first (ties by id).
pub fn systemic_gaps(scores: &[(String, f64)], margin: f64) -> Vec<SystemicGap> {
    if scores.is_empty() {
        return Vec::new();
    }
    let values: Vec<f64> = scores.iter().map(|(_, s)| *s).collect();
    let m = mean(&values);
    let mut gaps: Vec<SystemicGap> = scores
        .iter()
        .filter(|(_, s)| m - s > margin)
        .map(|(id, s)| SystemicGap {
            group_id: id.clone(),
            score: *s,
            deficit: m - s,
        })
        .collect();
    gaps.sort_by(|a, b| {
        b.deficit
            .total_cmp(&a.deficit)
            .then_with(|| a.group_id.cmp(&b.group_id))
    });
    gaps
}

/// Aggregate cluster scores into the macro score.
pub fn aggregate_macro(
    clusters: &[ChildScore],
    weights: &BTreeMap<String, f64>,
    declared: Option<usize>,
    min_coverage: usize,
    tolerance: f64,
    gap_margin: f64,
    quality: &QualityThresholds,
) -> MacroOutcome {
    let explicit = (!weights.is_empty()).then_some(weights);
    match aggregate_group(clusters, explicit, declared, min_coverage, tolerance, quality) {
        Ok(agg) => {
            let contributing: Vec<(String, f64)> = clusters
                .iter()
                .filter(|c| agg.contributing.contains(&c.id))
                .filter_map(|c| c.score.map(|s| (c.id.clone(), s)))
                .collect();
            let values: Vec<f64> = contributing.iter().map(|(_, s)| *s).collect();
            let coherence = coherence(&values);
            let systemic_gaps = systemic_gaps(&contributing, gap_margin);
            info!(
                score = agg.score,
                quality = %agg.quality,
                coherence,
                gaps = systemic_gaps.len(),
                "macro score synthesized"
            );
            MacroOutcome {
                score: Some(MacroScore {
                    score: agg.score,
                    quality: agg.quality,
                    coherence,
                    systemic_gaps,
                    contributing: agg.contributing,
                    weights: agg.weights,
                    expected_children: agg.expected_children,
                    validation: agg.validation,
                }),
                failures: Vec::new(),
            }
        }
        Err(error) => {
            warn!(level = %Level::Macro, group = MACRO_GROUP_ID, %error, "aggregation group skipped");
            MacroOutcome {
                score: None,
                failures: vec![GroupFailure::new(Level::Macro, MACRO_GROUP_ID, &error)],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters(spec: &[(&str, f64)]) -> Vec<ChildScore> {
        spec.iter().map(|(id, s)| ChildScore::new(*id, Some(*s))).collect()
    }

    #[test]
    fn test_coherence_bounds() {
        assert_eq!(coherence(&[70.0, 70.0, 70.0]), 1.0);
        assert_eq!(coherence(&[0.0, 100.0]), 0.0);
        assert_eq!(coherence(&[42.0]), 1.0);
        let c = coherence(&[60.0, 80.0]);
        assert!((c - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_gaps_sorted_by_deficit() {
        let scores = vec![
            ("CL01".to_string(), 90.0),
            ("CL02".to_string(), 40.0),
            ("CL03".to_string(), 85.0),
            ("CL04".to_string(), 55.0),
        ];
        // mean = 67.5
        let gaps = systemic_gaps(&scores, 10.0);
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].group_id, "CL02");
        assert_eq!(gaps[0].deficit, 27.5);
        assert_eq!(gaps[1].group_id, "CL04");
    }

    #[test]
    fn test_macro_uses_explicit_weights() {
        let weights: BTreeMap<String, f64> =
            [("CL01".to_string(), 0.25), ("CL02".to_string(), 0.75)].into_iter().collect();
        let out = aggregate_macro(
            &clusters(&[("CL01", 40.0), ("CL02", 80.0)]),
            &weights,
            None,
            1,
            1e-6,
            10.0,
            &QualityThresholds::default(),
        );
        let m = out.score.unwrap();
        assert_eq!(m.score, 70.0);
        assert!((m.coherence - 0.6).abs() < 1e-12);
        assert_eq!(m.systemic_gaps.len(), 1);
        assert!(out.failures.is_empty());
    }

    #[test]
    fn test_macro_without_valid_clusters_fails() {
        let out = aggregate_macro(
            &[ChildScore::new("CL01", None)],
            &BTreeMap::new(),
            None,
            1,
            1e-6,
            10.0,
            &QualityThresholds::default(),
        );
        assert!(out.score.is_none());
        assert_eq!(out.failures[0].group_id, MACRO_GROUP_ID);
    }
}
