//! Weight resolution for one aggregation group.

use std::collections::BTreeMap;

use crate::aggregation::error::AggregationGroupError;

/// `n` equal weights summing to exactly 1.0: the last weight absorbs the
/// rounding remainder.
pub fn equal_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let share = 1.0 / n as f64;
    let mut weights = vec![share; n];
    let head: f64 = weights[..n - 1].iter().sum();
    weights[n - 1] = 1.0 - head;
    weights
}

/// Effective weights for `scored` (the children with a valid score, sorted by
/// id) given the group's configured weights, if any.
///
/// Explicit weights are checked against every child in `all_children`, then
/// renormalized over `scored`.
pub fn resolve_weights(
    all_children: &[&str],
    scored: &[&str],
    explicit: Option<&BTreeMap<String, f64>>,
    tolerance: f64,
) -> Result<BTreeMap<String, f64>, AggregationGroupError> {
    let Some(explicit) = explicit else {
        return Ok(scored
            .iter()
            .zip(equal_weights(scored.len()))
            .map(|(id, w)| (id.to_string(), w))
            .collect());
    };

    for (child, weight) in explicit {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(AggregationGroupError::InvalidWeight {
                child: child.clone(),
                weight: *weight,
            });
        }
    }
    let sum: f64 = explicit.values().sum();
    if (sum - 1.0).abs() > tolerance {
        return Err(AggregationGroupError::WeightSum { sum, tolerance });
    }
    if let Some(child) = all_children.iter().find(|c| !explicit.contains_key(**c)) {
        return Err(AggregationGroupError::UnweightedChild {
            child: child.to_string(),
        });
    }

    let weight_of = |id: &str| explicit.get(id).copied().unwrap_or(0.0);
    let mass: f64 = scored.iter().map(|id| weight_of(id)).sum();
    if mass <= 0.0 {
        return Err(AggregationGroupError::ZeroWeightMass);
    }
    Ok(scored
        .iter()
        .map(|id| (id.to_string(), weight_of(id) / mass))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_weights_sum_exactly_one() {
        for n in 1..=50 {
            let w = equal_weights(n);
            assert_eq!(w.len(), n);
            assert_eq!(w.iter().sum::<f64>(), 1.0, "n = {n}");
        }
        assert!(equal_weights(0).is_empty());
    }

    #[test]
    fn test_default_is_equal_over_scored() {
        let w = resolve_weights(&["a", "b", "c"], &["a", "c"], None, 1e-6).unwrap();
        assert_eq!(w.len(), 2);
        assert_eq!(w["a"] + w["c"], 1.0);
    }

    #[test]
    fn test_explicit_renormalized_over_present() {
        let explicit: BTreeMap<String, f64> =
            [("a".to_string(), 0.5), ("b".to_string(), 0.3), ("c".to_string(), 0.2)]
                .into_iter()
                .collect();
        let w = resolve_weights(&["a", "b", "c"], &["a", "c"], Some(&explicit), 1e-6).unwrap();
        assert!((w["a"] - 0.5 / 0.7).abs() < 1e-12);
        assert!((w["c"] - 0.2 / 0.7).abs() < 1e-12);
        assert!((w.values().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bad_sum_rejected() {
        let explicit: BTreeMap<String, f64> =
            [("a".to_string(), 0.6), ("b".to_string(), 0.6)].into_iter().collect();
        let err = resolve_weights(&["a", "b"], &["a", "b"], Some(&explicit), 1e-6).unwrap_err();
        assert!(matches!(err, AggregationGroupError::WeightSum { .. }));
    }

    #[test]
    fn test_uncovered_child_rejected() {
        let explicit: BTreeMap<String, f64> = [("a".to_string(), 1.0)].into_iter().collect();
        let err = resolve_weights(&["a", "b"], &["a", "b"], Some(&explicit), 1e-6).unwrap_err();
        assert_eq!(
            err,
            AggregationGroupError::UnweightedChild {
                child: "b".to_string()
            }
        );
    }

    #[test]
    fn test_zero_mass_rejected() {
        let explicit: BTreeMap<String, f64> =
            [("a".to_string(), 1.0), ("b".to_string(), 0.0)].into_iter().collect();
        let err = resolve_weights(&["a", "b"], &["b"], Some(&explicit), 1e-6).unwrap_err();
        assert_eq!(err, AggregationGroupError::ZeroWeightMass);
    }
}
