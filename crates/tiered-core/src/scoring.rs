//! Evidence → score rubric seam.
//!
//! Real rubric application is an external collaborator; [`Scorer`] is the
//! seam. [`EvidenceFieldScorer`] covers the common case where units already
//! report a numeric score in their evidence.

use tracing::debug;

use crate::aggregation::quality::QualityThresholds;
use crate::domain::score::ScoredResult;
use crate::domain::task::{TaskDescriptor, TaskOutcome, TaskResult};

/// Turns one task result into a [`ScoredResult`]. Never fails: problems are
/// reported as an unscored result carrying an error.
pub trait Scorer: Send + Sync {
    fn score(&self, result: &TaskResult, task: &TaskDescriptor) -> ScoredResult;
}

/// Reads a numeric field from the evidence.
///
/// If the evidence also carries `max_score`, the raw value is rescaled to
/// 0–100 (e.g. a 0–3 rubric). Values outside 0–100 after rescaling, or
/// non-numeric values, yield an unscored result.
#[derive(Debug, Clone)]
pub struct EvidenceFieldScorer {
    field: String,
    quality: QualityThresholds,
}

impl Default for EvidenceFieldScorer {
    fn default() -> Self {
        Self::new("score", QualityThresholds::default())
    }
}

impl EvidenceFieldScorer {
    pub fn new(field: impl Into<String>, quality: QualityThresholds) -> Self {
        Self {
            field: field.into(),
            quality,
        }
    }

    fn extract(&self, evidence: &serde_json::Value) -> Result<f64, String> {
        let raw = evidence
            .get(&self.field)
            .ok_or_else(|| format!("evidence has no '{}' field", self.field))?
            .as_f64()
            .ok_or_else(|| format!("evidence '{}' is not a number", self.field))?;
        let score = match evidence.get("max_score").and_then(|m| m.as_f64()) {
            Some(max) if max > 0.0 => raw / max * 100.0,
            Some(max) => return Err(format!("evidence max_score {max} must be positive")),
            None => raw,
        };
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(format!("score {score} outside 0..=100"));
        }
        Ok(score)
    }
}

impl Scorer for EvidenceFieldScorer {
    fn score(&self, result: &TaskResult, task: &TaskDescriptor) -> ScoredResult {
        let groups = task.groups.clone();
        let evidence = match &result.outcome {
            TaskOutcome::Succeeded { evidence } => evidence,
            _ => {
                let error = result.error().unwrap_or_else(|| "no evidence".to_string());
                return ScoredResult::unscored(&result.task_id, groups, error);
            }
        };
        match self.extract(evidence) {
            Ok(score) => ScoredResult {
                task_id: result.task_id.clone(),
                score: Some(score),
                normalized_score: Some(score / 100.0),
                quality: Some(self.quality.classify(score)),
                groups,
                error: None,
            },
            Err(error) => {
                debug!(task = %result.task_id, modality = %task.modality, %error, "evidence not scorable");
                ScoredResult::unscored(&result.task_id, groups, error)
            }
        }
    }
}
