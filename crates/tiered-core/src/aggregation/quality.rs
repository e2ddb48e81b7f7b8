//! Quality-tier threshold bands.

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, TieredError};
use crate::domain::score::QualityTier;

/// Lower bounds (inclusive, on the 0–100 scale) of the three upper tiers.
/// Anything below `acceptable` is [`QualityTier::Insufficient`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityThresholds {
    pub excellent: f64,
    pub good: f64,
    pub acceptable: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent: 85.0,
            good: 70.0,
            acceptable: 55.0,
        }
    }
}

impl QualityThresholds {
    /// Bands must be strictly descending and inside 0–100.
    pub fn validate(&self) -> Result<()> {
        let bands = [self.excellent, self.good, self.acceptable];
        if bands.iter().any(|b| !b.is_finite() || *b < 0.0 || *b > 100.0) {
            return Err(TieredError::config(format!(
                "quality thresholds must lie in 0..=100, got {bands:?}"
            )));
        }
        if !(self.excellent > self.good && self.good > self.acceptable) {
            return Err(TieredError::config(format!(
                "quality thresholds must be strictly descending (excellent > good > acceptable), got {bands:?}"
            )));
        }
        Ok(())
    }

    /// Classify a 0–100 score. Monotonic: a higher score never maps to a lower tier.
    pub fn classify(&self, score: f64) -> QualityTier {
        if score >= self.excellent {
            QualityTier::Excellent
        } else if score >= self.good {
            QualityTier::Good
        } else if score >= self.acceptable {
            QualityTier::Acceptable
        } else {
            QualityTier::Insufficient
        }
    }
}
