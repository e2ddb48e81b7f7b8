//! Per-stage instrumentation records.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::stage::ExecutionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    TimedOut,
    Failed,
}

/// Timing, counts and problems for one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub index: usize,
    pub label: String,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Items in the stage's output artifact.
    pub items: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub outcome: StageOutcome,
}

/// Started when a stage is dispatched; turned into [`StageMetrics`] at the end.
pub(crate) struct StageTimer {
    index: usize,
    label: String,
    mode: ExecutionMode,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl StageTimer {
    pub(crate) fn start(index: usize, label: &str, mode: ExecutionMode) -> Self {
        Self {
            index,
            label: label.to_string(),
            mode,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub(crate) fn finish(
        self,
        outcome: StageOutcome,
        items: usize,
        warnings: Vec<String>,
        errors: Vec<String>,
    ) -> StageMetrics {
        StageMetrics {
            index: self.index,
            label: self.label,
            mode: self.mode,
            started_at: self.started_at,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            items,
            warnings,
            errors,
            outcome,
        }
    }
}
