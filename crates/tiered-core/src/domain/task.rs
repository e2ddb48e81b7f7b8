//! Analytical task descriptors and their execution results.

use serde::{Deserialize, Serialize};

/// Evidence produced by an analytical unit.
pub type Evidence = serde_json::Value;

/// Parent-group identities a task rolls up into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKeys {
    pub dimension: String,
    pub area: String,
    pub cluster: String,
}

impl GroupKeys {
    pub fn new(
        dimension: impl Into<String>,
        area: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            dimension: dimension.into(),
            area: area.into(),
            cluster: cluster.into(),
        }
    }

    /// Dimension group id. Dimension ids repeat under every area, so the
    /// group is the (area, dimension) cell: `PA01/D1`.
    pub fn dimension_group(&self) -> String {
        format!("{}/{}", self.area, self.dimension)
    }
}

/// One unit of analytical work, derived from a questionnaire item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Questionnaire item id; unique within a run.
    pub task_id: String,
    /// Identity of the analytical unit that handles this task.
    pub unit_id: String,
    /// Scoring modality forwarded to the scorer.
    pub modality: String,
    /// Opaque payload handed to the unit.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub groups: GroupKeys,
}

/// Why a task was never dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The unit's circuit breaker was open at admission time.
    CircuitOpen { failures: u32, threshold: u32 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::CircuitOpen {
                failures,
                threshold,
            } => write!(
                f,
                "circuit open after {failures} failure(s) (threshold {threshold})"
            ),
        }
    }
}

/// Terminal outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded { evidence: Evidence },
    Failed { error: String },
    Skipped { reason: SkipReason },
}

/// Result of running (or deliberately skipping) one task. Produced once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub unit_id: String,
    pub outcome: TaskOutcome,
    pub duration_ms: u64,
    /// `true` when the run was already aborted as this task completed.
    pub aborted: bool,
}

impl TaskResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded { .. })
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed { .. })
    }

    pub fn skipped(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Skipped { .. })
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        match &self.outcome {
            TaskOutcome::Succeeded { evidence } => Some(evidence),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            TaskOutcome::Failed { error } => Some(error.clone()),
            TaskOutcome::Skipped { reason } => Some(format!("skipped: {reason}")),
            TaskOutcome::Succeeded { .. } => None,
        }
    }
}

/// Counts produced by the analytical-execution stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Tasks in the plan.
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Results dropped because they completed after an abort.
    pub discarded: usize,
    /// Tasks never admitted because the run was aborted.
    pub not_admitted: usize,
}

impl ExecutionSummary {
    pub fn from_results(planned: usize, results: &[TaskResult]) -> Self {
        let mut summary = Self {
            planned,
            ..Self::default()
        };
        for r in results {
            match r.outcome {
                TaskOutcome::Succeeded { .. } => summary.succeeded += 1,
                TaskOutcome::Failed { .. } => summary.failed += 1,
                TaskOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary
    }

    /// `succeeded + failed + skipped`.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Every planned task is accounted for by a recorded result.
    pub fn is_complete(&self) -> bool {
        self.total() == self.planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: TaskOutcome) -> TaskResult {
        TaskResult {
            task_id: "Q001".to_string(),
            unit_id: "D1Q1".to_string(),
            outcome,
            duration_ms: 3,
            aborted: false,
        }
    }

    #[test]
    fn test_summary_counts_each_outcome() {
        let results = vec![
            result(TaskOutcome::Succeeded {
                evidence: serde_json::json!({ "score": 80 }),
            }),
            result(TaskOutcome::Failed {
                error: "boom".to_string(),
            }),
            result(TaskOutcome::Skipped {
                reason: SkipReason::CircuitOpen {
                    failures: 3,
                    threshold: 3,
                },
            }),
        ];
        let summary = ExecutionSummary::from_results(3, &results);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.is_complete());
    }

    #[test]
    fn test_skipped_result_reports_reason_as_error() {
        let r = result(TaskOutcome::Skipped {
            reason: SkipReason::CircuitOpen {
                failures: 4,
                threshold: 3,
            },
        });
        let err = r.error().unwrap();
        assert!(err.contains("circuit open"));
        assert!(r.evidence().is_none());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(TaskOutcome::Failed {
            error: "x".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
    }
}
