//! Run lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::domain::error::{Result, TieredError};
use crate::domain::score::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "phase", content = "level", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    ConfigValidated,
    Ingested,
    Executing,
    Scored,
    Aggregating(Level),
    Complete,
    Aborted,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Aborted | RunPhase::Failed)
    }

    /// Whether `self → next` is a legal edge.
    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Aborted) | (_, Failed) => true,
            (Idle, ConfigValidated) => true,
            (ConfigValidated, Ingested) => true,
            (Ingested, Executing) => true,
            (Executing, Scored) => true,
            (Scored, Aggregating(Level::Dimension)) => true,
            (Aggregating(Level::Dimension), Aggregating(Level::Area)) => true,
            (Aggregating(Level::Area), Aggregating(Level::Cluster)) => true,
            (Aggregating(Level::Cluster), Aggregating(Level::Macro)) => true,
            (Aggregating(Level::Macro), Complete) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => f.write_str("idle"),
            RunPhase::ConfigValidated => f.write_str("config_validated"),
            RunPhase::Ingested => f.write_str("ingested"),
            RunPhase::Executing => f.write_str("executing"),
            RunPhase::Scored => f.write_str("scored"),
            RunPhase::Aggregating(level) => write!(f, "aggregating:{level}"),
            RunPhase::Complete => f.write_str("complete"),
            RunPhase::Aborted => f.write_str("aborted"),
            RunPhase::Failed => f.write_str("failed"),
        }
    }
}

/// Tracks the current phase and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    phase: RunPhase,
    history: Vec<RunPhase>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self::starting_at(RunPhase::Idle)
    }

    /// Start from an arbitrary phase, e.g. `Scored` for an aggregation-only run.
    pub fn starting_at(phase: RunPhase) -> Self {
        Self {
            phase,
            history: vec![phase],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(TieredError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(from = %self.phase, to = %next, "run phase transition");
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = RunPhase::Failed;
            self.history.push(RunPhase::Failed);
        }
    }
}

/// Final status of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Aborted => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_happy_path() {
        let mut sm = RunStateMachine::new();
        for next in [
            RunPhase::ConfigValidated,
            RunPhase::Ingested,
            RunPhase::Executing,
            RunPhase::Scored,
            RunPhase::Aggregating(Level::Dimension),
            RunPhase::Aggregating(Level::Area),
            RunPhase::Aggregating(Level::Cluster),
            RunPhase::Aggregating(Level::Macro),
            RunPhase::Complete,
        ] {
            sm.advance(next).unwrap();
        }
        assert_eq!(sm.phase(), RunPhase::Complete);
        assert_eq!(sm.history().len(), 10);
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let mut sm = RunStateMachine::new();
        let err = sm.advance(RunPhase::Executing).unwrap_err();
        assert!(matches!(err, TieredError::InvalidTransition { .. }));
        assert_eq!(sm.phase(), RunPhase::Idle);
    }

    #[test]
    fn test_abort_and_fail_reachable_from_any_non_terminal() {
        for start in [
            RunPhase::Idle,
            RunPhase::Ingested,
            RunPhase::Aggregating(Level::Area),
        ] {
            assert!(start.can_advance_to(RunPhase::Aborted));
            assert!(start.can_advance_to(RunPhase::Failed));
        }
    }

    #[test]
    fn test_terminal_phases_are_final() {
        for terminal in [RunPhase::Complete, RunPhase::Aborted, RunPhase::Failed] {
            assert!(!terminal.can_advance_to(RunPhase::Failed));
            assert!(!terminal.can_advance_to(RunPhase::Idle));
        }
        let mut sm = RunStateMachine::starting_at(RunPhase::Aborted);
        sm.fail();
        assert_eq!(sm.phase(), RunPhase::Aborted);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RunPhase::Aggregating(Level::Cluster).to_string(),
            "aggregating:cluster"
        );
    }
}
