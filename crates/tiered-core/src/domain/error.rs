//! Run-level error taxonomy.
//!
//! Fatal kinds halt the pipeline and propagate to the caller. Contained kinds
//! (task failures, aggregation group failures) never appear here; they are
//! recorded inside the result graph instead.

/// Errors that halt a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum TieredError {
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),

    #[error("fatal ingestion error: {0}")]
    FatalIngestion(String),

    #[error("stage {index} ({label}) timed out after {limit_ms}ms")]
    StageTimeout {
        index: usize,
        label: String,
        limit_ms: u64,
    },

    #[error("stage {index} ({label}) violated its contract: {detail}")]
    StageContract {
        index: usize,
        label: String,
        detail: String,
    },

    #[error("stage {index} ({label}) failed: {reason}")]
    StageFailed {
        index: usize,
        label: String,
        reason: String,
    },

    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("tunables parse error: {0}")]
    TunablesParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TieredError {
    /// Shorthand for [`TieredError::FatalConfiguration`].
    pub fn config(detail: impl Into<String>) -> Self {
        Self::FatalConfiguration(detail.into())
    }

    /// Shorthand for [`TieredError::FatalIngestion`].
    pub fn ingestion(detail: impl Into<String>) -> Self {
        Self::FatalIngestion(detail.into())
    }

    /// Stable machine-readable kind, used in instrumentation records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FatalConfiguration(_) => "fatal_configuration",
            Self::FatalIngestion(_) => "fatal_ingestion",
            Self::StageTimeout { .. } => "stage_timeout",
            Self::StageContract { .. } => "stage_contract",
            Self::StageFailed { .. } => "stage_failed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Serialization(_) => "serialization",
            Self::TunablesParse(_) => "tunables_parse",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, TieredError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_configuration_display() {
        let err = TieredError::config("method map is empty");
        assert!(err.to_string().contains("fatal configuration"));
        assert!(err.to_string().contains("method map is empty"));
        assert_eq!(err.kind(), "fatal_configuration");
    }

    #[test]
    fn test_stage_timeout_names_stage_and_limit() {
        let err = TieredError::StageTimeout {
            index: 2,
            label: "execute_tasks".to_string(),
            limit_ms: 1500,
        };
        let msg = err.to_string();
        assert!(msg.contains("execute_tasks"));
        assert!(msg.contains("1500ms"));
    }

    #[test]
    fn test_ingestion_error_kind() {
        let err = TieredError::ingestion("document has zero chunks");
        assert_eq!(err.kind(), "fatal_ingestion");
        assert!(err.to_string().contains("zero chunks"));
    }
}
