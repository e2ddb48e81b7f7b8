//! Externally supplied run tunables.
//!
//! Loaded from TOML. `max_concurrent_tasks` and `failure_threshold` have no
//! defaults and must always be supplied; everything else falls back to the
//! values documented on each field.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregation::quality::QualityThresholds;
use crate::domain::error::{Result, TieredError};

/// Environment variable overriding `max_concurrent_tasks`.
pub const ENV_MAX_CONCURRENT: &str = "TIERED_MAX_CONCURRENT";
/// Environment variable overriding `failure_threshold`.
pub const ENV_FAILURE_THRESHOLD: &str = "TIERED_FAILURE_THRESHOLD";

/// Cooperative rate budget applied at task admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateBudget {
    /// Sustained admissions per second.
    pub per_second: u32,
    /// Admissions allowed back to back before smoothing kicks in.
    /// Defaults to `per_second`.
    #[serde(default)]
    pub burst: Option<u32>,
}

impl RateBudget {
    pub fn per_second(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.per_second)
    }

    pub fn burst(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.burst.unwrap_or(self.per_second))
    }
}

/// Per-stage timeout table, keyed by stage label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageTimeouts {
    #[serde(default = "default_stage_timeout_ms")]
    pub default_ms: u64,
    #[serde(default)]
    pub per_stage: BTreeMap<String, u64>,
}

fn default_stage_timeout_ms() -> u64 {
    300_000
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            default_ms: default_stage_timeout_ms(),
            per_stage: BTreeMap::new(),
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, label: &str) -> u64 {
        self.per_stage.get(label).copied().unwrap_or(self.default_ms)
    }
}

/// Minimum number of valid children a group needs to pass validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverageThresholds {
    #[serde(default = "one")]
    pub dimension: usize,
    #[serde(default = "one")]
    pub area: usize,
    #[serde(default = "one")]
    pub cluster: usize,
    #[serde(default = "one", rename = "macro")]
    pub macro_level: usize,
}

fn one() -> usize {
    1
}

impl Default for CoverageThresholds {
    fn default() -> Self {
        Self {
            dimension: 1,
            area: 1,
            cluster: 1,
            macro_level: 1,
        }
    }
}

/// Explicit weights: group id → child id → weight. Groups absent here use
/// equal weights. Dimension groups, and the dimension children of an area,
/// are keyed `area/dimension`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelWeights {
    #[serde(default)]
    pub dimension: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub area: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    pub cluster: BTreeMap<String, BTreeMap<String, f64>>,
    /// Cluster id → weight.
    #[serde(default, rename = "macro")]
    pub macro_level: BTreeMap<String, f64>,
}

/// Declared child counts per group. A group's expected count is the larger
/// of this value and the number of children actually fed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectedChildren {
    #[serde(default)]
    pub dimension: BTreeMap<String, usize>,
    #[serde(default)]
    pub area: BTreeMap<String, usize>,
    #[serde(default)]
    pub cluster: BTreeMap<String, usize>,
    #[serde(default, rename = "macro")]
    pub macro_level: Option<usize>,
}

/// Soft resource limits; breaches only warn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default)]
    pub max_memory_bytes: Option<u64>,
    #[serde(default)]
    pub max_cpu_percent: Option<f64>,
}

fn default_sample_interval_ms() -> u64 {
    1_000
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            max_memory_bytes: None,
            max_cpu_percent: None,
        }
    }
}

/// All run tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineTunables {
    /// Upper bound on simultaneously in-flight analytical tasks.
    pub max_concurrent_tasks: usize,
    /// Failures after which a unit's circuit breaker opens.
    pub failure_threshold: u32,
    /// Absent means admissions are only bounded by the semaphore.
    #[serde(default)]
    pub rate_budget: Option<RateBudget>,
    #[serde(default)]
    pub stage_timeouts: StageTimeouts,
    #[serde(default)]
    pub coverage: CoverageThresholds,
    #[serde(default)]
    pub quality: QualityThresholds,
    #[serde(default)]
    pub weights: LevelWeights,
    #[serde(default)]
    pub expected: ExpectedChildren,
    /// Allowed distance of an explicit weight sum from 1.0.
    #[serde(default = "default_weight_tolerance")]
    pub weight_tolerance: f64,
    /// Points below the cluster mean at which a cluster counts as a systemic gap.
    #[serde(default = "default_gap_margin")]
    pub gap_margin: f64,
    #[serde(default)]
    pub resources: ResourceLimits,
}

fn default_weight_tolerance() -> f64 {
    1e-6
}

fn default_gap_margin() -> f64 {
    10.0
}

impl PipelineTunables {
    /// Tunables with the two required values set and defaults elsewhere.
    pub fn new(max_concurrent_tasks: usize, failure_threshold: u32) -> Self {
        Self {
            max_concurrent_tasks,
            failure_threshold,
            rate_budget: None,
            stage_timeouts: StageTimeouts::default(),
            coverage: CoverageThresholds::default(),
            quality: QualityThresholds::default(),
            weights: LevelWeights::default(),
            expected: ExpectedChildren::default(),
            weight_tolerance: default_weight_tolerance(),
            gap_margin: default_gap_margin(),
            resources: ResourceLimits::default(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let tunables: Self = toml::from_str(raw)?;
        tunables.validate()?;
        Ok(tunables)
    }

    /// Read, parse and validate a TOML tunables file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Apply `TIERED_*` environment overrides, then re-validate.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_MAX_CONCURRENT) {
            self.max_concurrent_tasks = raw.trim().parse().map_err(|_| {
                TieredError::config(format!("{ENV_MAX_CONCURRENT}={raw:?} is not a count"))
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_FAILURE_THRESHOLD) {
            self.failure_threshold = raw.trim().parse().map_err(|_| {
                TieredError::config(format!("{ENV_FAILURE_THRESHOLD}={raw:?} is not a count"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(TieredError::config("max_concurrent_tasks must be at least 1"));
        }
        if self.failure_threshold == 0 {
            return Err(TieredError::config("failure_threshold must be at least 1"));
        }
        if let Some(budget) = &self.rate_budget {
            if budget.per_second().is_none() || budget.burst().is_none() {
                return Err(TieredError::config(
                    "rate_budget per_second and burst must be non-zero",
                ));
            }
        }
        if self.stage_timeouts.default_ms == 0
            || self.stage_timeouts.per_stage.values().any(|ms| *ms == 0)
        {
            return Err(TieredError::config("stage timeouts must be non-zero"));
        }
        self.quality.validate()?;
        if !(self.weight_tolerance.is_finite() && self.weight_tolerance > 0.0) {
            return Err(TieredError::config("weight_tolerance must be positive"));
        }
        if !(self.gap_margin.is_finite() && self.gap_margin >= 0.0) {
            return Err(TieredError::config("gap_margin must be non-negative"));
        }
        if self.resources.sample_interval_ms == 0 {
            return Err(TieredError::config("resources.sample_interval_ms must be non-zero"));
        }
        Ok(())
    }
}
