//! Configuration gate: validate the static specification and fix the run identity.
//!
//! The gate accepts three raw JSON blocks (questionnaire, method map and an
//! optional schema), checks them, and returns a [`ValidatedConfig`] whose
//! `spec_digest` is the SHA-256 of their canonical serialization. Nothing
//! downstream runs unless this succeeds.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::digest::compute_digest;
use crate::domain::error::{Result, TieredError};
use crate::domain::task::{GroupKeys, TaskDescriptor};

/// Specification objects as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSpecification {
    pub questionnaire: serde_json::Value,
    pub method_map: serde_json::Value,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

impl RawSpecification {
    pub fn new(questionnaire: serde_json::Value, method_map: serde_json::Value) -> Self {
        Self {
            questionnaire,
            method_map,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Read the blocks from JSON files.
    pub fn from_files(
        questionnaire: impl AsRef<Path>,
        method_map: impl AsRef<Path>,
        schema: Option<&Path>,
    ) -> Result<Self> {
        let read = |path: &Path| -> Result<serde_json::Value> {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        };
        Ok(Self {
            questionnaire: read(questionnaire.as_ref())?,
            method_map: read(method_map.as_ref())?,
            schema: schema.map(read).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuestionItem {
    id: String,
    unit: String,
    dimension: String,
    area: String,
    cluster: String,
    #[serde(default = "default_modality")]
    modality: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn default_modality() -> String {
    "default".to_string()
}

/// The hashed, immutable configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedConfig {
    /// SHA-256 of the canonical specification.
    pub spec_digest: String,
    /// Content-addressed run identity derived from `spec_digest`.
    pub run_id: String,
    pub version: Option<String>,
    /// One task per questionnaire item, in questionnaire order.
    pub tasks: Vec<TaskDescriptor>,
    /// Unit identity → catalog entry.
    pub method_catalog: BTreeMap<String, serde_json::Value>,
    pub schema: Option<serde_json::Value>,
}

impl ValidatedConfig {
    pub fn unit_ids(&self) -> impl Iterator<Item = &str> {
        self.method_catalog.keys().map(String::as_str)
    }

    pub fn short_digest(&self) -> &str {
        &self.spec_digest[..12.min(self.spec_digest.len())]
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskDescriptor> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

/// Validate `raw` and produce the run's [`ValidatedConfig`].
pub fn validate_specification(raw: &RawSpecification) -> Result<ValidatedConfig> {
    let questionnaire = raw
        .questionnaire
        .as_object()
        .ok_or_else(|| TieredError::config("questionnaire must be a JSON object"))?;

    let items = questionnaire
        .get("items")
        .ok_or_else(|| TieredError::config("questionnaire is missing required block 'items'"))?
        .as_array()
        .ok_or_else(|| TieredError::config("questionnaire 'items' must be an array"))?;
    if items.is_empty() {
        return Err(TieredError::config("questionnaire 'items' is empty"));
    }

    let expected = questionnaire
        .get("expected_items")
        .ok_or_else(|| {
            TieredError::config("questionnaire is missing required field 'expected_items'")
        })?
        .as_u64()
        .ok_or_else(|| TieredError::config("'expected_items' must be a non-negative integer"))?;
    if items.len() as u64 != expected {
        return Err(TieredError::config(format!(
            "questionnaire declares {expected} items but contains {}",
            items.len()
        )));
    }

    let method_map = raw
        .method_map
        .as_object()
        .ok_or_else(|| TieredError::config("method map must be a JSON object"))?;
    if method_map.is_empty() {
        return Err(TieredError::config("method map is empty"));
    }

    if let Some(schema) = &raw.schema {
        if !schema.is_object() {
            return Err(TieredError::config("schema must be a JSON object when present"));
        }
    }

    let version = match questionnaire.get("version") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(v)) => Some(v.clone()),
        Some(other) => {
            return Err(TieredError::config(format!(
                "questionnaire 'version' must be a string, got {other}"
            )))
        }
    };

    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let item: QuestionItem = serde_json::from_value(item.clone()).map_err(|e| {
            TieredError::config(format!("questionnaire item {position} is malformed: {e}"))
        })?;
        for (field, value) in [
            ("id", &item.id),
            ("unit", &item.unit),
            ("dimension", &item.dimension),
            ("area", &item.area),
            ("cluster", &item.cluster),
        ] {
            if value.trim().is_empty() {
                return Err(TieredError::config(format!(
                    "questionnaire item {position} has an empty '{field}'"
                )));
            }
        }
        if !seen.insert(item.id.clone()) {
            return Err(TieredError::config(format!(
                "duplicate questionnaire item id '{}'",
                item.id
            )));
        }
        if !method_map.contains_key(&item.unit) {
            return Err(TieredError::config(format!(
                "item '{}' references unit '{}' absent from the method map",
                item.id, item.unit
            )));
        }
        tasks.push(TaskDescriptor {
            task_id: item.id,
            unit_id: item.unit,
            modality: item.modality,
            payload: item.payload,
            groups: GroupKeys::new(item.dimension, item.area, item.cluster),
        });
    }

    let spec_digest = compute_digest(&serde_json::json!({
        "questionnaire": raw.questionnaire,
        "method_map": raw.method_map,
        "schema": raw.schema,
    }))?;
    let run_id = format!("run-{}", &spec_digest[..16]);

    let method_catalog: BTreeMap<String, serde_json::Value> = method_map
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    debug!(units = method_catalog.len(), items = tasks.len(), "specification parsed");
    info!(run_id = %run_id, spec_digest = %spec_digest, "configuration validated");

    Ok(ValidatedConfig {
        spec_digest,
        run_id,
        version,
        tasks,
        method_catalog,
        schema: raw.schema.clone(),
    })
}
