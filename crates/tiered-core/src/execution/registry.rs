//! Analytical units and the identity → unit dispatch table.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::abort::AbortSignal;
use crate::config::gate::ValidatedConfig;
use crate::domain::document::Document;
use crate::domain::error::{Result, TieredError};
use crate::domain::task::{Evidence, TaskDescriptor};

/// Read-only context handed to every unit invocation.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub run_id: String,
    pub document: Arc<Document>,
    pub config: Arc<ValidatedConfig>,
    /// Units may poll this to stop early; ignoring it is allowed.
    pub abort: AbortSignal,
}

/// An external analytical unit. Errors are contained in the task's result;
/// they never abort the run.
#[async_trait]
pub trait AnalyticalUnit: Send + Sync {
    async fn execute(&self, task: &TaskDescriptor, ctx: &UnitContext) -> anyhow::Result<Evidence>;
}

/// Explicit dispatch table from unit identity to implementation.
#[derive(Clone, Default)]
pub struct UnitRegistry {
    units: BTreeMap<String, Arc<dyn AnalyticalUnit>>,
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("units", &self.units.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `unit` under `unit_id`, replacing any previous entry.
    pub fn register(&mut self, unit_id: impl Into<String>, unit: Arc<dyn AnalyticalUnit>) -> &mut Self {
        self.units.insert(unit_id.into(), unit);
        self
    }

    pub fn with(mut self, unit_id: impl Into<String>, unit: Arc<dyn AnalyticalUnit>) -> Self {
        self.register(unit_id, unit);
        self
    }

    pub fn get(&self, unit_id: &str) -> Option<Arc<dyn AnalyticalUnit>> {
        self.units.get(unit_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    /// The registry must cover exactly the units in the method catalog.
    pub fn validate_against(&self, config: &ValidatedConfig) -> Result<()> {
        let missing: Vec<&str> = config
            .unit_ids()
            .filter(|id| !self.units.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            return Err(TieredError::config(format!(
                "method catalog names {} unit(s) with no registered implementation: {}",
                missing.len(),
                missing.join(", ")
            )));
        }
        if self.units.len() != config.method_catalog.len() {
            let extra: Vec<&str> = self
                .unit_ids()
                .filter(|id| !config.method_catalog.contains_key(*id))
                .collect();
            return Err(TieredError::config(format!(
                "registry holds {} unit(s) but the method catalog lists {}; unknown: {}",
                self.units.len(),
                config.method_catalog.len(),
                extra.join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::gate::{validate_specification, RawSpecification};

    struct Echo;

    #[async_trait]
    impl AnalyticalUnit for Echo {
        async fn execute(&self, task: &TaskDescriptor, _ctx: &UnitContext) -> anyhow::Result<Evidence> {
            Ok(task.payload.clone())
        }
    }

    fn config(units: &[&str]) -> ValidatedConfig {
        let items: Vec<serde_json::Value> = units
            .iter()
            .enumerate()
            .map(|(i, u)| {
                serde_json::json!({
                    "id": format!("Q{i:03}"), "unit": u,
                    "dimension": "D1", "area": "PA01", "cluster": "CL01"
                })
            })
            .collect();
        let methods: serde_json::Map<String, serde_json::Value> = units
            .iter()
            .map(|u| (u.to_string(), serde_json::json!({})))
            .collect();
        let raw = RawSpecification::new(
            serde_json::json!({ "expected_items": items.len(), "items": items }),
            serde_json::Value::Object(methods),
        );
        validate_specification(&raw).unwrap()
    }

    #[test]
    fn test_matching_registry_validates() {
        let reg = UnitRegistry::new()
            .with("A", Arc::new(Echo))
            .with("B", Arc::new(Echo));
        assert!(reg.validate_against(&config(&["A", "B"])).is_ok());
        assert_eq!(reg.unit_ids().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_missing_unit_is_fatal() {
        let reg = UnitRegistry::new().with("A", Arc::new(Echo));
        let err = reg.validate_against(&config(&["A", "B"])).unwrap_err();
        assert!(err.to_string().contains("B"));
    }

    #[test]
    fn test_extra_unit_is_fatal() {
        let reg = UnitRegistry::new()
            .with("A", Arc::new(Echo))
            .with("Z", Arc::new(Echo));
        let err = reg.validate_against(&config(&["A"])).unwrap_err();
        assert!(err.to_string().contains("unknown: Z"));
    }

    #[tokio::test]
    async fn test_dispatch_by_identity() {
        let reg = UnitRegistry::new().with("A", Arc::new(Echo));
        let cfg = Arc::new(config(&["A"]));
        let ctx = UnitContext {
            run_id: cfg.run_id.clone(),
            document: Arc::new(Document::from_paragraphs("text")),
            config: Arc::clone(&cfg),
            abort: AbortSignal::new(),
        };
        let mut task = cfg.tasks[0].clone();
        task.payload = serde_json::json!({ "k": 1 });
        let evidence = reg.get("A").unwrap().execute(&task, &ctx).await.unwrap();
        assert_eq!(evidence["k"], 1);
        assert!(reg.get("B").is_none());
    }
}
