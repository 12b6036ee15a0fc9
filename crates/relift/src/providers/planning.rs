//! Planning provider for the second pipeline stage.
//!
//! Turns an analysis payload into a transformation blueprint: one
//! component per detected table and business rule, plus the ordered
//! steps the generator follows.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connector::{ProviderClient, ProviderError};

use super::{pascal_case, snake_case};

pub struct BlueprintPlanner;

impl BlueprintPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlueprintPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for BlueprintPlanner {
    fn name(&self) -> &'static str {
        "blueprint-planner"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        if operation != "plan" {
            return Err(ProviderError::rejected(format!(
                "unsupported operation '{}'",
                operation
            )));
        }

        let analysis = params
            .get("analysis")
            .ok_or_else(|| ProviderError::rejected("missing 'analysis' parameter"))?;
        let module = analysis
            .get("module")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::rejected("analysis payload missing 'module'"))?;

        let tables: Vec<String> = analysis
            .get("tables")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let rules: Vec<String> = analysis
            .get("business_logic")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let mut components = Vec::new();
        for table in &tables {
            components.push(json!({
                "name": format!("{}Repository", pascal_case(table)),
                "kind": "data_access",
                "entity": table,
            }));
        }
        for rule in &rules {
            components.push(json!({
                "name": snake_case(rule),
                "kind": "business_rule",
                "rule": rule,
            }));
        }

        Ok(json!({
            "target_module": format!("{}_service", module.trim_start_matches("z_")),
            "language": "rust",
            "components": components,
            "steps": [
                "define data model",
                "implement repositories",
                "port business rules",
                "wire entrypoint",
            ],
        }))
    }
}

/// Closed set of planning providers.
pub enum PlanningProvider {
    Blueprint(BlueprintPlanner),
}

#[async_trait]
impl ProviderClient for PlanningProvider {
    fn name(&self) -> &'static str {
        match self {
            PlanningProvider::Blueprint(p) => p.name(),
        }
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        match self {
            PlanningProvider::Blueprint(p) => p.call(operation, params).await,
        }
    }
}
