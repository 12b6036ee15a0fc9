//! Generation providers for the third pipeline stage.
//!
//! The scaffolding generator renders a full replacement module from the
//! blueprint: a typed record and repository per entity, a function per
//! ported business rule, and a wired entrypoint. The minimal synthesizer
//! is the fallback: a bare module that still references every detected
//! entity so downstream validation has something to check.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connector::{ProviderClient, ProviderError};

use super::pascal_case;

fn plan_param(params: &Value) -> Result<&Value, ProviderError> {
    params
        .get("plan")
        .ok_or_else(|| ProviderError::rejected("missing 'plan' parameter"))
}

fn components(plan: &Value, kind: &str) -> Vec<(String, String)> {
    plan.get("components")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter(|c| c.get("kind").and_then(Value::as_str) == Some(kind))
                .filter_map(|c| {
                    let name = c.get("name")?.as_str()?.to_string();
                    let detail = c
                        .get("entity")
                        .or_else(|| c.get("rule"))?
                        .as_str()?
                        .to_string();
                    Some((name, detail))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn target_module(plan: &Value) -> String {
    plan.get("target_module")
        .and_then(Value::as_str)
        .unwrap_or("replacement_service")
        .to_string()
}

pub struct ScaffoldGenerator;

impl ScaffoldGenerator {
    pub fn new() -> Self {
        Self
    }

    fn render(&self, plan: &Value, documentation: &str) -> String {
        let module = target_module(plan);
        let data_access = components(plan, "data_access");
        let rules = components(plan, "business_rule");

        let mut out = String::new();
        out.push_str(&format!("//! {}\n//!\n//! {}\n\n", module, documentation));

        for (name, entity) in &data_access {
            let record = format!("{}Record", pascal_case(entity));
            out.push_str(&format!(
                "#[derive(Debug, Clone)]\npub struct {} {{\n    pub key: String,\n    pub value: f64,\n}}\n\n",
                record
            ));
            out.push_str(&format!(
                "pub struct {};\n\nimpl {} {{\n    /// Reads one row from the migrated `{}` store.\n    pub fn fetch(&self, key: &str) -> Option<{}> {{\n        let _ = key;\n        None\n    }}\n}}\n\n",
                name, name, entity, record
            ));
        }

        for (name, rule) in &rules {
            out.push_str(&format!(
                "/// Ported rule: {}.\npub fn {}(input: f64) -> f64 {{\n    input\n}}\n\n",
                rule, name
            ));
        }

        out.push_str("pub fn run() -> Result<(), String> {\n");
        for (name, _) in &rules {
            out.push_str(&format!("    let _ = {}(0.0);\n", name));
        }
        out.push_str("    Ok(())\n}\n");
        out
    }
}

impl Default for ScaffoldGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for ScaffoldGenerator {
    fn name(&self) -> &'static str {
        "scaffold-generator"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        if operation != "generate" {
            return Err(ProviderError::rejected(format!(
                "unsupported operation '{}'",
                operation
            )));
        }
        let plan = plan_param(params)?;
        let documentation = params
            .get("analysis")
            .and_then(|a| a.get("documentation"))
            .and_then(Value::as_str)
            .unwrap_or("Generated replacement module.");

        let artifact = self.render(plan, documentation);
        Ok(json!({
            "artifact": artifact,
            "language": "rust",
            "generator": "scaffold",
        }))
    }
}

/// Direct minimal synthesis, used when scaffolding is unavailable.
pub struct MinimalSynthesizer;

impl MinimalSynthesizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MinimalSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for MinimalSynthesizer {
    fn name(&self) -> &'static str {
        "minimal-synthesizer"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        if operation != "generate" {
            return Err(ProviderError::rejected(format!(
                "unsupported operation '{}'",
                operation
            )));
        }
        let plan = plan_param(params)?;
        let module = target_module(plan);
        let entities: Vec<String> = components(plan, "data_access")
            .into_iter()
            .map(|(_, entity)| entity)
            .collect();

        let mut artifact = format!("//! {} (minimal synthesis)\n\n", module);
        artifact.push_str(&format!(
            "pub const MIGRATED_ENTITIES: &[&str] = &[{}];\n\n",
            entities
                .iter()
                .map(|e| format!("\"{}\"", e))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        artifact.push_str("pub fn run() -> Result<(), String> {\n    Ok(())\n}\n");

        Ok(json!({
            "artifact": artifact,
            "language": "rust",
            "generator": "minimal",
        }))
    }
}

/// Closed set of generation providers.
pub enum GenerationProvider {
    Scaffold(ScaffoldGenerator),
    Minimal(MinimalSynthesizer),
}

#[async_trait]
impl ProviderClient for GenerationProvider {
    fn name(&self) -> &'static str {
        match self {
            GenerationProvider::Scaffold(p) => p.name(),
            GenerationProvider::Minimal(p) => p.name(),
        }
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        match self {
            GenerationProvider::Scaffold(p) => p.call(operation, params).await,
            GenerationProvider::Minimal(p) => p.call(operation, params).await,
        }
    }
}
