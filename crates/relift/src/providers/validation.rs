//! Validation provider for the fourth pipeline stage.
//!
//! The verifier runs structural checks over the generated artifact and
//! scores it. A missing or empty artifact is a rejection: there is
//! nothing to score and the pipeline must stop.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connector::{ProviderClient, ProviderError};

pub struct ArtifactVerifier;

impl ArtifactVerifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArtifactVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for ArtifactVerifier {
    fn name(&self) -> &'static str {
        "artifact-verifier"
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        if operation != "validate" {
            return Err(ProviderError::rejected(format!(
                "unsupported operation '{}'",
                operation
            )));
        }

        let artifact = params
            .get("artifact")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::rejected("missing 'artifact' parameter"))?;
        if artifact.trim().is_empty() {
            return Err(ProviderError::rejected("generated artifact is empty"));
        }

        let entities: Vec<&str> = params
            .get("entities")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let referenced = entities
            .iter()
            .filter(|e| artifact.contains(**e))
            .count();
        let coverage = if entities.is_empty() {
            1.0
        } else {
            referenced as f64 / entities.len() as f64
        };

        let opens = artifact.matches('{').count();
        let closes = artifact.matches('}').count();
        let braces_balanced = opens == closes;

        let has_entrypoint = artifact.contains("fn run()");

        let quality_score = (40.0
            + 40.0 * coverage
            + if braces_balanced { 10.0 } else { 0.0 }
            + if has_entrypoint { 10.0 } else { 0.0 })
        .min(100.0);

        Ok(json!({
            "quality_score": quality_score,
            "passed": braces_balanced && coverage > 0.0,
            "checks": [
                {
                    "name": "entity_coverage",
                    "passed": coverage > 0.0 || entities.is_empty(),
                    "detail": format!("{}/{} entities referenced", referenced, entities.len()),
                },
                {
                    "name": "braces_balanced",
                    "passed": braces_balanced,
                    "detail": format!("{} opening, {} closing", opens, closes),
                },
                {
                    "name": "entrypoint_present",
                    "passed": has_entrypoint,
                    "detail": "looks for fn run()",
                },
            ],
        }))
    }
}

/// Closed set of validation providers.
pub enum ValidationProvider {
    Verifier(ArtifactVerifier),
}

#[async_trait]
impl ProviderClient for ValidationProvider {
    fn name(&self) -> &'static str {
        match self {
            ValidationProvider::Verifier(p) => p.name(),
        }
    }

    async fn call(&self, operation: &str, params: &Value) -> Result<Value, ProviderError> {
        match self {
            ValidationProvider::Verifier(p) => p.call(operation, params).await,
        }
    }
}
