//! Stage executors: one fallback chain of capability connectors per
//! pipeline stage.
//!
//! Connectors in a chain are tried sequentially in preference order;
//! provider preference (cost, trust, latency) matters more than raw
//! speed, so first-success-wins concurrency is deliberately not used.
//! Executors normalize provider payloads into each stage's canonical
//! output shape; neither the runner nor downstream stages see a
//! provider-specific format.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::config::Config;
use crate::connector::{Connector, ConnectorError, InvocationLogger, ProviderClient, RetryPolicy};
use crate::providers::{
    AnalysisProvider, ArtifactVerifier, BlueprintPlanner, GenerationProvider, HttpPublisher,
    InferredAnalyzer, MinimalSynthesizer, PlanningProvider, PublishingProvider, ScaffoldGenerator,
    StructuredAnalyzer, ValidationProvider,
};
use crate::storage::ArtifactStore;

use super::context::PipelineContext;
use super::error::StageError;
use super::stage::Stage;

/// Notice surfaced when deployment degrades to export-only.
pub const EXPORT_ONLY_NOTICE: &str = "local artifact only — publish step did not run";

/// The result of a successfully executed stage.
#[derive(Debug)]
pub struct StageOutcome {
    /// Canonical output snapshot, persisted on the stage record.
    pub output: Value,
    /// Set when the stage succeeded through a degraded path.
    pub degraded: Option<String>,
}

impl StageOutcome {
    fn clean(output: Value) -> Self {
        Self {
            output,
            degraded: None,
        }
    }
}

/// Why a whole fallback chain produced no payload.
enum ChainFailure {
    /// Every connector reported itself unavailable.
    AllUnavailable(String),
    /// A connector failed hard (rejected input or exhausted retries).
    Hard(String),
}

pub struct StageExecutors {
    analyze: Vec<Connector>,
    plan: Vec<Connector>,
    generate: Vec<Connector>,
    validate: Vec<Connector>,
    deploy: Vec<Connector>,
    store: ArtifactStore,
}

impl StageExecutors {
    /// Production constructor: builds every provider chain from config.
    pub fn from_config(
        config: &Config,
        logger: InvocationLogger,
    ) -> Result<Self, crate::error::ConfigError> {
        let timeout = Duration::from_millis(config.invoke.timeout_ms);
        let retry = RetryPolicy::from_config(&config.invoke);
        let connector = |provider: Box<dyn ProviderClient>| {
            Connector::new(provider, timeout, retry.clone(), logger.clone())
        };

        let publisher = HttpPublisher::new(&config.providers.publishing)?;

        Ok(Self {
            analyze: vec![
                connector(Box::new(AnalysisProvider::Structured(
                    StructuredAnalyzer::new(),
                ))),
                connector(Box::new(AnalysisProvider::Inferred(InferredAnalyzer::new()))),
            ],
            plan: vec![connector(Box::new(PlanningProvider::Blueprint(
                BlueprintPlanner::new(),
            )))],
            generate: vec![
                connector(Box::new(GenerationProvider::Scaffold(
                    ScaffoldGenerator::new(),
                ))),
                connector(Box::new(GenerationProvider::Minimal(
                    MinimalSynthesizer::new(),
                ))),
            ],
            validate: vec![connector(Box::new(ValidationProvider::Verifier(
                ArtifactVerifier::new(),
            )))],
            deploy: vec![connector(Box::new(PublishingProvider::Http(publisher)))],
            store: ArtifactStore::new(&config.export_directory),
        })
    }

    /// Test constructor: inject specific chains.
    #[cfg(test)]
    pub(crate) fn with_chains(
        analyze: Vec<Connector>,
        plan: Vec<Connector>,
        generate: Vec<Connector>,
        validate: Vec<Connector>,
        deploy: Vec<Connector>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            analyze,
            plan,
            generate,
            validate,
            deploy,
            store,
        }
    }

    /// Runs one stage against the context, mutating it on success.
    pub async fn run(
        &self,
        stage: Stage,
        ctx: &mut PipelineContext,
    ) -> Result<StageOutcome, StageError> {
        match stage {
            Stage::Analyze => self.run_analyze(ctx).await,
            Stage::Plan => self.run_plan(ctx).await,
            Stage::Generate => self.run_generate(ctx).await,
            Stage::Validate => self.run_validate(ctx).await,
            Stage::Deploy => self.run_deploy(ctx).await,
        }
    }

    /// Tries connectors in order. Unavailable providers fall through to
    /// the next one; anything else aborts the chain.
    async fn invoke_chain(
        chain: &[Connector],
        operation: &str,
        params: &Value,
        job_id: &str,
    ) -> Result<(Value, &'static str), ChainFailure> {
        let mut last_unavailable = String::from("no provider configured");

        for connector in chain {
            match connector.invoke(operation, params, Some(job_id)).await {
                Ok(value) => return Ok((value, connector.provider_name())),
                Err(ConnectorError::Unavailable {
                    provider, message, ..
                }) => {
                    warn!(provider = %provider, operation, "Provider unavailable, trying next");
                    last_unavailable = format!("{}: {}", provider, message);
                }
                Err(e) => return Err(ChainFailure::Hard(e.to_string())),
            }
        }

        Err(ChainFailure::AllUnavailable(last_unavailable))
    }

    fn chain_error(stage: Stage, failure: ChainFailure) -> StageError {
        match failure {
            ChainFailure::AllUnavailable(message) => {
                StageError::new(stage, format!("no provider available: {}", message))
            }
            ChainFailure::Hard(message) => StageError::new(stage, message),
        }
    }

    async fn run_analyze(&self, ctx: &mut PipelineContext) -> Result<StageOutcome, StageError> {
        let params = json!({
            "artifact_name": ctx.artifact_name,
            "source": ctx.source_text,
        });

        let (payload, provider) =
            Self::invoke_chain(&self.analyze, "analyze", &params, &ctx.job_id)
                .await
                .map_err(|f| Self::chain_error(Stage::Analyze, f))?;

        // Canonical shape regardless of which analyzer served.
        let output = json!({
            "module": payload.get("module").cloned().unwrap_or(Value::Null),
            "tables": payload.get("tables").cloned().unwrap_or_else(|| json!([])),
            "business_logic": payload.get("business_logic").cloned().unwrap_or_else(|| json!([])),
            "patterns": payload.get("patterns").cloned().unwrap_or_else(|| json!([])),
            "complexity": payload.get("complexity").cloned().unwrap_or(Value::Null),
            "lines_of_code": payload.get("lines_of_code").cloned().unwrap_or(Value::Null),
            "documentation": payload.get("documentation").cloned().unwrap_or(Value::Null),
            "provider": provider,
        });

        ctx.analysis = Some(output.clone());
        Ok(StageOutcome::clean(output))
    }

    async fn run_plan(&self, ctx: &mut PipelineContext) -> Result<StageOutcome, StageError> {
        let analysis = ctx
            .analysis
            .as_ref()
            .ok_or_else(|| StageError::new(Stage::Plan, "analysis output missing"))?;
        let params = json!({ "analysis": analysis });

        let (payload, provider) = Self::invoke_chain(&self.plan, "plan", &params, &ctx.job_id)
            .await
            .map_err(|f| Self::chain_error(Stage::Plan, f))?;

        let output = json!({
            "target_module": payload.get("target_module").cloned().unwrap_or(Value::Null),
            "language": payload.get("language").cloned().unwrap_or(Value::Null),
            "components": payload.get("components").cloned().unwrap_or_else(|| json!([])),
            "steps": payload.get("steps").cloned().unwrap_or_else(|| json!([])),
            "provider": provider,
        });

        ctx.plan = Some(output.clone());
        Ok(StageOutcome::clean(output))
    }

    async fn run_generate(&self, ctx: &mut PipelineContext) -> Result<StageOutcome, StageError> {
        let plan = ctx
            .plan
            .as_ref()
            .ok_or_else(|| StageError::new(Stage::Generate, "plan output missing"))?;
        let params = json!({ "plan": plan, "analysis": ctx.analysis });

        let (payload, provider) =
            Self::invoke_chain(&self.generate, "generate", &params, &ctx.job_id)
                .await
                .map_err(|f| Self::chain_error(Stage::Generate, f))?;

        let artifact = payload
            .get("artifact")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StageError::new(Stage::Generate, "provider returned no artifact text")
            })?
            .to_string();

        let target_module = plan
            .get("target_module")
            .and_then(Value::as_str)
            .unwrap_or("replacement_service")
            .to_string();

        let path = self
            .store
            .store(artifact.as_bytes(), &ctx.job_id, &target_module, "rs")
            .map_err(|e| StageError::new(Stage::Generate, e.to_string()))?;

        let output = json!({
            "artifact_path": path.display().to_string(),
            "transformed_size": artifact.len(),
            "language": payload.get("language").cloned().unwrap_or(Value::Null),
            "provider": provider,
        });

        ctx.generated = Some(json!({ "artifact": artifact, "provider": provider }));
        ctx.output_path = Some(path);
        Ok(StageOutcome::clean(output))
    }

    async fn run_validate(&self, ctx: &mut PipelineContext) -> Result<StageOutcome, StageError> {
        let artifact = ctx
            .artifact_text()
            .ok_or_else(|| StageError::new(Stage::Validate, "generated artifact missing"))?;
        let params = json!({
            "artifact": artifact,
            "entities": ctx.entities(),
        });

        let (payload, provider) =
            Self::invoke_chain(&self.validate, "validate", &params, &ctx.job_id)
                .await
                .map_err(|f| Self::chain_error(Stage::Validate, f))?;

        let passed = payload
            .get("passed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !passed {
            return Err(StageError::new(
                Stage::Validate,
                format!("artifact failed verification: {}", payload),
            ));
        }

        let output = json!({
            "quality_score": payload.get("quality_score").cloned().unwrap_or(Value::Null),
            "checks": payload.get("checks").cloned().unwrap_or_else(|| json!([])),
            "passed": true,
            "provider": provider,
        });

        ctx.validation = Some(output.clone());
        Ok(StageOutcome::clean(output))
    }

    /// Deploy never fails outright while the export path exists: any
    /// publisher failure degrades to export-only, because generate and
    /// validate already produced a usable offline artifact.
    async fn run_deploy(&self, ctx: &mut PipelineContext) -> Result<StageOutcome, StageError> {
        let artifact = ctx
            .artifact_text()
            .ok_or_else(|| StageError::new(Stage::Deploy, "generated artifact missing"))?;
        let output_path = ctx
            .output_path
            .clone()
            .ok_or_else(|| StageError::new(Stage::Deploy, "exported artifact missing"))?;

        let params = json!({
            "job_id": ctx.job_id,
            "artifact_name": ctx.artifact_name,
            "artifact": artifact,
        });

        match Self::invoke_chain(&self.deploy, "publish", &params, &ctx.job_id).await {
            Ok((payload, provider)) => {
                let output = json!({
                    "mode": "published",
                    "location": payload.get("location").cloned().unwrap_or(Value::Null),
                    "provider": provider,
                });
                ctx.deployment = Some(output.clone());
                Ok(StageOutcome::clean(output))
            }
            Err(failure) => {
                let reason = match failure {
                    ChainFailure::AllUnavailable(m) | ChainFailure::Hard(m) => m,
                };
                warn!(job_id = %ctx.job_id, reason = %reason, "Publish failed, degrading to export-only");

                let output = json!({
                    "mode": "export_only",
                    "location": output_path.display().to_string(),
                    "reason": reason,
                });
                ctx.deployment = Some(output.clone());
                Ok(StageOutcome {
                    output,
                    degraded: Some(EXPORT_ONLY_NOTICE.to_string()),
                })
            }
        }
    }
}
