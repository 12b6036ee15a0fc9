use std::path::PathBuf;

use serde_json::Value;

use crate::db::job_repo::{JobMetrics, JobRow};

/// Mutable state threaded through one pipeline run. Each stage reads the
/// outputs of its predecessors and leaves its own canonical output
/// behind.
pub struct PipelineContext {
    pub job_id: String,
    pub artifact_name: String,
    pub source_text: String,
    pub analysis: Option<Value>,
    pub plan: Option<Value>,
    pub generated: Option<Value>,
    pub output_path: Option<PathBuf>,
    pub validation: Option<Value>,
    pub deployment: Option<Value>,
}

impl PipelineContext {
    pub fn new(job: &JobRow) -> Self {
        Self {
            job_id: job.id.clone(),
            artifact_name: job.artifact_name.clone(),
            source_text: job.source_text.clone(),
            analysis: None,
            plan: None,
            generated: None,
            output_path: None,
            validation: None,
            deployment: None,
        }
    }

    /// The generated replacement source, once the generate stage ran.
    pub fn artifact_text(&self) -> Option<&str> {
        self.generated
            .as_ref()
            .and_then(|g| g.get("artifact"))
            .and_then(Value::as_str)
    }

    /// Entity (table) names detected by the analyze stage.
    pub fn entities(&self) -> Vec<String> {
        self.analysis
            .as_ref()
            .and_then(|a| a.get("tables"))
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Where the artifact ended up: the publish location when deployed,
    /// otherwise the local export path.
    pub fn deploy_location(&self) -> Option<String> {
        self.deployment
            .as_ref()
            .and_then(|d| d.get("location"))
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .or_else(|| self.output_path.as_ref().map(|p| p.display().to_string()))
    }

    /// Final job metrics derived from the run's outputs.
    pub fn metrics(&self) -> JobMetrics {
        let original_size = self.source_text.len() as i64;
        let transformed_size = self.artifact_text().map(|a| a.len() as i64).unwrap_or(0);
        let quality_score = self
            .validation
            .as_ref()
            .and_then(|v| v.get("quality_score"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        JobMetrics {
            original_size,
            transformed_size,
            size_delta: transformed_size - original_size,
            quality_score,
        }
    }
}
