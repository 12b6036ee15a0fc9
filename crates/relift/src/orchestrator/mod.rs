//! Workflow orchestrator: owns the job lifecycle.
//!
//! The orchestrator is an explicitly constructed resource: it is built
//! once at startup with its database, event bus and provider chains,
//! and released with `shutdown()`. Each started job runs as one
//! supervised background task; the start call returns immediately and
//! callers observe progress through events or by polling the store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::broadcast::{ProgressBroadcaster, ProgressEvent};
use crate::config::Config;
use crate::connector::InvocationLogger;
use crate::db::invocation_repo::{self, InvocationFilter, InvocationRow};
use crate::db::{default_database_path, job_repo, stage_repo, Database};
use crate::error::{ConfigError, OrchestratorError, ReliftError};
use crate::pipeline::{
    derive_job_status, JobStatus, PipelineRunner, Stage, StageExecutors, StageStatus,
};

/// The uploaded legacy source a job transforms.
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    pub name: String,
    pub content: String,
}

impl SourceArtifact {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Status view assembled from the store for reporting collaborators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub artifact_name: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub metrics: Option<MetricsView>,
    pub output_path: Option<String>,
    pub deploy_location: Option<String>,
    /// Present when the job completed but deployment degraded, e.g.
    /// "local artifact only — publish step did not run".
    pub degraded_notice: Option<String>,
    pub stages: Vec<StageView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsView {
    pub original_size: i64,
    pub transformed_size: i64,
    pub size_delta: i64,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageView {
    pub index: u8,
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub degraded: Option<String>,
}

pub struct Orchestrator {
    db: Database,
    events: ProgressBroadcaster,
    runner: Arc<PipelineRunner>,
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Orchestrator {
    /// Builds the orchestrator from config, opening (or creating) the
    /// database at the configured path.
    pub fn from_config(config: &Config) -> Result<Self, ReliftError> {
        let db = match config.database_path {
            Some(ref path) => Database::open(Path::new(path))?,
            None => {
                let path = default_database_path().ok_or(ConfigError::Validation {
                    message: "Cannot determine home directory for the database".to_string(),
                })?;
                Database::open(&path)?
            }
        };
        Self::new(config, db)
    }

    /// Builds the orchestrator over an existing database handle.
    pub fn new(config: &Config, db: Database) -> Result<Self, ReliftError> {
        let events = ProgressBroadcaster::default();
        let logger = InvocationLogger::new(db.clone(), config.debug.full_payload_logging);
        let executors = StageExecutors::from_config(config, logger).map_err(ReliftError::Config)?;
        let runner = Arc::new(PipelineRunner::new(db.clone(), executors, events.clone()));

        Ok(Self {
            db,
            events,
            runner,
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Test constructor: inject specific executors.
    #[cfg(test)]
    pub(crate) fn with_executors(db: Database, executors: StageExecutors) -> Self {
        let events = ProgressBroadcaster::default();
        let runner = Arc::new(PipelineRunner::new(db.clone(), executors, events.clone()));
        Self {
            db,
            events,
            runner,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn events(&self) -> &ProgressBroadcaster {
        &self.events
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a job in the store without starting it: one job row plus
    /// its five `not_started` stage records.
    pub fn create_job(
        &self,
        artifact: &SourceArtifact,
        metadata: Option<Value>,
    ) -> Result<String, OrchestratorError> {
        if artifact.content.trim().is_empty() {
            return Err(OrchestratorError::EmptyArtifact);
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        job_repo::insert(
            &self.db,
            &job_repo::JobRow {
                id: id.clone(),
                artifact_name: artifact.name.clone(),
                source_text: artifact.content.clone(),
                source_size: artifact.content.len() as i64,
                status: JobStatus::Uploaded.as_str().to_string(),
                error: None,
                metadata: metadata.map(|m| m.to_string()),
                created_at: now.clone(),
                updated_at: now,
                completed_at: None,
                original_size: None,
                transformed_size: None,
                size_delta: None,
                quality_score: None,
                output_path: None,
                deploy_location: None,
            },
        )?;
        stage_repo::create_all(&self.db, &id, &Stage::NAMES)?;

        info!(job_id = %id, artifact = %artifact.name, "Job created");
        Ok(id)
    }

    /// Starts (or, for a failed job, fully restarts) the pipeline as a
    /// background task. Returns immediately; a job already running or
    /// in any in-progress state is rejected with a conflict.
    pub fn start(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| OrchestratorError::LockPoisoned)?;
        running.retain(|_, handle| !handle.is_finished());

        if running.contains_key(job_id) {
            return Err(OrchestratorError::Conflict {
                job_id: job_id.to_string(),
                status: "running".to_string(),
            });
        }

        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        let status = JobStatus::parse(&job.status).unwrap_or(JobStatus::Failed);

        match status {
            JobStatus::Completed => {
                return Err(OrchestratorError::AlreadyCompleted {
                    job_id: job_id.to_string(),
                });
            }
            s if s.is_in_progress() => {
                return Err(OrchestratorError::Conflict {
                    job_id: job_id.to_string(),
                    status: job.status.clone(),
                });
            }
            _ => {}
        }

        // A failed job restarts from stage 1 (full re-run).
        let job = if status == JobStatus::Failed {
            let now = Utc::now().to_rfc3339();
            job_repo::reset_for_restart(&self.db, job_id, &now)?;
            stage_repo::reset_all(&self.db, job_id)?;
            job_repo::find_by_id(&self.db, job_id)?
                .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?
        } else {
            job
        };

        let runner = Arc::clone(&self.runner);
        let db = self.db.clone();
        let events = self.events.clone();
        let running_map = Arc::clone(&self.running);
        let id = job_id.to_string();
        let span = info_span!("pipeline", job_id = %job.id, artifact = %job.artifact_name);

        let handle = tokio::spawn(async move {
            // The runner is joined through an inner task so a panic is
            // captured and written back to the store, never only logged.
            let inner = tokio::spawn(
                async move { runner.run(job).await }.instrument(span),
            );

            match inner.await {
                Ok(Ok(status)) => {
                    info!(job_id = %id, status = %status, "Pipeline task finished");
                }
                Ok(Err(db_err)) => {
                    error!(job_id = %id, error = %db_err, "Pipeline persistence failure");
                    write_back_failure(
                        &db,
                        &events,
                        &id,
                        &format!("pipeline persistence failure: {}", db_err),
                    );
                }
                Err(join_err) => {
                    let message = if join_err.is_panic() {
                        "pipeline task panicked".to_string()
                    } else {
                        "pipeline task aborted".to_string()
                    };
                    error!(job_id = %id, error = %join_err, "Pipeline task died");
                    write_back_failure(&db, &events, &id, &message);
                }
            }

            if let Ok(mut map) = running_map.lock() {
                map.remove(&id);
            }
        });

        running.insert(job_id.to_string(), handle);
        Ok(())
    }

    /// Creates and immediately starts a job. The returned id is the only
    /// synchronous result; progress is observed via events or polling.
    pub fn submit(
        &self,
        artifact: &SourceArtifact,
        metadata: Option<Value>,
    ) -> Result<String, OrchestratorError> {
        let id = self.create_job(artifact, metadata)?;
        self.start(&id)?;
        Ok(id)
    }

    /// Administrative halt: transitions the job to failed. The running
    /// pipeline observes the transition between stages and stops; there
    /// is no mid-stage cancellation. Returns false when the job was
    /// already terminal.
    pub fn abort(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        if JobStatus::parse(&job.status).map(|s| s.is_terminal()) == Some(true) {
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        let changed = job_repo::mark_failed(&self.db, job_id, "administratively aborted", &now)?;
        if changed {
            info!(job_id = %job_id, "Job administratively aborted");
        }
        Ok(changed)
    }

    /// Assembles the status view: overall status, the five stage
    /// records, and final metrics.
    pub fn job_status(&self, job_id: &str) -> Result<JobStatusView, OrchestratorError> {
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| OrchestratorError::JobNotFound(job_id.to_string()))?;
        let stage_rows = stage_repo::list(&self.db, job_id)?;

        let status =
            JobStatus::parse(&job.status).unwrap_or_else(|| derive_job_status(&stage_rows));

        let degraded_notice = stage_rows
            .iter()
            .find(|s| s.stage_index == Stage::Deploy.index())
            .and_then(|s| s.degraded.clone());

        let metrics = match (
            job.original_size,
            job.transformed_size,
            job.size_delta,
            job.quality_score,
        ) {
            (Some(original_size), Some(transformed_size), Some(size_delta), Some(quality_score)) => {
                Some(MetricsView {
                    original_size,
                    transformed_size,
                    size_delta,
                    quality_score,
                })
            }
            _ => None,
        };

        let stages = stage_rows
            .into_iter()
            .map(|row| StageView {
                index: row.stage_index,
                name: row.stage_name,
                status: StageStatus::parse(&row.status).unwrap_or(StageStatus::NotStarted),
                started_at: row.started_at,
                completed_at: row.completed_at,
                output: row
                    .output
                    .as_deref()
                    .and_then(|o| serde_json::from_str(o).ok()),
                error: row.error,
                degraded: row.degraded,
            })
            .collect();

        Ok(JobStatusView {
            job_id: job.id,
            artifact_name: job.artifact_name,
            status,
            error: job.error,
            created_at: job.created_at,
            completed_at: job.completed_at,
            metrics,
            output_path: job.output_path,
            deploy_location: job.deploy_location,
            degraded_notice,
            stages,
        })
    }

    /// Queries the invocation log with filters and pagination.
    pub fn invocation_log(
        &self,
        filter: &InvocationFilter,
    ) -> Result<(Vec<InvocationRow>, u64), OrchestratorError> {
        Ok(invocation_repo::query(&self.db, filter)?)
    }

    /// Renders every matching invocation-log entry into one
    /// downloadable document.
    pub fn export_invocation_log(
        &self,
        filter: &InvocationFilter,
    ) -> Result<String, OrchestratorError> {
        Ok(invocation_repo::export_markdown(&self.db, filter)?)
    }

    /// Waits for all running pipelines to reach a terminal status, then
    /// releases the orchestrator.
    pub async fn shutdown(self) {
        let handles: Vec<JoinHandle<()>> = match self.running.lock() {
            Ok(mut map) => map.drain().map(|(_, handle)| handle).collect(),
            Err(_) => Vec::new(),
        };

        info!(jobs = handles.len(), "Orchestrator shutting down");
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Writes a supervisor-observed failure back to the store and emits the
/// matching event.
fn write_back_failure(db: &Database, events: &ProgressBroadcaster, job_id: &str, message: &str) {
    let now = Utc::now().to_rfc3339();

    let running_stage = stage_repo::list(db, job_id)
        .ok()
        .and_then(|rows| rows.into_iter().find(|r| r.status == "in_progress"));
    let stage = running_stage
        .as_ref()
        .and_then(|r| Stage::from_index(r.stage_index))
        .unwrap_or(Stage::Analyze);

    if let Some(row) = running_stage {
        if let Err(e) = stage_repo::mark_failed(db, job_id, row.stage_index, message, &now) {
            error!(job_id = %job_id, error = %e, "Failed to fail stage record");
        }
    }
    if let Err(e) = job_repo::mark_failed(db, job_id, message, &now) {
        error!(job_id = %job_id, error = %e, "Failed to fail job record");
    }

    events.publish(ProgressEvent::stage_failed(job_id, stage, message));
}
