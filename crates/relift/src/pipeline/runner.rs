//! The sequential per-job pipeline driver.
//!
//! One runner invocation owns one job from first stage to terminal
//! status. Stages run strictly in order inside a single loop, which is
//! what structurally guarantees that two stages of the same job never
//! run concurrently. Between stages the runner re-reads the job row so
//! an administrative transition to failed halts the pipeline.

use chrono::Utc;
use tracing::{info, warn};

use crate::broadcast::{ProgressBroadcaster, ProgressEvent};
use crate::db::{job_repo, stage_repo, Database, DatabaseError};

use super::context::PipelineContext;
use super::executor::StageExecutors;
use super::stage::{JobStatus, Stage};

pub struct PipelineRunner {
    db: Database,
    executors: StageExecutors,
    events: ProgressBroadcaster,
}

impl PipelineRunner {
    pub fn new(db: Database, executors: StageExecutors, events: ProgressBroadcaster) -> Self {
        Self {
            db,
            executors,
            events,
        }
    }

    /// Drives all five stages for the given job. Returns the terminal
    /// status reached. An `Err` means a persistence failure; the caller
    /// (the orchestrator's supervisor task) writes it back to the store.
    pub async fn run(&self, job: job_repo::JobRow) -> Result<JobStatus, DatabaseError> {
        let job_id = job.id.clone();
        let mut ctx = PipelineContext::new(&job);

        for stage in Stage::ALL {
            // Coarse cancellation: an administrative transition to
            // failed is observed here, between stages.
            if let Some(current) = job_repo::find_by_id(&self.db, &job_id)? {
                if current.status == "failed" {
                    info!(job_id = %job_id, stage = %stage, "Job failed externally, halting pipeline");
                    return Ok(JobStatus::Failed);
                }
            }

            let now = Utc::now().to_rfc3339();
            stage_repo::mark_in_progress(&self.db, &job_id, stage.index(), &now)?;
            if !job_repo::update_status(
                &self.db,
                &job_id,
                stage.active_job_status().as_str(),
                &now,
            )? {
                // The job turned terminal under us; undo the stage claim.
                warn!(job_id = %job_id, stage = %stage, "Job is terminal, halting pipeline");
                stage_repo::mark_failed(
                    &self.db,
                    &job_id,
                    stage.index(),
                    "halted: job reached a terminal status externally",
                    &now,
                )?;
                return Ok(JobStatus::Failed);
            }

            self.events.publish(ProgressEvent::stage_started(
                &job_id,
                stage,
                &format!("Running {} stage", stage),
            ));

            match self.executors.run(stage, &mut ctx).await {
                Ok(outcome) => {
                    let now = Utc::now().to_rfc3339();
                    stage_repo::mark_completed(
                        &self.db,
                        &job_id,
                        stage.index(),
                        &outcome.output.to_string(),
                        outcome.degraded.as_deref(),
                        &now,
                    )?;

                    if stage == Stage::Generate {
                        if let Some(ref path) = ctx.output_path {
                            job_repo::set_output_path(
                                &self.db,
                                &job_id,
                                &path.display().to_string(),
                                &now,
                            )?;
                        }
                    }

                    let message = outcome
                        .degraded
                        .clone()
                        .unwrap_or_else(|| format!("{} stage completed", stage));
                    info!(job_id = %job_id, stage = %stage, "Stage completed");
                    self.events
                        .publish(ProgressEvent::stage_completed(&job_id, stage, &message));
                }
                Err(stage_err) => {
                    let now = Utc::now().to_rfc3339();
                    let error_text = format!("{}: {}", stage.name(), stage_err.message);
                    stage_repo::mark_failed(
                        &self.db,
                        &job_id,
                        stage.index(),
                        &stage_err.message,
                        &now,
                    )?;
                    job_repo::mark_failed(&self.db, &job_id, &error_text, &now)?;

                    warn!(job_id = %job_id, stage = %stage, error = %stage_err.message, "Stage failed, pipeline aborted");
                    self.events.publish(ProgressEvent::stage_failed(
                        &job_id,
                        stage,
                        &error_text,
                    ));
                    return Ok(JobStatus::Failed);
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        let metrics = ctx.metrics();
        let completed = job_repo::mark_completed(
            &self.db,
            &job_id,
            &metrics,
            ctx.deploy_location().as_deref(),
            &now,
        )?;
        if !completed {
            warn!(job_id = %job_id, "Job failed externally during final stage");
            return Ok(JobStatus::Failed);
        }

        info!(
            job_id = %job_id,
            quality_score = metrics.quality_score,
            transformed_size = metrics.transformed_size,
            "Pipeline completed"
        );
        Ok(JobStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, InvokeConfig};
    use crate::connector::tests::ScriptedProvider;
    use crate::connector::{Connector, InvocationLogger, ProviderError, RetryPolicy};
    use crate::db::invocation_repo;
    use crate::pipeline::stage::derive_job_status;
    use crate::storage::ArtifactStore;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn insert_job(db: &Database, id: &str) -> job_repo::JobRow {
        let job = job_repo::tests::sample_job(id);
        job_repo::insert(db, &job).unwrap();
        stage_repo::create_all(db, id, &Stage::NAMES).unwrap();
        job
    }

    fn default_runner(db: &Database, export_dir: &std::path::Path) -> PipelineRunner {
        let config = Config {
            version: "1.0".to_string(),
            export_directory: export_dir.display().to_string(),
            database_path: None,
            providers: Default::default(),
            invoke: InvokeConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                ..InvokeConfig::default()
            },
            debug: Default::default(),
        };
        let executors =
            StageExecutors::from_config(&config, InvocationLogger::new(db.clone(), false))
                .unwrap();
        PipelineRunner::new(db.clone(), executors, ProgressBroadcaster::default())
    }

    fn connector(db: &Database, provider: ScriptedProvider) -> Connector {
        Connector::new(
            Box::new(provider),
            Duration::from_millis(200),
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            InvocationLogger::new(db.clone(), false),
        )
    }

    #[tokio::test]
    async fn test_full_run_reaches_completed_with_degraded_deploy() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = insert_job(&db, "r1");
        let runner = default_runner(&db, tmp.path());

        let status = runner.run(job).await.unwrap();
        assert_eq!(status, JobStatus::Completed);

        let row = job_repo::find_by_id(&db, "r1").unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.quality_score.unwrap() > 0.0);
        assert!(row.output_path.is_some());
        // No publish endpoint configured: deployed location is the export.
        assert_eq!(row.deploy_location, row.output_path);

        let stages = stage_repo::list(&db, "r1").unwrap();
        assert!(stages.iter().all(|s| s.status == "completed"));
        assert!(stages[4].degraded.as_deref().unwrap().contains("publish step"));
        assert_eq!(derive_job_status(&stages), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_analyze_output_snapshot_contains_detected_table() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = insert_job(&db, "r2");
        let runner = default_runner(&db, tmp.path());

        runner.run(job).await.unwrap();

        // The sample source selects from konv; the stored analyze output
        // must reference it verbatim.
        let analyze = stage_repo::get(&db, "r2", 1).unwrap().unwrap();
        assert!(analyze.output.as_deref().unwrap().contains("konv"));
    }

    #[tokio::test]
    async fn test_stage_timestamps_are_ordered() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = insert_job(&db, "r3");
        let runner = default_runner(&db, tmp.path());

        runner.run(job).await.unwrap();

        let stages = stage_repo::list(&db, "r3").unwrap();
        for pair in stages.windows(2) {
            let prev_completed = pair[0].completed_at.as_deref().unwrap();
            let next_started = pair[1].started_at.as_deref().unwrap();
            assert!(
                next_started >= prev_completed,
                "stage {} started before stage {} completed",
                pair[1].stage_index,
                pair[0].stage_index
            );
        }
    }

    #[tokio::test]
    async fn test_hard_failure_marks_job_failed_and_keeps_prior_outputs() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = insert_job(&db, "r4");

        // Analyze succeeds, plan rejects.
        let analyze = connector(
            &db,
            ScriptedProvider::new(
                "structured-analyzer",
                vec![Ok(json!({"module": "m", "tables": ["konv"]}))],
            ),
        );
        let plan = connector(
            &db,
            ScriptedProvider::new(
                "blueprint-planner",
                vec![Err(ProviderError::rejected("unplannable"))],
            ),
        );
        let executors = StageExecutors::with_chains(
            vec![analyze],
            vec![plan],
            vec![],
            vec![],
            vec![],
            ArtifactStore::new(tmp.path()),
        );
        let runner =
            PipelineRunner::new(db.clone(), executors, ProgressBroadcaster::default());

        let status = runner.run(job).await.unwrap();
        assert_eq!(status, JobStatus::Failed);

        let row = job_repo::find_by_id(&db, "r4").unwrap().unwrap();
        assert_eq!(row.status, "failed");
        // The failing stage name and error text are both preserved.
        assert!(row.error.as_deref().unwrap().starts_with("plan:"));
        assert!(row.error.as_deref().unwrap().contains("unplannable"));

        let stages = stage_repo::list(&db, "r4").unwrap();
        assert_eq!(stages[0].status, "completed");
        assert!(stages[0].output.as_deref().unwrap().contains("konv"));
        assert_eq!(stages[1].status, "failed");
        assert_eq!(stages[2].status, "not_started");
        assert_eq!(derive_job_status(&stages), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_retries_produce_one_log_row_per_attempt() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = insert_job(&db, "r5");

        let analyze = connector(
            &db,
            ScriptedProvider::new(
                "structured-analyzer",
                vec![
                    Err(ProviderError::transient("reset")),
                    Err(ProviderError::transient("reset")),
                    Ok(json!({"module": "m", "tables": ["konv"]})),
                ],
            ),
        );
        let plan = connector(
            &db,
            ScriptedProvider::new("blueprint-planner", vec![Err(ProviderError::rejected("stop"))]),
        );
        let executors = StageExecutors::with_chains(
            vec![analyze],
            vec![plan],
            vec![],
            vec![],
            vec![],
            ArtifactStore::new(tmp.path()),
        );
        let runner =
            PipelineRunner::new(db.clone(), executors, ProgressBroadcaster::default());

        runner.run(job).await.unwrap();

        // Analyze stage completed despite two transient failures.
        let stages = stage_repo::list(&db, "r5").unwrap();
        assert_eq!(stages[0].status, "completed");

        // Three analyze attempts → three rows for that provider.
        let (rows, _) = invocation_repo::query(
            &db,
            &invocation_repo::InvocationFilter {
                provider: Some("structured-analyzer".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(!rows[0].success);
        assert!(!rows[1].success);
        assert!(rows[2].success);
    }

    #[tokio::test]
    async fn test_admin_abort_halts_between_stages() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = insert_job(&db, "r6");

        // Fail the job externally before the runner starts.
        job_repo::mark_failed(&db, "r6", "administratively aborted", "2026-01-01T00:00:30Z")
            .unwrap();

        let runner = default_runner(&db, tmp.path());
        let status = runner.run(job).await.unwrap();
        assert_eq!(status, JobStatus::Failed);

        // Nothing ran.
        let stages = stage_repo::list(&db, "r6").unwrap();
        assert!(stages.iter().all(|s| s.status == "not_started"));
        assert_eq!(invocation_repo::count_for_job(&db, "r6").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_events_emitted_in_stage_order() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let job = insert_job(&db, "r7");

        let events = ProgressBroadcaster::new(64);
        let mut rx = events.subscribe();

        let config = Config {
            version: "1.0".to_string(),
            export_directory: tmp.path().display().to_string(),
            database_path: None,
            providers: Default::default(),
            invoke: InvokeConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                ..InvokeConfig::default()
            },
            debug: Default::default(),
        };
        let executors =
            StageExecutors::from_config(&config, InvocationLogger::new(db.clone(), false))
                .unwrap();
        let runner = PipelineRunner::new(db.clone(), executors, events);

        runner.run(job).await.unwrap();

        let mut collected = Vec::new();
        while let Ok(event) = rx.try_recv() {
            collected.push(event);
        }
        // Started + completed per stage.
        assert_eq!(collected.len(), 10);
        assert_eq!(collected[0].stage, Stage::Analyze);
        assert_eq!(collected[9].stage, Stage::Deploy);
        assert_eq!(collected[9].job_status, JobStatus::Completed);
        assert_eq!(collected[9].percent, 100);
        // Degraded deploy is surfaced explicitly in the final message.
        assert!(collected[9].message.contains("publish step did not run"));
    }
}
