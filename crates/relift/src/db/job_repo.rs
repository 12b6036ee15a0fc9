//! Job repository — CRUD operations for the `jobs` table.
//!
//! The orchestrator is the sole writer of `status` and the terminal
//! fields; status-reporting collaborators only read.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub artifact_name: String,
    pub source_text: String,
    pub source_size: i64,
    pub status: String,
    pub error: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub original_size: Option<i64>,
    pub transformed_size: Option<i64>,
    pub size_delta: Option<i64>,
    pub quality_score: Option<f64>,
    pub output_path: Option<String>,
    pub deploy_location: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            artifact_name: row.get("artifact_name")?,
            source_text: row.get("source_text")?,
            source_size: row.get("source_size")?,
            status: row.get("status")?,
            error: row.get("error")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
            original_size: row.get("original_size")?,
            transformed_size: row.get("transformed_size")?,
            size_delta: row.get("size_delta")?,
            quality_score: row.get("quality_score")?,
            output_path: row.get("output_path")?,
            deploy_location: row.get("deploy_location")?,
        })
    }
}

/// Final metrics written when a job completes.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    pub original_size: i64,
    pub transformed_size: i64,
    pub size_delta: i64,
    pub quality_score: f64,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, artifact_name, source_text, source_size, status, error,
             metadata, created_at, updated_at, completed_at, original_size, transformed_size,
             size_delta, quality_score, output_path, deploy_location)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.id,
                job.artifact_name,
                job.source_text,
                job.source_size,
                job.status,
                job.error,
                job.metadata,
                job.created_at,
                job.updated_at,
                job.completed_at,
                job.original_size,
                job.transformed_size,
                job.size_delta,
                job.quality_score,
                job.output_path,
                job.deploy_location,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], |r| {
                JobRow::from_row(r)
            })
            .optional()?;
        Ok(row)
    })
}

/// Updates the status of a non-terminal job. Returns false when the job
/// is already terminal (completed or failed); the caller must then halt
/// instead of advancing.
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![id, status, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a job failed with an error message. Completed jobs are never
/// overwritten.
pub fn mark_failed(
    db: &Database,
    id: &str,
    error: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error = ?2, updated_at = ?3, completed_at = ?3
             WHERE id = ?1 AND status != 'completed'",
            params![id, error, now],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a job completed with its final metrics and deploy location.
/// Returns false when the job was failed externally in the meantime;
/// an administrative abort outranks a late completion.
pub fn mark_completed(
    db: &Database,
    id: &str,
    metrics: &JobMetrics,
    deploy_location: Option<&str>,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'completed', error = NULL, updated_at = ?2,
             completed_at = ?2, original_size = ?3, transformed_size = ?4, size_delta = ?5,
             quality_score = ?6, deploy_location = ?7
             WHERE id = ?1 AND status != 'failed'",
            params![
                id,
                now,
                metrics.original_size,
                metrics.transformed_size,
                metrics.size_delta,
                metrics.quality_score,
                deploy_location,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Records where the generated artifact was written.
pub fn set_output_path(
    db: &Database,
    id: &str,
    output_path: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET output_path = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, output_path, updated_at],
        )?;
        Ok(())
    })
}

/// Clears the terminal fields of a failed job before a full re-run.
pub fn reset_for_restart(db: &Database, id: &str, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = 'uploaded', error = NULL, updated_at = ?2,
             completed_at = NULL, original_size = NULL, transformed_size = NULL,
             size_delta = NULL, quality_score = NULL, output_path = NULL,
             deploy_location = NULL
             WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    pub(crate) fn sample_job(id: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            artifact_name: "z_pricing.abap".to_string(),
            source_text: "REPORT z_pricing.\nSELECT SINGLE kbetr FROM konv.".to_string(),
            source_size: 48,
            status: "uploaded".to_string(),
            error: None,
            metadata: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            completed_at: None,
            original_size: None,
            transformed_size: None,
            size_delta: None,
            quality_score: None,
            output_path: None,
            deploy_location: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1")).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.artifact_name, "z_pricing.abap");
        assert_eq!(found.status, "uploaded");
        assert!(found.source_text.contains("konv"));
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_update_status() {
        let db = test_db();
        insert(&db, &sample_job("job-2")).unwrap();

        let changed = update_status(&db, "job-2", "analyzing", "2026-01-01T00:01:00Z").unwrap();
        assert!(changed);

        let found = find_by_id(&db, "job-2").unwrap().unwrap();
        assert_eq!(found.status, "analyzing");
    }

    #[test]
    fn test_update_status_refuses_terminal_job() {
        let db = test_db();
        insert(&db, &sample_job("job-3")).unwrap();
        mark_failed(&db, "job-3", "boom", "2026-01-01T00:01:00Z").unwrap();

        let changed = update_status(&db, "job-3", "analyzing", "2026-01-01T00:02:00Z").unwrap();
        assert!(!changed);

        let found = find_by_id(&db, "job-3").unwrap().unwrap();
        assert_eq!(found.status, "failed");
    }

    #[test]
    fn test_mark_failed_keeps_error() {
        let db = test_db();
        insert(&db, &sample_job("job-4")).unwrap();

        mark_failed(&db, "job-4", "analyze: provider rejected input", "2026-01-01T00:01:00Z")
            .unwrap();

        let found = find_by_id(&db, "job-4").unwrap().unwrap();
        assert_eq!(found.status, "failed");
        assert_eq!(
            found.error.as_deref(),
            Some("analyze: provider rejected input")
        );
        assert!(found.completed_at.is_some());
    }

    #[test]
    fn test_mark_failed_never_overwrites_completed() {
        let db = test_db();
        insert(&db, &sample_job("job-5")).unwrap();
        let metrics = JobMetrics {
            original_size: 48,
            transformed_size: 120,
            size_delta: 72,
            quality_score: 87.5,
        };
        mark_completed(&db, "job-5", &metrics, Some("/out/job-5"), "2026-01-01T01:00:00Z")
            .unwrap();

        let changed = mark_failed(&db, "job-5", "late failure", "2026-01-01T02:00:00Z").unwrap();
        assert!(!changed);
        let found = find_by_id(&db, "job-5").unwrap().unwrap();
        assert_eq!(found.status, "completed");
    }

    #[test]
    fn test_mark_completed_writes_metrics() {
        let db = test_db();
        insert(&db, &sample_job("job-6")).unwrap();

        let metrics = JobMetrics {
            original_size: 48,
            transformed_size: 130,
            size_delta: 82,
            quality_score: 92.0,
        };
        mark_completed(&db, "job-6", &metrics, None, "2026-01-01T01:00:00Z").unwrap();

        let found = find_by_id(&db, "job-6").unwrap().unwrap();
        assert_eq!(found.status, "completed");
        assert_eq!(found.original_size, Some(48));
        assert_eq!(found.transformed_size, Some(130));
        assert_eq!(found.size_delta, Some(82));
        assert_eq!(found.quality_score, Some(92.0));
        assert!(found.deploy_location.is_none());
    }

    #[test]
    fn test_reset_for_restart_clears_terminal_fields() {
        let db = test_db();
        insert(&db, &sample_job("job-7")).unwrap();
        mark_failed(&db, "job-7", "boom", "2026-01-01T00:01:00Z").unwrap();

        reset_for_restart(&db, "job-7", "2026-01-01T00:02:00Z").unwrap();

        let found = find_by_id(&db, "job-7").unwrap().unwrap();
        assert_eq!(found.status, "uploaded");
        assert!(found.error.is_none());
        assert!(found.completed_at.is_none());
        assert!(found.quality_score.is_none());
    }

    #[test]
    fn test_set_output_path() {
        let db = test_db();
        insert(&db, &sample_job("job-8")).unwrap();

        set_output_path(&db, "job-8", "/export/job-8/pricing_service.rs", "2026-01-01T00:05:00Z")
            .unwrap();

        let found = find_by_id(&db, "job-8").unwrap().unwrap();
        assert_eq!(
            found.output_path.as_deref(),
            Some("/export/job-8/pricing_service.rs")
        );
    }
}
