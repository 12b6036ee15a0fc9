//! Stage record repository: the five per-job pipeline stage rows.
//!
//! Stage transitions are guarded in SQL: a stage can only enter
//! `in_progress` from `not_started` with its predecessor completed, and
//! can only reach a terminal status from `in_progress`. A violated guard
//! surfaces as `DatabaseError::InvalidStageTransition` instead of a
//! silent no-op, so status regressions are structurally impossible.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw stage record row from the database.
#[derive(Debug, Clone)]
pub struct StageRow {
    pub job_id: String,
    pub stage_index: u8,
    pub stage_name: String,
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub degraded: Option<String>,
}

impl StageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            stage_index: row.get("stage_index")?,
            stage_name: row.get("stage_name")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            output: row.get("output")?,
            error: row.get("error")?,
            degraded: row.get("degraded")?,
        })
    }
}

/// Creates the five stage rows for a new job, all `not_started`.
pub fn create_all(
    db: &Database,
    job_id: &str,
    stage_names: &[&str; 5],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        for (i, name) in stage_names.iter().enumerate() {
            conn.execute(
                "INSERT INTO stage_records (job_id, stage_index, stage_name, status)
                 VALUES (?1, ?2, ?3, 'not_started')",
                params![job_id, (i + 1) as i64, name],
            )?;
        }
        Ok(())
    })
}

/// Resets all five stage rows to `not_started` for a full re-run.
pub fn reset_all(db: &Database, job_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE stage_records SET status = 'not_started', started_at = NULL,
             completed_at = NULL, output = NULL, error = NULL, degraded = NULL
             WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    })
}

/// Lists a job's stage records in pipeline order.
pub fn list(db: &Database, job_id: &str) -> Result<Vec<StageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM stage_records WHERE job_id = ?1 ORDER BY stage_index",
        )?;
        let rows: Vec<StageRow> = stmt
            .query_map(params![job_id], StageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Fetches a single stage record.
pub fn get(db: &Database, job_id: &str, stage_index: u8) -> Result<Option<StageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM stage_records WHERE job_id = ?1 AND stage_index = ?2",
                params![job_id, stage_index],
                |r| StageRow::from_row(r),
            )
            .optional()?;
        Ok(row)
    })
}

/// Moves a stage to `in_progress`. Requires the stage to be `not_started`
/// and (for stages past the first) its predecessor to be `completed`.
pub fn mark_in_progress(
    db: &Database,
    job_id: &str,
    stage_index: u8,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE stage_records SET status = 'in_progress', started_at = ?3
             WHERE job_id = ?1 AND stage_index = ?2 AND status = 'not_started'
             AND (?2 = 1 OR EXISTS (
                 SELECT 1 FROM stage_records p
                 WHERE p.job_id = ?1 AND p.stage_index = ?2 - 1 AND p.status = 'completed'
             ))",
            params![job_id, stage_index, now],
        )?;
        if changed == 0 {
            return Err(DatabaseError::InvalidStageTransition {
                job_id: job_id.to_string(),
                stage_index,
                reason: "stage is not not_started or predecessor incomplete".to_string(),
            });
        }
        Ok(())
    })
}

/// Completes an `in_progress` stage with its output snapshot and, for a
/// degraded success, the degradation note.
pub fn mark_completed(
    db: &Database,
    job_id: &str,
    stage_index: u8,
    output: &str,
    degraded: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE stage_records SET status = 'completed', completed_at = ?3,
             output = ?4, degraded = ?5
             WHERE job_id = ?1 AND stage_index = ?2 AND status = 'in_progress'",
            params![job_id, stage_index, now, output, degraded],
        )?;
        if changed == 0 {
            return Err(DatabaseError::InvalidStageTransition {
                job_id: job_id.to_string(),
                stage_index,
                reason: "stage is not in_progress".to_string(),
            });
        }
        Ok(())
    })
}

/// Fails an `in_progress` stage with its error text.
pub fn mark_failed(
    db: &Database,
    job_id: &str,
    stage_index: u8,
    error: &str,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE stage_records SET status = 'failed', completed_at = ?3, error = ?4
             WHERE job_id = ?1 AND stage_index = ?2 AND status = 'in_progress'",
            params![job_id, stage_index, now, error],
        )?;
        if changed == 0 {
            return Err(DatabaseError::InvalidStageTransition {
                job_id: job_id.to_string(),
                stage_index,
                reason: "stage is not in_progress".to_string(),
            });
        }
        Ok(())
    })
}
