//! Invocation log repository: append-only audit trail of capability calls.
//!
//! One row per attempt, including retries. Rows are never updated or
//! deleted; queries paginate in insertion order so exports read
//! chronologically.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A new invocation log entry, before insertion.
#[derive(Debug, Clone)]
pub struct NewInvocation {
    pub job_id: Option<String>,
    pub provider: String,
    pub operation: String,
    pub parameters: String,
    pub response: Option<String>,
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: i64,
    pub created_at: String,
}

/// A stored invocation log row.
#[derive(Debug, Clone)]
pub struct InvocationRow {
    pub id: i64,
    pub job_id: Option<String>,
    pub provider: String,
    pub operation: String,
    pub parameters: String,
    pub response: Option<String>,
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: i64,
    pub created_at: String,
}

impl InvocationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            provider: row.get("provider")?,
            operation: row.get("operation")?,
            parameters: row.get("parameters")?,
            response: row.get("response")?,
            error: row.get("error")?,
            success: row.get::<_, i64>("success")? != 0,
            duration_ms: row.get("duration_ms")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Query filter parameters for invocation log listing.
#[derive(Debug, Default, Clone)]
pub struct InvocationFilter {
    pub job_id: Option<String>,
    pub provider: Option<String>,
    pub success: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Appends one entry. Returns the autogenerated row id.
pub fn insert(db: &Database, entry: &NewInvocation) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO invocation_log (job_id, provider, operation, parameters, response,
             error, success, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.job_id,
                entry.provider,
                entry.operation,
                entry.parameters,
                entry.response,
                entry.error,
                entry.success as i64,
                entry.duration_ms,
                entry.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Queries entries with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &InvocationFilter,
) -> Result<(Vec<InvocationRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref job_id) = filter.job_id {
            conditions.push(format!("job_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_id.clone()));
        }
        if let Some(ref provider) = filter.provider {
            conditions.push(format!("provider = ?{}", param_values.len() + 1));
            param_values.push(Box::new(provider.clone()));
        }
        if let Some(success) = filter.success {
            conditions.push(format!("success = ?{}", param_values.len() + 1));
            param_values.push(Box::new(success as i64));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total matching rows.
        let count_sql = format!("SELECT COUNT(*) FROM invocation_log {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Fetch paginated results in insertion order.
        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM invocation_log {} ORDER BY id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<InvocationRow> = stmt
            .query_map(params_ref.as_slice(), InvocationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts entries tagged with the given job.
pub fn count_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM invocation_log WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Renders all entries matching the filter into one downloadable markdown
/// document. Pagination fields on the filter are ignored; an export
/// covers every match.
pub fn export_markdown(db: &Database, filter: &InvocationFilter) -> Result<String, DatabaseError> {
    let mut unbounded = filter.clone();
    unbounded.limit = Some(u64::MAX >> 1);
    unbounded.offset = Some(0);
    let (rows, total) = query(db, &unbounded)?;

    let mut doc = String::new();
    doc.push_str("# Capability invocation log\n\n");
    doc.push_str(&format!("{} entries\n", total));

    for row in rows {
        doc.push_str(&format!(
            "\n## #{} {} / {}\n\n",
            row.id, row.provider, row.operation
        ));
        doc.push_str(&format!("- At: {}\n", row.created_at));
        if let Some(ref job_id) = row.job_id {
            doc.push_str(&format!("- Job: {}\n", job_id));
        }
        doc.push_str(&format!(
            "- Outcome: {} in {} ms\n",
            if row.success { "success" } else { "failure" },
            row.duration_ms
        ));
        doc.push_str(&format!("- Parameters: `{}`\n", row.parameters));
        if let Some(ref response) = row.response {
            doc.push_str(&format!("- Response: `{}`\n", response));
        }
        if let Some(ref error) = row.error {
            doc.push_str(&format!("- Error: {}\n", error));
        }
    }

    Ok(doc)
}
