//! Job run bookkeeping: one record per worker or divergence-test invocation.
//!
//! A run is created `running` before any work starts and finished exactly
//! once. Terminal states are final: finishing is guarded on `running`.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use cloakscope_scheduler::{JobStatus, RunTally, ScheduleType, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Row, Sqlite};

/// A persisted job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    /// Unique identifier
    pub id: String,
    /// Human-readable job name
    pub job_name: String,
    /// Task performed
    pub task_type: TaskType,
    /// Trigger kind
    pub schedule_type: ScheduleType,
    /// Lifecycle status
    pub status: JobStatus,
    /// Tenant scope for user-triggered runs
    pub tenant_id: Option<String>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration
    pub duration_ms: Option<i64>,
    /// Items handled without error
    pub items_processed: i64,
    /// Divergences found
    pub divergences_found: i64,
    /// Failed items
    pub errors_count: i64,
    /// Free-form run metadata
    pub metadata: JsonValue,
    /// First few error messages
    pub error_summary: Option<String>,
}

/// Create a job run in the `running` state.
///
/// # Errors
/// Returns `sqlx::Error` if the database insert fails.
pub async fn create_job_run(
    pool: &Pool<Sqlite>,
    job_name: &str,
    task_type: TaskType,
    schedule_type: ScheduleType,
    tenant_id: Option<&str>,
) -> Result<JobRun, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let status = JobStatus::Running;

    sqlx::query(
        "INSERT INTO job_runs (id, job_name, task_type, schedule_type, status, tenant_id, started_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(job_name)
    .bind(task_type.as_str())
    .bind(schedule_type.as_str())
    .bind(status.as_str())
    .bind(tenant_id)
    .bind(format_timestamp(started_at))
    .execute(pool)
    .await?;

    Ok(JobRun {
        id,
        job_name: job_name.to_string(),
        task_type,
        schedule_type,
        status,
        tenant_id: tenant_id.map(str::to_string),
        started_at,
        completed_at: None,
        duration_ms: None,
        items_processed: 0,
        divergences_found: 0,
        errors_count: 0,
        metadata: JsonValue::Object(serde_json::Map::new()),
        error_summary: None,
    })
}

/// Finish a running job with the final tally.
///
/// The status is derived from the tally: `failed` only if errors occurred and
/// nothing succeeded.
///
/// # Errors
/// Returns `DatabaseError::Conflict` if the run is missing or already terminal.
pub async fn finish_job_run(
    pool: &Pool<Sqlite>,
    id: &str,
    tally: &RunTally,
    duration_ms: i64,
    metadata: &JsonValue,
) -> Result<JobStatus> {
    let status = tally.final_status();
    let metadata_json = serde_json::to_string(metadata)?;

    let result = sqlx::query(
        "UPDATE job_runs
         SET status = ?, completed_at = ?, duration_ms = ?, items_processed = ?,
             divergences_found = ?, errors_count = ?, metadata = ?, error_summary = ?
         WHERE id = ? AND status = 'running'",
    )
    .bind(status.as_str())
    .bind(format_timestamp(Utc::now()))
    .bind(duration_ms)
    .bind(i64::from(tally.processed))
    .bind(i64::from(tally.divergences))
    .bind(i64::from(tally.error_count()))
    .bind(&metadata_json)
    .bind(tally.error_summary())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::Conflict(format!(
            "Job run '{id}' is not running"
        )));
    }

    tracing::debug!("Job run {} finished as {}", id, status);
    Ok(status)
}

/// Get a job run by id.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a stored enum is unreadable.
pub async fn get_job_run(pool: &Pool<Sqlite>, id: &str) -> Result<Option<JobRun>> {
    let row = sqlx::query(
        "SELECT id, job_name, task_type, schedule_type, status, tenant_id, started_at,
                completed_at, duration_ms, items_processed, divergences_found, errors_count,
                metadata, error_summary
         FROM job_runs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| parse_job_run_row(&row)).transpose()
}

/// Total number of job runs recorded.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn count_job_runs(pool: &Pool<Sqlite>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM job_runs")
        .fetch_one(pool)
        .await
}

fn parse_job_run_row(row: &sqlx::sqlite::SqliteRow) -> Result<JobRun> {
    let task_type: String = row.try_get("task_type")?;
    let schedule_type: String = row.try_get("schedule_type")?;
    let status: String = row.try_get("status")?;
    let started_at: String = row.try_get("started_at")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(JobRun {
        id: row.try_get("id")?,
        job_name: row.try_get("job_name")?,
        task_type: task_type.parse::<TaskType>()?,
        schedule_type: schedule_type.parse::<ScheduleType>()?,
        status: status.parse::<JobStatus>()?,
        tenant_id: row.try_get("tenant_id")?,
        started_at: parse_timestamp(&started_at),
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?),
        duration_ms: row.try_get("duration_ms")?,
        items_processed: row.try_get("items_processed")?,
        divergences_found: row.try_get("divergences_found")?,
        errors_count: row.try_get("errors_count")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(JsonValue::Null),
        error_summary: row.try_get("error_summary")?,
    })
}
