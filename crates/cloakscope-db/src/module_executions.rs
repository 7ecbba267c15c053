//! Per-module execution records of a security audit run.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Row, Sqlite};

/// Status of a single module execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Module in progress
    Running,
    /// Module finished and produced output
    Completed,
    /// Module raised an error
    Failed,
}

impl ExecutionStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DatabaseError::Decode(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

/// One module's run within an audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleExecution {
    /// Unique identifier
    pub id: String,
    /// Owning audit
    pub audit_id: String,
    /// Module kind, e.g. `redirect_chain`
    pub module_type: String,
    /// Execution status
    pub status: ExecutionStatus,
    /// Module input
    pub input: JsonValue,
    /// Module output, once completed
    pub output: Option<JsonValue>,
    /// Wall-clock duration
    pub duration_ms: Option<i64>,
    /// Failure reason
    pub error_message: Option<String>,
    /// When the module started
    pub started_at: DateTime<Utc>,
    /// When the module finished
    pub completed_at: Option<DateTime<Utc>>,
}

/// Record the start of a module execution.
///
/// # Errors
/// Returns `DatabaseError` if the insert fails, including for unknown audits.
pub async fn start_execution(
    pool: &Pool<Sqlite>,
    audit_id: &str,
    module_type: &str,
    input: &JsonValue,
) -> Result<ModuleExecution> {
    let id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();

    sqlx::query(
        "INSERT INTO audit_module_executions (id, audit_id, module_type, status, input, started_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(audit_id)
    .bind(module_type)
    .bind(ExecutionStatus::Running.as_str())
    .bind(serde_json::to_string(input)?)
    .bind(format_timestamp(started_at))
    .execute(pool)
    .await?;

    Ok(ModuleExecution {
        id,
        audit_id: audit_id.to_string(),
        module_type: module_type.to_string(),
        status: ExecutionStatus::Running,
        input: input.clone(),
        output: None,
        duration_ms: None,
        error_message: None,
        started_at,
        completed_at: None,
    })
}

/// Mark an execution completed with its output.
///
/// # Errors
/// Returns `DatabaseError::Conflict` if the execution is not running.
pub async fn complete_execution(
    pool: &Pool<Sqlite>,
    id: &str,
    output: &JsonValue,
    duration_ms: i64,
) -> Result<()> {
    let output_json = serde_json::to_string(output)?;
    finish(pool, id, ExecutionStatus::Completed, Some(output_json), None, duration_ms).await
}

/// Mark an execution failed.
///
/// # Errors
/// Returns `DatabaseError::Conflict` if the execution is not running.
pub async fn fail_execution(
    pool: &Pool<Sqlite>,
    id: &str,
    error_message: &str,
    duration_ms: i64,
) -> Result<()> {
    finish(
        pool,
        id,
        ExecutionStatus::Failed,
        None,
        Some(error_message),
        duration_ms,
    )
    .await
}

async fn finish(
    pool: &Pool<Sqlite>,
    id: &str,
    status: ExecutionStatus,
    output: Option<String>,
    error_message: Option<&str>,
    duration_ms: i64,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE audit_module_executions
         SET status = ?, output = ?, error_message = ?, duration_ms = ?, completed_at = ?
         WHERE id = ? AND status = 'running'",
    )
    .bind(status.as_str())
    .bind(output)
    .bind(error_message)
    .bind(duration_ms)
    .bind(format_timestamp(Utc::now()))
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::Conflict(format!(
            "Module execution '{id}' is not running"
        )));
    }
    Ok(())
}

/// Executions of an audit in start order.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row is unreadable.
pub async fn list_executions(pool: &Pool<Sqlite>, audit_id: &str) -> Result<Vec<ModuleExecution>> {
    let rows = sqlx::query(
        "SELECT id, audit_id, module_type, status, input, output, duration_ms, error_message,
                started_at, completed_at
         FROM audit_module_executions
         WHERE audit_id = ?
         ORDER BY started_at ASC, rowid ASC",
    )
    .bind(audit_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let status: String = row.try_get("status")?;
            let input: String = row.try_get("input")?;
            let output: Option<String> = row.try_get("output")?;
            let started_at: String = row.try_get("started_at")?;

            Ok(ModuleExecution {
                id: row.try_get("id")?,
                audit_id: row.try_get("audit_id")?,
                module_type: row.try_get("module_type")?,
                status: ExecutionStatus::parse(&status)?,
                input: serde_json::from_str(&input).unwrap_or(JsonValue::Null),
                output: output.and_then(|o| serde_json::from_str(&o).ok()),
                duration_ms: row.try_get("duration_ms")?,
                error_message: row.try_get("error_message")?,
                started_at: parse_timestamp(&started_at),
                completed_at: parse_optional_timestamp(row.try_get("completed_at")?),
            })
        })
        .collect()
}
