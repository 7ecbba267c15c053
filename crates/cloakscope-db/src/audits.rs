//! Security audit records.
//!
//! An audit is a named scan of one target URL. Recurring audits carry a
//! recurrence and `next_run_at`; the scheduler runs them when due and re-arms
//! them to `pending` afterwards.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use cloakscope_scheduler::Recurrence;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Row, Sqlite};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a security audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Waiting to run
    Pending,
    /// Modules executing
    Running,
    /// At least one module ran
    Completed,
    /// Every module failed
    Failed,
    /// Withdrawn by the owner
    Cancelled,
}

impl AuditStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DatabaseError::Decode(format!("unknown audit status '{other}'"))),
        }
    }
}

/// A security audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAudit {
    /// Unique identifier
    pub id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Display name
    pub name: String,
    /// URL inspected
    pub target_url: String,
    /// Lifecycle status
    pub status: AuditStatus,
    /// Findings across all modules of the latest run
    pub total_findings: i64,
    /// Critical findings of the latest run
    pub critical_findings: i64,
    /// Recurrence, for scheduled audits
    pub recurrence: Option<Recurrence>,
    /// Next scheduled run
    pub next_run_at: Option<DateTime<Utc>>,
    /// Last scheduled run
    pub last_run_at: Option<DateTime<Utc>>,
    /// Free-form configuration, e.g. `{"modules": ["redirect_chain"]}`
    pub config: JsonValue,
    /// When the latest run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest run finished
    pub completed_at: Option<DateTime<Utc>>,
    /// When the audit was created
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`create_audit`].
#[derive(Debug, Clone)]
pub struct NewAudit {
    /// Owning tenant
    pub tenant_id: String,
    /// Display name
    pub name: String,
    /// URL inspected
    pub target_url: String,
    /// Recurrence, for scheduled audits
    pub recurrence: Option<Recurrence>,
    /// First scheduled run
    pub next_run_at: Option<DateTime<Utc>>,
    /// Free-form configuration
    pub config: JsonValue,
}

const AUDIT_COLUMNS: &str = "id, tenant_id, name, target_url, status, total_findings, \
     critical_findings, recurrence, next_run_at, last_run_at, config, started_at, completed_at, created_at";

/// Create a `pending` audit.
///
/// # Errors
/// Returns `DatabaseError` if serialization or the insert fails.
pub async fn create_audit(pool: &Pool<Sqlite>, audit: NewAudit) -> Result<SecurityAudit> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let config_json = serde_json::to_string(&audit.config)?;

    sqlx::query(
        "INSERT INTO security_audits (id, tenant_id, name, target_url, status, recurrence,
                                      next_run_at, config, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&audit.tenant_id)
    .bind(&audit.name)
    .bind(&audit.target_url)
    .bind(AuditStatus::Pending.as_str())
    .bind(audit.recurrence.map(|r| r.as_str()))
    .bind(audit.next_run_at.map(format_timestamp))
    .bind(&config_json)
    .bind(format_timestamp(now))
    .bind(format_timestamp(now))
    .execute(pool)
    .await?;

    Ok(SecurityAudit {
        id,
        tenant_id: audit.tenant_id,
        name: audit.name,
        target_url: audit.target_url,
        status: AuditStatus::Pending,
        total_findings: 0,
        critical_findings: 0,
        recurrence: audit.recurrence,
        next_run_at: audit.next_run_at,
        last_run_at: None,
        config: audit.config,
        started_at: None,
        completed_at: None,
        created_at: now,
    })
}

/// Get an audit by id.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or the row is unreadable.
pub async fn get_audit(pool: &Pool<Sqlite>, id: &str) -> Result<Option<SecurityAudit>> {
    let row = sqlx::query(&format!(
        "SELECT {AUDIT_COLUMNS} FROM security_audits WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| parse_audit_row(&row)).transpose()
}

/// Recurring audits that are not running or cancelled, earliest due first.
///
/// Due-ness is decided by the caller against its own clock.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row is unreadable.
pub async fn list_recurring(
    pool: &Pool<Sqlite>,
    tenant_id: Option<&str>,
) -> Result<Vec<SecurityAudit>> {
    let rows = sqlx::query(&format!(
        "SELECT {AUDIT_COLUMNS} FROM security_audits
         WHERE recurrence IS NOT NULL AND next_run_at IS NOT NULL
           AND status NOT IN ('running', 'cancelled')
           AND (? IS NULL OR tenant_id = ?)
         ORDER BY next_run_at ASC, id"
    ))
    .bind(tenant_id)
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_audit_row).collect()
}

/// Set an audit's status.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if the audit does not exist.
pub async fn set_status(pool: &Pool<Sqlite>, id: &str, status: AuditStatus) -> Result<()> {
    let now = format_timestamp(Utc::now());
    let started_at = (status == AuditStatus::Running).then(|| now.clone());

    let result = sqlx::query(
        "UPDATE security_audits
         SET status = ?, started_at = COALESCE(?, started_at), updated_at = ?
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(started_at)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Audit '{id}' not found"
        )));
    }
    Ok(())
}

/// Record the outcome of a run: final status and finding totals.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if the audit does not exist.
pub async fn finish_audit(
    pool: &Pool<Sqlite>,
    id: &str,
    status: AuditStatus,
    total_findings: i64,
    critical_findings: i64,
) -> Result<()> {
    let now = format_timestamp(Utc::now());
    let result = sqlx::query(
        "UPDATE security_audits
         SET status = ?, total_findings = ?, critical_findings = ?, completed_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(total_findings)
    .bind(critical_findings)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Audit '{id}' not found"
        )));
    }
    Ok(())
}

/// Re-arm a recurring audit after a scheduled run.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if the audit does not exist.
pub async fn rearm(
    pool: &Pool<Sqlite>,
    id: &str,
    last_run_at: DateTime<Utc>,
    next_run_at: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE security_audits
         SET status = ?, last_run_at = ?, next_run_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(AuditStatus::Pending.as_str())
    .bind(format_timestamp(last_run_at))
    .bind(format_timestamp(next_run_at))
    .bind(format_timestamp(Utc::now()))
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Audit '{id}' not found"
        )));
    }
    Ok(())
}

fn parse_audit_row(row: &sqlx::sqlite::SqliteRow) -> Result<SecurityAudit> {
    let status: String = row.try_get("status")?;
    let recurrence: Option<String> = row.try_get("recurrence")?;
    let config: String = row.try_get("config")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(SecurityAudit {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        target_url: row.try_get("target_url")?,
        status: status.parse()?,
        total_findings: row.try_get("total_findings")?,
        critical_findings: row.try_get("critical_findings")?,
        recurrence: recurrence.map(|r| r.parse::<Recurrence>()).transpose()?,
        next_run_at: parse_optional_timestamp(row.try_get("next_run_at")?),
        last_run_at: parse_optional_timestamp(row.try_get("last_run_at")?),
        config: serde_json::from_str(&config).unwrap_or(JsonValue::Null),
        started_at: parse_optional_timestamp(row.try_get("started_at")?),
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?),
        created_at: parse_timestamp(&created_at),
    })
}
