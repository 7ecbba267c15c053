//! Findings raised by audit modules.

use crate::error::Result;
use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use cloakscope_core::Severity;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Row, Sqlite};

/// A finding produced by an audit module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFinding {
    /// Machine-readable kind, e.g. `insecure_transport`
    pub finding_type: String,
    /// Severity
    pub severity: Severity,
    /// Short title
    pub title: String,
    /// Human-readable explanation
    pub description: String,
    /// Supporting data
    pub evidence: JsonValue,
    /// URL the finding applies to
    pub affected_url: String,
}

/// A persisted finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFinding {
    /// Unique identifier
    pub id: String,
    /// Owning audit
    pub audit_id: String,
    /// Execution that raised it
    pub execution_id: String,
    /// Finding content
    #[serde(flatten)]
    pub finding: NewFinding,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

/// Append a finding to an audit.
///
/// # Errors
/// Returns `DatabaseError` if the insert fails, including for unknown lineage.
pub async fn insert_finding(
    pool: &Pool<Sqlite>,
    audit_id: &str,
    execution_id: &str,
    finding: &NewFinding,
) -> Result<AuditFinding> {
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = Utc::now();

    sqlx::query(
        "INSERT INTO audit_findings (id, audit_id, execution_id, finding_type, severity, title,
                                     description, evidence, affected_url, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(audit_id)
    .bind(execution_id)
    .bind(&finding.finding_type)
    .bind(finding.severity.as_str())
    .bind(&finding.title)
    .bind(&finding.description)
    .bind(serde_json::to_string(&finding.evidence)?)
    .bind(&finding.affected_url)
    .bind(format_timestamp(created_at))
    .execute(pool)
    .await?;

    Ok(AuditFinding {
        id,
        audit_id: audit_id.to_string(),
        execution_id: execution_id.to_string(),
        finding: finding.clone(),
        created_at,
    })
}

/// All findings of an audit, most severe first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row is unreadable.
pub async fn list_for_audit(pool: &Pool<Sqlite>, audit_id: &str) -> Result<Vec<AuditFinding>> {
    let rows = sqlx::query(
        "SELECT id, audit_id, execution_id, finding_type, severity, title, description, evidence,
                affected_url, created_at
         FROM audit_findings
         WHERE audit_id = ?
         ORDER BY CASE severity
                      WHEN 'critical' THEN 0 WHEN 'high' THEN 1
                      WHEN 'medium' THEN 2 ELSE 3 END,
                  created_at ASC, rowid ASC",
    )
    .bind(audit_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let severity: String = row.try_get("severity")?;
            let evidence: String = row.try_get("evidence")?;
            let created_at: String = row.try_get("created_at")?;

            Ok(AuditFinding {
                id: row.try_get("id")?,
                audit_id: row.try_get("audit_id")?,
                execution_id: row.try_get("execution_id")?,
                finding: NewFinding {
                    finding_type: row.try_get("finding_type")?,
                    severity: Severity::parse(&severity)?,
                    title: row.try_get("title")?,
                    description: row.try_get("description")?,
                    evidence: serde_json::from_str(&evidence).unwrap_or(JsonValue::Null),
                    affected_url: row.try_get("affected_url")?,
                },
                created_at: parse_timestamp(&created_at),
            })
        })
        .collect()
}
