//! Landing-page snapshots: one immutable record per probe attempt.

use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

/// A persisted probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier
    pub id: String,
    /// Target probed
    pub target_id: String,
    /// Job run the probe belongs to
    pub job_run_id: String,
    /// Condition label, e.g. `desktop/facebook/operator_target`
    pub condition_label: String,
    /// Device identity used
    pub device: String,
    /// Referrer used
    pub referrer: String,
    /// Geo hint used
    pub geo: String,
    /// User-Agent header sent
    pub user_agent: String,
    /// Synthetic observed geography
    pub observed_geo: String,
    /// URL requested, including any injected token
    pub requested_url: String,
    /// URL after redirects
    pub final_url: String,
    /// HTTP status, 0 when the probe failed
    pub status_code: u16,
    /// Content fingerprint
    pub fingerprint: String,
    /// Truncated visible text
    pub content_preview: String,
    /// Every URL visited, in order
    pub redirect_chain: Vec<String>,
    /// Whether this probe diverged from the baseline
    pub is_offending: bool,
    /// Token injected for this probe
    pub detected_token: Option<String>,
    /// Probe error, if any
    pub error: Option<String>,
    /// When the probe ran
    pub captured_at: DateTime<Utc>,
}

/// Insert payload for [`insert_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct NewSnapshot {
    /// Target probed
    pub target_id: String,
    /// Owning job run
    pub job_run_id: String,
    /// Condition label
    pub condition_label: String,
    /// Device identity
    pub device: String,
    /// Referrer identity
    pub referrer: String,
    /// Geo identity
    pub geo: String,
    /// User-Agent header sent
    pub user_agent: String,
    /// Synthetic observed geography
    pub observed_geo: String,
    /// URL requested
    pub requested_url: String,
    /// URL after redirects
    pub final_url: String,
    /// HTTP status
    pub status_code: u16,
    /// Content fingerprint
    pub fingerprint: String,
    /// Truncated visible text
    pub content_preview: String,
    /// Redirect chain
    pub redirect_chain: Vec<String>,
    /// Divergent from baseline
    pub is_offending: bool,
    /// Token injected
    pub detected_token: Option<String>,
    /// Probe error
    pub error: Option<String>,
}

/// Append a snapshot.
///
/// # Errors
/// Returns `sqlx::Error` if the insert fails, including when the target or
/// job run does not exist.
pub async fn insert_snapshot(
    pool: &Pool<Sqlite>,
    snapshot: NewSnapshot,
) -> Result<Snapshot, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let captured_at = Utc::now();
    let chain_json = serde_json::to_string(&snapshot.redirect_chain).unwrap_or_default();

    sqlx::query(
        "INSERT INTO landing_page_snapshots (id, target_id, job_run_id, condition_label, device,
             referrer, geo, user_agent, observed_geo, requested_url, final_url, status_code,
             fingerprint, content_preview, redirect_chain, is_offending, detected_token, error,
             captured_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&snapshot.target_id)
    .bind(&snapshot.job_run_id)
    .bind(&snapshot.condition_label)
    .bind(&snapshot.device)
    .bind(&snapshot.referrer)
    .bind(&snapshot.geo)
    .bind(&snapshot.user_agent)
    .bind(&snapshot.observed_geo)
    .bind(&snapshot.requested_url)
    .bind(&snapshot.final_url)
    .bind(i64::from(snapshot.status_code))
    .bind(&snapshot.fingerprint)
    .bind(&snapshot.content_preview)
    .bind(&chain_json)
    .bind(snapshot.is_offending)
    .bind(&snapshot.detected_token)
    .bind(&snapshot.error)
    .bind(format_timestamp(captured_at))
    .execute(pool)
    .await?;

    Ok(Snapshot {
        id,
        target_id: snapshot.target_id,
        job_run_id: snapshot.job_run_id,
        condition_label: snapshot.condition_label,
        device: snapshot.device,
        referrer: snapshot.referrer,
        geo: snapshot.geo,
        user_agent: snapshot.user_agent,
        observed_geo: snapshot.observed_geo,
        requested_url: snapshot.requested_url,
        final_url: snapshot.final_url,
        status_code: snapshot.status_code,
        fingerprint: snapshot.fingerprint,
        content_preview: snapshot.content_preview,
        redirect_chain: snapshot.redirect_chain,
        is_offending: snapshot.is_offending,
        detected_token: snapshot.detected_token,
        error: snapshot.error,
        captured_at,
    })
}

/// Snapshot history of a target, oldest first.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn get_by_target(
    pool: &Pool<Sqlite>,
    target_id: &str,
) -> Result<Vec<Snapshot>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, target_id, job_run_id, condition_label, device, referrer, geo, user_agent,
                observed_geo, requested_url, final_url, status_code, fingerprint, content_preview,
                redirect_chain, is_offending, detected_token, error, captured_at
         FROM landing_page_snapshots
         WHERE target_id = ?
         ORDER BY captured_at ASC, rowid ASC",
    )
    .bind(target_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_snapshot_row).collect()
}

/// Number of snapshots written by a job run.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn count_by_job_run(pool: &Pool<Sqlite>, job_run_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM landing_page_snapshots WHERE job_run_id = ?")
        .bind(job_run_id)
        .fetch_one(pool)
        .await
}

fn parse_snapshot_row(row: &sqlx::sqlite::SqliteRow) -> Result<Snapshot, sqlx::Error> {
    let chain_json: String = row.try_get("redirect_chain")?;
    let redirect_chain = serde_json::from_str(&chain_json).unwrap_or_default();
    let status_code: i64 = row.try_get("status_code")?;
    let captured_at: String = row.try_get("captured_at")?;

    Ok(Snapshot {
        id: row.try_get("id")?,
        target_id: row.try_get("target_id")?,
        job_run_id: row.try_get("job_run_id")?,
        condition_label: row.try_get("condition_label")?,
        device: row.try_get("device")?,
        referrer: row.try_get("referrer")?,
        geo: row.try_get("geo")?,
        user_agent: row.try_get("user_agent")?,
        observed_geo: row.try_get("observed_geo")?,
        requested_url: row.try_get("requested_url")?,
        final_url: row.try_get("final_url")?,
        status_code: u16::try_from(status_code).unwrap_or(0),
        fingerprint: row.try_get("fingerprint")?,
        content_preview: row.try_get("content_preview")?,
        redirect_chain,
        is_offending: row.try_get("is_offending")?,
        detected_token: row.try_get("detected_token")?,
        error: row.try_get("error")?,
        captured_at: parse_timestamp(&captured_at),
    })
}
