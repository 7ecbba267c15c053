//! Tenant resolution: maps an authenticated subject to its owning tenant.

use crate::format_timestamp;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

/// Register `subject_id` as a member of `tenant_id`, replacing any previous mapping.
///
/// # Errors
/// Returns `sqlx::Error` if the database write fails.
pub async fn add_member(
    pool: &Pool<Sqlite>,
    subject_id: &str,
    tenant_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO tenant_members (subject_id, tenant_id, created_at) VALUES (?, ?, ?)
         ON CONFLICT(subject_id) DO UPDATE SET tenant_id = excluded.tenant_id",
    )
    .bind(subject_id)
    .bind(tenant_id)
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up the tenant owning `subject_id`.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn resolve_tenant(
    pool: &Pool<Sqlite>,
    subject_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT tenant_id FROM tenant_members WHERE subject_id = ?")
        .bind(subject_id)
        .fetch_optional(pool)
        .await
}
