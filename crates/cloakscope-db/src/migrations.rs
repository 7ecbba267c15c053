//! Schema migrations.
//!
//! `001_initial_schema` creates targets, landing-page snapshots, job runs,
//! daily summaries and tenant membership. `002_security_audits` adds audits,
//! their module executions and findings. Both files are embedded at build time.

use crate::error::{DatabaseError, Result};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every embedded migration the store has not recorded yet.
///
/// # Errors
/// Returns `DatabaseError::Migration` if a migration fails or an applied one
/// no longer matches its embedded checksum.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    let current = schema_version(pool).await?;
    let latest = latest_version();
    if current >= latest {
        tracing::debug!("Schema already at version {}", current);
    } else {
        tracing::info!("Migrating schema from version {} to {}", current, latest);
    }

    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("schema upgrade failed: {e}")))?;
    Ok(())
}

/// Highest migration version shipped with this build.
#[must_use]
pub fn latest_version() -> i64 {
    MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Highest successfully applied version; 0 for a store never migrated.
///
/// # Errors
/// Returns `DatabaseError` if the bookkeeping table cannot be read.
pub async fn schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if tracked == 0 {
        return Ok(0);
    }

    let version: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(version)
}
