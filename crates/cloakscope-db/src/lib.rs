//! Cloakscope Database Layer
//!
//! Provides `SQLite` storage for targets, landing-page snapshots, job runs,
//! daily summaries and the security-audit hierarchy (audit, module execution,
//! finding). Uses `SQLx` with embedded migrations.
//!
//! # Example
//!
//! ```ignore
//! use cloakscope_db::Database;
//!
//! let db = Database::new("cloakscope.db").await?;
//! db.run_migrations().await?;
//! let target = cloakscope_db::targets::get_target(db.pool(), "target-id").await?;
//! ```
//!
//! # Design Principles
//!
//! - Row-level CRUD is plain async functions over `&Pool<Sqlite>`
//! - Timestamps are stored as fixed-width RFC 3339 UTC strings so they sort
//! - Snapshots and findings are append-only; targets, job runs and audits are
//!   updated by single statements keyed by id
//! - Foreign keys are enforced on every connection

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod audit_findings;
pub mod audits;
pub mod connection;
pub mod error;
pub mod job_runs;
pub mod migrations;
pub mod module_executions;
pub mod snapshots;
pub mod summaries;
pub mod targets;
pub mod tenants;

pub use connection::open_pool;
pub use error::{DatabaseError, Result};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// High-level database handle owning the connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (creating if needed) the database at `path`, or `:memory:`.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = open_pool(path).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Highest applied migration version, 0 before the first run.
    pub async fn schema_version(&self) -> Result<i64> {
        migrations::schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

/// Format a timestamp for storage.
#[must_use]
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp, falling back to "now" for unreadable values.
pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

pub(crate) fn parse_optional_timestamp(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}
