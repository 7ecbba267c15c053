//! Per-tenant daily summaries written by the daily divergence sweep.

use crate::error::Result;
use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

/// One aggressive target listed in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    /// Target id
    pub target_id: String,
    /// Target name
    pub name: String,
    /// Suspicion score at summary time
    pub suspicion_score: i64,
    /// Offending URL
    pub black_url: Option<String>,
}

/// A tenant's summary for one day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    /// Unique identifier
    pub id: String,
    /// Tenant summarized
    pub tenant_id: String,
    /// Calendar day (UTC)
    pub summary_date: NaiveDate,
    /// Job run that produced the summary
    pub job_run_id: String,
    /// Number of cloaked targets owned by the tenant
    pub cloaked_targets: i64,
    /// Highest-scoring cloaked targets
    pub top_targets: Vec<SummaryEntry>,
    /// When the summary was written
    pub created_at: DateTime<Utc>,
}

/// Write the summary for `(tenant_id, summary_date)`, replacing an earlier one
/// from the same day.
///
/// # Errors
/// Returns `DatabaseError` if serialization or the database write fails.
pub async fn upsert_daily_summary(
    pool: &Pool<Sqlite>,
    tenant_id: &str,
    summary_date: NaiveDate,
    job_run_id: &str,
    cloaked_targets: i64,
    top_targets: &[SummaryEntry],
) -> Result<()> {
    let top_json = serde_json::to_string(top_targets)?;

    sqlx::query(
        "INSERT INTO daily_summaries (id, tenant_id, summary_date, job_run_id, cloaked_targets,
                                      top_targets, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(tenant_id, summary_date) DO UPDATE SET
             job_run_id = excluded.job_run_id,
             cloaked_targets = excluded.cloaked_targets,
             top_targets = excluded.top_targets,
             created_at = excluded.created_at",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(tenant_id)
    .bind(summary_date.to_string())
    .bind(job_run_id)
    .bind(cloaked_targets)
    .bind(&top_json)
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a tenant's summary for a day.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or the stored row is unreadable.
pub async fn get_daily_summary(
    pool: &Pool<Sqlite>,
    tenant_id: &str,
    summary_date: NaiveDate,
) -> Result<Option<DailySummary>> {
    let row = sqlx::query(
        "SELECT id, tenant_id, summary_date, job_run_id, cloaked_targets, top_targets, created_at
         FROM daily_summaries WHERE tenant_id = ? AND summary_date = ?",
    )
    .bind(tenant_id)
    .bind(summary_date.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let top_json: String = row.try_get("top_targets")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Some(DailySummary {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        summary_date,
        job_run_id: row.try_get("job_run_id")?,
        cloaked_targets: row.try_get("cloaked_targets")?,
        top_targets: serde_json::from_str(&top_json)?,
        created_at: parse_timestamp(&created_at),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_runs::create_job_run;
    use crate::test_support::setup_test_db;
    use cloakscope_scheduler::{ScheduleType, TaskType};

    #[tokio::test]
    async fn test_upsert_daily_summary() {
        let db = setup_test_db().await;
        let run = create_job_run(
            db.pool(),
            "worker:divergence_test",
            TaskType::DivergenceTest,
            ScheduleType::Daily,
            None,
        )
        .await
        .expect("create run");
        let day = NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date");

        let entries = vec![SummaryEntry {
            target_id: "t-1".to_string(),
            name: "Spring promo".to_string(),
            suspicion_score: 75,
            black_url: Some("https://offer.example.net/".to_string()),
        }];
        upsert_daily_summary(db.pool(), "acme", day, &run.id, 1, &entries)
            .await
            .expect("write summary");

        let summary = get_daily_summary(db.pool(), "acme", day)
            .await
            .expect("get summary")
            .expect("summary exists");
        assert_eq!(summary.cloaked_targets, 1);
        assert_eq!(summary.top_targets, entries);

        // A second run on the same day replaces the first.
        upsert_daily_summary(db.pool(), "acme", day, &run.id, 0, &[])
            .await
            .expect("rewrite summary");
        let summary = get_daily_summary(db.pool(), "acme", day)
            .await
            .expect("get summary")
            .expect("summary exists");
        assert_eq!(summary.cloaked_targets, 0);
        assert!(summary.top_targets.is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_summaries")
            .fetch_one(db.pool())
            .await
            .expect("count");
        assert_eq!(count, 1);
    }
}
