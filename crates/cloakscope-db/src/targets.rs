//! Target (ad / landing page) operations.
//!
//! Targets are created by the import pipeline and mutated here by the
//! divergence tester and status checks. They are never deleted.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

/// An ad or URL under investigation for cloaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Unique identifier
    pub id: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Display name
    pub name: String,
    /// Candidate landing page URL
    pub final_lp_url: String,
    /// Known-safe page, set from the baseline probe on divergence
    pub white_url: Option<String>,
    /// Offending page discovered by a divergent probe
    pub black_url: Option<String>,
    /// Cloaker token deduced from the landing URL
    pub detected_token: Option<String>,
    /// Running suspicion score, capped by configuration
    pub suspicion_score: i64,
    /// Set once an offending snapshot exists
    pub is_cloaked: bool,
    /// Cleared by status checks when the landing page is gone
    pub is_active: bool,
    /// Last divergence test
    pub last_checked_at: Option<DateTime<Utc>>,
    /// When the target was created
    pub created_at: DateTime<Utc>,
    /// When the target was last modified
    pub updated_at: DateTime<Utc>,
}

/// Fields written when divergence is confirmed.
#[derive(Debug, Clone)]
pub struct DivergenceUpdate<'a> {
    /// Final URL of the offending probe
    pub black_url: &'a str,
    /// Final URL of the baseline probe
    pub white_url: &'a str,
    /// Token used by the offending probe, if any
    pub detected_token: Option<&'a str>,
    /// Score added
    pub score_increment: i64,
    /// Score ceiling
    pub max_score: i64,
}

const TARGET_COLUMNS: &str = "id, tenant_id, name, final_lp_url, white_url, black_url, \
     detected_token, suspicion_score, is_cloaked, is_active, last_checked_at, created_at, updated_at";

/// Create a new active target.
///
/// # Errors
/// Returns `sqlx::Error` if the database insert fails.
pub async fn create_target(
    pool: &Pool<Sqlite>,
    tenant_id: &str,
    name: &str,
    final_lp_url: &str,
) -> Result<Target, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO targets (id, tenant_id, name, final_lp_url, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(tenant_id)
    .bind(name)
    .bind(final_lp_url)
    .bind(format_timestamp(now))
    .bind(format_timestamp(now))
    .execute(pool)
    .await?;

    Ok(Target {
        id,
        tenant_id: tenant_id.to_string(),
        name: name.to_string(),
        final_lp_url: final_lp_url.to_string(),
        white_url: None,
        black_url: None,
        detected_token: None,
        suspicion_score: 0,
        is_cloaked: false,
        is_active: true,
        last_checked_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a target by id.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn get_target(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Target>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(|row| parse_target_row(&row)).transpose()
}

/// Active targets at or above `min_score`, most suspicious first.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn list_intraday_candidates(
    pool: &Pool<Sqlite>,
    tenant_id: Option<&str>,
    min_score: i64,
    limit: u32,
) -> Result<Vec<Target>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {TARGET_COLUMNS} FROM targets
         WHERE is_active = 1 AND suspicion_score >= ? AND (? IS NULL OR tenant_id = ?)
         ORDER BY suspicion_score DESC, id
         LIMIT ?"
    ))
    .bind(min_score)
    .bind(tenant_id)
    .bind(tenant_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_target_row).collect()
}

/// Active targets, least recently checked first (never-checked before all).
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn list_active(
    pool: &Pool<Sqlite>,
    tenant_id: Option<&str>,
    limit: u32,
) -> Result<Vec<Target>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {TARGET_COLUMNS} FROM targets
         WHERE is_active = 1 AND (? IS NULL OR tenant_id = ?)
         ORDER BY last_checked_at IS NOT NULL, last_checked_at ASC, id
         LIMIT ?"
    ))
    .bind(tenant_id)
    .bind(tenant_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_target_row).collect()
}

/// Cloaked targets of a tenant with the highest scores.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn top_cloaked(
    pool: &Pool<Sqlite>,
    tenant_id: &str,
    limit: u32,
) -> Result<Vec<Target>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {TARGET_COLUMNS} FROM targets
         WHERE tenant_id = ? AND is_cloaked = 1
         ORDER BY suspicion_score DESC, id
         LIMIT ?"
    ))
    .bind(tenant_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_target_row).collect()
}

/// Number of cloaked targets owned by a tenant.
///
/// # Errors
/// Returns `sqlx::Error` if the database query fails.
pub async fn count_cloaked(pool: &Pool<Sqlite>, tenant_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM targets WHERE tenant_id = ? AND is_cloaked = 1")
        .bind(tenant_id)
        .fetch_one(pool)
        .await
}

/// Record that a divergence test ran against a target.
///
/// # Errors
/// Returns `sqlx::Error` if the database update fails.
pub async fn mark_checked(pool: &Pool<Sqlite>, id: &str) -> Result<(), sqlx::Error> {
    let now = format_timestamp(Utc::now());
    sqlx::query("UPDATE targets SET last_checked_at = ?, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Flip a target's active flag.
///
/// # Errors
/// Returns `sqlx::Error` if the database update fails.
pub async fn set_active(pool: &Pool<Sqlite>, id: &str, is_active: bool) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE targets SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(is_active)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a target as cloaking.
///
/// Runs as one statement so concurrent increments are not lost; the score is
/// capped at `max_score`. The update only applies once an offending snapshot
/// for the target has been persisted.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if the target does not exist
/// or has no offending snapshot.
pub async fn record_divergence(
    pool: &Pool<Sqlite>,
    id: &str,
    update: &DivergenceUpdate<'_>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE targets
         SET is_cloaked = 1,
             black_url = ?,
             white_url = ?,
             detected_token = COALESCE(?, detected_token),
             suspicion_score = MIN(suspicion_score + ?, ?),
             updated_at = ?
         WHERE id = ?
           AND EXISTS (SELECT 1 FROM landing_page_snapshots
                       WHERE target_id = targets.id AND is_offending = 1)",
    )
    .bind(update.black_url)
    .bind(update.white_url)
    .bind(update.detected_token)
    .bind(update.score_increment)
    .bind(update.max_score)
    .bind(format_timestamp(Utc::now()))
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Target '{id}' not found or has no offending snapshot"
        )));
    }

    Ok(())
}

fn parse_target_row(row: &sqlx::sqlite::SqliteRow) -> Result<Target, sqlx::Error> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Target {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        final_lp_url: row.try_get("final_lp_url")?,
        white_url: row.try_get("white_url")?,
        black_url: row.try_get("black_url")?,
        detected_token: row.try_get("detected_token")?,
        suspicion_score: row.try_get("suspicion_score")?,
        is_cloaked: row.try_get("is_cloaked")?,
        is_active: row.try_get("is_active")?,
        last_checked_at: parse_optional_timestamp(row.try_get("last_checked_at")?),
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_test_db;

    async fn insert_offending_snapshot(pool: &Pool<Sqlite>, target_id: &str) {
        sqlx::query(
            "INSERT INTO job_runs (id, job_name, task_type, schedule_type, status, started_at)
             VALUES ('run-1', 'test', 'divergence_test', 'manual', 'running', '2026-01-01T00:00:00.000Z')
             ON CONFLICT(id) DO NOTHING",
        )
        .execute(pool)
        .await
        .expect("insert job run");

        sqlx::query(
            "INSERT INTO landing_page_snapshots (id, target_id, job_run_id, condition_label, device,
                 referrer, geo, user_agent, observed_geo, requested_url, final_url, status_code,
                 fingerprint, content_preview, is_offending, captured_at)
             VALUES (?, ?, 'run-1', 'desktop/facebook/operator_target', 'desktop', 'facebook',
                 'operator_target', 'ua', 'GB', 'https://a.example.com', 'https://b.example.com',
                 200, 'ff', '', 1, '2026-01-01T00:00:00.000Z')",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(target_id)
        .execute(pool)
        .await
        .expect("insert snapshot");
    }

    #[tokio::test]
    async fn test_create_and_get_target() {
        let db = setup_test_db().await;

        let target = create_target(db.pool(), "acme", "Spring promo", "https://lp.example.com/")
            .await
            .expect("create target");

        let loaded = get_target(db.pool(), &target.id)
            .await
            .expect("get target")
            .expect("target exists");
        assert_eq!(loaded.tenant_id, "acme");
        assert_eq!(loaded.final_lp_url, "https://lp.example.com/");
        assert_eq!(loaded.suspicion_score, 0);
        assert!(loaded.is_active);
        assert!(!loaded.is_cloaked);
        assert!(loaded.last_checked_at.is_none());

        assert!(get_target(db.pool(), "missing")
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn test_record_divergence_requires_offending_snapshot() {
        let db = setup_test_db().await;
        let target = create_target(db.pool(), "acme", "t", "https://lp.example.com/")
            .await
            .expect("create target");

        let update = DivergenceUpdate {
            black_url: "https://offer.example.net/",
            white_url: "https://lp.example.com/",
            detected_token: Some("k=abcd"),
            score_increment: 25,
            max_score: 100,
        };

        let result = record_divergence(db.pool(), &target.id, &update).await;
        assert!(matches!(result, Err(DatabaseError::NotFoundWithMessage(_))));
        let unchanged = get_target(db.pool(), &target.id)
            .await
            .expect("get")
            .expect("exists");
        assert!(!unchanged.is_cloaked);

        insert_offending_snapshot(db.pool(), &target.id).await;
        record_divergence(db.pool(), &target.id, &update)
            .await
            .expect("record divergence");

        let flagged = get_target(db.pool(), &target.id)
            .await
            .expect("get")
            .expect("exists");
        assert!(flagged.is_cloaked);
        assert_eq!(flagged.black_url.as_deref(), Some("https://offer.example.net/"));
        assert_eq!(flagged.white_url.as_deref(), Some("https://lp.example.com/"));
        assert_eq!(flagged.detected_token.as_deref(), Some("k=abcd"));
        assert_eq!(flagged.suspicion_score, 25);
    }

    #[tokio::test]
    async fn test_score_is_capped() {
        let db = setup_test_db().await;
        let target = create_target(db.pool(), "acme", "t", "https://lp.example.com/")
            .await
            .expect("create target");
        insert_offending_snapshot(db.pool(), &target.id).await;

        let update = DivergenceUpdate {
            black_url: "https://offer.example.net/",
            white_url: "https://lp.example.com/",
            detected_token: None,
            score_increment: 25,
            max_score: 100,
        };
        for _ in 0..6 {
            record_divergence(db.pool(), &target.id, &update)
                .await
                .expect("record divergence");
        }

        let flagged = get_target(db.pool(), &target.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(flagged.suspicion_score, 100);
    }

    #[tokio::test]
    async fn test_candidate_selection() {
        let db = setup_test_db().await;
        let pool = db.pool();

        let low = create_target(pool, "acme", "low", "https://a.example.com/")
            .await
            .expect("create");
        let high = create_target(pool, "acme", "high", "https://b.example.com/")
            .await
            .expect("create");
        let other = create_target(pool, "globex", "other", "https://c.example.com/")
            .await
            .expect("create");
        for (id, score) in [(&low.id, 10), (&high.id, 75), (&other.id, 60)] {
            sqlx::query("UPDATE targets SET suspicion_score = ? WHERE id = ?")
                .bind(score)
                .bind(id)
                .execute(pool)
                .await
                .expect("set score");
        }

        let intraday = list_intraday_candidates(pool, None, 50, 20)
            .await
            .expect("intraday");
        let ids: Vec<_> = intraday.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![high.id.as_str(), other.id.as_str()]);

        let scoped = list_intraday_candidates(pool, Some("globex"), 50, 20)
            .await
            .expect("intraday scoped");
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, other.id);

        // Checked targets go to the back of the daily queue.
        mark_checked(pool, &low.id).await.expect("mark checked");
        let daily = list_active(pool, None, 100).await.expect("daily");
        assert_eq!(daily.len(), 3);
        assert_eq!(daily.last().map(|t| t.id.as_str()), Some(low.id.as_str()));

        set_active(pool, &high.id, false).await.expect("deactivate");
        let daily = list_active(pool, Some("acme"), 100).await.expect("daily");
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].id, low.id);
    }

    #[tokio::test]
    async fn test_top_cloaked() {
        let db = setup_test_db().await;
        let pool = db.pool();

        let a = create_target(pool, "acme", "a", "https://a.example.com/")
            .await
            .expect("create");
        let b = create_target(pool, "acme", "b", "https://b.example.com/")
            .await
            .expect("create");
        create_target(pool, "acme", "clean", "https://c.example.com/")
            .await
            .expect("create");
        sqlx::query("UPDATE targets SET is_cloaked = 1, suspicion_score = 50 WHERE id = ?")
            .bind(&a.id)
            .execute(pool)
            .await
            .expect("flag a");
        sqlx::query("UPDATE targets SET is_cloaked = 1, suspicion_score = 90 WHERE id = ?")
            .bind(&b.id)
            .execute(pool)
            .await
            .expect("flag b");

        let top = top_cloaked(pool, "acme", 10).await.expect("top");
        let ids: Vec<_> = top.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);
        assert_eq!(count_cloaked(pool, "acme").await.expect("count"), 2);
    }
}
