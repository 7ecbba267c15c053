//! Scheduled worker.
//!
//! One invocation runs one task over a bounded, sequential candidate set and
//! is recorded as a single job run: created `running` before any work and
//! finished once with the tally. Per-item failures are counted and never stop
//! the sweep.

use crate::state::AppState;
use chrono::{NaiveDate, Utc};
use cloakscope_db::audits::{self, AuditStatus};
use cloakscope_db::summaries::{upsert_daily_summary, SummaryEntry};
use cloakscope_db::{job_runs, targets, DatabaseError};
use cloakscope_scanner::{AuditPipeline, DivergenceSettings, DivergenceTester, ScanError};
use cloakscope_scheduler::{
    is_job_due, next_run_after, JobStatus, RunTally, ScheduleType, TaskType,
};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of one worker invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub job_run_id: String,
    pub task_type: TaskType,
    pub schedule_type: ScheduleType,
    pub status: JobStatus,
    pub items_processed: u32,
    pub divergences_found: u32,
    pub errors_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
    /// Task-specific counters, also stored as the run's metadata
    pub details: JsonValue,
    pub duration_ms: i64,
    pub completed_at: String,
}

/// Run `task_type` and record it as a job run.
///
/// `tenant_id` scopes every candidate query; `None` covers all tenants.
/// Only failures to open or close the job run itself are returned as errors.
pub async fn run_task(
    state: &AppState,
    task_type: TaskType,
    schedule_type: ScheduleType,
    tenant_id: Option<&str>,
) -> Result<WorkerReport, DatabaseError> {
    let started = Instant::now();
    let pool = state.db.pool();
    let job_name = format!("{task_type}:{schedule_type}");

    let run =
        job_runs::create_job_run(pool, &job_name, task_type, schedule_type, tenant_id).await?;
    info!(
        "Job run {} started: {} ({}, tenant {})",
        run.id,
        task_type,
        schedule_type,
        tenant_id.unwrap_or("*")
    );

    let mut tally = RunTally::default();
    let outcome = match task_type {
        TaskType::DivergenceTest => {
            divergence_sweep(state, &run.id, schedule_type, tenant_id, &mut tally).await
        }
        TaskType::StatusCheck => status_check(state, tenant_id, &mut tally).await,
        TaskType::ScheduledAudits => scheduled_audits(state, tenant_id, &mut tally).await,
    };
    let details = outcome.unwrap_or_else(|err| {
        warn!("Job run {} could not select candidates: {}", run.id, err);
        tally.record_error(err.to_string());
        json!({})
    });

    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
    let status = job_runs::finish_job_run(pool, &run.id, &tally, duration_ms, &details).await?;
    info!(
        "Job run {} {}: {} processed, {} divergences, {} errors in {}ms",
        run.id,
        status,
        tally.processed,
        tally.divergences,
        tally.error_count(),
        duration_ms
    );

    Ok(WorkerReport {
        job_run_id: run.id,
        task_type,
        schedule_type,
        status,
        items_processed: tally.processed,
        divergences_found: tally.divergences,
        errors_count: tally.error_count(),
        error_summary: tally.error_summary(),
        details,
        duration_ms,
        completed_at: Utc::now().to_rfc3339(),
    })
}

/// Re-test targets for cloaking. Intraday covers the high-suspicion subset;
/// every other schedule sweeps all active targets and writes daily summaries.
async fn divergence_sweep(
    state: &AppState,
    job_run_id: &str,
    schedule_type: ScheduleType,
    tenant_id: Option<&str>,
    tally: &mut RunTally,
) -> Result<JsonValue, ScanError> {
    let pool = state.db.pool();
    let limits = &state.config.worker;
    let intraday = schedule_type == ScheduleType::Intraday;

    let candidates = if intraday {
        targets::list_intraday_candidates(
            pool,
            tenant_id,
            limits.intraday_min_score,
            limits.intraday_limit,
        )
        .await?
    } else {
        targets::list_active(pool, tenant_id, limits.daily_limit).await?
    };

    let tester = DivergenceTester::new(
        state.prober.clone(),
        DivergenceSettings::from_config(&state.config.probing, limits),
    );

    let mut tenants = BTreeSet::new();
    for target in &candidates {
        tenants.insert(target.tenant_id.as_str());
        match tester
            .run(pool, &target.id, &target.final_lp_url, job_run_id)
            .await
        {
            Ok(report) => match report.error {
                Some(err) => {
                    warn!("Divergence test for {} failed: {}", target.id, err);
                    tally.record_error(format!("{}: {err}", target.id));
                }
                None => {
                    tally.record_success();
                    if report.divergence_found {
                        tally.record_divergence();
                    }
                }
            },
            Err(err) => {
                warn!("Divergence test for {} failed: {}", target.id, err);
                tally.record_error(format!("{}: {err}", target.id));
            }
        }
    }

    let mut summaries_written = 0u32;
    if !intraday {
        let today = Utc::now().date_naive();
        for tenant in tenants {
            match write_daily_summary(state, tenant, today, job_run_id).await {
                Ok(()) => summaries_written += 1,
                Err(err) => {
                    warn!("Daily summary for tenant {} failed: {}", tenant, err);
                    tally.record_error(format!("summary {tenant}: {err}"));
                }
            }
        }
    }

    Ok(json!({
        "candidates": candidates.len(),
        "summariesWritten": summaries_written,
    }))
}

async fn write_daily_summary(
    state: &AppState,
    tenant_id: &str,
    day: NaiveDate,
    job_run_id: &str,
) -> Result<(), DatabaseError> {
    let pool = state.db.pool();
    let cloaked = targets::count_cloaked(pool, tenant_id).await?;
    let top: Vec<SummaryEntry> =
        targets::top_cloaked(pool, tenant_id, state.config.worker.summary_top_n)
            .await?
            .into_iter()
            .map(|target| SummaryEntry {
                target_id: target.id,
                name: target.name,
                suspicion_score: target.suspicion_score,
                black_url: target.black_url,
            })
            .collect();

    upsert_daily_summary(pool, tenant_id, day, job_run_id, cloaked, &top).await
}

/// A landing page that answers 404 or a server error is considered gone.
fn is_dead(status: u16) -> bool {
    status == 404 || status >= 500
}

async fn status_check(
    state: &AppState,
    tenant_id: Option<&str>,
    tally: &mut RunTally,
) -> Result<JsonValue, ScanError> {
    let pool = state.db.pool();
    let candidates =
        targets::list_active(pool, tenant_id, state.config.worker.status_check_limit).await?;

    let mut deactivated = 0u32;
    for target in &candidates {
        let liveness = state.prober.check_liveness(&target.final_lp_url).await;
        if liveness.status == 0 {
            let reason = liveness.error.unwrap_or_else(|| "no response".to_string());
            warn!("Status check for {} failed: {}", target.id, reason);
            tally.record_error(format!("{}: {reason}", target.id));
            continue;
        }

        if is_dead(liveness.status) {
            if let Err(err) = targets::set_active(pool, &target.id, false).await {
                tally.record_error(format!("{}: {err}", target.id));
                continue;
            }
            deactivated += 1;
            info!(
                "Target {} deactivated (HTTP {})",
                target.id, liveness.status
            );
        }
        tally.record_success();
    }

    Ok(json!({
        "checked": candidates.len(),
        "deactivated": deactivated,
    }))
}

async fn scheduled_audits(
    state: &AppState,
    tenant_id: Option<&str>,
    tally: &mut RunTally,
) -> Result<JsonValue, ScanError> {
    let pool = state.db.pool();
    let now = Utc::now();
    let now_str = now.to_rfc3339();

    let due: Vec<_> = audits::list_recurring(pool, tenant_id)
        .await?
        .into_iter()
        .filter(|audit| {
            audit
                .next_run_at
                .is_some_and(|next| is_job_due(&next.to_rfc3339(), &now_str))
        })
        .collect();

    let pipeline = AuditPipeline::new(state.prober.clone());
    let mut findings = 0i64;
    for audit in &due {
        let Some(recurrence) = audit.recurrence else {
            continue;
        };

        if let Err(err) = audits::set_status(pool, &audit.id, AuditStatus::Pending).await {
            tally.record_error(format!("{}: {err}", audit.id));
            continue;
        }

        match pipeline.run(pool, &audit.id).await {
            Ok(summary) if summary.status == AuditStatus::Failed => {
                tally.record_error(format!("{}: every audit module failed", audit.id));
            }
            Ok(summary) => {
                findings += summary.total_findings;
                tally.record_success();
            }
            Err(err) => {
                warn!("Scheduled audit {} failed: {}", audit.id, err);
                tally.record_error(format!("{}: {err}", audit.id));
            }
        }

        let next_run_at = next_run_after(recurrence, now);
        match audits::rearm(pool, &audit.id, now, next_run_at).await {
            Ok(()) => info!("Audit {} re-armed for {}", audit.id, next_run_at),
            Err(err) => tally.record_error(format!("{}: {err}", audit.id)),
        }
    }

    Ok(json!({
        "due": due.len(),
        "findings": findings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_statuses() {
        assert!(is_dead(404));
        assert!(is_dead(500));
        assert!(is_dead(503));
        assert!(!is_dead(200));
        assert!(!is_dead(301));
        assert!(!is_dead(403));
        assert!(!is_dead(410));
    }
}
