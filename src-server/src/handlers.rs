//! Request handlers.

use crate::error::ApiError;
use crate::state::AppState;
use crate::worker::{self, WorkerReport};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use chrono::Utc;
use cloakscope_auth::{Principal, TriggerCredentials, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use cloakscope_db::{job_runs, targets, tenants};
use cloakscope_probe::check_url;
use cloakscope_scanner::{DivergenceSettings, DivergenceTester, ScanError};
use cloakscope_scheduler::{RunTally, ScheduleType, TaskType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::time::Instant;
use tracing::info;

/// `GET /health`
pub async fn health() -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DivergenceTestRequest {
    ad_id: Option<String>,
    target_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRunRequest {
    task_type: Option<String>,
    schedule_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkerRunResponse {
    success: bool,
    #[serde(flatten)]
    report: WorkerReport,
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request("INVALID_BODY", format!("Invalid JSON body: {e}")))
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::bad_request("MISSING_FIELD", format!("Missing required field: {field}"))
        })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// `POST /v1/divergence-test` with `{ adId, targetUrl }`.
///
/// Input is validated before anything is written: a missing field or a
/// refused URL is a 400, an unknown target a 404.
pub async fn divergence_test(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<JsonValue>, ApiError> {
    let started = Instant::now();
    let request: DivergenceTestRequest = parse_body(&body)?;
    let ad_id = required(request.ad_id, "adId")?;
    let target_url = required(request.target_url, "targetUrl")?;
    check_url(&target_url).map_err(ScanError::from)?;

    let pool = state.db.pool();
    let target = targets::get_target(pool, &ad_id)
        .await?
        .ok_or_else(|| ScanError::TargetNotFound(ad_id.clone()))?;

    let run = job_runs::create_job_run(
        pool,
        "divergence-test",
        TaskType::DivergenceTest,
        ScheduleType::Manual,
        Some(&target.tenant_id),
    )
    .await?;
    info!("Divergence test for {} started (run {})", target.id, run.id);

    let tester = DivergenceTester::new(
        state.prober.clone(),
        DivergenceSettings::from_config(&state.config.probing, &state.config.worker),
    );
    let outcome = tester.run(pool, &target.id, &target_url, &run.id).await;

    let mut tally = RunTally::default();
    match &outcome {
        Ok(report) if report.error.is_some() => {
            tally.record_error(report.error.clone().unwrap_or_default());
        }
        Ok(report) => {
            tally.record_success();
            if report.divergence_found {
                tally.record_divergence();
            }
        }
        Err(err) => tally.record_error(err.to_string()),
    }

    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
    let metadata = json!({ "targetId": target.id, "targetUrl": target_url });
    let status = job_runs::finish_job_run(pool, &run.id, &tally, duration_ms, &metadata).await?;
    let report = outcome?;

    Ok(Json(json!({
        "success": true,
        "jobRunId": run.id,
        "status": status,
        "divergenceFound": report.divergence_found,
        "offendingUrl": report.offending_url,
        "detectedToken": report.detected_token,
        "probesRun": report.probes_run,
        "snapshotsWritten": report.snapshots_written,
        "probeErrors": report.probe_errors,
        "error": report.error,
        "durationMs": duration_ms,
        "completedAt": Utc::now().to_rfc3339(),
    })))
}

/// `POST /v1/worker/run` with `{ taskType, scheduleType? }`.
///
/// Authentication runs before the body is even parsed. Signed triggers run
/// across all tenants; bearer triggers are scoped to the caller's tenant.
pub async fn worker_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WorkerRunResponse>, ApiError> {
    let credentials = TriggerCredentials {
        signature: header_str(&headers, SIGNATURE_HEADER),
        timestamp: header_str(&headers, TIMESTAMP_HEADER),
        authorization: header_str(&headers, header::AUTHORIZATION.as_str()),
    };
    let principal = state.auth.authenticate(&credentials, &body).await?;

    let tenant_id = match principal {
        Principal::Cron => None,
        Principal::User { subject } => {
            let tenant = tenants::resolve_tenant(state.db.pool(), &subject)
                .await?
                .ok_or_else(|| {
                    ApiError::unauthorized("NO_TENANT", "Authenticated user has no tenant")
                })?;
            Some(tenant)
        }
    };

    let request: WorkerRunRequest = parse_body(&body)?;
    let task_type = required(request.task_type, "taskType")?
        .parse::<TaskType>()
        .map_err(|e| ApiError::bad_request("INVALID_TASK_TYPE", format!("{e}")))?;
    let schedule_type = match request.schedule_type {
        Some(value) => value
            .parse::<ScheduleType>()
            .map_err(|e| ApiError::bad_request("INVALID_SCHEDULE_TYPE", format!("{e}")))?,
        None if tenant_id.is_some() => ScheduleType::Manual,
        None => ScheduleType::Daily,
    };

    let report = worker::run_task(&state, task_type, schedule_type, tenant_id.as_deref()).await?;
    Ok(Json(WorkerRunResponse {
        success: true,
        report,
    }))
}
