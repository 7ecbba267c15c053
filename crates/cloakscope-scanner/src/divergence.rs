//! Divergence tester.
//!
//! Probes a landing page once as the presumed reviewer (crawler, direct,
//! tier-1) and then under alternate client profiles. The first alternate
//! whose content fingerprint differs from the baseline, or whose final URL
//! differs from the target URL, is the offending probe: its snapshot is
//! flagged and the target is marked cloaked. Only 2xx pages are compared;
//! anything else is a probe error.

use crate::error::{Result, ScanError, BLOCKED_URL_MESSAGE};
use cloakscope_core::{ProbingConfig, WorkerConfig};
use cloakscope_db::snapshots::{insert_snapshot, NewSnapshot};
use cloakscope_db::targets::{self, DivergenceUpdate};
use cloakscope_probe::{check_url, deduce_token, strip_token, ClientProfile, ProbeOutcome, Prober};
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use url::Url;

/// Tunables for a divergence run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivergenceSettings {
    /// Alternate conditions executed per run, at least 1
    pub max_conditions: usize,
    /// Added to the suspicion score on divergence
    pub score_increment: i64,
    /// Suspicion score cap
    pub max_score: i64,
}

impl Default for DivergenceSettings {
    fn default() -> Self {
        Self {
            max_conditions: 3,
            score_increment: 25,
            max_score: 100,
        }
    }
}

impl DivergenceSettings {
    /// Settings from the `[probing]` and `[worker]` sections.
    #[must_use]
    pub fn from_config(probing: &ProbingConfig, worker: &WorkerConfig) -> Self {
        Self {
            max_conditions: probing.max_conditions.max(1),
            score_increment: worker.suspicion_increment,
            max_score: worker.max_suspicion_score,
        }
    }
}

/// Outcome of one divergence run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivergenceReport {
    /// Whether an alternate profile saw a different page
    pub divergence_found: bool,
    /// Final URL seen by the offending probe
    pub offending_url: Option<String>,
    /// Token injected into alternate probes
    pub detected_token: Option<String>,
    /// Probes attempted, baseline included
    pub probes_run: u32,
    /// Snapshots persisted
    pub snapshots_written: u32,
    /// Per-probe failures
    pub probe_errors: Vec<String>,
    /// Run-level failure, if the run could not complete
    pub error: Option<String>,
}

impl DivergenceReport {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The URL was refused before any probe was issued.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.error.as_deref() == Some(BLOCKED_URL_MESSAGE)
    }
}

/// Runs divergence tests against targets through a [`Prober`].
pub struct DivergenceTester {
    prober: Arc<dyn Prober>,
    settings: DivergenceSettings,
}

impl DivergenceTester {
    /// Tester probing through `prober`.
    #[must_use]
    pub fn new(prober: Arc<dyn Prober>, settings: DivergenceSettings) -> Self {
        Self { prober, settings }
    }

    /// Active tunables.
    #[must_use]
    pub fn settings(&self) -> DivergenceSettings {
        self.settings
    }

    /// Test `url` on behalf of target `target_id`, writing snapshots under
    /// `job_run_id`.
    ///
    /// A rejected URL yields a report carrying [`BLOCKED_URL_MESSAGE`] and
    /// writes nothing. Probe failures are reported, not raised; only storage
    /// errors and an unknown target are returned as `Err`.
    pub async fn run(
        &self,
        pool: &Pool<Sqlite>,
        target_id: &str,
        url: &str,
        job_run_id: &str,
    ) -> Result<DivergenceReport> {
        if let Err(rejection) = check_url(url) {
            tracing::warn!("Divergence test refused for {}: {}", url, rejection);
            return Ok(DivergenceReport::rejected(BLOCKED_URL_MESSAGE));
        }
        if targets::get_target(pool, target_id).await?.is_none() {
            return Err(ScanError::TargetNotFound(target_id.to_string()));
        }

        let token = deduce_token(url);
        let mut report = DivergenceReport {
            detected_token: token.clone(),
            ..DivergenceReport::default()
        };
        tracing::info!(
            "Divergence test for target {} (token: {})",
            target_id,
            token.as_deref().unwrap_or("none")
        );

        let baseline = self
            .prober
            .probe(url, &ClientProfile::baseline(), None)
            .await;
        report.probes_run += 1;
        self.persist(pool, target_id, job_run_id, &baseline, None, false)
            .await?;
        report.snapshots_written += 1;

        if let Some(reason) = baseline.failure_reason() {
            tracing::warn!("Baseline probe for target {} failed: {}", target_id, reason);
            report.probe_errors.push(format!(
                "{}: {}",
                ClientProfile::baseline().label(),
                reason
            ));
            report.error = Some(format!("Baseline probe failed: {reason}"));
            targets::mark_checked(pool, target_id).await?;
            return Ok(report);
        }

        let target_url = comparable_url(url, token.as_deref());

        for profile in ClientProfile::alternate_conditions()
            .into_iter()
            .take(self.settings.max_conditions.max(1))
        {
            let outcome = self.prober.probe(url, &profile, token.as_deref()).await;
            report.probes_run += 1;

            if let Some(reason) = outcome.failure_reason() {
                tracing::debug!("{} probe failed: {}", profile.label(), reason);
                report
                    .probe_errors
                    .push(format!("{}: {}", profile.label(), reason));
                self.persist(pool, target_id, job_run_id, &outcome, token.as_deref(), false)
                    .await?;
                report.snapshots_written += 1;
                continue;
            }

            let divergent = outcome.fingerprint != baseline.fingerprint
                || comparable_url(&outcome.final_url, token.as_deref()) != target_url;
            tracing::debug!(
                "{} -> {} ({}){}",
                profile.label(),
                outcome.final_url,
                outcome.status_code,
                if divergent { " divergent" } else { "" }
            );

            self.persist(pool, target_id, job_run_id, &outcome, token.as_deref(), divergent)
                .await?;
            report.snapshots_written += 1;

            if divergent {
                targets::record_divergence(
                    pool,
                    target_id,
                    &DivergenceUpdate {
                        black_url: &outcome.final_url,
                        white_url: &baseline.final_url,
                        detected_token: token.as_deref(),
                        score_increment: self.settings.score_increment,
                        max_score: self.settings.max_score,
                    },
                )
                .await?;
                tracing::info!(
                    "Cloaking detected on target {}: {} sees {}",
                    target_id,
                    profile.label(),
                    outcome.final_url
                );
                report.divergence_found = true;
                report.offending_url = Some(outcome.final_url);
                break;
            }
        }

        targets::mark_checked(pool, target_id).await?;
        Ok(report)
    }

    async fn persist(
        &self,
        pool: &Pool<Sqlite>,
        target_id: &str,
        job_run_id: &str,
        outcome: &ProbeOutcome,
        token: Option<&str>,
        is_offending: bool,
    ) -> Result<()> {
        insert_snapshot(
            pool,
            NewSnapshot {
                target_id: target_id.to_string(),
                job_run_id: job_run_id.to_string(),
                condition_label: outcome.profile.label(),
                device: outcome.profile.device.as_str().to_string(),
                referrer: outcome.profile.referrer.as_str().to_string(),
                geo: outcome.profile.geo.as_str().to_string(),
                user_agent: outcome.headers.user_agent.clone(),
                observed_geo: outcome.headers.observed_geo.clone(),
                requested_url: outcome.requested_url.clone(),
                final_url: outcome.final_url.clone(),
                status_code: outcome.status_code,
                fingerprint: outcome.fingerprint.clone(),
                content_preview: outcome.body_preview.clone(),
                redirect_chain: outcome.redirect_chain.clone(),
                is_offending,
                detected_token: token.map(str::to_string),
                error: outcome.error.clone(),
            },
        )
        .await?;
        Ok(())
    }
}

/// `url` in parsed form with the injected token removed.
fn comparable_url(url: &str, token: Option<&str>) -> String {
    let normalized = match Url::parse(url) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    };
    match token {
        Some(token) => strip_token(&normalized, token),
        None => normalized,
    }
}
