//! Security audit pipeline.
//!
//! An audit runs a fixed, ordered set of independent inspection modules
//! against one URL. Each module gets its own execution record; a failing
//! module is recorded and the pipeline moves on. Totals are written once,
//! after the last module.

pub mod domain_reputation;
pub mod header_consistency;
pub mod redirect_chain;
pub mod technology;
pub mod transport_security;

use crate::error::{Result, ScanError};
use cloakscope_core::Severity;
use cloakscope_db::audit_findings::{self, NewFinding};
use cloakscope_db::audits::{self, AuditStatus};
use cloakscope_db::module_executions;
use cloakscope_probe::{check_url, Prober};
use domain_reputation::{DomainAgeSource, SimulatedDomainAge};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Sqlite};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// The audit modules, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditModuleKind {
    HeaderConsistency,
    RedirectChain,
    TransportSecurity,
    DomainReputation,
    TechnologyFingerprint,
}

impl AuditModuleKind {
    pub const ALL: [Self; 5] = [
        Self::HeaderConsistency,
        Self::RedirectChain,
        Self::TransportSecurity,
        Self::DomainReputation,
        Self::TechnologyFingerprint,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HeaderConsistency => "header_consistency",
            Self::RedirectChain => "redirect_chain",
            Self::TransportSecurity => "transport_security",
            Self::DomainReputation => "domain_reputation",
            Self::TechnologyFingerprint => "technology_fingerprint",
        }
    }
}

impl fmt::Display for AuditModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditModuleKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ScanError::UnknownModule(s.to_string()))
    }
}

/// What a module hands back: findings plus free-form data for the execution
/// record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleOutput {
    pub findings: Vec<NewFinding>,
    pub data: JsonValue,
}

/// Result of one audit run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub audit_id: String,
    pub status: AuditStatus,
    pub modules_run: u32,
    pub modules_failed: u32,
    pub total_findings: i64,
    pub critical_findings: i64,
}

/// Modules selected by an audit's configuration.
///
/// `{"modules": [...]}` restricts which modules run; the selection still runs
/// in the fixed module order. A missing or empty list selects all.
pub fn modules_for(config: &JsonValue) -> Result<Vec<AuditModuleKind>> {
    let Some(requested) = config.get("modules") else {
        return Ok(AuditModuleKind::ALL.to_vec());
    };
    let names = requested
        .as_array()
        .ok_or_else(|| ScanError::InvalidConfig("`modules` must be an array".to_string()))?;

    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_str().ok_or_else(|| {
            ScanError::InvalidConfig("`modules` entries must be strings".to_string())
        })?;
        selected.push(name.parse::<AuditModuleKind>()?);
    }

    if selected.is_empty() {
        return Ok(AuditModuleKind::ALL.to_vec());
    }
    Ok(AuditModuleKind::ALL
        .into_iter()
        .filter(|kind| selected.contains(kind))
        .collect())
}

/// Runs audits and their modules.
pub struct AuditPipeline {
    prober: Arc<dyn Prober>,
    domain_age: Arc<dyn DomainAgeSource>,
}

impl AuditPipeline {
    #[must_use]
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            domain_age: Arc::new(SimulatedDomainAge),
        }
    }

    /// Replace the registration-age source.
    #[must_use]
    pub fn with_domain_age(mut self, source: Arc<dyn DomainAgeSource>) -> Self {
        self.domain_age = source;
        self
    }

    /// Run one module against `url`.
    pub async fn run_module(&self, kind: AuditModuleKind, url: &str) -> Result<ModuleOutput> {
        match kind {
            AuditModuleKind::HeaderConsistency => {
                header_consistency::run(self.prober.as_ref(), url).await
            }
            AuditModuleKind::RedirectChain => redirect_chain::run(self.prober.as_ref(), url).await,
            AuditModuleKind::TransportSecurity => {
                transport_security::run(self.prober.as_ref(), url).await
            }
            AuditModuleKind::DomainReputation => {
                domain_reputation::run(self.domain_age.as_ref(), url).await
            }
            AuditModuleKind::TechnologyFingerprint => {
                technology::run(self.prober.as_ref(), url).await
            }
        }
    }

    /// Run audit `audit_id` end to end.
    ///
    /// Unknown module names and blocked URLs are rejected before the audit is
    /// touched. Module failures are recorded on their executions; the audit is
    /// `failed` only when every module failed. Totals cover this run only.
    ///
    /// A store error once the audit is running still leaves it `failed`
    /// before the error is returned.
    pub async fn run(&self, pool: &Pool<Sqlite>, audit_id: &str) -> Result<AuditSummary> {
        let audit = audits::get_audit(pool, audit_id)
            .await?
            .ok_or_else(|| ScanError::AuditNotFound(audit_id.to_string()))?;
        let modules = modules_for(&audit.config)?;
        check_url(&audit.target_url)?;

        audits::set_status(pool, audit_id, AuditStatus::Running).await?;
        tracing::info!(
            "Audit {} started: {} module(s) against {}",
            audit_id,
            modules.len(),
            audit.target_url
        );

        let mut totals = RunTotals::default();
        if let Err(err) = self
            .run_modules(pool, audit_id, &audit.target_url, &modules, &mut totals)
            .await
        {
            tracing::error!("Audit {} aborted: {}", audit_id, err);
            if let Err(finish_err) = audits::finish_audit(
                pool,
                audit_id,
                AuditStatus::Failed,
                totals.findings,
                totals.critical,
            )
            .await
            {
                tracing::warn!("Could not mark audit {} failed: {}", audit_id, finish_err);
            }
            return Err(err);
        }

        let modules_run = u32::try_from(modules.len()).unwrap_or(u32::MAX);
        let status = if totals.modules_failed == modules_run {
            AuditStatus::Failed
        } else {
            AuditStatus::Completed
        };
        audits::finish_audit(pool, audit_id, status, totals.findings, totals.critical).await?;

        tracing::info!(
            "Audit {} {}: {} finding(s), {} critical",
            audit_id,
            status,
            totals.findings,
            totals.critical
        );
        Ok(AuditSummary {
            audit_id: audit_id.to_string(),
            status,
            modules_run,
            modules_failed: totals.modules_failed,
            total_findings: totals.findings,
            critical_findings: totals.critical,
        })
    }

    async fn run_modules(
        &self,
        pool: &Pool<Sqlite>,
        audit_id: &str,
        url: &str,
        modules: &[AuditModuleKind],
        totals: &mut RunTotals,
    ) -> Result<()> {
        let input = serde_json::json!({ "url": url });

        for kind in modules {
            let execution =
                module_executions::start_execution(pool, audit_id, kind.as_str(), &input).await?;
            let started = Instant::now();
            let outcome = self.run_module(*kind, url).await;
            let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

            match outcome {
                Ok(output) => {
                    let recorded =
                        record_output(pool, audit_id, &execution.id, &output, duration_ms, totals)
                            .await;
                    if let Err(err) = recorded {
                        if let Err(fail_err) = module_executions::fail_execution(
                            pool,
                            &execution.id,
                            &err.to_string(),
                            duration_ms,
                        )
                        .await
                        {
                            tracing::warn!(
                                "Could not mark execution {} failed: {}",
                                execution.id,
                                fail_err
                            );
                        }
                        return Err(err);
                    }
                    tracing::debug!(
                        "Module {} finished with {} finding(s)",
                        kind,
                        output.findings.len()
                    );
                }
                Err(err) => {
                    totals.modules_failed += 1;
                    tracing::warn!("Module {} failed for audit {}: {}", kind, audit_id, err);
                    module_executions::fail_execution(
                        pool,
                        &execution.id,
                        &err.to_string(),
                        duration_ms,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

/// Counters for the run in progress.
#[derive(Debug, Default)]
struct RunTotals {
    modules_failed: u32,
    findings: i64,
    critical: i64,
}

async fn record_output(
    pool: &Pool<Sqlite>,
    audit_id: &str,
    execution_id: &str,
    output: &ModuleOutput,
    duration_ms: i64,
    totals: &mut RunTotals,
) -> Result<()> {
    for finding in &output.findings {
        audit_findings::insert_finding(pool, audit_id, execution_id, finding).await?;
        totals.findings += 1;
        if finding.severity == Severity::Critical {
            totals.critical += 1;
        }
    }
    module_executions::complete_execution(pool, execution_id, &output.data, duration_ms).await?;
    Ok(())
}

/// Host of `url`, lowercased, or an error if it has none.
pub(crate) fn host_of(url: &str) -> Result<String> {
    let parsed = check_url(url)?;
    Ok(parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, setup_db, status, ScriptedTransport};
    use cloakscope_db::audits::{create_audit, get_audit, NewAudit};
    use cloakscope_db::module_executions::{list_executions, ExecutionStatus};

    async fn new_audit(db: &cloakscope_db::Database, url: &str, config: JsonValue) -> String {
        create_audit(
            db.pool(),
            NewAudit {
                tenant_id: "acme".to_string(),
                name: "audit".to_string(),
                target_url: url.to_string(),
                recurrence: None,
                next_run_at: None,
                config,
            },
        )
        .await
        .expect("create audit")
        .id
    }

    #[test]
    fn test_modules_for_defaults_to_all() {
        assert_eq!(
            modules_for(&serde_json::json!({})).expect("modules"),
            AuditModuleKind::ALL.to_vec()
        );
        assert_eq!(
            modules_for(&serde_json::json!({"modules": []})).expect("modules"),
            AuditModuleKind::ALL.to_vec()
        );
    }

    #[test]
    fn test_modules_for_keeps_fixed_order() {
        let config = serde_json::json!({"modules": ["technology_fingerprint", "redirect_chain"]});
        assert_eq!(
            modules_for(&config).expect("modules"),
            vec![
                AuditModuleKind::RedirectChain,
                AuditModuleKind::TechnologyFingerprint
            ]
        );
    }

    #[test]
    fn test_modules_for_rejects_unknown() {
        let config = serde_json::json!({"modules": ["port_scan"]});
        assert!(matches!(
            modules_for(&config),
            Err(ScanError::UnknownModule(name)) if name == "port_scan"
        ));
    }

    #[tokio::test]
    async fn test_pipeline_records_each_module() {
        let db = setup_db().await;
        let url = "http://shop.example.com/";
        let audit_id = new_audit(&db, url, serde_json::json!({})).await;
        let transport = ScriptedTransport::default().route(url, |_| Some(page("<p>shop</p>")));
        let pipeline = AuditPipeline::new(transport.into_prober());

        let summary = pipeline.run(db.pool(), &audit_id).await.expect("run");
        assert_eq!(summary.status, AuditStatus::Completed);
        assert_eq!(summary.modules_run, 5);
        assert_eq!(summary.modules_failed, 0);
        // Plain http is flagged by the transport module.
        assert!(summary.total_findings >= 1);

        let executions = list_executions(db.pool(), &audit_id).await.expect("list");
        let kinds: Vec<&str> = executions.iter().map(|e| e.module_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "header_consistency",
                "redirect_chain",
                "transport_security",
                "domain_reputation",
                "technology_fingerprint"
            ]
        );
        assert!(executions
            .iter()
            .all(|e| e.status == ExecutionStatus::Completed));

        let audit = get_audit(db.pool(), &audit_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(audit.status, AuditStatus::Completed);
        assert_eq!(audit.total_findings, summary.total_findings);
    }

    #[tokio::test]
    async fn test_module_failure_is_isolated() {
        let db = setup_db().await;
        let url = "https://shop.example.com/";
        let audit_id = new_audit(
            &db,
            url,
            serde_json::json!({"modules": ["redirect_chain", "transport_security"]}),
        )
        .await;
        // Nothing is routed: the redirect walk fails, the transport module
        // reports the https failure as a finding.
        let pipeline = AuditPipeline::new(ScriptedTransport::default().into_prober());

        let summary = pipeline.run(db.pool(), &audit_id).await.expect("run");
        assert_eq!(summary.status, AuditStatus::Completed);
        assert_eq!(summary.modules_failed, 1);
        assert_eq!(summary.critical_findings, 1);

        let executions = list_executions(db.pool(), &audit_id).await.expect("list");
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].error_message.is_some());
        assert_eq!(executions[1].status, ExecutionStatus::Completed);

        let findings = audit_findings::list_for_audit(db.pool(), &audit_id)
            .await
            .expect("findings");
        assert_eq!(findings[0].finding.severity, Severity::Critical);
        assert_eq!(findings[0].finding.finding_type, "ssl_error");
    }

    #[tokio::test]
    async fn test_all_modules_failing_fails_audit() {
        let db = setup_db().await;
        let url = "https://gone.example.com/";
        let audit_id = new_audit(
            &db,
            url,
            serde_json::json!({"modules": ["header_consistency", "redirect_chain"]}),
        )
        .await;
        let pipeline = AuditPipeline::new(ScriptedTransport::default().into_prober());

        let summary = pipeline.run(db.pool(), &audit_id).await.expect("run");
        assert_eq!(summary.status, AuditStatus::Failed);
        assert_eq!(summary.modules_failed, 2);

        let audit = get_audit(db.pool(), &audit_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(audit.status, AuditStatus::Failed);
        assert!(audit.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_rerun_totals_cover_only_that_run() {
        let db = setup_db().await;
        let url = "https://shop.example.com/";
        let audit_id = new_audit(
            &db,
            url,
            serde_json::json!({"modules": ["transport_security"]}),
        )
        .await;
        let pipeline = AuditPipeline::new(ScriptedTransport::default().into_prober());

        for _ in 0..3 {
            let summary = pipeline.run(db.pool(), &audit_id).await.expect("run");
            assert_eq!(summary.total_findings, 1);
            assert_eq!(summary.critical_findings, 1);
        }

        let audit = get_audit(db.pool(), &audit_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(audit.total_findings, 1);
        assert_eq!(audit.critical_findings, 1);
        // History is kept even though totals are per run.
        let findings = audit_findings::list_for_audit(db.pool(), &audit_id)
            .await
            .expect("findings");
        assert_eq!(findings.len(), 3);
    }

    #[tokio::test]
    async fn test_store_error_leaves_audit_failed() {
        let db = setup_db().await;
        let url = "http://shop.example.com/";
        let audit_id = new_audit(
            &db,
            url,
            serde_json::json!({"modules": ["transport_security"]}),
        )
        .await;
        sqlx::query("DROP TABLE audit_findings")
            .execute(db.pool())
            .await
            .expect("drop findings table");
        let pipeline = AuditPipeline::new(ScriptedTransport::default().into_prober());

        let result = pipeline.run(db.pool(), &audit_id).await;
        assert!(matches!(result, Err(ScanError::Database(_))));

        let audit = get_audit(db.pool(), &audit_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(audit.status, AuditStatus::Failed);
        assert!(audit.completed_at.is_some());

        let executions = list_executions(db.pool(), &audit_id).await.expect("list");
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_unknown_module_rejected_before_running() {
        let db = setup_db().await;
        let audit_id = new_audit(
            &db,
            "https://shop.example.com/",
            serde_json::json!({"modules": ["bogus"]}),
        )
        .await;
        let pipeline = AuditPipeline::new(ScriptedTransport::default().into_prober());

        let result = pipeline.run(db.pool(), &audit_id).await;
        assert!(matches!(result, Err(ScanError::UnknownModule(_))));

        let audit = get_audit(db.pool(), &audit_id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(audit.status, AuditStatus::Pending);
        assert!(list_executions(db.pool(), &audit_id)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn test_blocked_target_rejected() {
        let db = setup_db().await;
        let audit_id = new_audit(&db, "http://127.0.0.1:8080/", serde_json::json!({})).await;
        let pipeline = AuditPipeline::new(ScriptedTransport::default().into_prober());

        let result = pipeline.run(db.pool(), &audit_id).await;
        assert!(matches!(result, Err(ScanError::Blocked(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_not_module_failure() {
        let db = setup_db().await;
        let url = "https://shop.example.com/";
        let audit_id = new_audit(
            &db,
            url,
            serde_json::json!({"modules": ["header_consistency"]}),
        )
        .await;
        let transport = ScriptedTransport::default().route(url, |_| Some(status(503)));
        let pipeline = AuditPipeline::new(transport.into_prober());

        let summary = pipeline.run(db.pool(), &audit_id).await.expect("run");
        assert_eq!(summary.status, AuditStatus::Completed);
        assert_eq!(summary.total_findings, 0);
    }
}
