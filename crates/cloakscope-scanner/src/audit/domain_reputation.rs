//! Domain reputation.
//!
//! Only registration age is checked. [`SimulatedDomainAge`] stands in for a
//! real registration-data lookup and derives a stable pseudo-age from the
//! domain name.

use super::{host_of, ModuleOutput};
use crate::error::Result;
use async_trait::async_trait;
use cloakscope_core::Severity;
use cloakscope_db::audit_findings::NewFinding;
use cloakscope_probe::{Fingerprinter, RollingHashFingerprinter};

/// Domains younger than this many days are flagged.
pub const NEW_DOMAIN_DAYS: u32 = 30;

/// Upper bound of simulated ages, roughly ten years.
const SIMULATED_MAX_DAYS: u32 = 3650;

/// Source of domain registration ages.
#[async_trait]
pub trait DomainAgeSource: Send + Sync {
    /// Age of `domain` in days.
    async fn age_days(&self, domain: &str) -> Result<u32>;

    /// Name recorded with the module output.
    fn name(&self) -> &'static str;
}

/// Deterministic placeholder age derived from the domain fingerprint.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedDomainAge;

#[async_trait]
impl DomainAgeSource for SimulatedDomainAge {
    async fn age_days(&self, domain: &str) -> Result<u32> {
        let fingerprint = RollingHashFingerprinter.fingerprint(domain);
        let hash = u32::from_str_radix(&fingerprint, 16).unwrap_or_default();
        Ok(hash % SIMULATED_MAX_DAYS)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Registrable part of a host: drops a leading `www.`.
fn registrable_domain(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

pub async fn run(source: &dyn DomainAgeSource, url: &str) -> Result<ModuleOutput> {
    let host = host_of(url)?;
    let domain = registrable_domain(&host);
    let age_days = source.age_days(domain).await?;

    let mut findings = Vec::new();
    if age_days < NEW_DOMAIN_DAYS {
        findings.push(NewFinding {
            finding_type: "new_domain".to_string(),
            severity: Severity::Medium,
            title: format!("Domain registered {age_days} day(s) ago"),
            description: format!(
                "{domain} is younger than {NEW_DOMAIN_DAYS} days; fresh domains are common \
                 in short-lived cloaking campaigns."
            ),
            evidence: serde_json::json!({ "domain": domain, "ageDays": age_days }),
            affected_url: url.to_string(),
        });
    }

    Ok(ModuleOutput {
        findings,
        data: serde_json::json!({
            "domain": domain,
            "ageDays": age_days,
            "source": source.name(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAge(u32);

    #[async_trait]
    impl DomainAgeSource for FixedAge {
        async fn age_days(&self, _domain: &str) -> Result<u32> {
            Ok(self.0)
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_simulated_age_is_stable() {
        let a = SimulatedDomainAge.age_days("example.com").await.expect("age");
        let b = SimulatedDomainAge.age_days("example.com").await.expect("age");
        assert_eq!(a, b);
        assert!(a < SIMULATED_MAX_DAYS);
    }

    #[tokio::test]
    async fn test_young_domain_flagged() {
        let output = run(&FixedAge(3), "https://www.fresh-deals.example/")
            .await
            .expect("run");
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].finding_type, "new_domain");
        assert_eq!(output.data["domain"], "fresh-deals.example");
        assert_eq!(output.data["source"], "fixed");
    }

    #[tokio::test]
    async fn test_old_domain_passes() {
        let output = run(&FixedAge(4000), "https://example.com/")
            .await
            .expect("run");
        assert!(output.findings.is_empty());
        assert_eq!(output.data["ageDays"], 4000);
    }
}
