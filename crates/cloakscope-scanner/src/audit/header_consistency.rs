//! Header consistency: the status each client identity receives.

use super::ModuleOutput;
use crate::error::Result;
use cloakscope_core::Severity;
use cloakscope_db::audit_findings::NewFinding;
use cloakscope_probe::{
    ClientProfile, DeviceIdentity, FetchRequest, GeoHint, Method, Prober, Referrer,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

/// Issue one non-following GET per device identity and compare statuses.
///
/// A fetch error counts as status 0. The module fails only when every fetch
/// failed.
pub async fn run(prober: &dyn Prober, url: &str) -> Result<ModuleOutput> {
    let mut statuses = Map::new();
    let mut seen = BTreeSet::new();
    let mut last_error = None;

    for device in DeviceIdentity::ALL {
        let request = FetchRequest {
            url: url.to_string(),
            profile: ClientProfile::new(device, Referrer::Direct, GeoHint::Tier1English),
            method: Method::Get,
            follow_redirects: false,
            read_body: false,
        };
        let status = match prober.fetch(&request).await {
            Ok(fetched) => fetched.reply.status,
            Err(err) => {
                tracing::debug!("{} fetch of {} failed: {}", device.as_str(), url, err);
                last_error = Some(err);
                0
            }
        };
        statuses.insert(device.as_str().to_string(), JsonValue::from(status));
        seen.insert(status);
    }

    if seen.len() == 1 && seen.contains(&0) {
        if let Some(err) = last_error {
            return Err(err.into());
        }
    }

    let mut findings = Vec::new();
    if seen.len() > 1 {
        findings.push(NewFinding {
            finding_type: "header_inconsistency".to_string(),
            severity: Severity::High,
            title: "Status code depends on client identity".to_string(),
            description: format!(
                "Crawler, mobile and desktop clients received different HTTP statuses ({}).",
                seen.iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            evidence: JsonValue::Object(statuses.clone()),
            affected_url: url.to_string(),
        });
    }

    Ok(ModuleOutput {
        findings,
        data: serde_json::json!({ "statuses": statuses }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, redirect, ScriptedTransport};

    #[tokio::test]
    async fn test_consistent_statuses() {
        let url = "https://shop.example.com/";
        let prober = ScriptedTransport::default()
            .route(url, |_| Some(page("<p>hi</p>")))
            .into_prober();

        let output = run(prober.as_ref(), url).await.expect("run");
        assert!(output.findings.is_empty());
        assert_eq!(output.data["statuses"]["crawler"], 200);
    }

    #[tokio::test]
    async fn test_crawler_gets_different_status() {
        let url = "https://shop.example.com/";
        let prober = ScriptedTransport::default()
            .route(url, |req| {
                if req.header("user-agent").is_some_and(|ua| ua.contains("Googlebot")) {
                    Some(page("<p>hi</p>"))
                } else {
                    Some(redirect("https://offer.example.net/"))
                }
            })
            .into_prober();

        let output = run(prober.as_ref(), url).await.expect("run");
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].finding_type, "header_inconsistency");
        assert_eq!(output.findings[0].severity, Severity::High);
        assert_eq!(output.data["statuses"]["mobile"], 302);
    }

    #[tokio::test]
    async fn test_all_fetches_failing_fails_module() {
        let prober = ScriptedTransport::default().into_prober();
        assert!(run(prober.as_ref(), "https://down.example.com/").await.is_err());
    }
}
