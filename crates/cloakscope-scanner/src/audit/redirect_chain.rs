//! Redirect chain mapping.

use super::ModuleOutput;
use crate::error::Result;
use cloakscope_core::Severity;
use cloakscope_db::audit_findings::NewFinding;
use cloakscope_probe::{
    ClientProfile, DeviceIdentity, FetchRequest, GeoHint, Method, Prober, Referrer,
};
use std::collections::BTreeSet;
use url::Url;

/// More hops than this is excessive.
pub const EXCESSIVE_HOPS: usize = 3;

/// Walk the redirect chain as a desktop visitor and flag long or
/// cross-domain chains. The walk itself is capped by the prober.
pub async fn run(prober: &dyn Prober, url: &str) -> Result<ModuleOutput> {
    let request = FetchRequest {
        url: url.to_string(),
        profile: ClientProfile::new(DeviceIdentity::Desktop, Referrer::Direct, GeoHint::Tier1English),
        method: Method::Get,
        follow_redirects: true,
        read_body: false,
    };
    let fetched = prober.fetch(&request).await?;

    let hops = fetched.chain.len().saturating_sub(1);
    let hosts: BTreeSet<String> = fetched
        .chain
        .iter()
        .filter_map(|hop| Url::parse(hop).ok())
        .filter_map(|hop| hop.host_str().map(str::to_ascii_lowercase))
        .collect();

    let mut findings = Vec::new();
    if hops > EXCESSIVE_HOPS {
        findings.push(NewFinding {
            finding_type: "excessive_redirects".to_string(),
            severity: Severity::Medium,
            title: format!("{hops} redirects before the landing page"),
            description: "Long redirect chains are typical of tracking hops and traffic \
                          distribution systems."
                .to_string(),
            evidence: serde_json::json!({ "chain": fetched.chain, "truncated": fetched.truncated }),
            affected_url: url.to_string(),
        });
    }
    if hosts.len() > 1 {
        findings.push(NewFinding {
            finding_type: "cross_domain_redirect".to_string(),
            severity: Severity::Medium,
            title: "Redirect chain crosses domains".to_string(),
            description: format!("The chain visits {} distinct hosts.", hosts.len()),
            evidence: serde_json::json!({ "hosts": hosts }),
            affected_url: url.to_string(),
        });
    }

    Ok(ModuleOutput {
        findings,
        data: serde_json::json!({
            "chain": fetched.chain,
            "hops": hops,
            "finalUrl": fetched.final_url,
            "finalStatus": fetched.reply.status,
            "truncated": fetched.truncated,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, redirect, ScriptedTransport};

    #[tokio::test]
    async fn test_direct_page_has_no_findings() {
        let url = "https://shop.example.com/";
        let prober = ScriptedTransport::default()
            .route(url, |_| Some(page("ok")))
            .into_prober();

        let output = run(prober.as_ref(), url).await.expect("run");
        assert!(output.findings.is_empty());
        assert_eq!(output.data["hops"], 0);
    }

    #[tokio::test]
    async fn test_long_cross_domain_chain() {
        let prober = ScriptedTransport::default()
            .route("https://a.example.com/", |_| Some(redirect("/1")))
            .route("https://a.example.com/1", |_| Some(redirect("/2")))
            .route("https://a.example.com/2", |_| Some(redirect("/3")))
            .route("https://a.example.com/3", |_| {
                Some(redirect("https://b.example.net/offer"))
            })
            .route("https://b.example.net/offer", |_| Some(page("offer")))
            .into_prober();

        let output = run(prober.as_ref(), "https://a.example.com/")
            .await
            .expect("run");
        let kinds: Vec<&str> = output
            .findings
            .iter()
            .map(|f| f.finding_type.as_str())
            .collect();
        assert_eq!(kinds, vec!["excessive_redirects", "cross_domain_redirect"]);
        assert_eq!(output.data["hops"], 4);
        assert_eq!(output.data["finalUrl"], "https://b.example.net/offer");
    }

    #[tokio::test]
    async fn test_same_host_redirect_is_fine() {
        let prober = ScriptedTransport::default()
            .route("https://a.example.com/", |_| Some(redirect("/home")))
            .route("https://a.example.com/home", |_| Some(page("home")))
            .into_prober();

        let output = run(prober.as_ref(), "https://a.example.com/")
            .await
            .expect("run");
        assert!(output.findings.is_empty());
    }
}
