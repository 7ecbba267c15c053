//! Transport security: TLS reachability and HSTS.

use super::ModuleOutput;
use crate::error::Result;
use cloakscope_core::Severity;
use cloakscope_db::audit_findings::NewFinding;
use cloakscope_probe::{check_url, ClientProfile, FetchRequest, Method, Prober};

pub async fn run(prober: &dyn Prober, url: &str) -> Result<ModuleOutput> {
    let parsed = check_url(url)?;

    if parsed.scheme() == "http" {
        return Ok(ModuleOutput {
            findings: vec![NewFinding {
                finding_type: "no_ssl".to_string(),
                severity: Severity::High,
                title: "Page served without TLS".to_string(),
                description: "The landing page uses plain http.".to_string(),
                evidence: serde_json::json!({ "scheme": "http" }),
                affected_url: url.to_string(),
            }],
            data: serde_json::json!({ "scheme": "http", "tls": false }),
        });
    }

    let request = FetchRequest {
        url: url.to_string(),
        profile: ClientProfile::baseline(),
        method: Method::Head,
        follow_redirects: false,
        read_body: false,
    };
    let reply = match prober.fetch(&request).await {
        Ok(fetched) => fetched.reply,
        Err(err) => {
            return Ok(ModuleOutput {
                findings: vec![NewFinding {
                    finding_type: "ssl_error".to_string(),
                    severity: Severity::Critical,
                    title: "TLS connection failed".to_string(),
                    description: format!("The https endpoint could not be reached: {err}"),
                    evidence: serde_json::json!({ "error": err.to_string() }),
                    affected_url: url.to_string(),
                }],
                data: serde_json::json!({ "scheme": "https", "tls": false, "error": err.to_string() }),
            });
        }
    };

    let hsts = reply.header("strict-transport-security").map(str::to_string);
    let mut findings = Vec::new();
    if hsts.is_none() {
        findings.push(NewFinding {
            finding_type: "missing_hsts".to_string(),
            severity: Severity::Medium,
            title: "No Strict-Transport-Security header".to_string(),
            description: "Browsers are not told to insist on https for this host.".to_string(),
            evidence: serde_json::json!({ "status": reply.status }),
            affected_url: url.to_string(),
        });
    }

    Ok(ModuleOutput {
        findings,
        data: serde_json::json!({
            "scheme": "https",
            "tls": true,
            "status": reply.status,
            "hsts": hsts,
        }),
    })
}
