//! Technology fingerprinting.
//!
//! Matches response headers and page markup against a small signature table
//! (CMS, e-commerce, analytics, CDN, server). Markup that references known
//! server-side cloaking scripts raises `potential_cloaking`.

use super::ModuleOutput;
use crate::error::Result;
use cloakscope_core::Severity;
use cloakscope_db::audit_findings::NewFinding;
use cloakscope_probe::{ClientProfile, DeviceIdentity, FetchRequest, GeoHint, Prober, Referrer};
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TechCategory {
    Cms,
    Ecommerce,
    Analytics,
    Cdn,
    Server,
}

/// A detected technology.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Technology {
    pub category: TechCategory,
    pub name: String,
}

impl Technology {
    fn new(category: TechCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }
}

/// Substrings of script/link/iframe URLs and inline markup.
const MARKUP_SIGNATURES: &[(&str, TechCategory, &str)] = &[
    ("wp-content/", TechCategory::Cms, "WordPress"),
    ("wp-includes/", TechCategory::Cms, "WordPress"),
    ("/sites/default/files/", TechCategory::Cms, "Drupal"),
    ("static.wixstatic.com", TechCategory::Cms, "Wix"),
    ("squarespace.com", TechCategory::Cms, "Squarespace"),
    ("cdn.shopify.com", TechCategory::Ecommerce, "Shopify"),
    ("woocommerce", TechCategory::Ecommerce, "WooCommerce"),
    ("clickfunnels", TechCategory::Ecommerce, "ClickFunnels"),
    ("googletagmanager.com", TechCategory::Analytics, "Google Tag Manager"),
    ("google-analytics.com", TechCategory::Analytics, "Google Analytics"),
    ("connect.facebook.net", TechCategory::Analytics, "Meta Pixel"),
    ("analytics.tiktok.com", TechCategory::Analytics, "TikTok Pixel"),
    ("static.hotjar.com", TechCategory::Analytics, "Hotjar"),
];

/// Header name (present at all) to technology.
const HEADER_SIGNATURES: &[(&str, TechCategory, &str)] = &[
    ("cf-ray", TechCategory::Cdn, "Cloudflare"),
    ("x-amz-cf-id", TechCategory::Cdn, "Amazon CloudFront"),
    ("x-fastly-request-id", TechCategory::Cdn, "Fastly"),
    ("x-vercel-id", TechCategory::Cdn, "Vercel"),
    ("x-shopify-stage", TechCategory::Ecommerce, "Shopify"),
];

/// File names of common server-side cloaking and TDS scripts.
const CLOAKING_SCRIPTS: &[&str] = &[
    "cloak.php",
    "cloaker.php",
    "tds.php",
    "filter.php",
    "redirect.php",
    "go.php",
    "white.php",
    "black.php",
    "index_white",
    "index_black",
    "keitaro",
    "binom",
];

/// Collected page evidence.
struct PageEvidence {
    technologies: BTreeSet<Technology>,
    cloaking_hits: BTreeSet<&'static str>,
}

fn inspect_headers(headers: &[(String, String)], found: &mut BTreeSet<Technology>) {
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        if let Some((_, category, tech)) = HEADER_SIGNATURES.iter().find(|(h, _, _)| *h == name) {
            found.insert(Technology::new(*category, *tech));
        }
        match name.as_str() {
            "server" if !value.is_empty() => {
                let product = value.split('/').next().unwrap_or(value).trim();
                found.insert(Technology::new(TechCategory::Server, product));
            }
            "x-powered-by" if !value.is_empty() => {
                found.insert(Technology::new(TechCategory::Server, value.trim()));
            }
            _ => {}
        }
    }
}

fn inspect_markup(body: &str) -> PageEvidence {
    let document = Html::parse_document(body);
    let mut technologies = BTreeSet::new();

    if let Ok(selector) = Selector::parse("meta[name='generator']") {
        for meta in document.select(&selector) {
            if let Some(content) = meta.value().attr("content") {
                let product = content.split_whitespace().next().unwrap_or(content);
                if !product.is_empty() {
                    technologies.insert(Technology::new(TechCategory::Cms, product));
                }
            }
        }
    }

    let mut references: Vec<String> = Vec::new();
    if let Ok(selector) = Selector::parse("script[src], link[href], iframe[src], form[action]") {
        for element in document.select(&selector) {
            let value = element.value();
            for attr in ["src", "href", "action"] {
                if let Some(reference) = value.attr(attr) {
                    references.push(reference.to_ascii_lowercase());
                }
            }
        }
    }
    if let Ok(selector) = Selector::parse("script:not([src])") {
        for script in document.select(&selector) {
            references.push(script.text().collect::<String>().to_ascii_lowercase());
        }
    }

    for reference in &references {
        for (pattern, category, tech) in MARKUP_SIGNATURES {
            if reference.contains(pattern) {
                technologies.insert(Technology::new(*category, *tech));
            }
        }
    }

    let lowered = body.to_ascii_lowercase();
    let cloaking_hits = CLOAKING_SCRIPTS
        .iter()
        .copied()
        .filter(|script| lowered.contains(script))
        .collect();

    PageEvidence {
        technologies,
        cloaking_hits,
    }
}

pub async fn run(prober: &dyn Prober, url: &str) -> Result<ModuleOutput> {
    let request = FetchRequest::page(
        url,
        ClientProfile::new(DeviceIdentity::Desktop, Referrer::Direct, GeoHint::Tier1English),
    );
    let fetched = prober.fetch(&request).await?;

    let mut evidence = fetched
        .reply
        .body
        .as_deref()
        .map_or_else(
            || PageEvidence {
                technologies: BTreeSet::new(),
                cloaking_hits: BTreeSet::new(),
            },
            inspect_markup,
        );
    inspect_headers(&fetched.reply.headers, &mut evidence.technologies);

    let mut findings = Vec::new();
    if !evidence.cloaking_hits.is_empty() {
        findings.push(NewFinding {
            finding_type: "potential_cloaking".to_string(),
            severity: Severity::High,
            title: "Page references cloaking scripts".to_string(),
            description: format!(
                "Markup mentions known server-side redirect scripts: {}.",
                evidence
                    .cloaking_hits
                    .iter()
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            evidence: serde_json::json!({ "patterns": evidence.cloaking_hits }),
            affected_url: fetched.final_url.clone(),
        });
    }

    Ok(ModuleOutput {
        findings,
        data: serde_json::json!({
            "finalUrl": fetched.final_url,
            "status": fetched.reply.status,
            "technologies": evidence.technologies,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use cloakscope_probe::HttpReply;

    fn names(data: &serde_json::Value) -> Vec<String> {
        data["technologies"]
            .as_array()
            .expect("array")
            .iter()
            .map(|t| t["name"].as_str().expect("name").to_string())
            .collect()
    }

    #[test]
    fn test_markup_signatures() {
        let evidence = inspect_markup(
            r#"<html><head>
                <meta name="generator" content="WordPress 6.5">
                <script src="https://www.googletagmanager.com/gtm.js?id=GTM-1"></script>
                <link rel="stylesheet" href="/wp-content/themes/x/style.css">
            </head><body><p>Hi</p></body></html>"#,
        );
        assert!(evidence
            .technologies
            .contains(&Technology::new(TechCategory::Cms, "WordPress")));
        assert!(evidence
            .technologies
            .contains(&Technology::new(TechCategory::Analytics, "Google Tag Manager")));
        assert!(evidence.cloaking_hits.is_empty());
    }

    #[test]
    fn test_inline_pixel_detected() {
        let evidence = inspect_markup(
            "<script>!function(f){f.src='https://connect.facebook.net/en_US/fbevents.js'}()</script>",
        );
        assert!(evidence
            .technologies
            .contains(&Technology::new(TechCategory::Analytics, "Meta Pixel")));
    }

    #[test]
    fn test_header_signatures() {
        let mut found = BTreeSet::new();
        inspect_headers(
            &[
                ("Server".to_string(), "nginx/1.25.3".to_string()),
                ("cf-ray".to_string(), "8a1b".to_string()),
            ],
            &mut found,
        );
        assert!(found.contains(&Technology::new(TechCategory::Server, "nginx")));
        assert!(found.contains(&Technology::new(TechCategory::Cdn, "Cloudflare")));
    }

    #[tokio::test]
    async fn test_cloaking_script_flagged() {
        let url = "https://lp.example.com/";
        let prober = ScriptedTransport::default()
            .route(url, |_| {
                Some(HttpReply {
                    status: 200,
                    headers: vec![("server".to_string(), "Apache".to_string())],
                    body: Some(
                        r#"<form action="/cloak.php" method="post"><input name="x"></form>"#
                            .to_string(),
                    ),
                })
            })
            .into_prober();

        let output = run(prober.as_ref(), url).await.expect("run");
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].finding_type, "potential_cloaking");
        assert_eq!(output.findings[0].severity, Severity::High);
        assert_eq!(names(&output.data), vec!["Apache".to_string()]);
    }

    #[tokio::test]
    async fn test_plain_page_has_no_findings() {
        let url = "https://lp.example.com/";
        let prober = ScriptedTransport::default()
            .route(url, |_| {
                Some(HttpReply {
                    status: 200,
                    headers: Vec::new(),
                    body: Some("<p>Nothing to see</p>".to_string()),
                })
            })
            .into_prober();

        let output = run(prober.as_ref(), url).await.expect("run");
        assert!(output.findings.is_empty());
        assert!(names(&output.data).is_empty());
    }
}
