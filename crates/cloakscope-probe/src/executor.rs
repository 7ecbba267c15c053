//! Probe executor.
//!
//! [`HttpProber`] issues requests under a synthetic [`ClientProfile`], walks
//! redirects by hand so every hop is checked by the URL guard, and reduces
//! the final page to a fingerprint and preview. Probes never fail outright:
//! errors are folded into a [`ProbeOutcome`] with status 0.

use crate::error::{ProbeError, Result};
use crate::fingerprint::{normalize_body, preview, Fingerprinter};
use crate::guard::{check_parsed, check_url};
use crate::profiles::{ClientProfile, ProfileCatalog, ProfileHeaders};
use crate::rate_limit::RateLimiter;
use crate::token::append_token;
use crate::transport::{HttpReply, HttpRequest, Method, Transport};
use async_trait::async_trait;
use cloakscope_core::ProbingConfig;
use std::sync::Arc;
use url::Url;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Parameters for a low-level fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub profile: ClientProfile,
    pub method: Method,
    pub follow_redirects: bool,
    pub read_body: bool,
}

impl FetchRequest {
    /// GET that follows redirects and reads a 2xx body.
    #[must_use]
    pub fn page(url: impl Into<String>, profile: ClientProfile) -> Self {
        Self {
            url: url.into(),
            profile,
            method: Method::Get,
            follow_redirects: true,
            read_body: true,
        }
    }
}

/// Result of a low-level fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Every URL requested, starting with the original.
    pub chain: Vec<String>,
    pub final_url: String,
    /// The last reply received.
    pub reply: HttpReply,
    /// The hop cap was hit while the server was still redirecting.
    pub truncated: bool,
}

/// Normalized result of one probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub profile: ClientProfile,
    pub headers: ProfileHeaders,
    /// URL actually requested, including any injected token.
    pub requested_url: String,
    pub final_url: String,
    /// 0 when the probe failed.
    pub status_code: u16,
    pub body_preview: String,
    pub fingerprint: String,
    pub redirect_chain: Vec<String>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// The walk ended on a 2xx page.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Why the probe is unusable for comparison, `None` on success.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        Some(match (&self.error, self.status_code) {
            (Some(error), _) => error.clone(),
            (None, 0) => "no response".to_string(),
            (None, status) => format!("HTTP {status}"),
        })
    }

    fn failed(
        profile: ClientProfile,
        headers: ProfileHeaders,
        requested_url: String,
        error: &ProbeError,
    ) -> Self {
        Self {
            profile,
            headers,
            final_url: requested_url.clone(),
            redirect_chain: vec![requested_url.clone()],
            requested_url,
            status_code: 0,
            body_preview: String::new(),
            fingerprint: String::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Result of a HEAD liveness walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    /// Final status, 0 on failure.
    pub status: u16,
    pub final_url: String,
    pub error: Option<String>,
}

/// Outbound probing surface used by the scanners.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Fetch `url` as `profile`, optionally injecting `token` into the query.
    async fn probe(&self, url: &str, profile: &ClientProfile, token: Option<&str>) -> ProbeOutcome;

    /// HEAD-walk `url` and report the final status.
    async fn check_liveness(&self, url: &str) -> Liveness;

    /// Guarded, paced request primitive.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult>;
}

/// [`Prober`] over a [`Transport`].
pub struct HttpProber {
    transport: Arc<dyn Transport>,
    catalog: Arc<ProfileCatalog>,
    fingerprinter: Arc<dyn Fingerprinter>,
    limiter: Arc<RateLimiter>,
    max_redirects: usize,
    preview_chars: usize,
}

impl HttpProber {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        catalog: Arc<ProfileCatalog>,
        fingerprinter: Arc<dyn Fingerprinter>,
        limiter: Arc<RateLimiter>,
        config: &ProbingConfig,
    ) -> Self {
        Self {
            transport,
            catalog,
            fingerprinter,
            limiter,
            max_redirects: config.max_redirects,
            preview_chars: config.preview_chars,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &ProfileCatalog {
        &self.catalog
    }

    fn request_headers(headers: &ProfileHeaders) -> Vec<(String, String)> {
        let mut out = vec![
            ("user-agent".to_string(), headers.user_agent.clone()),
            ("accept".to_string(), ACCEPT_HTML.to_string()),
            ("accept-language".to_string(), headers.accept_language.clone()),
        ];
        if let Some(referer) = &headers.referer {
            out.push(("referer".to_string(), referer.clone()));
        }
        out
    }

    async fn walk(&self, start: Url, request: &FetchRequest) -> Result<FetchResult> {
        let headers = Self::request_headers(&self.catalog.headers_for(&request.profile));
        let host = start.host_str().unwrap_or_default().to_string();
        self.limiter.until_ready(&host).await;

        let mut current = start;
        let mut chain = vec![current.to_string()];
        let mut hops = 0;

        loop {
            tracing::debug!(
                "{:?} {} as {}",
                request.method,
                current,
                request.profile.label()
            );
            let reply = self
                .transport
                .send(HttpRequest {
                    method: request.method,
                    url: current.clone(),
                    headers: headers.clone(),
                    read_body: request.read_body,
                })
                .await?;

            let location = if request.follow_redirects && reply.is_redirect() {
                reply.header("location").map(str::to_string)
            } else {
                None
            };
            let Some(location) = location else {
                return Ok(FetchResult {
                    final_url: current.to_string(),
                    chain,
                    reply,
                    truncated: false,
                });
            };

            if hops >= self.max_redirects {
                return Ok(FetchResult {
                    final_url: current.to_string(),
                    chain,
                    reply,
                    truncated: true,
                });
            }

            let next = current
                .join(&location)
                .map_err(|e| ProbeError::InvalidRedirect(format!("{location}: {e}")))?;
            check_parsed(&next)?;

            hops += 1;
            chain.push(next.to_string());
            current = next;
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, profile: &ClientProfile, token: Option<&str>) -> ProbeOutcome {
        let headers = self.catalog.headers_for(profile);

        let start = match check_url(url) {
            Ok(start) => start,
            Err(rejection) => {
                tracing::warn!("Refusing to probe {}: {}", url, rejection);
                return ProbeOutcome::failed(
                    *profile,
                    headers,
                    url.to_string(),
                    &ProbeError::Blocked(rejection),
                );
            }
        };
        let start = match token {
            Some(token) => append_token(&start, token),
            None => start,
        };
        let requested_url = start.to_string();

        let request = FetchRequest::page(requested_url.clone(), *profile);
        let fetched = match self.walk(start, &request).await {
            Ok(fetched) if fetched.truncated => {
                let err = ProbeError::TooManyRedirects(self.max_redirects);
                tracing::warn!("Probe of {} failed: {}", requested_url, err);
                return ProbeOutcome::failed(*profile, headers, requested_url, &err);
            }
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!("Probe of {} failed: {}", requested_url, err);
                return ProbeOutcome::failed(*profile, headers, requested_url, &err);
            }
        };

        let text = fetched
            .reply
            .body
            .as_deref()
            .map(normalize_body)
            .unwrap_or_default();
        let fingerprint = self.fingerprinter.fingerprint(&text);

        ProbeOutcome {
            profile: *profile,
            headers,
            requested_url,
            final_url: fetched.final_url,
            status_code: fetched.reply.status,
            body_preview: preview(&text, self.preview_chars),
            fingerprint,
            redirect_chain: fetched.chain,
            error: None,
        }
    }

    async fn check_liveness(&self, url: &str) -> Liveness {
        let request = FetchRequest {
            url: url.to_string(),
            profile: ClientProfile::baseline(),
            method: Method::Head,
            follow_redirects: true,
            read_body: false,
        };

        match self.fetch(&request).await {
            Ok(fetched) if fetched.truncated => Liveness {
                status: 0,
                final_url: fetched.final_url,
                error: Some(ProbeError::TooManyRedirects(self.max_redirects).to_string()),
            },
            Ok(fetched) => Liveness {
                status: fetched.reply.status,
                final_url: fetched.final_url,
                error: None,
            },
            Err(err) => Liveness {
                status: 0,
                final_url: url.to_string(),
                error: Some(err.to_string()),
            },
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let start = check_url(&request.url)?;
        self.walk(start, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::RollingHashFingerprinter;
    use crate::profiles::{DeviceIdentity, GeoHint, Referrer};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        replies: HashMap<String, HttpReply>,
        sent: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn with(mut self, url: &str, reply: HttpReply) -> Self {
            self.replies.insert(url.to_string(), reply);
            self
        }

        fn sent_urls(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("lock")
                .iter()
                .map(|r| r.url.to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpReply> {
            let reply = self.replies.get(request.url.as_str()).cloned();
            self.sent.lock().expect("lock").push(request);
            reply.ok_or_else(|| ProbeError::Transport("connection refused".to_string()))
        }
    }

    fn page(body: &str) -> HttpReply {
        HttpReply {
            status: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body: Some(body.to_string()),
        }
    }

    fn redirect(to: &str) -> HttpReply {
        HttpReply {
            status: 302,
            headers: vec![("location".to_string(), to.to_string())],
            body: None,
        }
    }

    fn prober(transport: Arc<ScriptedTransport>) -> HttpProber {
        HttpProber::new(
            transport,
            Arc::new(ProfileCatalog::default()),
            Arc::new(RollingHashFingerprinter),
            Arc::new(RateLimiter::new(0)),
            &ProbingConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_probe_success() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("https://shop.example.com/", page("<h1>Hello</h1><script>x()</script>")),
        );
        let outcome = prober(Arc::clone(&transport))
            .probe("https://shop.example.com/", &ClientProfile::baseline(), None)
            .await;

        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.body_preview, "Hello");
        assert_eq!(
            outcome.fingerprint,
            RollingHashFingerprinter.fingerprint("Hello")
        );
        assert_eq!(outcome.redirect_chain, vec!["https://shop.example.com/"]);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_profile_headers_sent() {
        let transport = Arc::new(
            ScriptedTransport::default().with("https://shop.example.com/", page("ok")),
        );
        let profile = ClientProfile::new(
            DeviceIdentity::Desktop,
            Referrer::Facebook,
            GeoHint::OperatorTarget,
        );
        prober(Arc::clone(&transport))
            .probe("https://shop.example.com/", &profile, None)
            .await;

        let sent = transport.sent.lock().expect("lock");
        let headers = &sent[0].headers;
        let get = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("referer").as_deref(), Some("https://www.facebook.com/"));
        assert_eq!(get("accept-language").as_deref(), Some("en-GB,en;q=0.9"));
        assert!(get("user-agent").expect("user agent").contains("Windows"));
    }

    #[tokio::test]
    async fn test_blocked_url_never_reaches_transport() {
        let transport = Arc::new(ScriptedTransport::default());
        let outcome = prober(Arc::clone(&transport))
            .probe("http://localhost/x", &ClientProfile::baseline(), None)
            .await;

        assert_eq!(outcome.status_code, 0);
        assert!(outcome.body_preview.is_empty());
        assert!(outcome.fingerprint.is_empty());
        assert!(outcome.error.expect("error").contains("blocked"));
        assert!(transport.sent_urls().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_yields_status_zero() {
        let transport = Arc::new(ScriptedTransport::default());
        let outcome = prober(Arc::clone(&transport))
            .probe("https://down.example.com/", &ClientProfile::baseline(), None)
            .await;

        assert_eq!(outcome.status_code, 0);
        assert!(outcome.body_preview.is_empty());
        assert!(outcome.error.is_some());
        assert_eq!(transport.sent_urls().len(), 1);
    }

    #[tokio::test]
    async fn test_token_is_appended() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("https://shop.example.com/lp?utm_source=fb&k=abcd", page("offer")),
        );
        let outcome = prober(Arc::clone(&transport))
            .probe(
                "https://shop.example.com/lp?utm_source=fb",
                &ClientProfile::baseline(),
                Some("k=abcd"),
            )
            .await;

        assert_eq!(outcome.status_code, 200);
        assert_eq!(
            transport.sent_urls(),
            vec!["https://shop.example.com/lp?utm_source=fb&k=abcd"]
        );
    }

    #[tokio::test]
    async fn test_redirect_chain_recorded() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("https://ads.example.com/click", redirect("https://lp.example.net/a"))
                .with("https://lp.example.net/a", redirect("/b"))
                .with("https://lp.example.net/b", page("landing")),
        );
        let outcome = prober(Arc::clone(&transport))
            .probe("https://ads.example.com/click", &ClientProfile::baseline(), None)
            .await;

        assert_eq!(outcome.final_url, "https://lp.example.net/b");
        assert_eq!(
            outcome.redirect_chain,
            vec![
                "https://ads.example.com/click",
                "https://lp.example.net/a",
                "https://lp.example.net/b"
            ]
        );
    }

    #[tokio::test]
    async fn test_redirect_to_internal_host_is_blocked() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with(
                    "https://ads.example.com/click",
                    redirect("http://169.254.169.254/latest/meta-data/"),
                ),
        );
        let outcome = prober(Arc::clone(&transport))
            .probe("https://ads.example.com/click", &ClientProfile::baseline(), None)
            .await;

        assert_eq!(outcome.status_code, 0);
        assert_eq!(transport.sent_urls(), vec!["https://ads.example.com/click"]);
    }

    #[tokio::test]
    async fn test_redirect_loop_hits_cap() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("https://loop.example.com/a", redirect("/b"))
                .with("https://loop.example.com/b", redirect("/a")),
        );
        let outcome = prober(Arc::clone(&transport))
            .probe("https://loop.example.com/a", &ClientProfile::baseline(), None)
            .await;

        assert_eq!(outcome.status_code, 0);
        assert!(outcome.error.expect("error").contains("redirect limit"));
        // Initial request plus ten followed hops
        assert_eq!(transport.sent_urls().len(), 11);
    }

    #[tokio::test]
    async fn test_error_body_not_fingerprinted() {
        let transport = Arc::new(ScriptedTransport::default().with(
            "https://shop.example.com/",
            HttpReply {
                status: 404,
                headers: Vec::new(),
                body: None,
            },
        ));
        let outcome = prober(Arc::clone(&transport))
            .probe("https://shop.example.com/", &ClientProfile::baseline(), None)
            .await;

        assert_eq!(outcome.status_code, 404);
        assert!(outcome.body_preview.is_empty());
        assert_eq!(outcome.fingerprint, RollingHashFingerprinter.fingerprint(""));
        assert!(!outcome.is_success());
        assert_eq!(outcome.failure_reason().as_deref(), Some("HTTP 404"));
    }

    #[tokio::test]
    async fn test_redirect_ending_on_page_is_success() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("https://ads.example.com/click", redirect("https://lp.example.net/"))
                .with("https://lp.example.net/", page("landing")),
        );
        let outcome = prober(Arc::clone(&transport))
            .probe("https://ads.example.com/click", &ClientProfile::baseline(), None)
            .await;

        assert!(outcome.is_success());
        assert!(outcome.failure_reason().is_none());
    }

    #[tokio::test]
    async fn test_check_liveness() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("https://gone.example.com/", redirect("https://gone.example.com/404"))
                .with(
                    "https://gone.example.com/404",
                    HttpReply {
                        status: 404,
                        headers: Vec::new(),
                        body: None,
                    },
                ),
        );
        let prober = prober(Arc::clone(&transport));

        let liveness = prober.check_liveness("https://gone.example.com/").await;
        assert_eq!(liveness.status, 404);
        assert_eq!(liveness.final_url, "https://gone.example.com/404");
        assert!(transport
            .sent
            .lock()
            .expect("lock")
            .iter()
            .all(|r| r.method == Method::Head && !r.read_body));

        let blocked = prober.check_liveness("http://10.0.0.5/").await;
        assert_eq!(blocked.status, 0);
        assert!(blocked.error.is_some());
    }
}
