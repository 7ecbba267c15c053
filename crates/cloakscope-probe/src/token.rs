//! Cloaker-token heuristics.
//!
//! Cloaking kits commonly gate the hidden page behind a short query parameter
//! added to the ad's click URL. [`deduce_token`] guesses that parameter; it is
//! approximate and will both miss tokens and pick up harmless parameters.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Standard click-tracking parameters that are never tokens.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid", "ttclid", "dclid"];

const MAX_KEY_LEN: usize = 12;
const MIN_VALUE_LEN: usize = 4;

fn bare_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]([A-Za-z0-9]{6,12})(?:&|#|$)").expect("valid regex"))
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Guess the cloaker token carried by `url`.
///
/// Returns the first query parameter, outside the tracking allow-list, whose
/// key is at most 12 characters without underscores and whose value is at
/// least 4 characters, as `key=value`. Failing that, returns a bare 6-12
/// character alphanumeric segment after `?` or `&`.
#[must_use]
pub fn deduce_token(url: &str) -> Option<String> {
    let query = url
        .split_once('?')
        .map(|(_, rest)| rest.split('#').next().unwrap_or_default())?;

    for segment in query.split('&') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        if key.is_empty() || is_tracking_param(key) {
            continue;
        }
        if key.chars().count() <= MAX_KEY_LEN
            && !key.contains('_')
            && value.chars().count() >= MIN_VALUE_LEN
        {
            return Some(format!("{key}={value}"));
        }
    }

    bare_token_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Append `token` to the query of `url`, using `&` when a query already exists.
///
/// A token already present as a query segment is not added twice.
#[must_use]
pub fn append_token(url: &Url, token: &str) -> Url {
    let mut out = url.clone();
    match url.query() {
        Some(query) if query.split('&').any(|segment| segment == token) => {}
        Some(query) if !query.is_empty() => out.set_query(Some(&format!("{query}&{token}"))),
        _ => out.set_query(Some(token)),
    }
    out
}

/// Remove every query segment equal to `token`.
///
/// Used to compare final URLs without the injected token counting as a
/// difference.
#[must_use]
pub fn strip_token(url: &str, token: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let Some(query) = parsed.query() else {
        return url.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|segment| !segment.is_empty() && *segment != token)
        .collect();
    let rebuilt = kept.join("&");
    if rebuilt.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.set_query(Some(&rebuilt));
    }
    parsed.to_string()
}
