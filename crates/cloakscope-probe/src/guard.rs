//! Outbound URL safety guard.
//!
//! Every request this workspace sends, including each redirect hop, is
//! checked here first. Only public `http`/`https` destinations pass; loopback,
//! private, link-local (cloud metadata) and "current network" addresses, as
//! well as internal hostnames, are rejected with a reason.

use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Hostname suffixes that only resolve inside private networks.
const INTERNAL_SUFFIXES: &[&str] = &[".local", ".internal", ".corp", ".lan", ".localhost"];

/// Cloud metadata service hostnames.
const METADATA_HOSTS: &[&str] = &[
    "metadata",
    "metadata.google.internal",
    "metadata.azure.com",
    "instance-data",
    "instance-data.ec2.internal",
];

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRejection {
    /// Not parseable as an absolute URL
    #[error("malformed URL: {0}")]
    Malformed(String),

    /// Scheme other than http/https
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    /// URL has no host component
    #[error("URL has no host")]
    MissingHost,

    /// localhost or 127.0.0.0/8 / ::1
    #[error("loopback destination {0}")]
    Loopback(String),

    /// RFC 1918 / unique-local ranges
    #[error("private network destination {0}")]
    PrivateNetwork(String),

    /// 169.254.0.0/16 / fe80::/10, including cloud metadata endpoints
    #[error("link-local destination {0}")]
    LinkLocal(String),

    /// 0.0.0.0/8, unspecified and broadcast addresses
    #[error("reserved destination {0}")]
    CurrentNetwork(String),

    /// Internal-only hostname
    #[error("internal hostname {0}")]
    InternalHostname(String),
}

/// Validate an outbound URL, returning the parsed form when it is safe to fetch.
///
/// # Errors
/// Returns the [`UrlRejection`] describing the first rule the URL violates.
pub fn check_url(raw: &str) -> Result<Url, UrlRejection> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlRejection::Malformed(e.to_string()))?;
    check_parsed(&url)?;
    Ok(url)
}

/// Validate an already-parsed URL.
///
/// # Errors
/// Returns the [`UrlRejection`] describing the first rule the URL violates.
pub fn check_parsed(url: &Url) -> Result<(), UrlRejection> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlRejection::UnsupportedScheme(other.to_string())),
    }

    match url.host() {
        None => Err(UrlRejection::MissingHost),
        Some(Host::Ipv4(addr)) => check_ipv4(addr),
        Some(Host::Ipv6(addr)) => check_ipv6(addr),
        Some(Host::Domain(domain)) => check_domain(domain),
    }
}

/// Convenience boolean form of [`check_url`].
#[must_use]
pub fn is_safe_url(raw: &str) -> bool {
    check_url(raw).is_ok()
}

fn check_ipv4(addr: Ipv4Addr) -> Result<(), UrlRejection> {
    let shown = addr.to_string();
    if addr.is_loopback() {
        Err(UrlRejection::Loopback(shown))
    } else if addr.is_private() {
        Err(UrlRejection::PrivateNetwork(shown))
    } else if addr.is_link_local() {
        Err(UrlRejection::LinkLocal(shown))
    } else if addr.octets()[0] == 0 || addr.is_broadcast() {
        Err(UrlRejection::CurrentNetwork(shown))
    } else {
        Ok(())
    }
}

fn check_ipv6(addr: Ipv6Addr) -> Result<(), UrlRejection> {
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return check_ipv4(mapped);
    }

    let shown = addr.to_string();
    let first = addr.segments()[0];
    if addr.is_loopback() {
        Err(UrlRejection::Loopback(shown))
    } else if addr.is_unspecified() {
        Err(UrlRejection::CurrentNetwork(shown))
    } else if first & 0xfe00 == 0xfc00 {
        Err(UrlRejection::PrivateNetwork(shown))
    } else if first & 0xffc0 == 0xfe80 {
        Err(UrlRejection::LinkLocal(shown))
    } else {
        Ok(())
    }
}

fn check_domain(domain: &str) -> Result<(), UrlRejection> {
    let host = domain.trim_end_matches('.').to_ascii_lowercase();

    if host.is_empty() {
        return Err(UrlRejection::MissingHost);
    }
    if host == "localhost" {
        return Err(UrlRejection::Loopback(host));
    }
    if METADATA_HOSTS.contains(&host.as_str()) {
        return Err(UrlRejection::InternalHostname(host));
    }
    if INTERNAL_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)) {
        return Err(UrlRejection::InternalHostname(host));
    }
    // A dotless name only resolves through local search domains.
    if !host.contains('.') {
        return Err(UrlRejection::InternalHostname(host));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_pass() {
        for url in [
            "https://example.com/landing?id=1",
            "http://shop.example.co.uk/",
            "https://93.184.216.34/path",
            "https://[2606:2800:220:1:248:1893:25c8:1946]/",
            "https://example.com:8443/x",
        ] {
            assert!(check_url(url).is_ok(), "should pass: {url}");
        }
    }

    #[test]
    fn test_loopback_rejected() {
        for url in [
            "http://localhost/x",
            "http://LOCALHOST./x",
            "http://127.0.0.1/",
            "http://127.10.0.5:8080/",
            "http://[::1]/",
            "http://2130706433/",
            "http://app.localhost/",
        ] {
            assert!(check_url(url).is_err(), "should reject: {url}");
        }
        assert!(matches!(
            check_url("http://localhost/x"),
            Err(UrlRejection::Loopback(_))
        ));
    }

    #[test]
    fn test_private_ranges_rejected() {
        for url in [
            "http://10.0.0.1/",
            "http://10.255.255.255/",
            "http://172.16.0.1/",
            "http://172.31.255.254/",
            "http://192.168.1.1/",
            "http://[fd00::1]/",
        ] {
            assert!(
                matches!(check_url(url), Err(UrlRejection::PrivateNetwork(_))),
                "should reject as private: {url}"
            );
        }
        // Just outside 172.16.0.0/12
        assert!(check_url("http://172.32.0.1/").is_ok());
    }

    #[test]
    fn test_link_local_and_metadata_rejected() {
        assert!(matches!(
            check_url("http://169.254.169.254/latest/meta-data/"),
            Err(UrlRejection::LinkLocal(_))
        ));
        assert!(matches!(
            check_url("http://[fe80::1]/"),
            Err(UrlRejection::LinkLocal(_))
        ));
        assert!(matches!(
            check_url("http://metadata.google.internal/computeMetadata/v1/"),
            Err(UrlRejection::InternalHostname(_))
        ));
        assert!(check_url("http://metadata/").is_err());
    }

    #[test]
    fn test_current_network_rejected() {
        assert!(matches!(
            check_url("http://0.0.0.0/"),
            Err(UrlRejection::CurrentNetwork(_))
        ));
        assert!(check_url("http://0.1.2.3/").is_err());
        assert!(check_url("http://[::]/").is_err());
    }

    #[test]
    fn test_ipv4_mapped_ipv6_rejected() {
        assert!(check_url("http://[::ffff:127.0.0.1]/").is_err());
        assert!(check_url("http://[::ffff:10.0.0.1]/").is_err());
    }

    #[test]
    fn test_internal_suffixes_rejected() {
        for url in [
            "http://printer.local/",
            "https://billing.internal/",
            "https://git.corp/",
            "http://nas.lan/",
            "http://intranet/",
        ] {
            assert!(
                matches!(check_url(url), Err(UrlRejection::InternalHostname(_))),
                "should reject as internal: {url}"
            );
        }
    }

    #[test]
    fn test_scheme_and_malformed_rejected() {
        assert!(matches!(
            check_url("ftp://example.com/file"),
            Err(UrlRejection::UnsupportedScheme(_))
        ));
        assert!(matches!(
            check_url("file:///etc/passwd"),
            Err(UrlRejection::UnsupportedScheme(_))
        ));
        assert!(matches!(
            check_url("not a url"),
            Err(UrlRejection::Malformed(_))
        ));
        assert!(matches!(check_url(""), Err(UrlRejection::Malformed(_))));
        assert!(!is_safe_url("javascript:alert(1)"));
    }
}
