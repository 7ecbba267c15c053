//! Synthetic client identities used for probing.
//!
//! A [`ClientProfile`] is a (device, referrer, geo) triple. The concrete
//! header values for each enum variant live in an immutable [`ProfileCatalog`]
//! that is built once and shared by `Arc`. Geography is simulated at the
//! header level only.

use cloakscope_core::ProbingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Browser or crawler identity presented in the `User-Agent` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceIdentity {
    /// Ad-review / search crawler
    Crawler,
    /// Mobile browser
    Mobile,
    /// Desktop browser
    Desktop,
}

impl DeviceIdentity {
    /// All identities in catalog order.
    pub const ALL: [Self; 3] = [Self::Crawler, Self::Mobile, Self::Desktop];

    /// Stable identifier used in condition labels and storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crawler => "crawler",
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
        }
    }
}

/// Referring origin presented in the `Referer` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Referrer {
    /// No referrer (typed-in / bookmark)
    Direct,
    /// Facebook click-through
    Facebook,
    /// Google search/ads click-through
    Google,
    /// TikTok click-through
    TikTok,
}

impl Referrer {
    /// Stable identifier used in condition labels and storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Facebook => "facebook",
            Self::Google => "google",
            Self::TikTok => "tiktok",
        }
    }
}

/// Simulated visitor geography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoHint {
    /// Tier-1 English-speaking market
    Tier1English,
    /// Region commonly treated as low-trust traffic
    LowTrust,
    /// The region the operator's campaign targets
    OperatorTarget,
}

impl GeoHint {
    /// Stable identifier used in condition labels and storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1English => "tier1_english",
            Self::LowTrust => "low_trust",
            Self::OperatorTarget => "operator_target",
        }
    }
}

/// One synthetic client: who is asking, where they came from, where they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientProfile {
    pub device: DeviceIdentity,
    pub referrer: Referrer,
    pub geo: GeoHint,
}

impl ClientProfile {
    #[must_use]
    pub fn new(device: DeviceIdentity, referrer: Referrer, geo: GeoHint) -> Self {
        Self {
            device,
            referrer,
            geo,
        }
    }

    /// The presumed reviewer-visible identity: crawler, no referrer, tier-1 geo.
    #[must_use]
    pub fn baseline() -> Self {
        Self::new(
            DeviceIdentity::Crawler,
            Referrer::Direct,
            GeoHint::Tier1English,
        )
    }

    /// Label such as `desktop/facebook/operator_target`.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.device.as_str(),
            self.referrer.as_str(),
            self.geo.as_str()
        )
    }

    /// Alternate probe conditions, most suspicious first.
    ///
    /// Full cross product of {mobile, desktop} x {facebook, google, tiktok,
    /// direct} x {operator target, tier-1, low trust}, rotated so that
    /// desktop + facebook + operator target leads. Callers execute a prefix.
    #[must_use]
    pub fn alternate_conditions() -> Vec<Self> {
        let devices = [DeviceIdentity::Desktop, DeviceIdentity::Mobile];
        let referrers = [
            Referrer::Facebook,
            Referrer::Google,
            Referrer::TikTok,
            Referrer::Direct,
        ];
        let geos = [
            GeoHint::OperatorTarget,
            GeoHint::Tier1English,
            GeoHint::LowTrust,
        ];

        let mut conditions = Vec::with_capacity(devices.len() * referrers.len() * geos.len());
        // Vary referrer and device before geo so a short prefix covers the
        // most distinct traffic sources.
        for geo in geos {
            for referrer in referrers {
                for device in devices {
                    conditions.push(Self::new(device, referrer, geo));
                }
            }
        }
        conditions
    }
}

impl fmt::Display for ClientProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Concrete request headers for one profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileHeaders {
    pub user_agent: String,
    pub referer: Option<String>,
    pub accept_language: String,
    /// Synthetic "observed geography" label, recorded with snapshots.
    pub observed_geo: String,
}

/// Immutable table from enum values to header attributes.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    crawler_ua: String,
    mobile_ua: String,
    desktop_ua: String,
}

const CRAWLER_UA: &str =
    "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";
const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

impl Default for ProfileCatalog {
    fn default() -> Self {
        Self {
            crawler_ua: CRAWLER_UA.to_string(),
            mobile_ua: MOBILE_UA.to_string(),
            desktop_ua: DESKTOP_UA.to_string(),
        }
    }
}

impl ProfileCatalog {
    /// Build the catalog, applying any User-Agent overrides from configuration.
    #[must_use]
    pub fn from_config(config: &ProbingConfig) -> Self {
        let defaults = Self::default();
        Self {
            crawler_ua: config
                .crawler_user_agent
                .clone()
                .unwrap_or(defaults.crawler_ua),
            mobile_ua: config
                .mobile_user_agent
                .clone()
                .unwrap_or(defaults.mobile_ua),
            desktop_ua: config
                .desktop_user_agent
                .clone()
                .unwrap_or(defaults.desktop_ua),
        }
    }

    #[must_use]
    pub fn user_agent(&self, device: DeviceIdentity) -> &str {
        match device {
            DeviceIdentity::Crawler => &self.crawler_ua,
            DeviceIdentity::Mobile => &self.mobile_ua,
            DeviceIdentity::Desktop => &self.desktop_ua,
        }
    }

    #[must_use]
    pub fn referer(&self, referrer: Referrer) -> Option<&'static str> {
        match referrer {
            Referrer::Direct => None,
            Referrer::Facebook => Some("https://www.facebook.com/"),
            Referrer::Google => Some("https://www.google.com/"),
            Referrer::TikTok => Some("https://www.tiktok.com/"),
        }
    }

    #[must_use]
    pub fn accept_language(&self, geo: GeoHint) -> &'static str {
        match geo {
            GeoHint::Tier1English => "en-US,en;q=0.9",
            GeoHint::LowTrust => "vi-VN,vi;q=0.9,en;q=0.5",
            GeoHint::OperatorTarget => "en-GB,en;q=0.9",
        }
    }

    #[must_use]
    pub fn observed_geo(&self, geo: GeoHint) -> &'static str {
        match geo {
            GeoHint::Tier1English => "US",
            GeoHint::LowTrust => "VN",
            GeoHint::OperatorTarget => "GB",
        }
    }

    /// Resolve a profile to the headers sent on the wire.
    #[must_use]
    pub fn headers_for(&self, profile: &ClientProfile) -> ProfileHeaders {
        ProfileHeaders {
            user_agent: self.user_agent(profile.device).to_string(),
            referer: self.referer(profile.referrer).map(str::to_string),
            accept_language: self.accept_language(profile.geo).to_string(),
            observed_geo: self.observed_geo(profile.geo).to_string(),
        }
    }
}
