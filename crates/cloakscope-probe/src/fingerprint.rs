//! Content normalization and fingerprinting.
//!
//! Fingerprints only need to answer "is this the same page?" for divergence
//! purposes. The default [`RollingHashFingerprinter`] is a cheap
//! non-cryptographic hash; collisions are tolerated. Swap in
//! [`Sha256Fingerprinter`] where that matters.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Default number of characters kept in a content preview.
pub const DEFAULT_PREVIEW_CHARS: usize = 500;

/// Produces a short digest of normalized page content.
pub trait Fingerprinter: Send + Sync {
    /// Digest `content`. Equal input must give equal output.
    fn fingerprint(&self, content: &str) -> String;
}

/// 31-multiplier wrapping 32-bit character hash, rendered as 8 hex chars.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingHashFingerprinter;

impl Fingerprinter for RollingHashFingerprinter {
    fn fingerprint(&self, content: &str) -> String {
        let hash = content
            .chars()
            .fold(0u32, |acc, c| acc.wrapping_mul(31).wrapping_add(c as u32));
        format!("{hash:08x}")
    }
}

/// SHA-256 hex digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Fingerprinter;

impl Fingerprinter for Sha256Fingerprinter {
    fn fingerprint(&self, content: &str) -> String {
        hex::encode(Sha256::digest(content.as_bytes()))
    }
}

fn script_style_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").expect("valid regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Reduce an HTML body to its visible text.
///
/// Drops `<script>` and `<style>` blocks, then all remaining tags, then
/// collapses runs of whitespace to a single space.
#[must_use]
pub fn normalize_body(html: &str) -> String {
    let without_blocks = script_style_regex().replace_all(html, " ");
    let without_tags = tag_regex().replace_all(&without_blocks, " ");
    whitespace_regex()
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

/// First `limit` characters of `text`.
#[must_use]
pub fn preview(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
