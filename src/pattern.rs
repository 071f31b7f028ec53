//! Blacklist entries and the adblock-style pattern dialect.
//!
//! Patterns are plain strings, optionally anchored with a leading `||` and a
//! trailing `^`. Nothing else in the adblock syntax is interpreted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

/// Absolute http(s) URLs are turned into host+path patterns; anything else is
/// taken as a bare path.
static SCHEMED_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://").unwrap());

/// A local blacklist entry.
///
/// Two entries describe the same rule iff their `pattern` strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PatternEntry {
    pub pattern: String,
    #[serde(default)]
    pub reason: String,
}

impl PatternEntry {
    pub fn new(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Decode any on-disk shape into the current entry.
    ///
    /// Older versions stored bare pattern strings. Objects with missing or
    /// non-string fields decode to empty strings rather than failing.
    pub fn decode(value: &Value) -> Self {
        match value {
            Value::String(pattern) => Self::new(pattern.clone(), ""),
            Value::Object(map) => Self::new(
                string_field(map.get("pattern")),
                string_field(map.get("reason")),
            ),
            _ => Self::default(),
        }
    }

    /// Whether this entry is a legacy (bare string) encoding.
    pub fn is_legacy(value: &Value) -> bool {
        value.is_string()
    }
}

/// An entry that came from a subscription feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RemotePatternEntry {
    #[serde(flatten)]
    pub entry: PatternEntry,
    /// The URL as it appeared in the feed.
    #[serde(default)]
    pub url: String,
    /// Feed this entry came from. Entries imported before sources were
    /// tracked have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RemotePatternEntry {
    pub fn new(entry: PatternEntry, url: impl Into<String>, source: Option<String>) -> Self {
        Self {
            entry,
            url: url.into(),
            source,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.entry.pattern
    }

    /// Decode a stored remote entry, tolerating legacy and partial shapes.
    pub fn decode(value: &Value) -> Self {
        let entry = PatternEntry::decode(value);
        match value {
            Value::Object(map) => Self {
                entry,
                url: string_field(map.get("url")),
                source: map
                    .get("source")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            },
            _ => Self::new(entry, "", None),
        }
    }
}

fn string_field(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Result of stripping anchors from a raw pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPattern {
    /// Pattern with the leading `||` and trailing `^` removed.
    pub clean: String,
    /// Host/path split, present only when the part before the first `/`
    /// looks like a host name.
    pub host_path: Option<HostPath>,
}

/// Candidate host and path of a normalized pattern. `path` keeps its
/// leading `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPath {
    pub host: String,
    pub path: String,
}

/// Strip the `||` and `^` anchors from a pattern.
pub fn strip_anchors(pattern: &str) -> &str {
    let s = pattern.strip_prefix("||").unwrap_or(pattern);
    s.strip_suffix('^').unwrap_or(s)
}

/// Normalize a raw pattern and derive its host/path split.
///
/// The split only happens when the text before the first `/` is non-empty
/// and contains a `.`, so bare file names stay substring patterns.
pub fn normalize(pattern: &str) -> NormalizedPattern {
    let clean = strip_anchors(pattern);

    let host_path = match clean.find('/') {
        Some(slash) if slash > 0 => {
            let (host, path) = clean.split_at(slash);
            host.contains('.').then(|| HostPath {
                host: host.to_string(),
                path: path.to_string(),
            })
        }
        _ => None,
    };

    NormalizedPattern {
        clean: clean.to_string(),
        host_path,
    }
}

/// Build the canonical pattern for an absolute URL: `||host path^`.
///
/// Fails if `url` is not an absolute URL with a host.
pub fn pattern_from_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    Ok(format!("||{}{}^", host, parsed.path()))
}

/// Derive a pattern from a feed or import item.
///
/// Absolute http(s) URLs become `||host path^`; anything else is treated as a
/// bare path with leading slashes removed. Returns `None` for empty input.
pub fn pattern_from_item(url: &str) -> Option<String> {
    if url.is_empty() {
        return None;
    }

    if SCHEMED_URL.is_match(url) {
        return Some(pattern_from_url(url).unwrap_or_else(|_| format!("||{}^", url)));
    }

    let bare = url.trim_start_matches('/');
    if bare.is_empty() {
        return None;
    }
    Some(format!("||{}^", bare))
}

/// Render a pattern as a URL for display.
pub fn display_pattern(pattern: &str) -> String {
    let clean = strip_anchors(pattern);
    if SCHEMED_URL.is_match(clean) {
        clean.to_string()
    } else {
        format!("https://{}", clean)
    }
}
