//! Ordered first-match evaluation of URLs against blacklist entries.
//!
//! This is independent of the rule engine and is used for block metadata
//! and for testing URLs from the UI. Entry order is significant: the first
//! matching entry wins even if a later one is more specific.

use url::Url;

use crate::pattern::{strip_anchors, PatternEntry};

/// Find the first entry matching `url`.
///
/// An entry matches if `host + path` starts with its clean pattern, or the
/// full URL contains it. Unparseable URLs match nothing.
pub fn find_match<'a>(url: &str, entries: &'a [PatternEntry]) -> Option<&'a PatternEntry> {
    let parsed = Url::parse(url).ok()?;
    let host_path = format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path());

    entries.iter().find(|entry| {
        let clean = strip_anchors(&entry.pattern);
        !clean.is_empty() && (host_path.starts_with(clean) || url.contains(clean))
    })
}
