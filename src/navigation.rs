//! Navigation events and block metadata.

use serde::{Deserialize, Serialize};

use crate::matcher::find_match;
use crate::pattern::PatternEntry;

/// Browser tab identifier.
pub type TabId = i64;

/// URL prefixes of browser-internal pages that are never inspected.
const PRIVILEGED_PREFIXES: &[&str] = &[
    "chrome://",
    "edge://",
    "about:",
    "extension://",
    "chrome-extension://",
];

/// A tab navigated, or is about to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub tab_id: TabId,
    pub url: String,
    /// 0 for the top-level frame.
    #[serde(default)]
    pub frame_id: i64,
}

/// Why a tab was sent to the block page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BlockedInfo {
    pub original_url: String,
    pub pattern: String,
    pub reason: String,
}

/// Whether `url` belongs to the browser or an extension.
pub fn is_privileged_url(url: &str) -> bool {
    PRIVILEGED_PREFIXES.iter().any(|p| url.starts_with(p))
}

impl NavigationEvent {
    pub fn new(tab_id: TabId, url: impl Into<String>, frame_id: i64) -> Self {
        Self {
            tab_id,
            url: url.into(),
            frame_id,
        }
    }

    /// Whether the event should be looked at at all: top-level frame, a real
    /// tab, and a non-empty, non-privileged URL.
    pub fn is_observable(&self) -> bool {
        self.frame_id == 0 && self.tab_id >= 0 && !self.url.is_empty() && !is_privileged_url(&self.url)
    }

    /// Block metadata for this navigation, if an entry matches.
    pub fn blocked_info(&self, entries: &[PatternEntry]) -> Option<BlockedInfo> {
        if !self.is_observable() {
            return None;
        }

        find_match(&self.url, entries).map(|entry| BlockedInfo {
            original_url: self.url.clone(),
            pattern: entry.pattern.clone(),
            reason: entry.reason.clone(),
        })
    }
}
