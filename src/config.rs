//! Blocker configuration.

use std::time::Duration;

use crate::compiler::{RuleAction, RuleCompiler};
use crate::metadata::DEFAULT_FETCH_INTERVAL_MINUTES;
use crate::pattern::PatternEntry;

/// Configuration for a [`crate::Blocker`].
#[derive(Debug, Clone)]
pub struct BlockerConfig {
    /// Page matching navigations are redirected to
    pub block_page_url: String,
    /// Priority given to every compiled rule
    pub rule_priority: u32,
    /// How long a temporary allow suspends blocking
    pub temp_allow_window: Duration,
    /// Fetch interval used when none is stored
    pub default_fetch_interval_minutes: u64,
    /// Consecutive failures after which a source's entries expire
    pub max_source_failures: Option<u32>,
    /// HTTP timeout for subscription feeds
    pub fetch_timeout: Duration,
    /// Entry installed into an empty blacklist on first install
    pub seed_entry: Option<PatternEntry>,
}

impl Default for BlockerConfig {
    fn default() -> Self {
        Self {
            block_page_url: "blocked.html".to_string(),
            rule_priority: 1,
            temp_allow_window: Duration::from_secs(5),
            default_fetch_interval_minutes: DEFAULT_FETCH_INTERVAL_MINUTES,
            max_source_failures: Some(3),
            fetch_timeout: Duration::from_secs(30),
            seed_entry: Some(PatternEntry::new("||0d000721.com^", "test rule")),
        }
    }
}

impl BlockerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_page_url(mut self, url: impl Into<String>) -> Self {
        self.block_page_url = url.into();
        self
    }

    pub fn with_rule_priority(mut self, priority: u32) -> Self {
        self.rule_priority = priority;
        self
    }

    pub fn with_temp_allow_window(mut self, window: Duration) -> Self {
        self.temp_allow_window = window;
        self
    }

    /// Set the fallback fetch interval. Values below one minute are raised
    /// to one.
    pub fn with_default_fetch_interval_minutes(mut self, minutes: u64) -> Self {
        self.default_fetch_interval_minutes = minutes.max(1);
        self
    }

    pub fn with_max_source_failures(mut self, max: Option<u32>) -> Self {
        self.max_source_failures = max;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_seed_entry(mut self, entry: Option<PatternEntry>) -> Self {
        self.seed_entry = entry;
        self
    }

    /// The rule compiler for this configuration.
    pub fn compiler(&self) -> RuleCompiler {
        RuleCompiler::new(
            RuleAction::redirect_to(self.block_page_url.clone()),
            self.rule_priority,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BlockerConfig::default();
        assert_eq!(config.block_page_url, "blocked.html");
        assert_eq!(config.rule_priority, 1);
        assert_eq!(config.temp_allow_window, Duration::from_secs(5));
        assert_eq!(config.default_fetch_interval_minutes, 720);
        assert_eq!(config.max_source_failures, Some(3));
        assert_eq!(
            config.seed_entry,
            Some(PatternEntry::new("||0d000721.com^", "test rule"))
        );
    }

    #[test]
    fn test_builders() {
        let config = BlockerConfig::new()
            .with_block_page_url("/blocked")
            .with_rule_priority(5)
            .with_default_fetch_interval_minutes(0)
            .with_max_source_failures(None)
            .with_seed_entry(None);

        assert_eq!(config.block_page_url, "/blocked");
        assert_eq!(config.default_fetch_interval_minutes, 1);
        assert!(config.max_source_failures.is_none());
        assert!(config.seed_entry.is_none());

        let rule = config
            .compiler()
            .compile(&PatternEntry::new("||a.com^", ""), 9)
            .unwrap();
        assert_eq!(rule.priority, 5);
        assert_eq!(rule.action, RuleAction::redirect_to("/blocked"));
    }
}
