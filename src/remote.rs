//! Remote subscription feeds.
//!
//! This module provides:
//! - The [`FeedClient`] seam and an HTTP implementation that never serves
//!   cached responses
//! - Feed parsing: a JSON array of `{url, info?, reason?}` items
//! - [`SubscriptionFetcher`], which refreshes every source and replaces each
//!   source's entries wholesale on success
//!
//! A source that fails keeps its previous entries. After
//! `max_failures` consecutive failures of a subscribed source its entries are
//! expired, while the subscription itself stays registered. Failures of
//! unsubscribed sources are not recorded.

use ahash::AHashSet;
use serde_json::Value;
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};
use crate::metadata::{SourceMap, SourceMetadata};
use crate::pattern::{pattern_from_item, PatternEntry, RemotePatternEntry};

/// Raw HTTP answer from a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedResponse {
    pub status: u16,
    pub body: String,
}

impl FeedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches feed bodies.
pub trait FeedClient: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FeedResponse>;
}

/// Blocking HTTP feed client.
pub struct HttpFeedClient {
    client: reqwest::blocking::Client,
}

impl HttpFeedClient {
    /// Create a client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl FeedClient for HttpFeedClient {
    fn fetch(&self, url: &str) -> Result<FeedResponse> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-store, no-cache")
            .header(reqwest::header::PRAGMA, "no-cache")
            .send()?;

        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(FeedResponse { status, body })
    }
}

/// Parse a feed body into entries tagged with `source`.
///
/// Returns `None` if the body is not a JSON array. Items without a usable
/// `url` are skipped.
pub fn parse_feed(body: &str, source: Option<&str>) -> Option<Vec<RemotePatternEntry>> {
    let body = body.trim_start_matches('\u{feff}').trim();
    let items = match serde_json::from_str::<Value>(body).ok()? {
        Value::Array(items) => items,
        _ => return None,
    };

    let entries = items
        .iter()
        .filter_map(|item| {
            let url = item.get("url").and_then(Value::as_str).unwrap_or_default();
            let pattern = pattern_from_item(url)?;
            let reason = item
                .get("info")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| item.get("reason").and_then(Value::as_str))
                .unwrap_or_default();
            Some(RemotePatternEntry::new(
                PatternEntry::new(pattern, reason),
                url,
                source.map(str::to_string),
            ))
        })
        .collect();

    Some(entries)
}

/// Sources to refresh: those referenced by stored entries, then the
/// subscribed ones, without duplicates.
pub fn sources_to_fetch(existing: &[RemotePatternEntry], subscribed: &SourceMap) -> Vec<String> {
    let mut seen = AHashSet::new();
    existing
        .iter()
        .filter_map(|e| e.source.as_deref())
        .chain(subscribed.keys().map(String::as_str))
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

/// Result of a refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    /// The complete new remote list.
    pub entries: Vec<RemotePatternEntry>,
    /// Sources fetched successfully.
    pub refreshed: Vec<String>,
    /// Sources that failed this pass.
    pub failed: Vec<String>,
    /// Sources whose entries were dropped after too many failures.
    pub expired: Vec<String>,
}

/// Refreshes subscription feeds.
pub struct SubscriptionFetcher {
    client: Box<dyn FeedClient>,
    max_failures: Option<u32>,
}

impl SubscriptionFetcher {
    pub fn new(client: Box<dyn FeedClient>) -> Self {
        Self {
            client,
            max_failures: None,
        }
    }

    /// Expire a source's entries after this many consecutive failures.
    pub fn with_max_failures(mut self, max_failures: Option<u32>) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Fetch and parse one source, dropping items whose pattern is in
    /// `local`.
    pub fn fetch_source(
        &self,
        source: &str,
        local: &AHashSet<&str>,
    ) -> Result<Vec<RemotePatternEntry>> {
        let response = self.client.fetch(source)?;
        if !response.is_success() {
            return Err(Error::Feed {
                url: source.to_string(),
                reason: format!("HTTP status {}", response.status),
            });
        }

        let entries = parse_feed(&response.body, Some(source)).ok_or_else(|| Error::Feed {
            url: source.to_string(),
            reason: "body is not a JSON array".to_string(),
        })?;

        Ok(entries
            .into_iter()
            .filter(|e| !local.contains(e.pattern()))
            .collect())
    }

    /// Refresh every source in `sources`.
    ///
    /// `metadata` is updated in place: successful sources get a new
    /// timestamp and count, failed ones a bumped failure counter.
    pub fn refresh(
        &self,
        sources: &[String],
        existing: Vec<RemotePatternEntry>,
        local: &[PatternEntry],
        metadata: &mut SourceMap,
        now: SystemTime,
    ) -> RefreshOutcome {
        let local_patterns: AHashSet<&str> = local.iter().map(|e| e.pattern.as_str()).collect();
        let mut outcome = RefreshOutcome {
            entries: existing,
            ..Default::default()
        };

        for source in sources {
            match self.fetch_source(source, &local_patterns) {
                Ok(parsed) => {
                    log::info!("Fetched {} entries from {}", parsed.len(), source);
                    metadata.insert(source.clone(), SourceMetadata::fetched(now, parsed.len()));
                    outcome
                        .entries
                        .retain(|e| e.source.as_deref() != Some(source.as_str()));
                    outcome.entries.extend(parsed);
                    outcome.refreshed.push(source.clone());
                }
                Err(e) => {
                    log::warn!("Skipping remote source {}: {}", source, e);
                    outcome.failed.push(source.clone());

                    // Sources only referenced by stored entries are not
                    // subscriptions; they keep their entries and no record.
                    let Some(failures) = metadata.get_mut(source).map(|m| m.record_failure())
                    else {
                        continue;
                    };

                    if self.max_failures.is_some_and(|max| failures >= max) {
                        log::warn!(
                            "Expiring entries from {} after {} consecutive failures",
                            source,
                            failures
                        );
                        outcome
                            .entries
                            .retain(|e| e.source.as_deref() != Some(source.as_str()));
                        if let Some(meta) = metadata.get_mut(source) {
                            meta.count = 0;
                        }
                        outcome.expired.push(source.clone());
                    }
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;

    /// Serves canned responses; unknown URLs fail at the transport level.
    struct StubClient {
        responses: AHashMap<String, FeedResponse>,
    }

    impl StubClient {
        fn new(responses: &[(&str, u16, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(url, status, body)| {
                        (
                            url.to_string(),
                            FeedResponse {
                                status: *status,
                                body: body.to_string(),
                            },
                        )
                    })
                    .collect(),
            }
        }
    }

    impl FeedClient for StubClient {
        fn fetch(&self, url: &str) -> Result<FeedResponse> {
            self.responses.get(url).cloned().ok_or_else(|| Error::Feed {
                url: url.to_string(),
                reason: "unreachable".to_string(),
            })
        }
    }

    const SRC: &str = "https://feeds.test/list.json";

    fn remote(pattern: &str, source: Option<&str>) -> RemotePatternEntry {
        RemotePatternEntry::new(
            PatternEntry::new(pattern, ""),
            "",
            source.map(str::to_string),
        )
    }

    #[test]
    fn test_parse_feed() {
        let body = r#"[
            {"url": "https://ads.test/banner", "info": "ads"},
            {"url": "tracker.test/pixel", "reason": "tracking"},
            {"url": ""},
            {"info": "no url"},
            "not an object"
        ]"#;
        let entries = parse_feed(body, Some(SRC)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pattern(), "||ads.test/banner^");
        assert_eq!(entries[0].entry.reason, "ads");
        assert_eq!(entries[0].url, "https://ads.test/banner");
        assert_eq!(entries[1].pattern(), "||tracker.test/pixel^");
        assert_eq!(entries[1].entry.reason, "tracking");
        assert_eq!(entries[1].source.as_deref(), Some(SRC));
    }

    #[test]
    fn test_parse_feed_rejects_non_arrays() {
        assert!(parse_feed(r#"{"url": "a.com"}"#, None).is_none());
        assert!(parse_feed("not json", None).is_none());
        assert!(parse_feed("\u{feff} [] ", None).unwrap().is_empty());
    }

    #[test]
    fn test_sources_to_fetch() {
        let existing = vec![
            remote("||a^", Some("s1")),
            remote("||b^", None),
            remote("||c^", Some("s1")),
        ];
        let mut subscribed = SourceMap::new();
        subscribed.insert("s1".to_string(), SourceMetadata::pending());
        subscribed.insert("s2".to_string(), SourceMetadata::pending());

        assert_eq!(sources_to_fetch(&existing, &subscribed), vec!["s1", "s2"]);
    }

    #[test]
    fn test_refresh_replaces_source_entries() {
        let client = StubClient::new(&[(SRC, 200, r#"[{"url": "new.test/x"}, {"url": "local.test"}]"#)]);
        let fetcher = SubscriptionFetcher::new(Box::new(client));

        let existing = vec![remote("||old.test^", Some(SRC)), remote("||manual.test^", None)];
        let local = vec![PatternEntry::new("||local.test^", "")];
        let mut meta = SourceMap::new();
        let now = SystemTime::now();

        let outcome = fetcher.refresh(&[SRC.to_string()], existing, &local, &mut meta, now);

        let patterns: Vec<&str> = outcome.entries.iter().map(|e| e.pattern()).collect();
        assert_eq!(patterns, vec!["||manual.test^", "||new.test/x^"]);
        assert_eq!(meta[SRC], SourceMetadata::fetched(now, 1));
        assert_eq!(outcome.refreshed, vec![SRC.to_string()]);
    }

    #[test]
    fn test_failed_source_keeps_entries() {
        let client = StubClient::new(&[(SRC, 500, "oops"), ("https://bad.test", 200, "{}")]);
        let fetcher = SubscriptionFetcher::new(Box::new(client)).with_max_failures(Some(3));

        let existing = vec![remote("||kept.test^", Some(SRC)), remote("||bad.test^", Some("https://bad.test"))];
        let mut meta = SourceMap::new();
        meta.insert(SRC.to_string(), SourceMetadata::default());
        let sources = vec![SRC.to_string(), "https://bad.test".to_string()];

        let outcome = fetcher.refresh(&sources, existing.clone(), &[], &mut meta, SystemTime::now());
        assert_eq!(outcome.entries, existing);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(meta[SRC].failures, 1);
        assert!(outcome.expired.is_empty());
    }

    #[test]
    fn test_failed_unsubscribed_source_adds_no_metadata() {
        const ONESHOT: &str = "https://oneshot.test/l.json";
        let fetcher = SubscriptionFetcher::new(Box::new(StubClient::new(&[(ONESHOT, 503, "")])))
            .with_max_failures(Some(1));
        let existing = vec![remote("||once.test^", Some(ONESHOT))];
        let mut meta = SourceMap::new();

        for _ in 0..3 {
            let outcome = fetcher.refresh(
                &[ONESHOT.to_string()],
                existing.clone(),
                &[],
                &mut meta,
                SystemTime::now(),
            );
            assert_eq!(outcome.failed, vec![ONESHOT.to_string()]);
            assert!(outcome.expired.is_empty());
            assert_eq!(outcome.entries, existing);
        }
        assert!(meta.is_empty());
    }

    #[test]
    fn test_source_expires_after_max_failures() {
        let fetcher =
            SubscriptionFetcher::new(Box::new(StubClient::new(&[]))).with_max_failures(Some(2));
        let mut meta = SourceMap::new();
        meta.insert(SRC.to_string(), SourceMetadata::fetched(SystemTime::now(), 1));
        let mut entries = vec![remote("||gone.test^", Some(SRC))];

        for round in 1..=2 {
            let outcome =
                fetcher.refresh(&[SRC.to_string()], entries, &[], &mut meta, SystemTime::now());
            entries = outcome.entries;
            if round == 1 {
                assert_eq!(entries.len(), 1);
            } else {
                assert!(entries.is_empty());
                assert_eq!(outcome.expired, vec![SRC.to_string()]);
            }
        }

        // Subscription is retained
        assert_eq!(meta[SRC].failures, 2);
        assert_eq!(meta[SRC].count, 0);
    }

    #[test]
    fn test_success_resets_failures() {
        let client = StubClient::new(&[(SRC, 200, "[]")]);
        let fetcher = SubscriptionFetcher::new(Box::new(client));
        let mut meta = SourceMap::new();
        meta.insert(
            SRC.to_string(),
            SourceMetadata {
                failures: 2,
                ..Default::default()
            },
        );

        fetcher.refresh(&[SRC.to_string()], Vec::new(), &[], &mut meta, SystemTime::now());
        assert_eq!(meta[SRC].failures, 0);
    }
}
