//! End-to-end tests against file-backed state.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tempfile::tempdir;
use url_blocker::compiler::id::MAX_RULE_ID;
use url_blocker::compiler::{hash_pattern, plan};
use url_blocker::remote::sources_to_fetch;
use url_blocker::{
    channel, find_match, Blocker, BlockerConfig, FeedClient, FeedResponse, JsonFileStore,
    LocalRuleEngine, NavigationEvent, PatternEntry, PatternIdMap, Request, Response, RuleEngine,
    StoreExt, SubscriptionFetcher,
};

struct StaticFeed(&'static str, u16, &'static str);

impl FeedClient for StaticFeed {
    fn fetch(&self, url: &str) -> url_blocker::Result<FeedResponse> {
        if url == self.0 {
            Ok(FeedResponse {
                status: self.1,
                body: self.2.to_string(),
            })
        } else {
            Err(url_blocker::Error::Feed {
                url: url.to_string(),
                reason: "unreachable".to_string(),
            })
        }
    }
}

const FEED: &str = "https://lists.test/feed.json";

fn open_blocker(dir: &std::path::Path, feed: StaticFeed) -> (Blocker, Arc<LocalRuleEngine>) {
    let store = Arc::new(JsonFileStore::open(dir.join("state.json")).unwrap());
    let engine = Arc::new(LocalRuleEngine::open(dir.join("rules.json")).unwrap());
    let blocker = Blocker::new(
        store,
        engine.clone(),
        SubscriptionFetcher::new(Box::new(feed)),
        BlockerConfig::default(),
    );
    (blocker, engine)
}

#[test]
fn test_ids_stable_across_restarts() {
    let dir = tempdir().unwrap();

    let first_ids = {
        let (blocker, engine) = open_blocker(dir.path(), StaticFeed(FEED, 404, ""));
        blocker.install(Instant::now()).unwrap();
        blocker.add_rule("https://evil.com/ads", "ads").unwrap();
        blocker.add_rule("https://tracker.test/", "").unwrap();
        let mut ids: Vec<u32> = engine.installed_rules().unwrap().iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids
    };

    let (blocker, engine) = open_blocker(dir.path(), StaticFeed(FEED, 404, ""));
    assert_eq!(
        blocker.start(Instant::now()).unwrap(),
        url_blocker::ReconcileOutcome::Unchanged { total: 3 }
    );
    let mut ids: Vec<u32> = engine.installed_rules().unwrap().iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, first_ids);
}

#[test]
fn test_colliding_patterns_get_distinct_ids() {
    // "Aa" and "BB" share a hash
    assert_eq!(hash_pattern("Aa"), hash_pattern("BB"));

    let entries = vec![PatternEntry::new("Aa", ""), PatternEntry::new("BB", "")];
    let mut map = PatternIdMap::new();
    let compiler = BlockerConfig::default().compiler();
    let plan = plan(&entries, &mut map, &[], &compiler).unwrap();

    let ids: Vec<u32> = plan.desired.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(ids.iter().all(|id| (1..=MAX_RULE_ID).contains(id)));

    let engine = LocalRuleEngine::new();
    engine.update_rules(&plan.to_remove, &plan.to_add).unwrap();

    // Same map, same IDs
    let again = url_blocker::compiler::plan(&entries, &mut map, &engine.installed_rules().unwrap(), &compiler).unwrap();
    assert!(again.is_empty());
}

#[test]
fn test_host_path_rule_in_engine() {
    let dir = tempdir().unwrap();
    let (blocker, engine) = open_blocker(dir.path(), StaticFeed(FEED, 404, ""));
    blocker.add_rule("https://example.com/ads", "").unwrap();

    let rule = engine
        .evaluate("https://sub.example.com/ads/banner.js")
        .unwrap();
    assert_eq!(
        serde_json::to_value(&rule.action).unwrap(),
        serde_json::json!({"type": "redirect", "redirect": {"url": "blocked.html"}})
    );
    assert!(engine.evaluate("https://notexample.com/ads").is_none());
    assert!(engine.evaluate("https://example.com/other").is_none());
}

#[test]
fn test_first_match_shadows() {
    let entries = vec![
        PatternEntry::new("||evil.com^", "x"),
        PatternEntry::new("evil.com/safe", "y"),
    ];
    assert_eq!(find_match("https://evil.com/safe", &entries).unwrap().reason, "x");
}

#[test]
fn test_remote_500_keeps_entries() {
    let dir = tempdir().unwrap();

    {
        let (blocker, _engine) = open_blocker(
            dir.path(),
            StaticFeed(FEED, 200, r#"[{"url": "https://ads.test/banner", "info": "ads"}]"#),
        );
        blocker.subscribe(FEED).unwrap();
        blocker.fetch_remote(SystemTime::now()).unwrap();
        assert_eq!(blocker.remote_entries().unwrap().len(), 1);
    }

    let (blocker, engine) = open_blocker(dir.path(), StaticFeed(FEED, 500, "down"));
    let outcome = blocker.fetch_remote(SystemTime::now()).unwrap();
    assert_eq!(outcome.failed, vec![FEED.to_string()]);
    assert_eq!(blocker.remote_entries().unwrap()[0].pattern(), "||ads.test/banner^");
    assert_eq!(engine.len(), 1);

    let sources = blocker.subscriptions().unwrap();
    assert_eq!(sources[0].1.failures, 1);
    assert_eq!(sources[0].1.count, 1);
}

#[test]
fn test_dead_source_expires_after_three_failures() {
    let dir = tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path().join("state.json")).unwrap());
    store
        .save_remote_blacklist(&[url_blocker::RemotePatternEntry::new(
            PatternEntry::new("||stale.test^", ""),
            "stale.test",
            Some(FEED.to_string()),
        )])
        .unwrap();
    assert_eq!(
        sources_to_fetch(&store.remote_blacklist().unwrap(), &store.remote_sources().unwrap()),
        vec![FEED.to_string()]
    );

    let engine = Arc::new(LocalRuleEngine::new());
    let blocker = Blocker::new(
        store.clone(),
        engine.clone(),
        SubscriptionFetcher::new(Box::new(StaticFeed(FEED, 503, ""))),
        BlockerConfig::default(),
    );
    blocker.subscribe(FEED).unwrap();

    blocker.fetch_remote(SystemTime::now()).unwrap();
    blocker.fetch_remote(SystemTime::now()).unwrap();
    assert_eq!(engine.len(), 1);

    let outcome = blocker.fetch_remote(SystemTime::now()).unwrap();
    assert_eq!(outcome.expired, vec![FEED.to_string()]);
    assert!(store.remote_blacklist().unwrap().is_empty());
    assert!(engine.is_empty());
    assert!(store.remote_sources().unwrap().contains_key(FEED));
}

#[test]
fn test_export_import_round_trip() {
    let dir = tempdir().unwrap();
    let (source, _) = open_blocker(&dir.path().join("a"), StaticFeed(FEED, 404, ""));
    source.add_rule("https://evil.com/", "x").unwrap();
    source.add_rule("https://cdn.test/js/track.js", "tracking").unwrap();
    source.add_rule("https://plain.test/", "").unwrap();
    let exported = source.export_local().unwrap();

    let (target, engine) = open_blocker(&dir.path().join("b"), StaticFeed(FEED, 404, ""));
    assert_eq!(target.import_local(&exported).unwrap(), 3);

    let mut a = source.local_entries().unwrap();
    let mut b = target.local_entries().unwrap();
    a.sort_by(|x, y| x.pattern.cmp(&y.pattern));
    b.sort_by(|x, y| x.pattern.cmp(&y.pattern));
    assert_eq!(a, b);
    assert_eq!(engine.len(), 3);
}

#[test]
fn test_blocked_page_flow_over_channel() {
    let dir = tempdir().unwrap();
    let (blocker, engine) = open_blocker(dir.path(), StaticFeed(FEED, 404, ""));
    blocker.add_rule("https://evil.com/", "malware").unwrap();
    let blocker = Arc::new(blocker);

    blocker
        .handle_navigation(&NavigationEvent::new(12, "https://evil.com/landing", 0))
        .unwrap();

    let (sender, receiver) = channel();
    let worker = {
        let blocker = Arc::clone(&blocker);
        thread::spawn(move || blocker.serve(&receiver, Duration::from_millis(10)))
    };

    let timeout = Duration::from_secs(10);
    match sender
        .request(Request::GetBlockedInfo { tab_id: None }, timeout)
        .unwrap()
    {
        Response::BlockedInfo { info: Some(info) } => {
            assert_eq!(info.original_url, "https://evil.com/landing");
            assert_eq!(info.reason, "malware");
        }
        other => panic!("unexpected response {:?}", other),
    }

    assert_eq!(
        sender
            .request(Request::TempAllow { tab_id: Some(12) }, timeout)
            .unwrap(),
        Response::TempAllow {
            success: true,
            original_url: Some("https://evil.com/landing".to_string())
        }
    );
    assert!(engine.is_empty());

    // The worker restores rules once the window has passed
    let deadline = Instant::now() + Duration::from_secs(15);
    while engine.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(engine.len(), 1);

    assert_eq!(
        sender.request(Request::Ping, timeout).unwrap(),
        Response::Pong { pong: true }
    );

    drop(sender);
    worker.join().unwrap();
}

#[test]
fn test_concurrent_refreshes_converge() {
    let dir = tempdir().unwrap();
    let (blocker, engine) = open_blocker(dir.path(), StaticFeed(FEED, 404, ""));
    for i in 0..20 {
        blocker
            .add_rule(&format!("https://site{}.test/path", i), "")
            .unwrap();
    }
    let blocker = Arc::new(blocker);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let blocker = Arc::clone(&blocker);
            thread::spawn(move || blocker.refresh_rules().unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.len(), 20);
    assert_eq!(
        blocker.refresh_rules().unwrap(),
        url_blocker::ReconcileOutcome::Unchanged { total: 20 }
    );
}
