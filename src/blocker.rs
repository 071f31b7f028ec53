//! The blocker service: persisted lists, rule reconciliation, navigation
//! handling, subscriptions and the command dispatcher.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use url::Url;

use crate::allow::TempAllow;
use crate::command::{CommandReceiver, MatchedEntry, Request, Response};
use crate::compiler::{plan, CompiledRule, RuleCompiler};
use crate::config::BlockerConfig;
use crate::engine::RuleEngine;
use crate::error::{Error, Result};
use crate::matcher::find_match;
use crate::metadata::{FetchSettings, SourceMetadata};
use crate::navigation::{BlockedInfo, NavigationEvent, TabId};
use crate::pattern::{pattern_from_url, PatternEntry, RemotePatternEntry};
use crate::queue::ReconcileQueue;
use crate::remote::{sources_to_fetch, HttpFeedClient, RefreshOutcome, SubscriptionFetcher};
use crate::store::{Store, StoreExt};
use crate::transfer;

/// Result of a reconciliation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A batch was applied.
    Applied {
        added: usize,
        removed: usize,
        total: usize,
    },
    /// Installed rules already matched.
    Unchanged { total: usize },
    /// A temporary allow is in effect; rules are kept cleared.
    Suspended { removed: usize },
    /// Folded into a pass already running, which will pick it up.
    Coalesced,
}

/// Total number of blacklist entries, as shown in the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleCount {
    pub local: usize,
    pub remote: usize,
}

impl RuleCount {
    pub fn total(&self) -> usize {
        self.local + self.remote
    }
}

/// URL blocker bound to a store and a rule engine.
pub struct Blocker {
    store: Arc<dyn Store>,
    engine: Arc<dyn RuleEngine>,
    fetcher: SubscriptionFetcher,
    config: BlockerConfig,
    compiler: RuleCompiler,
    /// Local then remote entries, for navigation lookups.
    entries: ArcSwap<Vec<PatternEntry>>,
    allow: Mutex<TempAllow>,
    queue: ReconcileQueue,
    active_tab: Mutex<Option<TabId>>,
    next_fetch: Mutex<Option<Instant>>,
}

impl Blocker {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn RuleEngine>,
        fetcher: SubscriptionFetcher,
        config: BlockerConfig,
    ) -> Self {
        let fetcher = fetcher.with_max_failures(config.max_source_failures);
        Self {
            store,
            engine,
            fetcher,
            compiler: config.compiler(),
            allow: Mutex::new(TempAllow::new(config.temp_allow_window)),
            config,
            entries: ArcSwap::from_pointee(Vec::new()),
            queue: ReconcileQueue::new(),
            active_tab: Mutex::new(None),
            next_fetch: Mutex::new(None),
        }
    }

    /// Create a blocker that fetches subscriptions over HTTP.
    pub fn with_http(
        store: Arc<dyn Store>,
        engine: Arc<dyn RuleEngine>,
        config: BlockerConfig,
    ) -> Result<Self> {
        let client = HttpFeedClient::new(config.fetch_timeout)?;
        Ok(Self::new(
            store,
            engine,
            SubscriptionFetcher::new(Box::new(client)),
            config,
        ))
    }

    pub fn config(&self) -> &BlockerConfig {
        &self.config
    }

    // ---- lifecycle ----

    /// First-run setup: migrate legacy entries, seed an empty list, then
    /// start.
    pub fn install(&self, now: Instant) -> Result<ReconcileOutcome> {
        let values = self.store.blacklist_values()?;
        let mut entries: Vec<PatternEntry> = values.iter().map(PatternEntry::decode).collect();

        if values.iter().any(PatternEntry::is_legacy) {
            log::info!("Migrating {} legacy blacklist entries", values.len());
            self.store.save_blacklist(&entries)?;
        }

        if entries.is_empty() {
            if let Some(seed) = &self.config.seed_entry {
                log::info!("Seeding empty blacklist with {}", seed.pattern);
                entries.push(seed.clone());
                self.store.save_blacklist(&entries)?;
            }
        }

        self.start(now)
    }

    /// Startup: schedule periodic fetches and reconcile.
    pub fn start(&self, now: Instant) -> Result<ReconcileOutcome> {
        self.reschedule_fetch(now)?;
        self.refresh_rules()
    }

    /// Fire due timers: override restoration and periodic fetch.
    pub fn tick(&self, now: Instant, wall: SystemTime) -> Result<()> {
        let due = self.allow.lock().due(now);
        if let Some(token) = due {
            if self.allow.lock().restore(token) {
                log::info!("Temporary allow expired, restoring rules");
                self.refresh_rules()?;
            }
        }

        let fetch_due = {
            let mut next = self.next_fetch.lock();
            match *next {
                Some(at) if now >= at => {
                    let period = self.fetch_settings()?.period();
                    *next = Some(now + period);
                    true
                }
                _ => false,
            }
        };
        if fetch_due {
            self.fetch_remote(wall)?;
        }

        Ok(())
    }

    /// The next instant `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let restore = self.allow.lock().deadline();
        let fetch = *self.next_fetch.lock();
        match (restore, fetch) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ---- reconciliation ----

    /// Bring the installed rules in line with the stored lists.
    ///
    /// Passes are serialized; a request that overlaps a running pass is
    /// coalesced into one re-run. While a temporary allow is in effect the
    /// pass keeps the engine empty instead.
    pub fn refresh_rules(&self) -> Result<ReconcileOutcome> {
        match self.queue.run(|| self.reconcile_pass()) {
            Some(result) => result,
            None => Ok(ReconcileOutcome::Coalesced),
        }
    }

    fn reconcile_pass(&self) -> Result<ReconcileOutcome> {
        let entries = self.store.all_entries()?;
        self.entries.store(Arc::new(entries.clone()));

        let installed = self.engine.installed_rules()?;

        if !self.allow.lock().is_active() {
            let ids: Vec<u32> = installed.iter().map(|r| r.id).collect();
            if !ids.is_empty() {
                self.apply(&ids, &[])?;
                log::info!("Suspended {} rules for temporary allow", ids.len());
            }
            return Ok(ReconcileOutcome::Suspended { removed: ids.len() });
        }

        let mut id_map = self.store.pattern_id_map()?;
        let known = id_map.len();
        let rule_plan = plan(&entries, &mut id_map, &installed, &self.compiler)?;

        // IDs must be durable before the engine sees them
        if id_map.len() != known {
            self.store.save_pattern_id_map(&id_map)?;
        }

        let total = rule_plan.desired.len();
        if rule_plan.is_empty() {
            log::debug!("Rules up to date ({} installed)", total);
            return Ok(ReconcileOutcome::Unchanged { total });
        }

        self.apply(&rule_plan.to_remove, &rule_plan.to_add)?;
        log::info!(
            "Updated rules: +{} -{} ({} total)",
            rule_plan.to_add.len(),
            rule_plan.to_remove.len(),
            total
        );

        Ok(ReconcileOutcome::Applied {
            added: rule_plan.to_add.len(),
            removed: rule_plan.to_remove.len(),
            total,
        })
    }

    fn apply(&self, remove: &[u32], add: &[CompiledRule]) -> Result<()> {
        self.engine.update_rules(remove, add).map_err(|e| {
            log::error!("Rule engine rejected update: {}", e);
            e
        })
    }

    /// Rules currently installed in the engine.
    pub fn installed_rules(&self) -> Result<Vec<CompiledRule>> {
        self.engine.installed_rules()
    }

    // ---- navigation & temporary allow ----

    /// Record block metadata for a navigation that matches an entry.
    pub fn handle_navigation(&self, event: &NavigationEvent) -> Result<Option<BlockedInfo>> {
        if !event.is_observable() {
            return Ok(None);
        }
        *self.active_tab.lock() = Some(event.tab_id);

        let entries = self.entries.load();
        let info = event.blocked_info(&entries);
        if let Some(info) = &info {
            log::debug!("Tab {} matched {}", event.tab_id, info.pattern);
            self.store.save_blocked_info(event.tab_id, info)?;
        }
        Ok(info)
    }

    /// Block metadata for `tab`, or for the last active tab.
    pub fn blocked_info(&self, tab: Option<TabId>) -> Result<Option<BlockedInfo>> {
        match self.resolve_tab(tab) {
            Some(tab) => self.store.blocked_info(tab),
            None => Ok(None),
        }
    }

    /// Suspend every rule for the allow window and consume the tab's block
    /// metadata. Returns the originally requested URL, or `None` if no tab
    /// could be resolved.
    pub fn temp_allow(&self, tab: Option<TabId>, now: Instant) -> Result<Option<String>> {
        let Some(tab) = self.resolve_tab(tab) else {
            return Ok(None);
        };

        let info = self.store.take_blocked_info(tab)?;
        let scheduled = self.allow.lock().request(now);
        log::info!(
            "Temporarily allowing tab {} for {:?}",
            tab,
            scheduled.expires_at.saturating_duration_since(now)
        );
        self.refresh_rules()?;

        Ok(Some(info.map(|i| i.original_url).unwrap_or_default()))
    }

    /// Whether blocking rules are currently in force.
    pub fn rules_active(&self) -> bool {
        self.allow.lock().is_active()
    }

    fn resolve_tab(&self, tab: Option<TabId>) -> Option<TabId> {
        tab.or(*self.active_tab.lock())
    }

    // ---- matching ----

    /// Which entry `url` would match, with the total entry count.
    pub fn test_match(&self, url: &str) -> Result<(Option<MatchedEntry>, usize)> {
        let local = self.store.blacklist()?;
        let remote = self.store.remote_blacklist()?;

        let mut entries = local.clone();
        entries.extend(remote.iter().map(|r| r.entry.clone()));

        let matched = find_match(url, &entries).map(|hit| {
            let index = entries
                .iter()
                .position(|e| std::ptr::eq(e, hit))
                .unwrap_or_default();
            match index.checked_sub(local.len()).and_then(|i| remote.get(i)) {
                Some(r) => MatchedEntry {
                    entry: r.entry.clone(),
                    url: Some(r.url.clone()),
                    source: r.source.clone(),
                },
                None => MatchedEntry {
                    entry: hit.clone(),
                    url: None,
                    source: None,
                },
            }
        });

        Ok((matched, entries.len()))
    }

    pub fn rule_count(&self) -> Result<RuleCount> {
        Ok(RuleCount {
            local: self.store.blacklist()?.len(),
            remote: self.store.remote_blacklist()?.len(),
        })
    }

    // ---- local list ----

    pub fn local_entries(&self) -> Result<Vec<PatternEntry>> {
        self.store.blacklist()
    }

    /// Add a rule for a full URL as `||host path^`.
    pub fn add_rule(&self, url: &str, reason: &str) -> Result<PatternEntry> {
        let pattern = pattern_from_url(url.trim())?;
        let mut entries = self.store.blacklist()?;
        if entries.iter().any(|e| e.pattern == pattern) {
            return Err(Error::DuplicatePattern(pattern));
        }

        let entry = PatternEntry::new(pattern, reason.trim());
        entries.push(entry.clone());
        self.store.save_blacklist(&entries)?;
        self.refresh_rules()?;
        Ok(entry)
    }

    /// Delete a local entry. Returns whether it existed.
    pub fn remove_rule(&self, pattern: &str) -> Result<bool> {
        let mut entries = self.store.blacklist()?;
        let before = entries.len();
        entries.retain(|e| e.pattern != pattern);
        if entries.len() == before {
            return Ok(false);
        }

        self.store.save_blacklist(&entries)?;
        self.refresh_rules()?;
        Ok(true)
    }

    /// Delete every local entry. Returns how many there were.
    pub fn clear_local(&self) -> Result<usize> {
        let count = self.store.blacklist()?.len();
        self.store.save_blacklist(&[])?;
        self.refresh_rules()?;
        Ok(count)
    }

    /// Merge an import document into the local list.
    pub fn import_local(&self, json: &str) -> Result<usize> {
        let incoming = transfer::parse_import(json)?;
        let mut entries = self.store.blacklist()?;
        let added = transfer::merge(&mut entries, incoming);
        self.store.save_blacklist(&entries)?;
        self.refresh_rules()?;
        log::info!("Imported {} local entries", added);
        Ok(added)
    }

    pub fn export_local(&self) -> Result<String> {
        transfer::export_json(&self.store.blacklist()?)
    }

    // ---- remote list & subscriptions ----

    pub fn remote_entries(&self) -> Result<Vec<RemotePatternEntry>> {
        self.store.remote_blacklist()
    }

    /// Delete one remote entry. Returns whether it existed.
    pub fn delete_remote_entry(&self, pattern: &str, url: &str) -> Result<bool> {
        let mut entries = self.store.remote_blacklist()?;
        let before = entries.len();
        entries.retain(|e| !(e.pattern() == pattern && e.url == url));
        if entries.len() == before {
            return Ok(false);
        }

        self.store.save_remote_blacklist(&entries)?;
        self.refresh_rules()?;
        Ok(true)
    }

    pub fn clear_remote(&self) -> Result<usize> {
        let count = self.store.remote_blacklist()?.len();
        self.store.save_remote_blacklist(&[])?;
        self.refresh_rules()?;
        Ok(count)
    }

    pub fn subscriptions(&self) -> Result<Vec<(String, SourceMetadata)>> {
        Ok(self.store.remote_sources()?.into_iter().collect())
    }

    /// Register a subscription. It is fetched on the next refresh.
    pub fn subscribe(&self, source: &str) -> Result<()> {
        let source = validate_source(source)?;
        let mut sources = self.store.remote_sources()?;
        if sources.contains_key(&source) {
            return Err(Error::DuplicateSubscription(source));
        }

        sources.insert(source.clone(), SourceMetadata::pending());
        self.store.save_remote_sources(&sources)?;
        log::info!("Subscribed to {}", source);
        Ok(())
    }

    /// Drop a subscription and its entries. Returns how many entries went.
    pub fn unsubscribe(&self, source: &str) -> Result<usize> {
        let mut sources = self.store.remote_sources()?;
        if sources.remove(source).is_none() {
            return Err(Error::UnknownSubscription(source.to_string()));
        }

        let mut entries = self.store.remote_blacklist()?;
        let before = entries.len();
        entries.retain(|e| e.source.as_deref() != Some(source));
        let removed = before - entries.len();

        self.store.save_remote_state(&entries, &sources)?;
        self.refresh_rules()?;
        log::info!("Unsubscribed from {} ({} entries removed)", source, removed);
        Ok(removed)
    }

    /// Replace subscription `old` with `new`.
    pub fn edit_subscription(&self, old: &str, new: &str) -> Result<()> {
        let new = validate_source(new)?;
        if old == new {
            return Ok(());
        }
        if self.store.remote_sources()?.contains_key(&new) {
            return Err(Error::DuplicateSubscription(new));
        }

        self.unsubscribe(old)?;
        self.subscribe(&new)
    }

    /// Fetch one feed right away and replace its entries, without
    /// registering it as a subscription. Errors are returned, not skipped.
    pub fn import_remote(&self, source: &str) -> Result<usize> {
        let source = validate_source(source)?;
        let local = self.store.blacklist()?;
        let local_patterns = local.iter().map(|e| e.pattern.as_str()).collect();
        let fetched = self.fetcher.fetch_source(&source, &local_patterns)?;
        let count = fetched.len();

        let mut entries = self.store.remote_blacklist()?;
        entries.retain(|e| e.source.as_deref() != Some(source.as_str()));
        entries.extend(fetched);

        self.store.save_remote_blacklist(&entries)?;
        self.refresh_rules()?;
        log::info!("Imported {} remote entries from {}", count, source);
        Ok(count)
    }

    /// Refresh every subscribed or referenced source, then reconcile.
    pub fn fetch_remote(&self, now: SystemTime) -> Result<RefreshOutcome> {
        let existing = self.store.remote_blacklist()?;
        let mut sources = self.store.remote_sources()?;
        let urls = sources_to_fetch(&existing, &sources);
        if urls.is_empty() {
            log::debug!("No remote sources to fetch");
            return Ok(RefreshOutcome {
                entries: existing,
                ..Default::default()
            });
        }

        let local = self.store.blacklist()?;
        let outcome = self
            .fetcher
            .refresh(&urls, existing, &local, &mut sources, now);

        self.store.save_remote_state(&outcome.entries, &sources)?;
        log::info!(
            "Remote fetch: {} refreshed, {} failed, {} entries",
            outcome.refreshed.len(),
            outcome.failed.len(),
            outcome.entries.len()
        );
        self.refresh_rules()?;
        Ok(outcome)
    }

    // ---- fetch schedule ----

    pub fn fetch_settings(&self) -> Result<FetchSettings> {
        self.store
            .fetch_settings_or(self.config.default_fetch_interval_minutes)
    }

    /// Persist new schedule settings and reschedule.
    pub fn set_fetch_settings(&self, settings: FetchSettings, now: Instant) -> Result<()> {
        let settings = FetchSettings {
            interval_minutes: settings.interval_minutes.max(1),
            ..settings
        };
        self.store.save_fetch_settings(settings)?;
        self.reschedule_fetch(now)
    }

    fn reschedule_fetch(&self, now: Instant) -> Result<()> {
        let settings = self.fetch_settings()?;
        let next = settings.enabled.then(|| now + settings.period());
        match next {
            Some(_) => log::info!(
                "Periodic fetch every {} minutes",
                settings.period().as_secs() / 60
            ),
            None => log::debug!("Periodic fetch disabled"),
        }
        *self.next_fetch.lock() = next;
        Ok(())
    }

    /// When the next periodic fetch is due.
    pub fn next_fetch(&self) -> Option<Instant> {
        *self.next_fetch.lock()
    }

    // ---- commands ----

    /// Handle one command. Always produces a response.
    pub fn dispatch(&self, request: Request) -> Response {
        self.dispatch_at(request, Instant::now(), SystemTime::now())
    }

    pub fn dispatch_at(&self, request: Request, now: Instant, wall: SystemTime) -> Response {
        match request {
            Request::Ping => Response::Pong { pong: true },
            Request::GetBlockedInfo { tab_id } => Response::BlockedInfo {
                info: self.blocked_info(tab_id).unwrap_or_else(|e| {
                    log::warn!("getBlockedInfo failed: {}", e);
                    None
                }),
            },
            Request::TriggerFetchRemote => Response::Triggered {
                triggered: self
                    .fetch_remote(wall)
                    .map_err(|e| log::error!("Remote fetch failed: {}", e))
                    .is_ok(),
            },
            Request::RefreshRules => Response::Refreshed {
                refreshed: self
                    .refresh_rules()
                    .map_err(|e| log::error!("refreshRules failed: {}", e))
                    .is_ok(),
            },
            Request::TestMatch { url } => match self.test_match(&url) {
                Ok((matched, total_entries)) => Response::Matched {
                    matched,
                    total_entries,
                },
                Err(e) => Response::error(e.to_string()),
            },
            Request::ListDynamicRules => match self.installed_rules() {
                Ok(rules) => Response::Rules { rules },
                Err(e) => Response::error(e.to_string()),
            },
            Request::TempAllow { tab_id } => match self.temp_allow(tab_id, now) {
                Ok(Some(original_url)) => Response::TempAllow {
                    success: true,
                    original_url: Some(original_url),
                },
                Ok(None) => Response::TempAllow {
                    success: false,
                    original_url: None,
                },
                Err(e) => {
                    log::error!("tempAllow failed: {}", e);
                    Response::TempAllow {
                        success: false,
                        original_url: None,
                    }
                }
            },
        }
    }

    /// Serve commands until every sender is gone, ticking timers between
    /// requests. `poll` bounds how late a timer can fire.
    pub fn serve(&self, commands: &CommandReceiver, poll: Duration) {
        loop {
            let wait = self
                .next_deadline()
                .map(|at| at.saturating_duration_since(Instant::now()).min(poll))
                .unwrap_or(poll);

            match commands.recv_timeout(wait) {
                Ok(Some(envelope)) => {
                    let response = self.dispatch(envelope.request.clone());
                    envelope.respond(response);
                }
                Ok(None) => {}
                Err(_) => break,
            }

            if let Err(e) = self.tick(Instant::now(), SystemTime::now()) {
                log::error!("Timer tick failed: {}", e);
            }
        }
        log::debug!("Command channel closed, stopping");
    }
}

fn validate_source(source: &str) -> Result<String> {
    let source = source.trim();
    Url::parse(source).map_err(|_| Error::InvalidUrl(source.to_string()))?;
    Ok(source.to_string())
}
