//! url-blocker - URL blacklist blocking on top of a declarative rule engine.
//!
//! Users keep a local blacklist of adblock-style patterns (`||host/path^`)
//! and may subscribe to remote JSON feeds of more patterns. This crate
//! compiles those patterns into ID-indexed redirect rules for a browser's
//! native request filter and keeps the installed rule set in sync.
//!
//! # Features
//!
//! - **Stable rule IDs**: every pattern keeps its ID across runs, with
//!   deterministic collision probing
//! - **Host/path conditions**: `||example.com/ads^` matches any subdomain of
//!   `example.com` under `/ads`, with all metacharacters escaped
//! - **Minimal reconciliation**: only changed rules are removed or added,
//!   and repeated passes are no-ops
//! - **Serialized passes**: overlapping refresh requests coalesce into one
//!   re-run
//! - **Remote subscriptions**: per-source replacement, local precedence,
//!   failed sources keep their entries
//! - **Temporary allow**: a timed override where the last request wins
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Instant;
//! use url_blocker::{Blocker, BlockerConfig, JsonFileStore, LocalRuleEngine};
//!
//! let store = Arc::new(JsonFileStore::open("state.json")?);
//! let engine = Arc::new(LocalRuleEngine::open("rules.json")?);
//! let blocker = Blocker::with_http(store, engine.clone(), BlockerConfig::default())?;
//!
//! blocker.install(Instant::now())?;
//! blocker.add_rule("https://evil.com/ads", "ads")?;
//!
//! assert!(engine.evaluate("https://www.evil.com/ads/banner.js").is_some());
//! ```
//!
//! # Matching
//!
//! Two evaluators exist. The rule engine decides what actually gets
//! redirected. [`find_match`] is an ordered first-match lookup over the raw
//! entries, used for block metadata and URL testing; earlier entries shadow
//! later ones.

mod error;

pub mod allow;
pub mod blocker;
pub mod command;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod matcher;
pub mod metadata;
pub mod navigation;
pub mod pattern;
pub mod queue;
pub mod remote;
pub mod store;
pub mod transfer;

// Re-export core types
pub use error::{Error, Result};
pub use pattern::{display_pattern, normalize, PatternEntry, RemotePatternEntry};

// Re-export the service
pub use blocker::{Blocker, ReconcileOutcome, RuleCount};
pub use config::BlockerConfig;

// Re-export compiler types
pub use compiler::{CompiledRule, MatchCondition, PatternIdMap, RuleCompiler};

// Re-export collaborators
pub use command::{channel, CommandSender, Request, Response};
pub use engine::{LocalRuleEngine, RuleEngine};
pub use matcher::find_match;
pub use navigation::{BlockedInfo, NavigationEvent, TabId};
pub use remote::{FeedClient, FeedResponse, HttpFeedClient, SubscriptionFetcher};
pub use store::{JsonFileStore, MemoryStore, Store, StoreExt};

// Re-export metadata
pub use metadata::{FetchSettings, SourceMetadata};
