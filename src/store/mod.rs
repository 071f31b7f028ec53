//! Persisted key-value state.
//!
//! The [`Store`] trait mirrors the extension storage area: JSON values under
//! string keys, with batched writes. [`StoreExt`] layers typed accessors for
//! every key on top. Legacy entry shapes are decoded here and nowhere else.

mod file;
mod memory;

pub use file::JsonFileStore;
pub(crate) use file::write_atomic;
pub use memory::MemoryStore;

use serde_json::Value;

use crate::compiler::PatternIdMap;
use crate::error::Result;
use crate::metadata::{FetchSettings, SourceMap};
use crate::navigation::{BlockedInfo, TabId};
use crate::pattern::{PatternEntry, RemotePatternEntry};

pub const BLACKLIST_KEY: &str = "blacklist";
pub const REMOTE_BLACKLIST_KEY: &str = "remote_blacklist";
pub const PATTERN_ID_MAP_KEY: &str = "pattern_id_map";
pub const REMOTE_SOURCES_KEY: &str = "remote_sources";
pub const REMOTE_FETCH_ENABLED_KEY: &str = "remote_fetch_enabled";
pub const REMOTE_FETCH_INTERVAL_KEY: &str = "remote_fetch_interval_minutes";

/// Key holding the block metadata for a tab.
pub fn blocked_info_key(tab_id: TabId) -> String {
    format!("blocked_info_{}", tab_id)
}

/// Key-value storage that survives restarts.
pub trait Store: Send + Sync {
    /// Read one key.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write several keys in one batch.
    fn set(&self, items: Vec<(String, Value)>) -> Result<()>;

    /// Delete one key. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Typed accessors for the persisted state.
pub trait StoreExt: Store {
    /// Raw stored blacklist items, legacy shapes included.
    fn blacklist_values(&self) -> Result<Vec<Value>> {
        Ok(array_or_empty(self.get(BLACKLIST_KEY)?, BLACKLIST_KEY))
    }

    fn blacklist(&self) -> Result<Vec<PatternEntry>> {
        Ok(self
            .blacklist_values()?
            .iter()
            .map(PatternEntry::decode)
            .collect())
    }

    fn save_blacklist(&self, entries: &[PatternEntry]) -> Result<()> {
        self.set(vec![(
            BLACKLIST_KEY.to_string(),
            serde_json::to_value(entries)?,
        )])
    }

    fn remote_blacklist(&self) -> Result<Vec<RemotePatternEntry>> {
        Ok(array_or_empty(self.get(REMOTE_BLACKLIST_KEY)?, REMOTE_BLACKLIST_KEY)
            .iter()
            .map(RemotePatternEntry::decode)
            .collect())
    }

    fn save_remote_blacklist(&self, entries: &[RemotePatternEntry]) -> Result<()> {
        self.set(vec![(
            REMOTE_BLACKLIST_KEY.to_string(),
            serde_json::to_value(entries)?,
        )])
    }

    /// Local entries followed by remote entries, the order matching uses.
    fn all_entries(&self) -> Result<Vec<PatternEntry>> {
        let mut entries = self.blacklist()?;
        entries.extend(self.remote_blacklist()?.into_iter().map(|r| r.entry));
        Ok(entries)
    }

    fn pattern_id_map(&self) -> Result<PatternIdMap> {
        match self.get(PATTERN_ID_MAP_KEY)? {
            Some(value) => Ok(PatternIdMap::decode(&value)),
            None => Ok(PatternIdMap::new()),
        }
    }

    fn save_pattern_id_map(&self, map: &PatternIdMap) -> Result<()> {
        self.set(vec![(
            PATTERN_ID_MAP_KEY.to_string(),
            serde_json::to_value(map)?,
        )])
    }

    fn remote_sources(&self) -> Result<SourceMap> {
        match self.get(REMOTE_SOURCES_KEY)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(SourceMap::new()),
        }
    }

    fn save_remote_sources(&self, sources: &SourceMap) -> Result<()> {
        self.set(vec![(
            REMOTE_SOURCES_KEY.to_string(),
            serde_json::to_value(sources)?,
        )])
    }

    /// Write remote entries and source metadata together.
    fn save_remote_state(&self, entries: &[RemotePatternEntry], sources: &SourceMap) -> Result<()> {
        self.set(vec![
            (REMOTE_BLACKLIST_KEY.to_string(), serde_json::to_value(entries)?),
            (REMOTE_SOURCES_KEY.to_string(), serde_json::to_value(sources)?),
        ])
    }

    fn fetch_settings(&self) -> Result<FetchSettings> {
        self.fetch_settings_or(FetchSettings::default().interval_minutes)
    }

    /// Fetch settings, using `default_interval` when no valid interval is
    /// stored.
    fn fetch_settings_or(&self, default_interval: u64) -> Result<FetchSettings> {
        let enabled = self
            .get(REMOTE_FETCH_ENABLED_KEY)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let interval_minutes = self
            .get(REMOTE_FETCH_INTERVAL_KEY)?
            .and_then(|v| v.as_f64())
            .filter(|m| m.is_finite() && *m > 0.0)
            .map(|m| (m.ceil() as u64).max(1))
            .unwrap_or(default_interval);
        Ok(FetchSettings {
            enabled,
            interval_minutes,
        })
    }

    fn save_fetch_settings(&self, settings: FetchSettings) -> Result<()> {
        self.set(vec![
            (REMOTE_FETCH_ENABLED_KEY.to_string(), Value::Bool(settings.enabled)),
            (
                REMOTE_FETCH_INTERVAL_KEY.to_string(),
                Value::from(settings.interval_minutes),
            ),
        ])
    }

    fn blocked_info(&self, tab_id: TabId) -> Result<Option<BlockedInfo>> {
        match self.get(&blocked_info_key(tab_id))? {
            Some(value) => Ok(serde_json::from_value(value).ok()),
            None => Ok(None),
        }
    }

    fn save_blocked_info(&self, tab_id: TabId, info: &BlockedInfo) -> Result<()> {
        self.set(vec![(blocked_info_key(tab_id), serde_json::to_value(info)?)])
    }

    /// Read and delete the block metadata for a tab.
    fn take_blocked_info(&self, tab_id: TabId) -> Result<Option<BlockedInfo>> {
        let info = self.blocked_info(tab_id)?;
        self.remove(&blocked_info_key(tab_id))?;
        Ok(info)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

fn array_or_empty(value: Option<Value>, key: &str) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            log::warn!("Ignoring non-array value under {:?}: {}", key, other);
            Vec::new()
        }
    }
}
