//! Subscription bookkeeping: per-source metadata and the fetch schedule.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Default interval between periodic fetches (12 hours).
pub const DEFAULT_FETCH_INTERVAL_MINUTES: u64 = 720;

/// Metadata for one subscription source.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Time of the last successful fetch, stored as epoch milliseconds.
    #[serde(with = "epoch_millis_serde", default)]
    pub last_updated: Option<SystemTime>,
    /// Number of entries the last successful fetch produced.
    #[serde(default)]
    pub count: usize,
    /// Consecutive failed fetches since the last success.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failures: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

mod epoch_millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(t) => {
                let duration = t.duration_since(UNIX_EPOCH).unwrap_or_default();
                Some(duration.as_millis() as u64).serialize(serializer)
            }
            None => None::<u64>.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(|ms| UNIX_EPOCH + Duration::from_millis(ms)))
    }
}

impl SourceMetadata {
    /// Metadata for a freshly subscribed, never fetched source.
    pub fn pending() -> Self {
        Self::default()
    }

    /// Metadata after a successful fetch.
    pub fn fetched(at: SystemTime, count: usize) -> Self {
        Self {
            last_updated: Some(at),
            count,
            failures: 0,
        }
    }

    /// Record one more failed fetch.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }
}

/// Persisted `sourceUrl -> metadata` map.
pub type SourceMap = BTreeMap<String, SourceMetadata>;

/// Persisted periodic-fetch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: DEFAULT_FETCH_INTERVAL_MINUTES,
        }
    }
}

impl FetchSettings {
    /// The effective period. An unset (zero) interval falls back to the
    /// default.
    pub fn period(&self) -> Duration {
        let minutes = if self.interval_minutes == 0 {
            DEFAULT_FETCH_INTERVAL_MINUTES
        } else {
            self.interval_minutes
        };
        Duration::from_secs(minutes * 60)
    }
}
