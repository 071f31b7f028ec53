//! Stable rule ID allocation.
//!
//! Every pattern gets a positive ID derived from a hash of its text. The
//! mapping is persisted and never shrinks, so a pattern that is deleted and
//! later re-added gets its old ID back.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Largest rule ID handed out. IDs live in `1..=MAX_RULE_ID`.
pub const MAX_RULE_ID: u32 = 999_999_999;

/// Hash a pattern into the ID range.
///
/// Accumulates `hash * 31 + unit` over the UTF-16 code units with 32-bit
/// signed wrap-around, then folds the absolute value into `1..=MAX_RULE_ID`.
pub fn hash_pattern(pattern: &str) -> u32 {
    let hash = pattern
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));
    let folded = i64::from(hash).abs() % i64::from(MAX_RULE_ID) + 1;
    folded as u32
}

/// Next ID in probe order, wrapping from `MAX_RULE_ID` back to 1.
fn next_id(id: u32) -> u32 {
    id % MAX_RULE_ID + 1
}

/// Persistent pattern → ID mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternIdMap {
    ids: BTreeMap<String, u32>,
}

impl PatternIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pattern: &str) -> Option<u32> {
        self.ids.get(pattern).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All IDs ever handed out.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.values().copied()
    }

    /// Decode a persisted map, dropping entries that cannot be used.
    ///
    /// Values that are not integers in `1..=MAX_RULE_ID`, and IDs already
    /// claimed by an earlier pattern in key order, are discarded so those
    /// patterns get a fresh ID on the next pass. A non-object decodes empty.
    pub fn decode(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            log::warn!("Ignoring malformed pattern ID map: {}", value);
            return Self::new();
        };

        let mut ids = BTreeMap::new();
        let mut claimed = AHashSet::new();
        let mut sorted: Vec<(&String, &Value)> = object.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        for (pattern, raw) in sorted {
            let id = raw
                .as_u64()
                .filter(|id| (1..=u64::from(MAX_RULE_ID)).contains(id))
                .map(|id| id as u32);
            match id {
                Some(id) if claimed.insert(id) => {
                    ids.insert(pattern.clone(), id);
                }
                Some(id) => {
                    log::warn!("Dropping duplicate rule ID {} for pattern {:?}", id, pattern);
                }
                None => {
                    log::warn!("Dropping invalid rule ID {} for pattern {:?}", raw, pattern);
                }
            }
        }

        Self { ids }
    }

    /// Return the ID for `pattern`, allocating one if needed.
    ///
    /// A new ID starts at the pattern's hash and probes forward past every
    /// ID in `used`. The chosen ID is recorded here and added to `used`.
    pub fn allocate(&mut self, pattern: &str, used: &mut AHashSet<u32>) -> Result<u32> {
        if let Some(id) = self.get(pattern) {
            used.insert(id);
            return Ok(id);
        }

        let mut id = hash_pattern(pattern);
        let mut probes: u32 = 0;
        while used.contains(&id) {
            probes += 1;
            if probes >= MAX_RULE_ID {
                return Err(Error::IdSpaceExhausted);
            }
            id = next_id(id);
        }

        if probes > 0 {
            log::debug!("Pattern {:?} collided, assigned ID {} after {} probes", pattern, id, probes);
        }

        self.ids.insert(pattern.to_string(), id);
        used.insert(id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_pattern_known_values() {
        assert_eq!(hash_pattern(""), 1);
        assert_eq!(hash_pattern("a"), 98);
        assert_eq!(hash_pattern("ab"), 97 * 31 + 98 + 1);
    }

    #[test]
    fn test_hash_pattern_wraps_to_range() {
        let long = "x".repeat(500);
        let id = hash_pattern(&long);
        assert!((1..=MAX_RULE_ID).contains(&id));
    }

    #[test]
    fn test_hash_pattern_uses_utf16_units() {
        // A non-BMP character is two code units
        let expected = {
            let units: Vec<u16> = "😀".encode_utf16().collect();
            let h = (units[0] as i32).wrapping_mul(31).wrapping_add(units[1] as i32);
            (i64::from(h).abs() % i64::from(MAX_RULE_ID) + 1) as u32
        };
        assert_eq!(hash_pattern("😀"), expected);
    }

    #[test]
    fn test_next_id_wraps() {
        assert_eq!(next_id(1), 2);
        assert_eq!(next_id(MAX_RULE_ID), 1);
    }

    #[test]
    fn test_allocate_is_stable() {
        let mut map = PatternIdMap::new();
        let mut used = AHashSet::new();
        let first = map.allocate("||example.com^", &mut used).unwrap();

        // A fresh pass with the persisted map gives the same ID
        let mut used = AHashSet::new();
        let second = map.allocate("||example.com^", &mut used).unwrap();
        assert_eq!(first, second);
        assert!(used.contains(&first));
        assert_eq!(first, hash_pattern("||example.com^"));
    }

    #[test]
    fn test_allocate_resolves_collisions() {
        // "Aa" and "BB" have the same 31-polynomial hash
        assert_eq!(hash_pattern("Aa"), hash_pattern("BB"));

        let mut map = PatternIdMap::new();
        let mut used = AHashSet::new();
        let a = map.allocate("Aa", &mut used).unwrap();
        let b = map.allocate("BB", &mut used).unwrap();
        assert_ne!(a, b);
        assert_eq!(b, next_id(a));
        assert_eq!(map.get("Aa"), Some(a));
        assert_eq!(map.get("BB"), Some(b));
    }

    #[test]
    fn test_allocate_skips_installed_ids() {
        let mut map = PatternIdMap::new();
        let natural = hash_pattern("||taken.com^");
        let mut used: AHashSet<u32> = [natural, next_id(natural)].into_iter().collect();

        let id = map.allocate("||taken.com^", &mut used).unwrap();
        assert_eq!(id, next_id(next_id(natural)));
    }

    #[test]
    fn test_decode_keeps_valid_ids() {
        let map = PatternIdMap::decode(&serde_json::json!({"a": 98, "||b.com^": 7}));
        assert_eq!(map.get("a"), Some(98));
        assert_eq!(map.get("||b.com^"), Some(7));
    }

    #[test]
    fn test_decode_drops_non_integer_ids() {
        let map = PatternIdMap::decode(&serde_json::json!({
            "||stale.com^": "oops",
            "||float.com^": 1.5,
            "||neg.com^": -4,
            "||ok.com^": 10
        }));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("||ok.com^"), Some(10));
    }

    #[test]
    fn test_decode_drops_out_of_range_ids() {
        let map = PatternIdMap::decode(&serde_json::json!({
            "||zero.com^": 0,
            "||huge.com^": u64::from(MAX_RULE_ID) + 1
        }));
        assert!(map.is_empty());

        // Dropped patterns get a fresh, valid ID
        let mut map = map;
        let mut used = AHashSet::new();
        let id = map.allocate("||zero.com^", &mut used).unwrap();
        assert_eq!(id, hash_pattern("||zero.com^"));
        assert_ne!(id, 0);
    }

    #[test]
    fn test_decode_drops_duplicate_ids() {
        let map = PatternIdMap::decode(&serde_json::json!({"||a.com^": 5, "||b.com^": 5}));
        assert_eq!(map.get("||a.com^"), Some(5));
        assert_eq!(map.get("||b.com^"), None);
    }

    #[test]
    fn test_decode_non_object_is_empty() {
        assert!(PatternIdMap::decode(&serde_json::json!([1, 2])).is_empty());
    }

    #[test]
    fn test_id_map_serializes_as_object() {
        let mut map = PatternIdMap::new();
        let mut used = AHashSet::new();
        map.allocate("a", &mut used).unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"a":98}"#);

        let back: PatternIdMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
