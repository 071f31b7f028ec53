//! Local blacklist import and export.
//!
//! The exchange format is a JSON array of `{url, info}` objects where `url`
//! is the pattern without its `||`/`^` anchors. Import also accepts bare
//! strings (taken as raw patterns) and `reason` in place of `info`.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pattern::{pattern_from_item, strip_anchors, PatternEntry};

/// One exported entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportItem {
    pub url: String,
    #[serde(default)]
    pub info: String,
}

/// Convert entries to the exchange format.
pub fn export(entries: &[PatternEntry]) -> Vec<ExportItem> {
    entries
        .iter()
        .map(|e| ExportItem {
            url: strip_anchors(&e.pattern).to_string(),
            info: e.reason.clone(),
        })
        .collect()
}

/// Pretty-printed JSON export.
pub fn export_json(entries: &[PatternEntry]) -> Result<String> {
    Ok(serde_json::to_string_pretty(&export(entries))?)
}

/// Decode an import document into entries.
///
/// Fails only if the document is not a JSON array. Items that yield no
/// pattern are skipped.
pub fn parse_import(json: &str) -> Result<Vec<PatternEntry>> {
    let items = match serde_json::from_str::<Value>(json.trim_start_matches('\u{feff}'))? {
        Value::Array(items) => items,
        _ => return Err(Error::Config("import file must be a JSON array".to_string())),
    };

    Ok(items.iter().filter_map(decode_item).collect())
}

fn decode_item(item: &Value) -> Option<PatternEntry> {
    if item.is_string() {
        let entry = PatternEntry::decode(item);
        return (!entry.pattern.is_empty()).then_some(entry);
    }

    let url = item.get("url").and_then(Value::as_str).unwrap_or_default();
    let reason = item
        .get("info")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| item.get("reason").and_then(Value::as_str))
        .unwrap_or_default();
    pattern_from_item(url).map(|pattern| PatternEntry::new(pattern, reason))
}

/// Append `incoming` entries whose pattern is not already present.
///
/// Returns the number of entries added.
pub fn merge(current: &mut Vec<PatternEntry>, incoming: Vec<PatternEntry>) -> usize {
    let mut seen: AHashSet<String> = current.iter().map(|e| e.pattern.clone()).collect();
    let before = current.len();
    for entry in incoming {
        if seen.insert(entry.pattern.clone()) {
            current.push(entry);
        }
    }
    current.len() - before
}
