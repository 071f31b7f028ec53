//! Reconciliation planning.
//!
//! Compiles the desired entries, diffs them against the installed rules by
//! ID, and produces the minimal remove/add batch that makes the engine match.

use ahash::{AHashMap, AHashSet};

use super::{CompiledRule, PatternIdMap, RuleCompiler};
use crate::error::Result;
use crate::pattern::PatternEntry;

/// Outcome of a planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulePlan {
    /// Every rule the engine should end up with.
    pub desired: Vec<CompiledRule>,
    /// IDs to remove: stale rules plus rules being replaced in place.
    pub to_remove: Vec<u32>,
    /// Rules to add: new IDs plus replacements.
    pub to_add: Vec<CompiledRule>,
}

impl RulePlan {
    /// Whether applying the plan would change nothing.
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Plan the batch that turns `installed` into the rules for `entries`.
///
/// New IDs are recorded in `id_map`; the caller is expected to persist it
/// before applying the plan. A pattern listed more than once is compiled
/// only for its first occurrence.
pub fn plan(
    entries: &[PatternEntry],
    id_map: &mut PatternIdMap,
    installed: &[CompiledRule],
    compiler: &RuleCompiler,
) -> Result<RulePlan> {
    let mut used: AHashSet<u32> = installed.iter().map(|r| r.id).collect();
    used.extend(id_map.ids());

    let mut seen: AHashSet<&str> = AHashSet::new();
    let mut desired = Vec::with_capacity(entries.len());

    for entry in entries {
        if entry.pattern.is_empty() || !seen.insert(entry.pattern.as_str()) {
            continue;
        }

        let id = id_map.allocate(&entry.pattern, &mut used)?;
        if let Some(rule) = compiler.compile(entry, id) {
            desired.push(rule);
        }
    }

    let installed_by_id: AHashMap<u32, &CompiledRule> =
        installed.iter().map(|r| (r.id, r)).collect();
    let desired_ids: AHashSet<u32> = desired.iter().map(|r| r.id).collect();

    let mut to_remove = Vec::new();
    let mut to_add = Vec::new();

    for rule in &desired {
        match installed_by_id.get(&rule.id) {
            None => to_add.push(rule.clone()),
            Some(existing) if !existing.same_effect(rule) => {
                to_remove.push(rule.id);
                to_add.push(rule.clone());
            }
            Some(_) => {}
        }
    }

    // Stale sweep, in installed order so the batch is deterministic
    let mut swept: AHashSet<u32> = AHashSet::new();
    for rule in installed {
        if !desired_ids.contains(&rule.id) && swept.insert(rule.id) {
            to_remove.push(rule.id);
        }
    }

    Ok(RulePlan {
        desired,
        to_remove,
        to_add,
    })
}
