//! Compilation of blacklist patterns into declarative blocking rules.
//!
//! A [`CompiledRule`] has the same JSON shape the browser's declarative
//! request engine consumes, so installed rules can be compared with freshly
//! compiled ones structurally.

pub mod condition;
pub mod id;
pub mod reconcile;

pub use condition::{compile_condition, ConditionMatcher};
pub use id::{hash_pattern, PatternIdMap, MAX_RULE_ID};
pub use reconcile::{plan, RulePlan};

use serde::{Deserialize, Serialize};

use crate::pattern::{normalize, PatternEntry};

/// Resource types a condition applies to. Only top-level navigations are
/// ever targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
}

/// The URL test of a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlFilter {
    /// Plain substring of the full URL.
    #[serde(rename = "urlFilter")]
    Substring(String),
    /// Regular expression over the full URL.
    #[serde(rename = "regexFilter")]
    Regex(String),
}

/// When a rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCondition {
    #[serde(flatten)]
    pub filter: UrlFilter,
    pub resource_types: Vec<ResourceType>,
}

impl MatchCondition {
    /// Substring condition on top-level navigations.
    pub fn substring(filter: impl Into<String>) -> Self {
        Self {
            filter: UrlFilter::Substring(filter.into()),
            resource_types: vec![ResourceType::MainFrame],
        }
    }

    /// Regex condition on top-level navigations.
    pub fn regex(filter: impl Into<String>) -> Self {
        Self {
            filter: UrlFilter::Regex(filter.into()),
            resource_types: vec![ResourceType::MainFrame],
        }
    }
}

/// Redirect target of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
}

/// What a rule does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    /// Send the navigation to the block page.
    Redirect { redirect: Redirect },
}

impl RuleAction {
    pub fn redirect_to(url: impl Into<String>) -> Self {
        RuleAction::Redirect {
            redirect: Redirect { url: url.into() },
        }
    }
}

/// A rule as installed in the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: MatchCondition,
}

impl CompiledRule {
    /// Whether the rule would be left alone by a reconciliation that
    /// produced `other` for the same ID.
    pub fn same_effect(&self, other: &CompiledRule) -> bool {
        self.condition == other.condition && self.action == other.action
    }
}

/// Turns entries into rules with a fixed action and priority.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    action: RuleAction,
    priority: u32,
}

impl RuleCompiler {
    pub fn new(action: RuleAction, priority: u32) -> Self {
        Self { action, priority }
    }

    /// Compile an entry whose ID has already been allocated.
    ///
    /// Returns `None` for entries with nothing left to match once the
    /// anchors are stripped.
    pub fn compile(&self, entry: &PatternEntry, id: u32) -> Option<CompiledRule> {
        let normalized = normalize(&entry.pattern);
        if normalized.clean.is_empty() {
            return None;
        }

        Some(CompiledRule {
            id,
            priority: self.priority,
            action: self.action.clone(),
            condition: compile_condition(&normalized),
        })
    }
}
