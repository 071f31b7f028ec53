//! The declarative rule engine the compiled rules are installed into.
//!
//! [`RuleEngine`] is the seam to the browser's native request filter.
//! [`LocalRuleEngine`] is a self-contained implementation with the same
//! batch semantics, optionally persisted to a JSON file, used by the CLI
//! host and the tests.

use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::compiler::{CompiledRule, ConditionMatcher};
use crate::error::{Error, Result};
use crate::store::write_atomic;

/// Platform rule engine.
pub trait RuleEngine: Send + Sync {
    /// All currently installed rules.
    fn installed_rules(&self) -> Result<Vec<CompiledRule>>;

    /// Apply removals then additions as one atomic batch.
    ///
    /// Either the whole batch is applied or nothing is.
    fn update_rules(&self, remove: &[u32], add: &[CompiledRule]) -> Result<()>;
}

#[derive(Clone)]
struct Installed {
    rule: CompiledRule,
    matcher: ConditionMatcher,
}

/// In-process rule engine.
///
/// Rejects batches that would leave two rules with the same ID, add a rule
/// with ID 0, or carry a condition that does not compile.
pub struct LocalRuleEngine {
    rules: RwLock<Vec<Installed>>,
    path: Option<PathBuf>,
}

impl Default for LocalRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRuleEngine {
    /// Create an empty, memory-only engine.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Open an engine persisted at `path`, loading any rules saved there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rules = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let rules: Vec<CompiledRule> = serde_json::from_str(&content)?;
            rules
                .into_iter()
                .map(|rule| {
                    let matcher = ConditionMatcher::new(&rule.condition)?;
                    Ok(Installed { rule, matcher })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        log::debug!("Loaded {} installed rules from {:?}", rules.len(), path);

        Ok(Self {
            rules: RwLock::new(rules),
            path: Some(path),
        })
    }

    /// Number of installed rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The rule that would fire for a top-level navigation to `url`.
    ///
    /// Highest priority wins; ties go to the lowest ID.
    pub fn evaluate(&self, url: &str) -> Option<CompiledRule> {
        self.rules
            .read()
            .iter()
            .filter(|installed| installed.matcher.is_match(url))
            .max_by(|a, b| {
                a.rule
                    .priority
                    .cmp(&b.rule.priority)
                    .then_with(|| b.rule.id.cmp(&a.rule.id))
            })
            .map(|installed| installed.rule.clone())
    }

    fn save(&self, rules: &[Installed]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot: Vec<&CompiledRule> = rules.iter().map(|i| &i.rule).collect();
        write_atomic(path, serde_json::to_string_pretty(&snapshot)?.as_bytes())
    }
}

impl RuleEngine for LocalRuleEngine {
    fn installed_rules(&self) -> Result<Vec<CompiledRule>> {
        Ok(self.rules.read().iter().map(|i| i.rule.clone()).collect())
    }

    fn update_rules(&self, remove: &[u32], add: &[CompiledRule]) -> Result<()> {
        let mut guard = self.rules.write();

        let removed: AHashSet<u32> = remove.iter().copied().collect();
        let mut ids: AHashSet<u32> = guard
            .iter()
            .map(|i| i.rule.id)
            .filter(|id| !removed.contains(id))
            .collect();

        // Validate the whole batch before touching anything
        let mut additions = Vec::with_capacity(add.len());
        for rule in add {
            if rule.id == 0 {
                return Err(Error::Engine("rule ID 0 is not allowed".to_string()));
            }
            if !ids.insert(rule.id) {
                return Err(Error::Engine(format!("duplicate rule ID {}", rule.id)));
            }
            let matcher = ConditionMatcher::new(&rule.condition)?;
            additions.push(Installed {
                rule: rule.clone(),
                matcher,
            });
        }

        let mut next: Vec<Installed> = guard
            .iter()
            .filter(|i| !removed.contains(&i.rule.id))
            .cloned()
            .collect();
        next.extend(additions);

        self.save(&next)?;
        *guard = next;
        Ok(())
    }
}
