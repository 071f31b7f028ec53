//! Condition compilation.
//!
//! Host+path patterns become an anchored regex that accepts any subdomain of
//! the host and any path under the given prefix. Everything else is a plain
//! substring filter on the full URL.

use regex::{Regex, RegexBuilder};

use super::{MatchCondition, UrlFilter};
use crate::error::{Error, Result};
use crate::pattern::{HostPath, NormalizedPattern};

/// Compiled size limit for host+path regexes. Anything larger falls back to
/// substring matching.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Build the condition for a normalized pattern.
///
/// Never fails: if the regex for a host+path split cannot be built, the
/// clean pattern is used as a substring filter instead.
pub fn compile_condition(pattern: &NormalizedPattern) -> MatchCondition {
    match &pattern.host_path {
        Some(host_path) => match host_path_regex(host_path) {
            Ok(regex) => MatchCondition::regex(regex),
            Err(e) => {
                log::warn!(
                    "Falling back to substring filter for {:?}: {}",
                    pattern.clean,
                    e
                );
                MatchCondition::substring(pattern.clean.clone())
            }
        },
        None => MatchCondition::substring(pattern.clean.clone()),
    }
}

/// `^https?://(?:[^/]+\.)?HOST PATH.*` with host and path escaped.
fn host_path_regex(host_path: &HostPath) -> Result<String> {
    let source = format!(
        r"^https?://(?:[^/]+\.)?{}{}.*",
        regex::escape(&host_path.host),
        regex::escape(&host_path.path)
    );

    // Make sure the engine will accept it before handing it over
    RegexBuilder::new(&source)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| Error::Config(e.to_string()))?;

    Ok(source)
}

/// Executable form of a [`MatchCondition`].
///
/// Both filter kinds are case-insensitive, like the browser engine's
/// defaults.
#[derive(Debug, Clone)]
pub enum ConditionMatcher {
    Substring(String),
    Regex(Regex),
}

impl ConditionMatcher {
    pub fn new(condition: &MatchCondition) -> Result<Self> {
        match &condition.filter {
            UrlFilter::Substring(s) => Ok(ConditionMatcher::Substring(s.to_lowercase())),
            UrlFilter::Regex(source) => RegexBuilder::new(source)
                .case_insensitive(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map(ConditionMatcher::Regex)
                .map_err(|e| Error::Engine(format!("invalid regexFilter {:?}: {}", source, e))),
        }
    }

    pub fn is_match(&self, url: &str) -> bool {
        match self {
            ConditionMatcher::Substring(s) => url.to_lowercase().contains(s.as_str()),
            ConditionMatcher::Regex(re) => re.is_match(url),
        }
    }
}
