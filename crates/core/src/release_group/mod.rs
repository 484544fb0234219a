//! Release group extraction.
//!
//! Turns an arbitrary media file path into the label of the group that
//! produced the encode, using an ordered cascade of heuristics where the first
//! matching rule wins.

mod rules;

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use tracing::trace;

pub use rules::{
    first_match, standard_rules, ExtractionRule, KnownGroupRule, PatternRule, RuleFamily,
    KNOWN_GROUPS,
};

/// A release group label, case-preserved as it appeared in the file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseGroup(String);

impl ReleaseGroup {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form used for comparisons.
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for ReleaseGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a successful extraction, including which rule produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub group: ReleaseGroup,
    pub rule: &'static str,
    pub family: RuleFamily,
}

/// The set of release groups to unmonitor, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct TargetGroups {
    groups: HashSet<String>,
}

impl TargetGroups {
    pub fn new<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups = groups
            .into_iter()
            .map(|g| g.as_ref().trim().to_lowercase())
            .filter(|g| !g.is_empty())
            .collect();
        Self { groups }
    }

    pub fn contains(&self, group: &ReleaseGroup) -> bool {
        self.groups.contains(&group.normalized())
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }
}

/// Strip directories (either separator style) and the final extension.
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Ordered rule cascade.
pub struct ReleaseGroupExtractor {
    rules: Vec<Box<dyn ExtractionRule>>,
}

impl Default for ReleaseGroupExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseGroupExtractor {
    /// Extractor with the standard cascade.
    pub fn new() -> Self {
        Self::with_rules(standard_rules())
    }

    pub fn with_rules(rules: Vec<Box<dyn ExtractionRule>>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name())
    }

    /// Extract the release group from a file path.
    pub fn extract(&self, path: &str) -> Option<ReleaseGroup> {
        self.explain(path).map(|e| e.group)
    }

    /// Like [`extract`](Self::extract) but also reports the winning rule.
    pub fn explain(&self, path: &str) -> Option<Extraction> {
        let stem = file_stem(path);
        if stem.is_empty() {
            return None;
        }

        let (rule, token) = first_match(&self.rules, |rule| rule.extract(stem))?;
        trace!(path, rule = rule.name(), group = token, "Extracted release group");

        Some(Extraction {
            group: ReleaseGroup::new(token),
            rule: rule.name(),
            family: rule.family(),
        })
    }
}

/// Extract a release group using the standard cascade.
pub fn extract_release_group(path: &str) -> Option<ReleaseGroup> {
    static EXTRACTOR: Lazy<ReleaseGroupExtractor> = Lazy::new(ReleaseGroupExtractor::new);
    EXTRACTOR.extract(path)
}
