//! Individual extraction rules.
//!
//! Every rule is a pure function from a file stem to an optional token. Rules
//! know nothing about each other; priority lives entirely in the order of the
//! list handed to [`first_match`].

use regex_lite::Regex;

/// Which family a rule belongs to, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFamily {
    TrailingHyphen,
    TrailingBracket,
    TrailingDot,
    BracketHyphen,
    QualityAnchored,
    KnownGroup,
    Fallback,
}

/// A single release group extraction rule.
pub trait ExtractionRule: Send + Sync {
    /// Short identifier used in debug logs.
    fn name(&self) -> &'static str;

    fn family(&self) -> RuleFamily;

    /// Try to pull a group token out of an extension-less file name.
    fn extract<'a>(&self, stem: &'a str) -> Option<&'a str>;
}

/// Evaluate `rules` in order and return the first one that produces a value.
pub fn first_match<'r, R, T, F>(rules: &'r [R], mut apply: F) -> Option<(&'r R, T)>
where
    F: FnMut(&'r R) -> Option<T>,
{
    rules
        .iter()
        .find_map(|rule| apply(rule).map(|value| (rule, value)))
}

/// Strip trailing punctuation; an empty result means "no match".
pub(crate) fn clean_token(token: &str) -> Option<&str> {
    let trimmed = token.trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Rule backed by a regular expression whose first capture group is the token.
pub struct PatternRule {
    name: &'static str,
    family: RuleFamily,
    pattern: Regex,
}

impl PatternRule {
    /// Patterns are compile-time constants, so failing to compile is a bug.
    pub fn new(name: &'static str, family: RuleFamily, pattern: &str) -> Self {
        let pattern = Regex::new(pattern)
            .unwrap_or_else(|e| panic!("invalid release group pattern {}: {}", name, e));
        Self {
            name,
            family,
            pattern,
        }
    }
}

impl ExtractionRule for PatternRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn family(&self) -> RuleFamily {
        self.family
    }

    fn extract<'a>(&self, stem: &'a str) -> Option<&'a str> {
        let caps = self.pattern.captures(stem)?;
        clean_token(caps.get(1)?.as_str())
    }
}

/// Matches well-known group names anywhere in the name on word boundaries.
///
/// Dictionary order is priority order.
pub struct KnownGroupRule {
    groups: Vec<(&'static str, Regex)>,
}

pub const KNOWN_GROUPS: &[&str] = &[
    "AMIABLE", "SPARKS", "GECKOS", "DRONES", "EVO", "YIFY", "YTS", "RARBG", "ETTV", "EZTV",
    "CtrlHD", "NTb",
];

impl KnownGroupRule {
    pub fn new(groups: &[&'static str]) -> Self {
        let groups = groups
            .iter()
            .map(|group| {
                let pattern = format!(r"(?i)(?:^|[^A-Za-z0-9])({})(?:$|[^A-Za-z0-9])", group);
                let regex = Regex::new(&pattern)
                    .unwrap_or_else(|e| panic!("invalid known group {}: {}", group, e));
                (*group, regex)
            })
            .collect();
        Self { groups }
    }
}

impl Default for KnownGroupRule {
    fn default() -> Self {
        Self::new(KNOWN_GROUPS)
    }
}

impl ExtractionRule for KnownGroupRule {
    fn name(&self) -> &'static str {
        "known_group"
    }

    fn family(&self) -> RuleFamily {
        RuleFamily::KnownGroup
    }

    fn extract<'a>(&self, stem: &'a str) -> Option<&'a str> {
        self.groups.iter().find_map(|(_, regex)| {
            regex
                .captures(stem)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
        })
    }
}

/// The standard rule cascade.
pub fn standard_rules() -> Vec<Box<dyn ExtractionRule>> {
    vec![
        // Movie.Title.2023.1080p.WEB-DL-GROUP
        Box::new(PatternRule::new(
            "trailing_hyphen",
            RuleFamily::TrailingHyphen,
            r"-([A-Za-z0-9_]+)$",
        )),
        // Show - S01E01 - Title [GROUP]
        Box::new(PatternRule::new(
            "trailing_bracket",
            RuleFamily::TrailingBracket,
            r"\[([A-Za-z0-9._-]+)\]$",
        )),
        // Show.S01E01.GROUP
        Box::new(PatternRule::new(
            "trailing_dot",
            RuleFamily::TrailingDot,
            r"\.([A-Za-z0-9_-]{2,})$",
        )),
        // Movie [1080p] [WEB-DL] - GROUP
        Box::new(PatternRule::new(
            "bracket_hyphen",
            RuleFamily::BracketHyphen,
            r"\]\s*-\s*([A-Za-z0-9._-]+)$",
        )),
        // Movie 2023 x264 - GROUP (v2)
        Box::new(PatternRule::new(
            "codec_anchored",
            RuleFamily::QualityAnchored,
            r"(?i)(?:x264|x265|h\.?264|h\.?265|hevc|xvid|avc|av1)[\s.]*-[\s.]*([A-Za-z0-9_]+)(?:[\s.(\[].*)?$",
        )),
        // Movie 2023 1080p GROUP
        Box::new(PatternRule::new(
            "resolution_anchored",
            RuleFamily::QualityAnchored,
            r"(?i)(?:480p|576p|720p|1080p|2160p|4k)[\s.]+([A-Za-z0-9_-]{2,})$",
        )),
        Box::new(KnownGroupRule::default()),
        Box::new(PatternRule::new(
            "last_token",
            RuleFamily::Fallback,
            r"[.\s\[\]()_-]([A-Za-z0-9]{2,})[^A-Za-z0-9]*$",
        )),
    ]
}
