//! Centralized pattern tables for local threat heuristics.
//!
//! These tables back the fallback analysis the gateway runs when the backend
//! is unavailable, the lexical severity intake stores in the session window,
//! and the urgency signal. Keeping them in one place makes them easier to
//! maintain, test and version.

use std::sync::OnceLock;

use regex::Regex;
use tracing::error;

use crate::types::ThreatLevel;

/// Prompt-injection and jailbreak phrasing.
pub const INJECTION_PATTERNS: &[(&str, &str)] = &[
    (
        "instruction_override",
        r"(?i)\b(ignore|disregard|forget)\b.{0,30}\b(previous|prior|above|earlier|all)\b.{0,30}\b(instructions?|rules|prompts?|directions)\b",
    ),
    (
        "role_override",
        r"(?i)\b(act|pretend|behave|roleplay)\s+(as|like|to be)\b|\byou are now\b",
    ),
    (
        "jailbreak",
        r"(?i)\b(jailbreak|dan mode|developer mode|do anything now)\b",
    ),
    (
        "prompt_extraction",
        r"(?i)\b(system prompt|reveal your (instructions|prompt)|show me your (rules|instructions))\b",
    ),
    (
        "restriction_bypass",
        r"(?i)\b(without (any )?(restrictions|filters|limits)|no (rules|restrictions|filters))\b",
    ),
];

/// Psychological manipulation tactics.
pub const MANIPULATION_PATTERNS: &[(&str, &str)] = &[
    (
        "secrecy",
        r"(?i)\b(don'?t tell (anyone|your)|keep (this|it) (a )?secret|between (us|you and me))\b",
    ),
    (
        "isolation",
        r"(?i)\b(only i (understand|can help)|no one else (cares|understands)|they don'?t understand you)\b",
    ),
    (
        "false_authority",
        r"(?i)\b(trust me|i am (an? )?(expert|official|authority)|you must obey)\b",
    ),
    (
        "guilt",
        r"(?i)\b(after all i'?ve done|you owe me|it'?s your fault)\b",
    ),
    (
        "pressure",
        r"(?i)\b(you have no choice|you must|you need to do this)\b",
    ),
];

/// Emotional distress markers.
pub const EMOTION_PATTERNS: &[(&str, &str)] = &[
    ("fear", r"(?i)\b(scared|afraid|terrified|panic(king)?)\b"),
    ("hopelessness", r"(?i)\b(hopeless|worthless|no way out|give up)\b"),
    ("loneliness", r"(?i)\b(alone|lonely|nobody cares)\b"),
    ("anger", r"(?i)\b(hate|furious|angry|rage)\b"),
];

/// Urgency and time-pressure phrasing.
pub const URGENCY_PATTERNS: &[(&str, &str)] = &[
    ("urgent", r"(?i)\burgent(ly)?\b"),
    ("immediate", r"(?i)\b(immediately|right now|asap|at once)\b"),
    (
        "deadline",
        r"(?i)\b(before it'?s too late|last chance|deadline|expires? (today|soon))\b",
    ),
    ("emergency", r"(?i)\bemergency\b"),
    ("hurry", r"(?i)\b(hurry|quickly|act now)\b"),
];

const CODE_PATTERN: &str =
    r"```|\b(fn|def|function|class|import|return|SELECT|INSERT)\b.*[({;:=]|<script\b";
const LINK_PATTERN: &str = r"(?i)\bhttps?://\S+|\bwww\.\S+\.\S+";

/// Words ignored when looking for repeated tokens.
pub const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "could", "does", "doing",
    "from", "have", "having", "here", "into", "just", "like", "more", "most", "only", "other",
    "over", "same", "should", "some", "such", "than", "that", "their", "them", "then", "there",
    "these", "they", "this", "those", "very", "want", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your", "yours",
];

/// A labeled compiled pattern.
#[derive(Debug)]
pub struct Pattern {
    /// Short label reported as a flag or indicator.
    pub label: &'static str,
    /// Compiled expression.
    pub regex: Regex,
}

/// A set of labeled patterns.
#[derive(Debug)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Compile a pattern table, skipping (and logging) entries that fail.
    pub fn compile(table: &[(&'static str, &str)]) -> Self {
        let patterns = table
            .iter()
            .filter_map(|&(label, source)| match Regex::new(source) {
                Ok(regex) => Some(Pattern { label, regex }),
                Err(e) => {
                    error!(label = %label, error = %e, "Invalid lexicon pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Labels of patterns matching `text`.
    pub fn matches(&self, text: &str) -> Vec<&'static str> {
        self.patterns
            .iter()
            .filter(|p| p.regex.is_match(text))
            .map(|p| p.label)
            .collect()
    }

    /// Labels with the first matched excerpt.
    pub fn find(&self, text: &str) -> Vec<(&'static str, String)> {
        self.patterns
            .iter()
            .filter_map(|p| p.regex.find(text).map(|m| (p.label, m.as_str().to_string())))
            .collect()
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no pattern compiled.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

macro_rules! pattern_set {
    ($name:ident, $table:expr) => {
        /// Compiled once on first use.
        pub fn $name() -> &'static PatternSet {
            static SET: OnceLock<PatternSet> = OnceLock::new();
            SET.get_or_init(|| PatternSet::compile($table))
        }
    };
}

pattern_set!(injection, INJECTION_PATTERNS);
pattern_set!(manipulation, MANIPULATION_PATTERNS);
pattern_set!(emotion, EMOTION_PATTERNS);
pattern_set!(urgency, URGENCY_PATTERNS);

fn single(source: &'static str, cell: &'static OnceLock<Option<Regex>>) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(source) {
        Ok(regex) => Some(regex),
        Err(e) => {
            error!(error = %e, "Invalid lexicon pattern");
            None
        }
    })
    .as_ref()
}

/// Text looks like it contains code.
pub fn contains_code(text: &str) -> bool {
    static CODE: OnceLock<Option<Regex>> = OnceLock::new();
    single(CODE_PATTERN, &CODE).is_some_and(|re| re.is_match(text))
}

/// Text contains a link.
pub fn contains_links(text: &str) -> bool {
    static LINK: OnceLock<Option<Regex>> = OnceLock::new();
    single(LINK_PATTERN, &LINK).is_some_and(|re| re.is_match(text))
}

/// Severity from the number of threat patterns a message hits.
pub fn lexical_severity(text: &str) -> ThreatLevel {
    let hits = injection().matches(text).len()
        + manipulation().matches(text).len()
        + emotion().matches(text).len()
        + urgency().matches(text).len();
    ThreatLevel::from_match_count(hits)
}

/// Lower-cased alphabetic tokens of at least four letters that are not stop
/// words.
pub fn significant_tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphabetic() && c != '\'')
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| t.chars().count() >= 4 && !STOP_WORDS.contains(&t.as_str()))
}
