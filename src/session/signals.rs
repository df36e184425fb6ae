//! Derived conversation signals.
//!
//! Pure functions over a session window. Thresholds come from
//! [`SessionConfig`](crate::config::SessionConfig).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::lexicon;
use crate::types::ThreatLevel;

/// Trend of severity across recent messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPattern {
    /// Later messages are clearly more severe.
    Escalating,
    /// Later messages are somewhat more severe.
    SlightEscalation,
    /// No upward trend.
    #[default]
    Stable,
}

impl EscalationPattern {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationPattern::Escalating => "escalating",
            EscalationPattern::SlightEscalation => "slight_escalation",
            EscalationPattern::Stable => "stable",
        }
    }
}

/// How often significant tokens repeat across the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Repetition classification with the tokens behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionSignal {
    pub level: RepetitionLevel,
    /// Highest number of messages any single token appeared in
    pub max_frequency: usize,
    /// Tokens appearing in more than one message, most frequent first
    pub repeated_tokens: Vec<String>,
}

/// Classify the severity trend of the last `window` entries.
///
/// Fewer than three entries is always stable.
pub fn escalation(severities: &[ThreatLevel], window: usize, delta: f64) -> EscalationPattern {
    let recent = &severities[severities.len().saturating_sub(window)..];
    if recent.len() < 3 {
        return EscalationPattern::Stable;
    }

    let half = recent.len() / 2;
    let mean = |levels: &[ThreatLevel]| {
        levels.iter().map(|l| l.rank() as f64).sum::<f64>() / levels.len() as f64
    };
    let diff = mean(&recent[recent.len() - half..]) - mean(&recent[..half]);

    if diff >= delta {
        EscalationPattern::Escalating
    } else if diff > 0.0 {
        EscalationPattern::SlightEscalation
    } else {
        EscalationPattern::Stable
    }
}

/// Classify token repetition across messages. Each token counts at most
/// once per message.
pub fn repetition<'a>(
    texts: impl IntoIterator<Item = &'a str>,
    medium: usize,
    high: usize,
) -> RepetitionSignal {
    let mut frequency: HashMap<String, usize> = HashMap::new();
    for text in texts {
        let unique: HashSet<String> = lexicon::significant_tokens(text).collect();
        for token in unique {
            *frequency.entry(token).or_insert(0) += 1;
        }
    }

    let mut repeated: Vec<(String, usize)> =
        frequency.into_iter().filter(|(_, count)| *count > 1).collect();
    repeated.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let max_frequency = repeated.first().map(|(_, count)| *count).unwrap_or(0);
    let level = if max_frequency >= high {
        RepetitionLevel::High
    } else if max_frequency >= medium {
        RepetitionLevel::Medium
    } else {
        RepetitionLevel::Low
    };

    RepetitionSignal {
        level,
        max_frequency,
        repeated_tokens: repeated.into_iter().map(|(token, _)| token).collect(),
    }
}

/// Labels of urgency patterns found in `text`.
pub fn urgency_indicators(text: &str) -> Vec<String> {
    lexicon::urgency()
        .matches(text)
        .into_iter()
        .map(str::to_string)
        .collect()
}
