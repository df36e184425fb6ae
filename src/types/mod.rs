//! Core domain types shared across the analysis pipeline.
//!
//! Messages, module results and the synthesized analysis that flows out to
//! the reporting collaborator.

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clamp a score into `[0, 1]`. Non-finite values collapse to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Who authored a captured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sender {
    /// The human end user.
    User,
    /// The AI chat service.
    Ai,
}

impl Sender {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "USER",
            Sender::Ai => "AI",
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Sender::User),
            "ai" | "assistant" => Ok(Sender::Ai),
            _ => Err(format!("Unknown sender: {}", s)),
        }
    }
}

/// Message metadata captured alongside the text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Detected or declared language.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Message contains code.
    pub has_code: bool,
    /// Message contains links.
    pub has_links: bool,
}

/// A captured conversation message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: String,
    /// Conversation the message belongs to.
    pub session_id: String,
    /// Message author.
    pub sender: Sender,
    /// Message text.
    pub text: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Chat service the message was captured from.
    pub platform: String,
    /// Additional metadata.
    pub metadata: MessageMetadata,
}

impl Message {
    /// Create a new message with a fresh identifier.
    pub fn new(
        session_id: impl Into<String>,
        sender: Sender,
        text: impl Into<String>,
        platform: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            sender,
            text: text.into(),
            timestamp,
            platform: platform.into(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// Threat scale
// ============================================================================

/// Ordered severity scale used for session threat history.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    /// Nothing detected.
    #[default]
    None,
    /// Weak signal.
    Low,
    /// Moderate signal.
    Medium,
    /// Strong signal.
    High,
    /// Multiple strong signals.
    Critical,
}

impl ThreatLevel {
    /// Position on the ordered scale (0..=4).
    pub fn rank(&self) -> u8 {
        match self {
            ThreatLevel::None => 0,
            ThreatLevel::Low => 1,
            ThreatLevel::Medium => 2,
            ThreatLevel::High => 3,
            ThreatLevel::Critical => 4,
        }
    }

    /// Map a count of lexicon hits onto the scale.
    pub fn from_match_count(count: usize) -> Self {
        match count {
            0 => ThreatLevel::None,
            1 => ThreatLevel::Low,
            2 => ThreatLevel::Medium,
            3 | 4 => ThreatLevel::High,
            _ => ThreatLevel::Critical,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::None => "none",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Modules
// ============================================================================

/// Identifier of a registered analysis module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleId {
    /// Prompt-injection and jailbreak attempts.
    PromptInjection,
    /// Psychological manipulation tactics.
    Manipulation,
    /// Emotional state and sentiment.
    Emotion,
    /// Conversation trajectory and escalation.
    Escalation,
}

impl ModuleId {
    /// Every module, in dispatch order.
    pub const ALL: [ModuleId; 4] = [
        ModuleId::PromptInjection,
        ModuleId::Manipulation,
        ModuleId::Emotion,
        ModuleId::Escalation,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleId::PromptInjection => "prompt_injection",
            ModuleId::Manipulation => "manipulation",
            ModuleId::Emotion => "emotion",
            ModuleId::Escalation => "escalation",
        }
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ModuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prompt_injection" => Ok(ModuleId::PromptInjection),
            "manipulation" => Ok(ModuleId::Manipulation),
            "emotion" => Ok(ModuleId::Emotion),
            "escalation" => Ok(ModuleId::Escalation),
            _ => Err(format!("Unknown module: {}", s)),
        }
    }
}

/// Action a module recommends for the analyzed message.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Nothing to do.
    #[default]
    None,
    /// Keep watching the conversation.
    Monitor,
    /// Warn the user.
    Warn,
    /// Block or hide the message.
    Block,
    /// Escalate to a human reviewer.
    Escalate,
}

/// A single piece of evidence supporting a module's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Evidence kind (e.g. "pattern", "sentiment").
    pub kind: String,
    /// Matched excerpt or description.
    pub detail: String,
    /// Contribution to the score (0.0-1.0).
    #[serde(default)]
    pub weight: f64,
}

impl Evidence {
    /// Create a new evidence entry.
    pub fn new(kind: impl Into<String>, detail: impl Into<String>, weight: f64) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
            weight: clamp_unit(weight),
        }
    }
}

/// Output of one analysis module for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    /// Module that produced the result.
    pub module: ModuleId,
    /// Risk score (0.0-1.0).
    pub score: f64,
    /// Confidence in the score (0.0-1.0).
    pub confidence: f64,
    /// Free-form notes.
    pub notes: String,
    /// Short flags describing what was detected.
    pub flags: Vec<String>,
    /// Action the module recommends.
    pub recommended_action: RecommendedAction,
    /// Human-readable recommendations supplied by the module.
    pub recommendations: Vec<String>,
    /// Supporting evidence.
    pub evidence: Vec<Evidence>,
    /// Module-specific extra data.
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Time spent producing the result.
    pub duration_ms: u64,
    /// Produced by local heuristics instead of the backend.
    pub fallback: bool,
}

impl ModuleResult {
    /// Create a result with clamped score and confidence.
    pub fn new(module: ModuleId, score: f64, confidence: f64) -> Self {
        Self {
            module,
            score: clamp_unit(score),
            confidence: clamp_unit(confidence),
            notes: String::new(),
            flags: Vec::new(),
            recommended_action: RecommendedAction::None,
            recommendations: Vec::new(),
            evidence: Vec::new(),
            extra: serde_json::Map::new(),
            duration_ms: 0,
            fallback: false,
        }
    }

    /// Set notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Add a flag.
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Set the recommended action.
    pub fn with_action(mut self, action: RecommendedAction) -> Self {
        self.recommended_action = action;
        self
    }

    /// Add evidence.
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    /// Set the measured duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Mark as a degraded local result, capping confidence.
    pub fn into_fallback(mut self, max_confidence: f64) -> Self {
        self.fallback = true;
        self.confidence = self.confidence.min(clamp_unit(max_confidence));
        if !self.flags.iter().any(|f| f == "fallback") {
            self.flags.push("fallback".to_string());
        }
        self
    }
}

/// Why a module is present in, or absent from, a synthesized analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// The backend produced the result.
    Completed,
    /// Local heuristics produced the result.
    Fallback,
    /// No result (backend failed and no fallback).
    Failed,
    /// Module is disabled.
    Disabled,
}

impl ModuleStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Completed => "completed",
            ModuleStatus::Fallback => "fallback",
            ModuleStatus::Failed => "failed",
            ModuleStatus::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Synthesis
// ============================================================================

/// Aggregate assessment for one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedAnalysis {
    /// Analyzed message identifier.
    pub message_id: String,
    /// Session the message belongs to.
    pub session_id: String,
    /// Mean risk of present module results.
    pub aggregate_risk: f64,
    /// Mean confidence of present module results.
    pub aggregate_confidence: f64,
    /// Results of modules that produced one.
    pub module_results: BTreeMap<ModuleId, ModuleResult>,
    /// Outcome of every registered module.
    pub module_status: BTreeMap<ModuleId, ModuleStatus>,
    /// Derived and module-supplied recommendations.
    pub recommendations: Vec<String>,
    /// Wall time from dispatch to synthesis.
    pub total_duration_ms: u64,
    /// When synthesis finished.
    pub completed_at: DateTime<Utc>,
}

impl SynthesizedAnalysis {
    /// Number of modules that fell back to local heuristics.
    pub fn fallback_count(&self) -> usize {
        self.module_results.values().filter(|r| r.fallback).count()
    }
}
