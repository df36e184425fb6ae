use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ModuleSettings;
use crate::types::{clamp_unit, Evidence, ModuleId, ModuleResult, RecommendedAction};

/// Where to send a module analysis call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Module endpoint name, appended to the base URL
    pub endpoint: String,
    /// Overrides the configured base URL (network recovery)
    pub base_url: Option<String>,
}

impl Route {
    /// Route to the configured base URL
    pub fn primary(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            base_url: None,
        }
    }

    /// Route to an alternate base URL
    pub fn alternate(endpoint: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            base_url: Some(base_url.into()),
        }
    }
}

/// Request body for one module analysis call
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRequest {
    pub module: ModuleId,
    /// Module-specific projection of the message
    pub message: Value,
    /// Module-specific projection of the session context snapshot
    pub context: Value,
    pub config: ModuleSettings,
}

/// Response body from a module analysis call
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(alias = "risk")]
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub recommended_action: RecommendedAction,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ModuleResponse {
    /// Create a successful response with a score and confidence
    pub fn scored(score: f64, confidence: f64) -> Self {
        Self {
            success: true,
            score,
            confidence,
            notes: String::new(),
            flags: Vec::new(),
            recommended_action: RecommendedAction::None,
            recommendations: Vec::new(),
            evidence: Vec::new(),
            extra: Map::new(),
            error: None,
        }
    }

    /// Convert into a module result, clamping scores into range
    pub fn into_result(self, module: ModuleId, duration_ms: u64) -> ModuleResult {
        let mut result = ModuleResult::new(module, self.score, self.confidence);
        result.notes = self.notes;
        result.flags = self.flags;
        result.recommended_action = self.recommended_action;
        result.recommendations = self.recommendations;
        result.evidence = self
            .evidence
            .into_iter()
            .map(|mut e| {
                e.weight = clamp_unit(e.weight);
                e
            })
            .collect();
        result.extra = self.extra;
        result.duration_ms = duration_ms;
        result
    }
}
