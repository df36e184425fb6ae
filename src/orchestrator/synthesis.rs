//! Fan-in: combine module outcomes into one assessment.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::config::SynthesisConfig;
use crate::gateway::ModuleOutcome;
use crate::types::{clamp_unit, ModuleId, ModuleResult, ModuleStatus, SynthesizedAnalysis};

pub const IMMEDIATE_ATTENTION: &str = "immediate attention required";
pub const MONITOR_CLOSELY: &str = "monitor conversation closely";
pub const ADDITIONAL_ANALYSIS: &str = "additional analysis recommended";

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        clamp_unit(sum / count as f64)
    }
}

/// Build the synthesized analysis for one request.
///
/// `outcomes` holds one entry per dispatched module; `disabled` lists the
/// modules that were not dispatched.
pub fn synthesize(
    message_id: &str,
    session_id: &str,
    outcomes: Vec<ModuleOutcome>,
    disabled: &[ModuleId],
    config: &SynthesisConfig,
    total_duration_ms: u64,
) -> SynthesizedAnalysis {
    let mut module_status: BTreeMap<ModuleId, ModuleStatus> = disabled
        .iter()
        .map(|module| (*module, ModuleStatus::Disabled))
        .collect();
    let mut module_results: BTreeMap<ModuleId, ModuleResult> = BTreeMap::new();

    for outcome in outcomes {
        module_status.insert(outcome.module(), outcome.status());
        if let ModuleOutcome::Completed(result) = outcome {
            module_results.insert(result.module, result);
        }
    }

    let aggregate_risk = mean(module_results.values().map(|r| r.score));
    let aggregate_confidence = mean(module_results.values().map(|r| r.confidence));

    let mut recommendations = Vec::new();
    if aggregate_risk >= config.high_risk_threshold {
        recommendations.push(IMMEDIATE_ATTENTION.to_string());
    } else if aggregate_risk >= config.medium_risk_threshold {
        recommendations.push(MONITOR_CLOSELY.to_string());
    }
    if aggregate_confidence < config.low_confidence_threshold {
        recommendations.push(ADDITIONAL_ANALYSIS.to_string());
    }
    for recommendation in module_results.values().flat_map(|r| r.recommendations.iter()) {
        if !recommendations.contains(recommendation) {
            recommendations.push(recommendation.clone());
        }
    }

    SynthesizedAnalysis {
        message_id: message_id.to_string(),
        session_id: session_id.to_string(),
        aggregate_risk,
        aggregate_confidence,
        module_results,
        module_status,
        recommendations,
        total_duration_ms,
        completed_at: Utc::now(),
    }
}
