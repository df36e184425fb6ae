//! In-memory statistics sink.
//!
//! Tracks processed analyses, per-module outcome counters, dropped reports
//! and a bounded history of recent analyses. Combined with registry, queue
//! and session figures into a [`StatisticsSnapshot`] by the pipeline.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TelemetryConfig;
use crate::resilience::{BreakerStatus, ErrorCategory, ErrorRecord};
use crate::types::{ModuleId, ModuleStatus, SynthesizedAnalysis};

// ============================================================================
// Counters
// ============================================================================

/// Outcome counters for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleStats {
    /// Results produced by the backend
    pub success: u64,
    /// Calls that produced no result
    pub errors: u64,
    /// Results produced by the local fallback
    pub fallbacks: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl ModuleStats {
    /// Share of calls answered by the backend.
    pub fn success_rate(&self) -> f64 {
        let total = self.success + self.errors + self.fallbacks;
        if total == 0 {
            0.0
        } else {
            self.success as f64 / total as f64
        }
    }
}

/// Condensed record of one synthesized analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub message_id: String,
    pub session_id: String,
    pub aggregate_risk: f64,
    pub aggregate_confidence: f64,
    pub fallback_count: usize,
    pub failed_modules: Vec<ModuleId>,
    pub total_duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl From<&SynthesizedAnalysis> for HistoryEntry {
    fn from(analysis: &SynthesizedAnalysis) -> Self {
        Self {
            message_id: analysis.message_id.clone(),
            session_id: analysis.session_id.clone(),
            aggregate_risk: analysis.aggregate_risk,
            aggregate_confidence: analysis.aggregate_confidence,
            fallback_count: analysis.fallback_count(),
            failed_modules: analysis
                .module_status
                .iter()
                .filter(|(_, status)| **status == ModuleStatus::Failed)
                .map(|(module, _)| *module)
                .collect(),
            total_duration_ms: analysis.total_duration_ms,
            completed_at: analysis.completed_at,
        }
    }
}

#[derive(Debug, Default)]
struct TelemetryState {
    total_processed: u64,
    total_processing_ms: u64,
    modules: BTreeMap<ModuleId, ModuleStats>,
    reports_dropped: u64,
    history: VecDeque<HistoryEntry>,
}

/// Figures owned by the telemetry sink.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub total_processed: u64,
    pub average_processing_ms: f64,
    pub modules: BTreeMap<ModuleId, ModuleStats>,
    pub reports_dropped: u64,
    pub history: Vec<HistoryEntry>,
}

/// Thread-safe statistics sink.
#[derive(Debug)]
pub struct Telemetry {
    max_history: usize,
    state: Mutex<TelemetryState>,
}

impl Telemetry {
    /// Create an empty sink.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            max_history: config.max_history.max(1),
            state: Mutex::new(TelemetryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one module outcome. Disabled modules are not counted.
    pub fn record_module(&self, module: ModuleId, status: ModuleStatus) {
        if status == ModuleStatus::Disabled {
            return;
        }
        let mut state = self.lock();
        let stats = state.modules.entry(module).or_default();
        match status {
            ModuleStatus::Completed => stats.success += 1,
            ModuleStatus::Fallback => stats.fallbacks += 1,
            ModuleStatus::Failed => stats.errors += 1,
            ModuleStatus::Disabled => {}
        }
        stats.last_used = Some(Utc::now());
    }

    /// Count one synthesized analysis and append it to the history.
    pub fn record_analysis(&self, analysis: &SynthesizedAnalysis) {
        let mut state = self.lock();
        state.total_processed += 1;
        state.total_processing_ms += analysis.total_duration_ms;
        if state.history.len() >= self.max_history {
            state.history.pop_front();
        }
        state.history.push_back(HistoryEntry::from(analysis));
    }

    /// Count an analysis the reporter did not receive.
    pub fn record_dropped_report(&self) {
        self.lock().reports_dropped += 1;
    }

    /// Current figures.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.lock();
        let average_processing_ms = if state.total_processed == 0 {
            0.0
        } else {
            state.total_processing_ms as f64 / state.total_processed as f64
        };
        TelemetrySnapshot {
            total_processed: state.total_processed,
            average_processing_ms,
            modules: state.modules.clone(),
            reports_dropped: state.reports_dropped,
            history: state.history.iter().cloned().collect(),
        }
    }
}

// ============================================================================
// Combined view
// ============================================================================

/// Everything an observer can see about the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub total_processed: u64,
    pub average_processing_ms: f64,
    pub modules: BTreeMap<ModuleId, ModuleStats>,
    pub breakers: Vec<BreakerStatus>,
    pub error_counts: BTreeMap<ErrorCategory, u64>,
    pub recent_errors: Vec<ErrorRecord>,
    pub deferred_operations: usize,
    pub reports_dropped: u64,
    pub queue_depth: usize,
    pub active_sessions: usize,
    pub history: Vec<HistoryEntry>,
}

/// Inputs the pipeline gathers from outside the telemetry sink.
#[derive(Debug, Clone, Default)]
pub struct ExternalFigures {
    pub breakers: Vec<BreakerStatus>,
    pub error_counts: BTreeMap<ErrorCategory, u64>,
    pub recent_errors: Vec<ErrorRecord>,
    pub deferred_operations: usize,
    pub queue_depth: usize,
    pub active_sessions: usize,
}

impl StatisticsSnapshot {
    /// Merge telemetry with figures owned by other components.
    pub fn assemble(telemetry: TelemetrySnapshot, external: ExternalFigures) -> Self {
        Self {
            total_processed: telemetry.total_processed,
            average_processing_ms: telemetry.average_processing_ms,
            modules: telemetry.modules,
            breakers: external.breakers,
            error_counts: external.error_counts,
            recent_errors: external.recent_errors,
            deferred_operations: external.deferred_operations,
            reports_dropped: telemetry.reports_dropped,
            queue_depth: external.queue_depth,
            active_sessions: external.active_sessions,
            history: telemetry.history,
        }
    }
}
