//! Module fan-out and fan-in.
//!
//! [`Orchestrator::analyze`] dispatches one request to every enabled module
//! concurrently, waits for all of them regardless of individual failures and
//! synthesizes the outcomes. [`Orchestrator::process`] additionally hands the
//! result to the reporting channel.

pub mod modules;
pub mod synthesis;

pub use modules::{ModuleRegistry, ModuleSpec, Projector};
pub use synthesis::synthesize;

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::SynthesisConfig;
use crate::gateway::{AnalysisGateway, ModuleOutcome};
use crate::intake::AnalysisRequest;
use crate::telemetry::Telemetry;
use crate::types::{ModuleId, SynthesizedAnalysis};

/// Dispatches analysis requests to the registered modules.
pub struct Orchestrator {
    modules: ModuleRegistry,
    gateway: Arc<AnalysisGateway>,
    telemetry: Arc<Telemetry>,
    synthesis: SynthesisConfig,
    reports: mpsc::Sender<SynthesizedAnalysis>,
}

impl Orchestrator {
    /// Create an orchestrator writing completed analyses to `reports`.
    pub fn new(
        modules: ModuleRegistry,
        gateway: Arc<AnalysisGateway>,
        telemetry: Arc<Telemetry>,
        synthesis: SynthesisConfig,
        reports: mpsc::Sender<SynthesizedAnalysis>,
    ) -> Self {
        Self {
            modules,
            gateway,
            telemetry,
            synthesis,
            reports,
        }
    }

    /// Analyze one request with every enabled module.
    pub async fn analyze(&self, request: Arc<AnalysisRequest>) -> SynthesizedAnalysis {
        let started = Instant::now();

        let (dispatched, handles): (Vec<ModuleId>, Vec<_>) = self
            .modules
            .enabled()
            .map(|spec| {
                let payload = spec.request(&request.message, &request.context);
                let gateway = Arc::clone(&self.gateway);
                let source = Arc::clone(&request);
                let handle = tokio::spawn(async move { gateway.invoke(payload, &source).await });
                (spec.id, handle)
            })
            .unzip();

        let outcomes: Vec<ModuleOutcome> = join_all(handles)
            .await
            .into_iter()
            .zip(dispatched)
            .map(|(joined, module)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(module = %module, error = %e, "Module task failed");
                    ModuleOutcome::Failed {
                        module,
                        error: e.to_string(),
                    }
                }
            })
            .collect();

        for outcome in &outcomes {
            self.telemetry.record_module(outcome.module(), outcome.status());
        }

        let disabled: Vec<ModuleId> = self
            .modules
            .all()
            .filter(|spec| !spec.settings.enabled)
            .map(|spec| spec.id)
            .collect();

        let analysis = synthesize(
            &request.message.id,
            &request.message.session_id,
            outcomes,
            &disabled,
            &self.synthesis,
            started.elapsed().as_millis() as u64,
        );
        self.telemetry.record_analysis(&analysis);

        debug!(
            message_id = %analysis.message_id,
            aggregate_risk = analysis.aggregate_risk,
            aggregate_confidence = analysis.aggregate_confidence,
            fallbacks = analysis.fallback_count(),
            duration_ms = analysis.total_duration_ms,
            "Analysis synthesized"
        );
        analysis
    }

    /// Analyze and report. A full or closed reporting channel drops the
    /// report and counts it.
    pub async fn process(&self, request: Arc<AnalysisRequest>) {
        let analysis = self.analyze(request).await;
        if let Err(e) = self.reports.try_send(analysis) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "reporter gone",
            };
            warn!(reason, "Dropping analysis report");
            self.telemetry.record_dropped_report();
        }
    }
}
