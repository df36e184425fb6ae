//! Assembled analysis pipeline.
//!
//! Wires intake, queue, scheduler, orchestrator, gateway, recovery registry,
//! session tracker and telemetry together. Completed analyses are delivered
//! on the receiver returned by [`Pipeline::new`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::AnalysisBackend;
use crate::config::Config;
use crate::error::ValidationError;
use crate::gateway::AnalysisGateway;
use crate::intake::{Intake, Submission, SubmissionReceipt};
use crate::orchestrator::{ModuleRegistry, Orchestrator};
use crate::resilience::RecoveryRegistry;
use crate::scheduler::{AnalysisQueue, Scheduler};
use crate::session::{ContextSnapshot, SessionTracker};
use crate::telemetry::{ExternalFigures, StatisticsSnapshot, Telemetry};
use crate::types::SynthesizedAnalysis;

/// Reports buffered for the reporter before new ones are dropped.
pub const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Errors kept in the statistics view.
const RECENT_ERRORS: usize = 20;

/// The whole message analysis pipeline.
pub struct Pipeline {
    intake: Intake,
    queue: Arc<AnalysisQueue>,
    scheduler: Arc<Scheduler>,
    sessions: Arc<SessionTracker>,
    registry: Arc<RecoveryRegistry>,
    telemetry: Arc<Telemetry>,
}

impl Pipeline {
    /// Build the pipeline around `backend`.
    pub fn new(config: Config, backend: Arc<dyn AnalysisBackend>) -> (Self, mpsc::Receiver<SynthesizedAnalysis>) {
        let (reports, receiver) = mpsc::channel(REPORT_CHANNEL_CAPACITY);

        let registry = Arc::new(RecoveryRegistry::new(
            config.resilience.clone(),
            config.backend.alternate_urls.clone(),
        ));
        let gateway = Arc::new(AnalysisGateway::new(
            backend,
            Arc::clone(&registry),
            Duration::from_millis(config.request.timeout_ms),
            config.synthesis.fallback_confidence,
        ));
        let telemetry = Arc::new(Telemetry::new(&config.telemetry));
        let sessions = Arc::new(SessionTracker::new(config.session.clone()));
        let queue = Arc::new(AnalysisQueue::new(config.scheduler.max_queue_size));

        let orchestrator = Arc::new(Orchestrator::new(
            ModuleRegistry::from_config(&config.modules),
            gateway,
            Arc::clone(&telemetry),
            config.synthesis.clone(),
            reports,
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            orchestrator,
            config.scheduler.clone(),
        ));
        let intake = Intake::new(config.intake.clone(), Arc::clone(&sessions), Arc::clone(&queue));

        info!(
            batch_size = config.scheduler.batch_size,
            max_queue_size = config.scheduler.max_queue_size,
            alternates = config.backend.alternate_urls.len(),
            "Analysis pipeline ready"
        );

        (
            Self {
                intake,
                queue,
                scheduler,
                sessions,
                registry,
                telemetry,
            },
            receiver,
        )
    }

    /// Validate and enqueue a submission, then wake the scheduler.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt, ValidationError> {
        let receipt = self.intake.submit(submission).await?;
        self.scheduler.notify();
        Ok(receipt)
    }

    /// Run one scheduling cycle inline. Returns the number of requests
    /// processed.
    pub async fn run_pending(&self) -> usize {
        self.scheduler.run_cycle().await
    }

    /// Start the scheduler worker and the session sweeper.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        vec![
            Arc::clone(&self.scheduler).spawn_worker(),
            Arc::clone(&self.sessions).spawn_sweeper(),
        ]
    }

    /// Context of one active session.
    pub async fn session(&self, session_id: &str) -> Option<ContextSnapshot> {
        self.sessions.snapshot(session_id).await
    }

    /// Session tracker handle.
    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    /// Recovery registry handle.
    pub fn registry(&self) -> &Arc<RecoveryRegistry> {
        &self.registry
    }

    /// Requests waiting to be analyzed.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Everything observable about the pipeline right now.
    pub async fn statistics(&self) -> StatisticsSnapshot {
        let external = ExternalFigures {
            breakers: self.registry.breaker_states(),
            error_counts: self.registry.error_counts(),
            recent_errors: self.registry.recent_errors(RECENT_ERRORS),
            deferred_operations: self.registry.deferred_count(),
            queue_depth: self.queue.len(),
            active_sessions: self.sessions.active_sessions().await,
        };
        StatisticsSnapshot::assemble(self.telemetry.snapshot(), external)
    }
}
