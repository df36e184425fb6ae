//! Guarded calls to the analysis backend.
//!
//! Every module call goes through [`AnalysisGateway::invoke`]. Each attempt
//! is admitted by the module's network and module breakers in the shared
//! [`RecoveryRegistry`] and time-boxed; failures are retried under the
//! policy of their error category. When the backend cannot produce a result
//! the gateway runs network recovery, then the local heuristic fallback if
//! the operation may degrade.

pub mod heuristics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::{AnalysisBackend, ModuleRequest, ModuleResponse, Route};
use crate::error::BackendError;
use crate::intake::AnalysisRequest;
use crate::resilience::{
    BreakerKey, ErrorCategory, ErrorContext, ErrorReport, RecoveryAction, RecoveryRegistry,
};
use crate::types::{ModuleId, ModuleResult, ModuleStatus};

/// Operation name used for module calls in the error log.
pub const MODULE_OPERATION: &str = "module_analysis";

/// What one module produced for one request.
#[derive(Debug, Clone)]
pub enum ModuleOutcome {
    /// A result, from the backend or from the local fallback.
    Completed(ModuleResult),
    /// No result could be produced.
    Failed { module: ModuleId, error: String },
}

impl ModuleOutcome {
    /// Module the outcome belongs to.
    pub fn module(&self) -> ModuleId {
        match self {
            ModuleOutcome::Completed(result) => result.module,
            ModuleOutcome::Failed { module, .. } => *module,
        }
    }

    /// Status recorded in the synthesized analysis.
    pub fn status(&self) -> ModuleStatus {
        match self {
            ModuleOutcome::Completed(result) if result.fallback => ModuleStatus::Fallback,
            ModuleOutcome::Completed(_) => ModuleStatus::Completed,
            ModuleOutcome::Failed { .. } => ModuleStatus::Failed,
        }
    }
}

enum Attempt {
    Success(ModuleResponse),
    ShortCircuited(BreakerKey),
    Failed(BackendError),
}

/// Gateway between the orchestrator and the analysis backend.
pub struct AnalysisGateway {
    backend: Arc<dyn AnalysisBackend>,
    registry: Arc<RecoveryRegistry>,
    call_timeout: Duration,
    fallback_confidence: f64,
}

impl AnalysisGateway {
    /// Create a gateway.
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        registry: Arc<RecoveryRegistry>,
        call_timeout: Duration,
        fallback_confidence: f64,
    ) -> Self {
        Self {
            backend,
            registry,
            call_timeout,
            fallback_confidence,
        }
    }

    /// Shared registry handle.
    pub fn registry(&self) -> &Arc<RecoveryRegistry> {
        &self.registry
    }

    /// Breaker counting `category` failures of one module's calls.
    pub fn breaker_key(category: ErrorCategory, module: ModuleId) -> BreakerKey {
        BreakerKey::scoped(category, module.as_str())
    }

    /// Run one module for one request. Never returns an error: failures end
    /// as a fallback result or [`ModuleOutcome::Failed`].
    ///
    /// The retry budget and backoff follow the category of the latest
    /// failure, so a network error is retried under the network policy and
    /// a module error under the module policy.
    pub async fn invoke(&self, request: ModuleRequest, source: &AnalysisRequest) -> ModuleOutcome {
        let module = request.module;
        let context = ErrorContext::new(MODULE_OPERATION).with_scope(module.as_str());
        let primary = Route::primary(request.config.endpoint.clone());
        let started = Instant::now();

        let mut last_error = String::new();
        let mut last_report: Option<ErrorReport> = None;
        let mut attempts = 0u32;

        loop {
            match self.attempt(module, &primary, &request).await {
                Attempt::Success(response) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    return ModuleOutcome::Completed(response.into_result(module, elapsed));
                }
                Attempt::ShortCircuited(key) => {
                    debug!(module = %module, breaker = %key, "Circuit open, skipping backend call");
                    last_error = format!("circuit open for {}", key);
                    break;
                }
                Attempt::Failed(err) => {
                    let report = self.registry.handle(&err, context.clone());
                    last_error = err.to_string();
                    attempts += 1;

                    let policy = self.registry.policy(report.category);
                    last_report = Some(report);
                    if attempts >= policy.max_attempts.max(1) {
                        break;
                    }
                    let delay = policy.delay(attempts - 1);
                    warn!(
                        module = %module,
                        retry = attempts,
                        delay_ms = delay.as_millis(),
                        "Retrying analysis module call"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if let Some(report) = last_report.as_ref().filter(|r| r.category == ErrorCategory::Network) {
            if let Some(response) = self
                .recover_network(&request, &report.recovery, &context)
                .await
            {
                let elapsed = started.elapsed().as_millis() as u64;
                return ModuleOutcome::Completed(response.into_result(module, elapsed));
            }
        }

        let can_degrade = last_report
            .map(|report| report.can_degrade)
            .unwrap_or_else(|| self.registry.can_degrade(MODULE_OPERATION));
        self.fallback(&request, source, last_error, can_degrade, started)
    }

    /// One time-boxed backend call, admitted by every breaker that can
    /// observe it.
    async fn attempt(&self, module: ModuleId, route: &Route, request: &ModuleRequest) -> Attempt {
        let network_key = Self::breaker_key(ErrorCategory::Network, module);
        let Some(network) = self.registry.try_acquire(&network_key) else {
            return Attempt::ShortCircuited(network_key);
        };
        let module_key = Self::breaker_key(ErrorCategory::Module, module);
        let Some(service) = self.registry.try_acquire(&module_key) else {
            network.release();
            return Attempt::ShortCircuited(module_key);
        };

        let result = match tokio::time::timeout(self.call_timeout, self.backend.analyze(route, request)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                timeout_ms: self.call_timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(response) => {
                network.succeed();
                service.succeed();
                Attempt::Success(response)
            }
            Err(err) => {
                if ErrorCategory::classify(&err) == ErrorCategory::Network {
                    // The service was never reached
                    network.fail();
                    service.release();
                } else {
                    // The service answered, so the network path works
                    network.succeed();
                    service.fail();
                }
                Attempt::Failed(err)
            }
        }
    }

    /// Try each alternate endpoint once, then queue the operation for later.
    async fn recover_network(
        &self,
        request: &ModuleRequest,
        recovery: &RecoveryAction,
        context: &ErrorContext,
    ) -> Option<ModuleResponse> {
        if let RecoveryAction::AlternateEndpoints { endpoints } = recovery {
            for base_url in endpoints {
                let route = Route::alternate(request.config.endpoint.clone(), base_url.clone());
                match self.attempt(request.module, &route, request).await {
                    Attempt::Success(response) => {
                        debug!(module = %request.module, base_url = %base_url, "Alternate endpoint succeeded");
                        return Some(response);
                    }
                    Attempt::ShortCircuited(_) => break,
                    Attempt::Failed(err) => {
                        self.registry.handle(&err, context.clone());
                    }
                }
            }
        }

        self.registry.defer(context.clone());
        None
    }

    fn fallback(
        &self,
        request: &ModuleRequest,
        source: &AnalysisRequest,
        reason: String,
        can_degrade: bool,
        started: Instant,
    ) -> ModuleOutcome {
        let module = request.module;
        if !request.config.fallback_enabled || !can_degrade {
            return ModuleOutcome::Failed {
                module,
                error: reason,
            };
        }

        warn!(module = %module, reason = %reason, "Using local fallback analysis");
        let result = heuristics::analyze(
            module,
            &source.message,
            &source.context,
            request.config.sensitivity,
        )
        .into_fallback(self.fallback_confidence)
        .with_duration_ms(started.elapsed().as_millis() as u64);
        ModuleOutcome::Completed(result)
    }
}
