//! Recovery strategy registry and error handler.
//!
//! One [`RecoveryRegistry`] is shared (behind an `Arc`) by every gateway call.
//! It owns the circuit breakers, the per-category error counters and the
//! bounded error log, so breaker transitions and counter increments are
//! serialized through a single lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState, Permit};
use super::retry::RetryPolicy;
use crate::config::ResilienceConfig;
use crate::error::BackendError;

// ============================================================================
// Classification
// ============================================================================

/// Fixed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport failures reaching the backend.
    Network,
    /// Backend answered with an error or a malformed response.
    Module,
    /// Local persistence failures.
    Storage,
    /// Local resource not ready.
    Environment,
    /// Anything else.
    Unknown,
}

const NETWORK_HINTS: &[&str] = &[
    "network", "connection", "connect", "timeout", "timed out", "dns", "fetch", "socket",
    "unreachable",
];
const MODULE_HINTS: &[&str] = &["module", "analysis", "backend", "invalid response", "api error"];
const STORAGE_HINTS: &[&str] = &["storage", "quota", "database", "disk", "persist"];
const ENVIRONMENT_HINTS: &[&str] = &[
    "not ready", "not initialized", "environment", "context invalidated", "unavailable resource",
];

impl ErrorCategory {
    /// All categories.
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::Network,
        ErrorCategory::Module,
        ErrorCategory::Storage,
        ErrorCategory::Environment,
        ErrorCategory::Unknown,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Module => "module",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Environment => "environment",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Classify an error by type first, then by message.
    pub fn classify(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(backend) = err.downcast_ref::<BackendError>() {
            return if backend.is_transport() {
                ErrorCategory::Network
            } else {
                ErrorCategory::Module
            };
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            return match io.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::TimedOut
                | ErrorKind::BrokenPipe => ErrorCategory::Network,
                ErrorKind::NotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::AlreadyExists
                | ErrorKind::WriteZero
                | ErrorKind::UnexpectedEof => ErrorCategory::Storage,
                ErrorKind::WouldBlock | ErrorKind::Interrupted => ErrorCategory::Environment,
                _ => Self::classify_message(&io.to_string()),
            };
        }
        Self::classify_message(&err.to_string())
    }

    /// Classify from an error message alone.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let matches = |hints: &[&str]| hints.iter().any(|h| lower.contains(h));

        if matches(NETWORK_HINTS) {
            ErrorCategory::Network
        } else if matches(STORAGE_HINTS) {
            ErrorCategory::Storage
        } else if matches(ENVIRONMENT_HINTS) {
            ErrorCategory::Environment
        } else if matches(MODULE_HINTS) {
            ErrorCategory::Module
        } else {
            ErrorCategory::Unknown
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Isolated failure.
    Low,
    /// Recurring failure.
    Medium,
    /// Frequent failure or critical operation.
    High,
    /// Persistent failure.
    Critical,
}

impl Severity {
    fn bump(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

// ============================================================================
// Records and recovery
// ============================================================================

/// Static context describing where an error happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation name (e.g. "module_analysis").
    pub operation: String,
    /// Narrower scope such as a module name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Operation is flagged critical by its caller.
    pub critical: bool,
}

impl ErrorContext {
    /// Create a context for an operation.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            scope: None,
            critical: false,
        }
    }

    /// Narrow to a scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Flag as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Entry in the bounded error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub context: ErrorContext,
}

/// Category-specific recovery step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Retry against alternate endpoints, in order.
    AlternateEndpoints { endpoints: Vec<String> },
    /// Nothing left to try now; the operation was queued for later.
    QueuedForLater,
    /// Run the local heuristic analysis.
    LocalFallback,
    /// Clear local state and retry.
    ClearAndRetry { max_attempts: u32 },
    /// Wait for the local environment, then retry.
    WaitAndRetry { delay_ms: u64, max_attempts: u32 },
    /// No recovery available.
    None,
}

/// Result of handling one error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub recovery: RecoveryAction,
    /// Recovery can yield data usable in place of the failed result.
    pub fallback_available: bool,
    /// The caller may continue in a degraded mode.
    pub can_degrade: bool,
}

/// Key of a circuit breaker: category plus optional narrower scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BreakerKey {
    pub category: ErrorCategory,
    pub scope: Option<String>,
}

impl BreakerKey {
    /// Breaker shared by a whole category.
    pub fn category(category: ErrorCategory) -> Self {
        Self {
            category,
            scope: None,
        }
    }

    /// Breaker for one scope within a category.
    pub fn scoped(category: ErrorCategory, scope: impl Into<String>) -> Self {
        Self {
            category,
            scope: Some(scope.into()),
        }
    }
}

impl std::fmt::Display for BreakerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}", self.category, scope),
            None => write!(f, "{}", self.category),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Released,
}

/// Admission to one guarded call.
///
/// Report the result with [`BreakerGuard::succeed`], [`BreakerGuard::fail`]
/// or [`BreakerGuard::release`]. A guard dropped without a report (the call
/// panicked or its task was aborted) counts as a failure, so a half-open
/// trial can never stay in flight forever.
#[must_use = "dropping the guard records a failure"]
#[derive(Debug)]
pub struct BreakerGuard<'a> {
    registry: &'a RecoveryRegistry,
    key: BreakerKey,
    permit: Permit,
    settled: bool,
}

impl BreakerGuard<'_> {
    /// Breaker this guard belongs to.
    pub fn key(&self) -> &BreakerKey {
        &self.key
    }

    /// Kind of admission: normal or half-open trial.
    pub fn permit(&self) -> Permit {
        self.permit
    }

    /// The call succeeded.
    pub fn succeed(mut self) {
        self.settle(Outcome::Success);
    }

    /// The call failed.
    pub fn fail(mut self) {
        self.settle(Outcome::Failure);
    }

    /// The call says nothing about this breaker.
    pub fn release(mut self) {
        self.settle(Outcome::Released);
    }

    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.registry.settle(&self.key, self.permit, outcome);
    }
}

impl Drop for BreakerGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(breaker = %self.key, permit = ?self.permit, "Guarded call ended without an outcome");
            self.settle(Outcome::Failure);
        }
    }
}

/// Breaker state as exposed to observers.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub key: BreakerKey,
    #[serde(flatten)]
    pub summary: CircuitBreakerSummary,
}

/// Operation queued for later by network recovery.
#[derive(Debug, Clone, Serialize)]
pub struct DeferredOperation {
    pub context: ErrorContext,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    breakers: HashMap<BreakerKey, CircuitBreaker>,
    counts: HashMap<ErrorCategory, u64>,
    log: VecDeque<ErrorRecord>,
    deferred: VecDeque<DeferredOperation>,
}

/// Shared handle for breaker state, error counters and recovery strategies.
#[derive(Debug)]
pub struct RecoveryRegistry {
    config: ResilienceConfig,
    alternate_endpoints: Vec<String>,
    state: Mutex<RegistryState>,
}

impl RecoveryRegistry {
    /// Create a registry.
    pub fn new(config: ResilienceConfig, alternate_endpoints: Vec<String>) -> Self {
        Self {
            config,
            alternate_endpoints,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        // A panic while holding the lock cannot leave counters half-written,
        // so a poisoned guard is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Retry policy for a category.
    pub fn policy(&self, category: ErrorCategory) -> RetryPolicy {
        let retry = &self.config.retry;
        match category {
            ErrorCategory::Network => retry.network,
            ErrorCategory::Module => retry.module,
            ErrorCategory::Storage => retry.storage,
            ErrorCategory::Environment => retry.environment,
            ErrorCategory::Unknown => retry.unknown,
        }
    }

    // ------------------------------------------------------------------
    // Circuit breakers
    // ------------------------------------------------------------------

    /// Ask the breaker for `key` whether a call may proceed. `None` means
    /// the call is short-circuited.
    pub fn try_acquire(&self, key: &BreakerKey) -> Option<BreakerGuard<'_>> {
        let permit = self
            .lock()
            .breakers
            .entry(key.clone())
            .or_insert_with(|| CircuitBreaker::new(self.config.breaker.clone()))
            .try_acquire();
        permit.is_granted().then(|| BreakerGuard {
            registry: self,
            key: key.clone(),
            permit,
            settled: false,
        })
    }

    fn settle(&self, key: &BreakerKey, permit: Permit, outcome: Outcome) {
        let mut state = self.lock();
        let breaker = state
            .breakers
            .entry(key.clone())
            .or_insert_with(|| CircuitBreaker::new(self.config.breaker.clone()));
        match outcome {
            Outcome::Success => breaker.record_success(permit),
            Outcome::Failure => breaker.record_failure(permit),
            Outcome::Released => breaker.release(permit),
        }
    }

    /// Current breaker state for `key` (closed if never used).
    pub fn breaker_state(&self, key: &BreakerKey) -> CircuitState {
        self.lock()
            .breakers
            .get(key)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failures for `key`.
    pub fn consecutive_failures(&self, key: &BreakerKey) -> u32 {
        self.lock()
            .breakers
            .get(key)
            .map(|b| b.consecutive_failures())
            .unwrap_or(0)
    }

    /// All breakers, sorted by key.
    pub fn breaker_states(&self) -> Vec<BreakerStatus> {
        let state = self.lock();
        let mut statuses: Vec<BreakerStatus> = state
            .breakers
            .iter()
            .map(|(key, breaker)| BreakerStatus {
                key: key.clone(),
                summary: breaker.summary(),
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Reset every breaker to closed.
    pub fn reset_breakers(&self) {
        for breaker in self.lock().breakers.values_mut() {
            breaker.reset();
        }
    }

    // ------------------------------------------------------------------
    // Error handling
    // ------------------------------------------------------------------

    fn frequency_severity(&self, count: u64) -> Severity {
        let t = &self.config.severity;
        if count >= t.critical_after {
            Severity::Critical
        } else if count >= t.high_after {
            Severity::High
        } else if count >= t.medium_after {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Severity for the `count`-th occurrence of a category.
    pub fn severity_for(&self, count: u64, critical: bool) -> Severity {
        let base = self.frequency_severity(count);
        if critical {
            base.bump().max(Severity::High)
        } else {
            base
        }
    }

    /// Graceful-degradation verdict for an operation.
    pub fn can_degrade(&self, operation: &str) -> bool {
        !self
            .config
            .critical_operations
            .iter()
            .any(|op| op == operation)
    }

    fn recovery_for(&self, category: ErrorCategory) -> (RecoveryAction, bool) {
        match category {
            ErrorCategory::Network => {
                let policy = self.policy(ErrorCategory::Network);
                let endpoints: Vec<String> = self
                    .alternate_endpoints
                    .iter()
                    .take(policy.max_attempts as usize)
                    .cloned()
                    .collect();
                if endpoints.is_empty() {
                    (RecoveryAction::QueuedForLater, false)
                } else {
                    (RecoveryAction::AlternateEndpoints { endpoints }, false)
                }
            }
            ErrorCategory::Module => (RecoveryAction::LocalFallback, true),
            ErrorCategory::Storage => (
                RecoveryAction::ClearAndRetry {
                    max_attempts: self.policy(ErrorCategory::Storage).max_attempts,
                },
                false,
            ),
            ErrorCategory::Environment => {
                let policy = self.policy(ErrorCategory::Environment);
                (
                    RecoveryAction::WaitAndRetry {
                        delay_ms: policy.base_delay_ms,
                        max_attempts: policy.max_attempts,
                    },
                    false,
                )
            }
            ErrorCategory::Unknown => (RecoveryAction::None, false),
        }
    }

    /// Classify, record and plan recovery for an error.
    pub fn handle(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: ErrorContext,
    ) -> ErrorReport {
        let category = ErrorCategory::classify(error);
        self.handle_categorized(category, error.to_string(), context)
    }

    /// Record an error whose category is already known.
    pub fn handle_categorized(
        &self,
        category: ErrorCategory,
        message: String,
        context: ErrorContext,
    ) -> ErrorReport {
        let (recovery, fallback_available) = self.recovery_for(category);
        let can_degrade = self.can_degrade(&context.operation);

        let severity = {
            let mut state = self.lock();
            let count = state.counts.entry(category).or_insert(0);
            *count += 1;
            let severity = self.severity_for(*count, context.critical);

            if state.log.len() >= self.config.max_error_log.max(1) {
                state.log.pop_front();
            }
            state.log.push_back(ErrorRecord {
                category,
                severity,
                timestamp: Utc::now(),
                message: message.clone(),
                context: context.clone(),
            });
            severity
        };

        if severity >= Severity::High {
            warn!(
                category = %category,
                severity = ?severity,
                operation = %context.operation,
                error = %message,
                "Error recorded"
            );
        } else {
            debug!(
                category = %category,
                severity = ?severity,
                operation = %context.operation,
                error = %message,
                "Error recorded"
            );
        }

        ErrorReport {
            category,
            severity,
            recovery,
            fallback_available,
            can_degrade,
        }
    }

    /// Queue an operation for later after network recovery ran out of options.
    pub fn defer(&self, context: ErrorContext) {
        let mut state = self.lock();
        if state.deferred.len() >= self.config.max_deferred.max(1) {
            state.deferred.pop_front();
        }
        state.deferred.push_back(DeferredOperation {
            context,
            queued_at: Utc::now(),
        });
    }

    /// Take every queued operation.
    pub fn drain_deferred(&self) -> Vec<DeferredOperation> {
        self.lock().deferred.drain(..).collect()
    }

    /// Number of queued operations.
    pub fn deferred_count(&self) -> usize {
        self.lock().deferred.len()
    }

    /// Error counts per category.
    pub fn error_counts(&self) -> BTreeMap<ErrorCategory, u64> {
        self.lock()
            .counts
            .iter()
            .map(|(category, count)| (*category, *count))
            .collect()
    }

    /// Most recent errors, newest last.
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let state = self.lock();
        let skip = state.log.len().saturating_sub(limit);
        state.log.iter().skip(skip).cloned().collect()
    }

    /// Clear counters and the error log; breakers are left alone.
    pub fn clear_errors(&self) {
        let mut state = self.lock();
        state.counts.clear();
        state.log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, SeverityThresholds};

    fn registry() -> RecoveryRegistry {
        let config = ResilienceConfig {
            breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown_ms: 60_000,
            },
            severity: SeverityThresholds {
                medium_after: 2,
                high_after: 3,
                critical_after: 4,
            },
            max_error_log: 3,
            max_deferred: 2,
            ..ResilienceConfig::default()
        };
        RecoveryRegistry::new(config, Vec::new())
    }

    #[test]
    fn test_classify_backend_errors() {
        let err = BackendError::Timeout { timeout_ms: 10 };
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::Network);

        let err = BackendError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::Module);
    }

    #[test]
    fn test_classify_io_errors() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::Network);

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::Storage);
    }

    #[test]
    fn test_classify_by_message() {
        assert_eq!(
            ErrorCategory::classify_message("Failed to fetch"),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::classify_message("QUOTA_BYTES quota exceeded"),
            ErrorCategory::Storage
        );
        assert_eq!(
            ErrorCategory::classify_message("Extension context invalidated"),
            ErrorCategory::Environment
        );
        assert_eq!(
            ErrorCategory::classify_message("analysis module crashed"),
            ErrorCategory::Module
        );
        assert_eq!(
            ErrorCategory::classify_message("something odd"),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_severity_escalates_with_frequency() {
        let registry = registry();
        let ctx = ErrorContext::new("module_analysis");
        let severities: Vec<Severity> = (0..4)
            .map(|_| {
                registry
                    .handle_categorized(ErrorCategory::Module, "bad".into(), ctx.clone())
                    .severity
            })
            .collect();
        assert_eq!(
            severities,
            vec![
                Severity::Low,
                Severity::Medium,
                Severity::High,
                Severity::Critical
            ]
        );
    }

    #[test]
    fn test_critical_operation_raises_severity() {
        let registry = registry();
        assert_eq!(registry.severity_for(1, true), Severity::High);
        assert_eq!(registry.severity_for(3, true), Severity::Critical);
        assert_eq!(registry.severity_for(1, false), Severity::Low);
    }

    #[test]
    fn test_error_log_is_bounded() {
        let registry = registry();
        for i in 0..5 {
            registry.handle_categorized(
                ErrorCategory::Unknown,
                format!("error {}", i),
                ErrorContext::new("op"),
            );
        }
        let recent = registry.recent_errors(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "error 2");
        assert_eq!(recent[2].message, "error 4");
        assert_eq!(registry.error_counts()[&ErrorCategory::Unknown], 5);
    }

    #[test]
    fn test_graceful_degradation_verdict() {
        let registry = registry();
        assert!(registry.can_degrade("module_analysis"));
        assert!(!registry.can_degrade("message_intake"));

        let report = registry.handle_categorized(
            ErrorCategory::Unknown,
            "x".into(),
            ErrorContext::new("initialize"),
        );
        assert!(!report.can_degrade);
        assert_eq!(report.recovery, RecoveryAction::None);
    }

    #[test]
    fn test_recovery_strategies() {
        let registry = registry();
        let ctx = ErrorContext::new("op");

        let report =
            registry.handle_categorized(ErrorCategory::Network, "x".into(), ctx.clone());
        assert_eq!(report.recovery, RecoveryAction::QueuedForLater);
        assert!(!report.fallback_available);

        let report = registry.handle_categorized(ErrorCategory::Module, "x".into(), ctx.clone());
        assert_eq!(report.recovery, RecoveryAction::LocalFallback);
        assert!(report.fallback_available);

        let report = registry.handle_categorized(ErrorCategory::Storage, "x".into(), ctx);
        assert!(matches!(report.recovery, RecoveryAction::ClearAndRetry { .. }));
    }

    #[test]
    fn test_network_recovery_uses_alternates() {
        let registry = RecoveryRegistry::new(
            ResilienceConfig::default(),
            vec!["http://a".to_string(), "http://b".to_string()],
        );
        let report = registry.handle_categorized(
            ErrorCategory::Network,
            "connection refused".into(),
            ErrorContext::new("module_analysis"),
        );
        assert_eq!(
            report.recovery,
            RecoveryAction::AlternateEndpoints {
                endpoints: vec!["http://a".to_string(), "http://b".to_string()]
            }
        );
    }

    #[test]
    fn test_breakers_are_keyed_by_scope() {
        let registry = registry();
        let x = BreakerKey::scoped(ErrorCategory::Module, "x");
        let y = BreakerKey::scoped(ErrorCategory::Module, "y");

        registry.try_acquire(&x).unwrap().fail();
        registry.try_acquire(&x).unwrap().fail();
        assert_eq!(registry.breaker_state(&x), CircuitState::Open);
        assert!(registry.try_acquire(&x).is_none());

        assert_eq!(registry.breaker_state(&y), CircuitState::Closed);
        let guard = registry.try_acquire(&y).unwrap();
        assert_eq!(guard.permit(), Permit::Allowed);
        guard.succeed();

        let states = registry.breaker_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].key.to_string(), "module:x");
    }

    #[test]
    fn test_unsettled_guard_counts_as_failure() {
        let registry = registry();
        let key = BreakerKey::scoped(ErrorCategory::Module, "x");

        drop(registry.try_acquire(&key).unwrap());
        assert_eq!(registry.consecutive_failures(&key), 1);

        let guard = registry.try_acquire(&key).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("analysis call panicked");
        }));
        assert!(result.is_err());
        assert_eq!(registry.breaker_state(&key), CircuitState::Open);
    }

    #[test]
    fn test_released_guard_leaves_counts_alone() {
        let registry = registry();
        let key = BreakerKey::scoped(ErrorCategory::Network, "x");

        registry.try_acquire(&key).unwrap().fail();
        registry.try_acquire(&key).unwrap().release();
        assert_eq!(registry.consecutive_failures(&key), 1);
        assert_eq!(registry.breaker_state(&key), CircuitState::Closed);
    }

    #[test]
    fn test_reset_breakers_closes_open_breakers() {
        let registry = registry();
        let key = BreakerKey::scoped(ErrorCategory::Module, "x");
        registry.try_acquire(&key).unwrap().fail();
        registry.try_acquire(&key).unwrap().fail();
        assert_eq!(registry.breaker_state(&key), CircuitState::Open);

        registry.reset_breakers();
        assert_eq!(registry.breaker_state(&key), CircuitState::Closed);
        registry.try_acquire(&key).unwrap().succeed();
        assert_eq!(registry.consecutive_failures(&key), 0);
    }

    #[test]
    fn test_deferred_queue_bounded() {
        let registry = registry();
        for op in ["a", "b", "c"] {
            registry.defer(ErrorContext::new(op));
        }
        assert_eq!(registry.deferred_count(), 2);
        let drained = registry.drain_deferred();
        assert_eq!(drained[0].context.operation, "b");
        assert_eq!(registry.deferred_count(), 0);
    }
}
