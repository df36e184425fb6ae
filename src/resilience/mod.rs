//! Failure handling shared by every backend call.
//!
//! - [`circuit_breaker`]: closed/open/half-open state machine
//! - [`retry`]: exponential backoff policy
//! - [`registry`]: error classification, severity, bounded error log and
//!   category-specific recovery strategies

pub mod circuit_breaker;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSummary, CircuitState, Permit};
pub use registry::{
    BreakerKey, BreakerStatus, DeferredOperation, ErrorCategory, ErrorContext, ErrorRecord,
    ErrorReport, RecoveryAction, RecoveryRegistry, Severity,
};
pub use retry::RetryPolicy;
