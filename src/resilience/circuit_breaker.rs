//! Circuit breaker guarding calls to the analysis backend.
//!
//! Uses the closed/open/half-open state machine:
//!
//! - **Closed**: normal operation, calls are allowed
//! - **Open**: calls short-circuit until the cooldown elapses
//! - **Half-Open**: exactly one trial call is in flight; its outcome decides
//!   between closed and a freshly cooled-down open

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Blocking all calls - too many failures
    Open,
    /// Testing recovery - allowing one call
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Answer to a request for permission to call the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Breaker closed.
    Allowed,
    /// Breaker half-open; this caller holds the single trial.
    Trial,
    /// Breaker open (or a trial is already in flight).
    Rejected,
}

impl Permit {
    /// Whether the caller may proceed.
    pub fn is_granted(&self) -> bool {
        !matches!(self, Permit::Rejected)
    }
}

/// Circuit breaker for one category/scope of backend calls.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Current state
    state: CircuitState,

    /// Number of consecutive failures
    consecutive_failures: u32,

    /// Total failures since creation
    total_failures: u64,

    /// Total successes since creation
    total_successes: u64,

    /// Number of calls rejected while open
    short_circuits: u64,

    /// When the breaker last opened
    opened_at: Option<Instant>,

    /// A half-open trial has been handed out and not yet reported
    trial_in_flight: bool,

    /// Configuration
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            short_circuits: 0,
            opened_at: None,
            trial_in_flight: false,
            config,
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.config.cooldown_ms)
    }

    /// Ask for permission to call the backend now.
    pub fn try_acquire(&mut self) -> Permit {
        self.try_acquire_at(Instant::now())
    }

    /// Ask for permission to call the backend at `now`.
    pub fn try_acquire_at(&mut self, now: Instant) -> Permit {
        match self.state {
            CircuitState::Closed => Permit::Allowed,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened) >= self.cooldown())
                    .unwrap_or(true);
                if elapsed {
                    self.transition_to(CircuitState::HalfOpen);
                    self.trial_in_flight = true;
                    Permit::Trial
                } else {
                    self.short_circuits += 1;
                    Permit::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    self.short_circuits += 1;
                    Permit::Rejected
                } else {
                    self.trial_in_flight = true;
                    Permit::Trial
                }
            }
        }
    }

    /// Record a successful call admitted with `permit`.
    ///
    /// Only the trial call moves a half-open breaker; a late success from a
    /// call admitted while the breaker was still closed changes no state.
    pub fn record_success(&mut self, permit: Permit) {
        self.total_successes += 1;

        match (self.state, permit) {
            (CircuitState::HalfOpen, Permit::Trial) => {
                self.consecutive_failures = 0;
                self.trial_in_flight = false;
                self.opened_at = None;
                self.transition_to(CircuitState::Closed);
            }
            (CircuitState::Closed, _) => self.consecutive_failures = 0,
            _ => {
                tracing::debug!(state = %self.state, "Late success from a stale call - ignoring");
            }
        }
    }

    /// Record a failed call admitted with `permit`.
    pub fn record_failure(&mut self, permit: Permit) {
        self.record_failure_at(permit, Instant::now());
    }

    /// Record a failed call admitted with `permit` at `now`.
    pub fn record_failure_at(&mut self, permit: Permit, now: Instant) {
        self.total_failures += 1;

        match (self.state, permit) {
            (CircuitState::Closed, _) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.opened_at = Some(now);
                    self.transition_to(CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, Permit::Trial) => {
                // Failed trial - reopen with a fresh cooldown
                self.consecutive_failures += 1;
                self.trial_in_flight = false;
                self.opened_at = Some(now);
                self.transition_to(CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Give back a permit whose call produced no verdict for this breaker.
    /// A returned trial lets the next caller try instead.
    pub fn release(&mut self, permit: Permit) {
        if permit == Permit::Trial && self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    /// Transition to a new state.
    fn transition_to(&mut self, new_state: CircuitState) {
        tracing::info!(
            from = %self.state,
            to = %new_state,
            consecutive_failures = self.consecutive_failures,
            "Circuit breaker state transition"
        );
        self.state = new_state;
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Get consecutive failures count.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get total failures count.
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    /// Get total successes count.
    pub fn total_successes(&self) -> u64 {
        self.total_successes
    }

    /// Check if the circuit is open (blocking calls).
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Get time until a trial call is allowed (if open).
    pub fn time_until_recovery_at(&self, now: Instant) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        self.opened_at.map(|opened| {
            self.cooldown()
                .saturating_sub(now.saturating_duration_since(opened))
        })
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&mut self) {
        tracing::info!(from = %self.state, "Circuit breaker manually reset to closed");
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    /// Get a summary of the current state for display.
    pub fn summary(&self) -> CircuitBreakerSummary {
        CircuitBreakerSummary {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            short_circuits: self.short_circuits,
            recovery_in_ms: self
                .time_until_recovery_at(Instant::now())
                .map(|d| d.as_millis() as u64),
        }
    }
}

/// Summary of circuit breaker state for display.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSummary {
    /// Current state
    pub state: CircuitState,
    /// Number of consecutive failures
    pub consecutive_failures: u32,
    /// Total failures
    pub total_failures: u64,
    /// Total successes
    pub total_successes: u64,
    /// Calls rejected without reaching the backend
    pub short_circuits: u64,
    /// Milliseconds until a trial call is allowed (if open)
    pub recovery_in_ms: Option<u64>,
}

impl std::fmt::Display for CircuitBreakerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circuit Breaker: {} ", self.state.to_string().to_uppercase())?;

        match self.state {
            CircuitState::Closed => {
                write!(f, "({} consecutive failures)", self.consecutive_failures)
            }
            CircuitState::Open => match self.recovery_in_ms {
                Some(ms) if ms >= 1000 => write!(f, "(trial in {}s)", ms / 1000),
                Some(ms) => write!(f, "(trial in {}ms)", ms),
                None => write!(f, "(trial pending)"),
            },
            CircuitState::HalfOpen => write!(f, "(trial in flight)"),
        }
    }
}
