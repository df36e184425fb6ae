use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;

use serde::Serialize;

use crate::error::AppError;
use crate::resilience::RetryPolicy;
use crate::types::ModuleId;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub resilience: ResilienceConfig,
    pub intake: IntakeConfig,
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
    pub synthesis: SynthesisConfig,
    pub modules: ModulesConfig,
    pub telemetry: TelemetryConfig,
}

/// Analysis backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_key: String,
    pub base_url: String,
    /// Tried in order by network recovery once the primary is exhausted
    pub alternate_urls: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Upper bound for a single backend attempt
    pub timeout_ms: u64,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time the breaker stays open before allowing a trial call
    pub cooldown_ms: u64,
}

/// Retry policies per error category
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub network: RetryPolicy,
    pub module: RetryPolicy,
    pub storage: RetryPolicy,
    pub environment: RetryPolicy,
    pub unknown: RetryPolicy,
}

/// Occurrence counts at which a category's errors escalate in severity
#[derive(Debug, Clone)]
pub struct SeverityThresholds {
    pub medium_after: u64,
    pub high_after: u64,
    pub critical_after: u64,
}

/// Error handling and recovery configuration
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub severity: SeverityThresholds,
    /// Capacity of the error ring buffer
    pub max_error_log: usize,
    /// Capacity of the queued-for-later list
    pub max_deferred: usize,
    /// Operations that must not degrade gracefully
    pub critical_operations: Vec<String>,
}

/// Intake validation and priority configuration
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub max_message_length: usize,
    pub high_criticality_platforms: Vec<String>,
    pub base_priority: u32,
    pub flagged_boost: u32,
    pub platform_boost: u32,
    pub long_session_boost: u32,
    pub long_session_secs: i64,
}

/// Batch scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    /// Pause between batches, on top of the cooperative yield
    pub batch_delay_ms: u64,
    pub max_queue_size: usize,
}

/// Session context tracking configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub timeout_secs: i64,
    pub sweep_interval_secs: u64,
    pub max_window_messages: usize,
    pub window_duration_secs: i64,
    pub escalation_window: usize,
    pub escalation_delta: f64,
    pub medium_repetition: usize,
    pub high_repetition: usize,
}

/// Synthesis thresholds
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub high_risk_threshold: f64,
    pub medium_risk_threshold: f64,
    pub low_confidence_threshold: f64,
    /// Confidence ceiling for locally produced results
    pub fallback_confidence: f64,
}

/// Per-module settings, also sent to the backend as module configuration
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSettings {
    pub endpoint: String,
    pub enabled: bool,
    pub fallback_enabled: bool,
    pub sensitivity: f64,
}

/// Analysis module configuration
#[derive(Debug, Clone)]
pub struct ModulesConfig {
    pub modules: BTreeMap<ModuleId, ModuleSettings>,
}

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Capacity of the analysis history ring buffer
    pub max_history: usize,
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let backend = BackendConfig {
            api_key: env::var("ANALYSIS_API_KEY").map_err(|_| AppError::Config {
                message: "ANALYSIS_API_KEY is required".to_string(),
            })?,
            base_url: env::var("ANALYSIS_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8700".to_string()),
            alternate_urls: parse_env_list("ANALYSIS_ALTERNATE_URLS", &[]),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", RequestConfig::default().timeout_ms),
        };

        let config = Config {
            backend,
            logging,
            request,
            resilience: ResilienceConfig::from_env(),
            intake: IntakeConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            session: SessionConfig::from_env(),
            synthesis: SynthesisConfig::from_env(),
            modules: ModulesConfig::from_env(),
            telemetry: TelemetryConfig {
                max_history: parse_env("MAX_HISTORY", TelemetryConfig::default().max_history),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |message: &str| {
            Err(AppError::Config {
                message: message.to_string(),
            })
        };

        if self.scheduler.batch_size == 0 {
            return invalid("SCHEDULER_BATCH_SIZE must be at least 1");
        }
        if self.resilience.breaker.failure_threshold == 0 {
            return invalid("BREAKER_FAILURE_THRESHOLD must be at least 1");
        }
        if self.session.max_window_messages == 0 {
            return invalid("SESSION_MAX_WINDOW must be at least 1");
        }
        if !self.modules.modules.values().any(|m| m.enabled) {
            return invalid("at least one analysis module must be enabled");
        }
        Ok(())
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            network: RetryPolicy::new(3, 1000, 2.0, 10_000),
            module: RetryPolicy::new(2, 500, 2.0, 5000),
            storage: RetryPolicy::new(2, 100, 2.0, 1000),
            environment: RetryPolicy::new(3, 250, 1.5, 2000),
            unknown: RetryPolicy::new(1, 0, 1.0, 0),
        }
    }
}

impl RetryConfig {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            network: RetryPolicy::from_env("RETRY_NETWORK", defaults.network),
            module: RetryPolicy::from_env("RETRY_MODULE", defaults.module),
            storage: RetryPolicy::from_env("RETRY_STORAGE", defaults.storage),
            environment: RetryPolicy::from_env("RETRY_ENVIRONMENT", defaults.environment),
            unknown: RetryPolicy::from_env("RETRY_UNKNOWN", defaults.unknown),
        }
    }
}

impl RetryPolicy {
    /// Read `<PREFIX>_MAX_ATTEMPTS`, `_BASE_DELAY_MS`, `_MULTIPLIER` and `_MAX_DELAY_MS`.
    fn from_env(prefix: &str, default: RetryPolicy) -> Self {
        RetryPolicy::new(
            parse_env(&format!("{}_MAX_ATTEMPTS", prefix), default.max_attempts),
            parse_env(&format!("{}_BASE_DELAY_MS", prefix), default.base_delay_ms),
            parse_env(&format!("{}_MULTIPLIER", prefix), default.multiplier),
            parse_env(&format!("{}_MAX_DELAY_MS", prefix), default.max_delay_ms),
        )
    }
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            medium_after: 5,
            high_after: 10,
            critical_after: 20,
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            severity: SeverityThresholds::default(),
            max_error_log: 100,
            max_deferred: 50,
            critical_operations: vec!["initialize".to_string(), "message_intake".to_string()],
        }
    }
}

impl ResilienceConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            breaker: CircuitBreakerConfig {
                failure_threshold: parse_env(
                    "BREAKER_FAILURE_THRESHOLD",
                    d.breaker.failure_threshold,
                ),
                cooldown_ms: parse_env("BREAKER_COOLDOWN_MS", d.breaker.cooldown_ms),
            },
            retry: RetryConfig::from_env(),
            severity: SeverityThresholds {
                medium_after: parse_env("SEVERITY_MEDIUM_AFTER", d.severity.medium_after),
                high_after: parse_env("SEVERITY_HIGH_AFTER", d.severity.high_after),
                critical_after: parse_env("SEVERITY_CRITICAL_AFTER", d.severity.critical_after),
            },
            max_error_log: parse_env("MAX_ERROR_LOG", d.max_error_log),
            max_deferred: parse_env("MAX_DEFERRED", d.max_deferred),
            critical_operations: parse_env_list(
                "CRITICAL_OPERATIONS",
                &["initialize", "message_intake"],
            ),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_message_length: 10_000,
            high_criticality_platforms: vec!["chatgpt".to_string()],
            base_priority: 1,
            flagged_boost: 10,
            platform_boost: 5,
            long_session_boost: 2,
            long_session_secs: 300,
        }
    }
}

impl IntakeConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_message_length: parse_env("MAX_MESSAGE_LENGTH", d.max_message_length),
            high_criticality_platforms: parse_env_list(
                "HIGH_CRITICALITY_PLATFORMS",
                &["chatgpt"],
            )
            .into_iter()
            .map(|p| p.to_lowercase())
            .collect(),
            base_priority: parse_env("PRIORITY_BASE", d.base_priority),
            flagged_boost: parse_env("PRIORITY_FLAGGED_BOOST", d.flagged_boost),
            platform_boost: parse_env("PRIORITY_PLATFORM_BOOST", d.platform_boost),
            long_session_boost: parse_env("PRIORITY_LONG_SESSION_BOOST", d.long_session_boost),
            long_session_secs: parse_env("PRIORITY_LONG_SESSION_SECS", d.long_session_secs),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 0,
            max_queue_size: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            batch_size: parse_env("SCHEDULER_BATCH_SIZE", d.batch_size),
            batch_delay_ms: parse_env("SCHEDULER_BATCH_DELAY_MS", d.batch_delay_ms),
            max_queue_size: parse_env("SCHEDULER_MAX_QUEUE_SIZE", d.max_queue_size),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1800, // 30 minutes
            sweep_interval_secs: 60,
            max_window_messages: 50,
            window_duration_secs: 3600,
            escalation_window: 5,
            escalation_delta: 1.0,
            medium_repetition: 3,
            high_repetition: 5,
        }
    }
}

impl SessionConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            timeout_secs: parse_env("SESSION_TIMEOUT_SECS", d.timeout_secs),
            sweep_interval_secs: parse_env("SESSION_SWEEP_INTERVAL_SECS", d.sweep_interval_secs),
            max_window_messages: parse_env("SESSION_MAX_WINDOW", d.max_window_messages),
            window_duration_secs: parse_env("SESSION_WINDOW_SECS", d.window_duration_secs),
            escalation_window: parse_env("ESCALATION_WINDOW", d.escalation_window),
            escalation_delta: parse_env("ESCALATION_DELTA", d.escalation_delta),
            medium_repetition: parse_env("REPETITION_MEDIUM", d.medium_repetition),
            high_repetition: parse_env("REPETITION_HIGH", d.high_repetition),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            high_risk_threshold: 0.7,
            medium_risk_threshold: 0.4,
            low_confidence_threshold: 0.5,
            fallback_confidence: 0.3,
        }
    }
}

impl SynthesisConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            high_risk_threshold: parse_env("HIGH_RISK_THRESHOLD", d.high_risk_threshold),
            medium_risk_threshold: parse_env("MEDIUM_RISK_THRESHOLD", d.medium_risk_threshold),
            low_confidence_threshold: parse_env(
                "LOW_CONFIDENCE_THRESHOLD",
                d.low_confidence_threshold,
            ),
            fallback_confidence: parse_env("FALLBACK_CONFIDENCE", d.fallback_confidence),
        }
    }
}

impl ModuleSettings {
    fn default_for(id: ModuleId) -> Self {
        Self {
            endpoint: format!("{}-v1", id.as_str().replace('_', "-")),
            enabled: true,
            fallback_enabled: true,
            sensitivity: 0.5,
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            modules: ModuleId::ALL
                .into_iter()
                .map(|id| (id, ModuleSettings::default_for(id)))
                .collect(),
        }
    }
}

impl ModulesConfig {
    /// Load from `MODULE_<NAME>_{ENABLED,ENDPOINT,FALLBACK,SENSITIVITY}`.
    pub fn from_env() -> Self {
        let modules = ModuleId::ALL
            .into_iter()
            .map(|id| {
                let d = ModuleSettings::default_for(id);
                let prefix = format!("MODULE_{}", id.as_str().to_uppercase());
                let settings = ModuleSettings {
                    endpoint: env::var(format!("{}_ENDPOINT", prefix)).unwrap_or(d.endpoint),
                    enabled: parse_env(&format!("{}_ENABLED", prefix), d.enabled),
                    fallback_enabled: parse_env(&format!("{}_FALLBACK", prefix), d.fallback_enabled),
                    sensitivity: parse_env(&format!("{}_SENSITIVITY", prefix), d.sensitivity),
                };
                (id, settings)
            })
            .collect();
        Self { modules }
    }

    /// Settings for one module.
    pub fn get(&self, id: ModuleId) -> Option<&ModuleSettings> {
        self.modules.get(&id)
    }

    /// Mutable settings for one module.
    pub fn get_mut(&mut self, id: ModuleId) -> Option<&mut ModuleSettings> {
        self.modules.get_mut(&id)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { max_history: 100 }
    }
}

impl Config {
    /// Configuration with defaults everywhere, for embedding and tests.
    pub fn with_backend(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            backend: BackendConfig {
                api_key: api_key.into(),
                base_url: base_url.into(),
                alternate_urls: Vec::new(),
            },
            logging: LoggingConfig::default(),
            request: RequestConfig::default(),
            resilience: ResilienceConfig::default(),
            intake: IntakeConfig::default(),
            scheduler: SchedulerConfig::default(),
            session: SessionConfig::default(),
            synthesis: SynthesisConfig::default(),
            modules: ModulesConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}
