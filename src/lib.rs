//! # chatguard
//!
//! Real-time threat analysis for AI chat conversations. Captured messages
//! are validated, prioritized and analyzed by a set of independent modules
//! (prompt injection, manipulation, emotion, escalation) served by an
//! external analysis service. Module calls are guarded by per-module circuit
//! breakers, retries and timeouts, with local heuristics as fallback.
//!
//! ## Architecture
//!
//! ```text
//! capture → Intake → AnalysisQueue → Scheduler → Orchestrator ─┬→ Gateway → backend (HTTP)
//!              ↓                                               └→ synthesis → reports
//!        SessionTracker                         RecoveryRegistry, Telemetry
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatguard::{AnalysisClient, Config, Pipeline, Sender, Submission};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = AnalysisClient::new(&config.backend, config.request.clone())?;
//!     let (pipeline, mut reports) = Pipeline::new(config, Arc::new(client));
//!     let _workers = pipeline.start();
//!
//!     pipeline
//!         .submit(Submission::new("s1", Sender::User, "hello", "claude"))
//!         .await?;
//!     if let Some(analysis) = reports.recv().await {
//!         println!("risk {:.2}", analysis.aggregate_risk);
//!     }
//!     Ok(())
//! }
//! ```

/// Analysis service client and wire types.
pub mod backend;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Guarded module calls with retry, breaker and fallback.
pub mod gateway;
/// Submission validation, prioritization and admission.
pub mod intake;
/// Pattern lexicons shared by intake and the local heuristics.
pub mod lexicon;
/// Module fan-out and result synthesis.
pub mod orchestrator;
/// Assembled pipeline.
pub mod pipeline;
/// Circuit breakers, retry policies and the recovery registry.
pub mod resilience;
/// Priority queue and batch scheduler.
pub mod scheduler;
/// JSON-RPC host over stdio.
pub mod server;
/// Per-session conversation context.
pub mod session;
/// In-memory statistics.
pub mod telemetry;
/// Core domain types.
pub mod types;

pub use backend::{AnalysisBackend, AnalysisClient};
pub use config::Config;
pub use error::{AppError, AppResult, ValidationError};
pub use intake::{Submission, SubmissionReceipt};
pub use pipeline::Pipeline;
pub use server::{AppState, McpServer, SharedState};
pub use telemetry::StatisticsSnapshot;
pub use types::{ModuleId, Sender, SynthesizedAnalysis};
