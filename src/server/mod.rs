//! Server module for the stdio JSON-RPC host.
//!
//! This module provides:
//! - JSON-RPC server over stdio
//! - Shared application state wrapping the analysis pipeline
//! - The reporter task writing completed analyses as notifications

mod mcp;

pub use mcp::*;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::AnalysisBackend;
use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::types::SynthesizedAnalysis;

/// Application state shared across request handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// The analysis pipeline.
    pub pipeline: Pipeline,
}

impl AppState {
    /// Create new application state. The receiver yields completed analyses
    /// and is normally handed to [`McpServer::run`].
    pub fn new(
        config: Config,
        backend: Arc<dyn AnalysisBackend>,
    ) -> (Self, mpsc::Receiver<SynthesizedAnalysis>) {
        tracing::info!(
            base_url = %config.backend.base_url,
            modules = config.modules.modules.values().filter(|m| m.enabled).count(),
            "AppState initializing"
        );
        let (pipeline, reports) = Pipeline::new(config.clone(), backend);
        (Self { config, pipeline }, reports)
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
