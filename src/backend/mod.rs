//! Analysis backend client and wire types.
//!
//! Each analysis module is served by the external analysis service at
//! `POST {base_url}/v1/modules/{endpoint}/analyze`.

mod client;
mod types;


pub use client::*;
pub use types::*;

use async_trait::async_trait;

use crate::error::BackendResult;

/// One logical call per module to the analysis service.
///
/// Any non-success response or transport failure is an `Err`; the gateway
/// decides what to do with it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Analyze one module projection.
    async fn analyze(&self, route: &Route, request: &ModuleRequest) -> BackendResult<ModuleResponse>;
}
