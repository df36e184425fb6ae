//! JSON-RPC 2.0 protocol over stdio.
//!
//! This module provides the host loop including:
//! - JSON-RPC 2.0 request/response handling
//! - `messages/submit`, `stats/get`, `sessions/get` and `resilience/reset`
//!   methods
//! - `analysis/completed` notifications written by a reporter task

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::intake::Submission;
use crate::types::{ModuleId, SynthesizedAnalysis};

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// Notification method carrying one completed analysis.
pub const ANALYSIS_COMPLETED: &str = "analysis/completed";

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null when the request could not be parsed).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated JSON-RPC notification.
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Notification method.
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

impl JsonRpcNotification {
    /// Create a notification
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// Capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Analysis-related capabilities.
    pub analysis: AnalysisCapabilities,
}

/// Analysis-specific capabilities.
#[derive(Debug, Serialize)]
pub struct AnalysisCapabilities {
    /// Modules enabled in this server.
    pub modules: Vec<ModuleId>,
    /// Whether completed analyses are pushed as notifications.
    pub notifications: bool,
}

/// Result of the initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Parameters for a sessions/get request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// Session to look up.
    pub session_id: String,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Map a protocol error to its JSON-RPC code.
    pub fn from_mcp_error(id: Option<Value>, err: &McpError) -> Self {
        let code = match err {
            McpError::InvalidRequest { .. } => -32600,
            McpError::InvalidParameters { .. } => -32602,
            McpError::Json(_) => -32603,
        };
        Self::error(id, code, err.to_string())
    }
}

/// Deserialize a method's params.
pub fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> McpResult<T> {
    let params = params.ok_or_else(|| McpError::InvalidParameters {
        method: method.to_string(),
        message: "missing params".to_string(),
    })?;
    serde_json::from_value(params).map_err(|e| McpError::InvalidParameters {
        method: method.to_string(),
        message: e.to_string(),
    })
}

async fn write_message<W, T>(writer: &Mutex<W>, message: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(message)?;
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Write every completed analysis as an `analysis/completed` notification
/// until the pipeline closes the channel or the writer fails.
async fn report_loop<W>(mut reports: mpsc::Receiver<SynthesizedAnalysis>, writer: Arc<Mutex<W>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(analysis) = reports.recv().await {
        let params = match serde_json::to_value(&analysis) {
            Ok(params) => params,
            Err(e) => {
                error!(message_id = %analysis.message_id, error = %e, "Failed to serialize analysis");
                continue;
            }
        };
        let notification = JsonRpcNotification::new(ANALYSIS_COMPLETED, params);
        if let Err(e) = write_message(&writer, &notification).await {
            error!(error = %e, "Failed to write analysis report, reporter stopping");
            break;
        }
    }
}

/// JSON-RPC server running over stdio.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server on stdin/stdout until stdin closes.
    pub async fn run(&self, reports: mpsc::Receiver<SynthesizedAnalysis>) -> std::io::Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout(), reports).await
    }

    /// Serve line-delimited JSON-RPC on `reader`, writing responses and
    /// notifications to `writer`.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        reports: mpsc::Receiver<SynthesizedAnalysis>,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!("Analysis server starting...");

        let writer = Arc::new(Mutex::new(writer));
        let reporter = tokio::spawn(report_loop(reports, Arc::clone(&writer)));
        let workers = self.state.pipeline.start();

        let mut lines = BufReader::new(reader).lines();
        let result = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("EOF received, shutting down");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Notifications get no response
            if let Some(response) = response {
                if let Err(e) = write_message(&writer, &response).await {
                    break Err(e);
                }
            }
        };

        for worker in workers {
            worker.abort();
        }
        reporter.abort();
        result
    }

    /// Handle a single JSON-RPC request.
    /// Returns None for notifications (requests without id).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        if request.jsonrpc != "2.0" {
            let err = McpError::InvalidRequest {
                message: format!("unsupported jsonrpc version {:?}", request.jsonrpc),
            };
            warn!(error = %err, "Rejecting request");
            return (!is_notification).then(|| JsonRpcResponse::from_mcp_error(request.id, &err));
        }

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" => {
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                debug!("Received cancelled notification");
                None
            }
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            "messages/submit" => Some(self.handle_submit(request.id, request.params).await),
            "stats/get" => Some(self.handle_stats(request.id).await),
            "sessions/get" => Some(self.handle_session(request.id, request.params).await),
            "resilience/reset" => Some(self.handle_resilience_reset(request.id)),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let modules = self
            .state
            .config
            .modules
            .modules
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(id, _)| *id)
            .collect();

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                analysis: AnalysisCapabilities {
                    modules,
                    notifications: true,
                },
            },
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        self.serialize(id, result)
    }

    /// Handle messages/submit request. Rejections are results, not
    /// protocol errors.
    async fn handle_submit(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let submission: Submission = match parse_params("messages/submit", params) {
            Ok(submission) => submission,
            Err(e) => return JsonRpcResponse::from_mcp_error(id, &e),
        };

        match self.state.pipeline.submit(submission).await {
            Ok(receipt) => JsonRpcResponse::success(id, json!({ "accepted": true, "receipt": receipt })),
            Err(e) => JsonRpcResponse::success(
                id,
                json!({ "accepted": false, "reason": e.to_string() }),
            ),
        }
    }

    /// Handle stats/get request
    async fn handle_stats(&self, id: Option<Value>) -> JsonRpcResponse {
        let statistics = self.state.pipeline.statistics().await;
        self.serialize(id, statistics)
    }

    /// Handle sessions/get request
    async fn handle_session(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: SessionParams = match parse_params("sessions/get", params) {
            Ok(params) => params,
            Err(e) => return JsonRpcResponse::from_mcp_error(id, &e),
        };
        let snapshot = self.state.pipeline.session(&params.session_id).await;
        self.serialize(id, json!({ "session": snapshot }))
    }

    /// Handle resilience/reset request: close every breaker and clear the
    /// error counters and log.
    fn handle_resilience_reset(&self, id: Option<Value>) -> JsonRpcResponse {
        let registry = self.state.pipeline.registry();
        registry.reset_breakers();
        registry.clear_errors();
        info!("Circuit breakers and error log reset");
        JsonRpcResponse::success(id, json!({ "reset": true }))
    }

    fn serialize<T: Serialize>(&self, id: Option<Value>, result: T) -> JsonRpcResponse {
        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                let err = McpError::from(e);
                error!(error = %err, "Failed to serialize result");
                JsonRpcResponse::from_mcp_error(id, &err)
            }
        }
    }
}
