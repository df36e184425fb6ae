//! Unit tests for the JSON-RPC host.
//!
//! Tests request/response handling, method routing and protocol type
//! serialization.

use super::*;
use crate::backend::{MockAnalysisBackend, ModuleResponse};
use crate::config::Config;
use crate::server::AppState;
use pretty_assertions::assert_eq;
use serde_json::json;

fn server() -> McpServer {
    let mut mock = MockAnalysisBackend::new();
    mock.expect_analyze()
        .returning(|_, _| Ok(ModuleResponse::scored(0.2, 0.9)));
    let (state, _reports) = AppState::new(
        Config::with_backend("test-key", "http://localhost:8700"),
        Arc::new(mock),
    );
    McpServer::new(Arc::new(state))
}

fn request(id: Option<Value>, method: &str, params: Option<Value>) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id,
        method: method.to_string(),
        params,
    }
}

fn submission(sender: &str) -> Value {
    json!({
        "text": "hello there",
        "sender": sender,
        "platform": "claude",
        "sessionId": "s1"
    })
}

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_error_without_id() {
    let response = JsonRpcResponse::error(None, -32700, "Parse error");

    assert_eq!(response.id, Value::Null);
    assert!(response.result.is_none());
    assert_eq!(response.error.unwrap().code, -32700);
}

#[test]
fn test_jsonrpc_response_serialization_skips_absent_fields() {
    let response = JsonRpcResponse::success(Some(json!(7)), json!({}));
    let value = serde_json::to_value(&response).unwrap();

    assert!(value.get("error").is_none());
    assert_eq!(value["id"], 7);
}

#[test]
fn test_mcp_error_codes() {
    let invalid = McpError::InvalidRequest {
        message: "bad".to_string(),
    };
    let params = McpError::InvalidParameters {
        method: "stats/get".to_string(),
        message: "bad".to_string(),
    };
    assert_eq!(
        JsonRpcResponse::from_mcp_error(None, &invalid).error.unwrap().code,
        -32600
    );
    assert_eq!(
        JsonRpcResponse::from_mcp_error(None, &params).error.unwrap().code,
        -32602
    );
}

#[test]
fn test_notification_shape() {
    let notification = JsonRpcNotification::new(ANALYSIS_COMPLETED, json!({"messageId": "m1"}));
    let value = serde_json::to_value(&notification).unwrap();

    assert_eq!(value["jsonrpc"], "2.0");
    assert_eq!(value["method"], "analysis/completed");
    assert!(value.get("id").is_none());
}

// ============================================================================
// parse_params tests
// ============================================================================

#[test]
fn test_parse_params_missing() {
    let result: McpResult<SessionParams> = parse_params("sessions/get", None);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("sessions/get"));
    assert!(err.to_string().contains("missing params"));
}

#[test]
fn test_parse_params_wrong_shape() {
    let result: McpResult<SessionParams> = parse_params("sessions/get", Some(json!({"id": 1})));
    assert!(matches!(result, Err(McpError::InvalidParameters { .. })));
}

#[test]
fn test_parse_submission_params() {
    let parsed: Submission = parse_params("messages/submit", Some(submission("USER"))).unwrap();
    assert_eq!(parsed.session_id, "s1");
    assert_eq!(parsed.sender, "USER");
}

// ============================================================================
// Routing tests
// ============================================================================

#[tokio::test]
async fn test_initialize_lists_enabled_modules() {
    let server = server();
    let response = server
        .handle_request(request(Some(json!(1)), "initialize", None))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["capabilities"]["analysis"]["notifications"], true);
    assert_eq!(
        result["capabilities"]["analysis"]["modules"]
            .as_array()
            .unwrap()
            .len(),
        4
    );
}

#[tokio::test]
async fn test_ping() {
    let response = server()
        .handle_request(request(Some(json!("p")), "ping", None))
        .await
        .unwrap();
    assert_eq!(response.result.unwrap(), json!({}));
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let server = server();
    assert!(server.handle_request(request(None, "initialized", None)).await.is_none());
    assert!(server.handle_request(request(None, "unknown/thing", None)).await.is_none());
}

#[tokio::test]
async fn test_unknown_method() {
    let response = server()
        .handle_request(request(Some(json!(3)), "tools/list", None))
        .await
        .unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert!(error.message.contains("tools/list"));
}

#[tokio::test]
async fn test_wrong_jsonrpc_version() {
    let mut req = request(Some(json!(4)), "ping", None);
    req.jsonrpc = "1.0".to_string();
    let response = server().handle_request(req).await.unwrap();
    assert_eq!(response.error.unwrap().code, -32600);
}

#[tokio::test]
async fn test_submit_accepted() {
    let server = server();
    let response = server
        .handle_request(request(Some(json!(5)), "messages/submit", Some(submission("user"))))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["accepted"], true);
    assert_eq!(result["receipt"]["sessionId"], "s1");
    assert_eq!(result["receipt"]["queueDepth"], 1);
}

#[tokio::test]
async fn test_submit_rejected_with_reason() {
    let server = server();
    let response = server
        .handle_request(request(Some(json!(6)), "messages/submit", Some(submission("BOT"))))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["accepted"], false);
    assert_eq!(result["reason"], "invalid sender");
    assert_eq!(server.state.pipeline.queue_depth(), 0);
}

#[tokio::test]
async fn test_submit_without_params() {
    let response = server()
        .handle_request(request(Some(json!(7)), "messages/submit", None))
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_stats_reflect_queue_and_sessions() {
    let server = server();
    server
        .handle_request(request(Some(json!(8)), "messages/submit", Some(submission("USER"))))
        .await;

    let response = server
        .handle_request(request(Some(json!(9)), "stats/get", None))
        .await
        .unwrap();
    let stats = response.result.unwrap();
    assert_eq!(stats["total_processed"], 0);
    assert_eq!(stats["queue_depth"], 1);
    assert_eq!(stats["active_sessions"], 1);
}

#[tokio::test]
async fn test_session_lookup() {
    let server = server();
    server
        .handle_request(request(Some(json!(10)), "messages/submit", Some(submission("USER"))))
        .await;

    let found = server
        .handle_request(request(
            Some(json!(11)),
            "sessions/get",
            Some(json!({"sessionId": "s1"})),
        ))
        .await
        .unwrap()
        .result
        .unwrap();
    assert_eq!(found["session"]["message_count"], 1);

    let missing = server
        .handle_request(request(
            Some(json!(12)),
            "sessions/get",
            Some(json!({"sessionId": "nope"})),
        ))
        .await
        .unwrap()
        .result
        .unwrap();
    assert_eq!(missing["session"], Value::Null);
}

#[tokio::test]
async fn test_resilience_reset_closes_breakers_and_clears_errors() {
    use crate::resilience::{BreakerKey, CircuitState, ErrorCategory, ErrorContext};

    let server = server();
    let registry = server.state.pipeline.registry();
    let key = BreakerKey::scoped(ErrorCategory::Module, "emotion");
    for _ in 0..5 {
        registry.try_acquire(&key).unwrap().fail();
        registry.handle_categorized(ErrorCategory::Module, "boom".into(), ErrorContext::new("op"));
    }
    assert_eq!(registry.breaker_state(&key), CircuitState::Open);

    let response = server
        .handle_request(request(Some(json!(13)), "resilience/reset", None))
        .await
        .unwrap();
    assert_eq!(response.result.unwrap(), json!({"reset": true}));
    assert_eq!(registry.breaker_state(&key), CircuitState::Closed);
    assert!(registry.error_counts().is_empty());
    assert!(registry.recent_errors(10).is_empty());
}
