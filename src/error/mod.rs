use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Analysis backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BackendError {
    /// True when the failure happened on the wire rather than in the service.
    pub fn is_transport(&self) -> bool {
        match self {
            BackendError::Timeout { .. } => true,
            BackendError::Http(e) => !e.is_decode() && !e.is_status(),
            BackendError::Api { .. } | BackendError::InvalidResponse { .. } => false,
        }
    }
}

/// Intake rejections. The display strings are the reasons reported back to
/// the capture collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid message content")]
    EmptyContent,

    #[error("message content too long")]
    ContentTooLong { length: usize, max: usize },

    #[error("invalid sender")]
    InvalidSender { sender: String },

    #[error("missing session id")]
    MissingSessionId,

    #[error("missing platform")]
    MissingPlatform,

    #[error("queue is full")]
    QueueFull { capacity: usize },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid parameters for {method}: {message}")]
    InvalidParameters { method: String, message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for analysis backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Api {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 503 - overloaded");

        let err = BackendError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_validation_reasons() {
        assert_eq!(
            ValidationError::EmptyContent.to_string(),
            "invalid message content"
        );
        assert_eq!(
            ValidationError::ContentTooLong {
                length: 20,
                max: 10
            }
            .to_string(),
            "message content too long"
        );
        assert_eq!(
            ValidationError::InvalidSender {
                sender: "BOT".to_string()
            }
            .to_string(),
            "invalid sender"
        );
        assert_eq!(
            ValidationError::MissingSessionId.to_string(),
            "missing session id"
        );
        assert_eq!(ValidationError::MissingPlatform.to_string(), "missing platform");
    }

    #[test]
    fn test_transport_detection() {
        assert!(BackendError::Timeout { timeout_ms: 10 }.is_transport());
        assert!(!BackendError::Api {
            status: 500,
            message: String::new()
        }
        .is_transport());
        assert!(!BackendError::InvalidResponse {
            message: String::new()
        }
        .is_transport());
    }

    #[test]
    fn test_validation_error_conversion_to_app_error() {
        let app_err: AppError = ValidationError::MissingPlatform.into();
        assert!(matches!(app_err, AppError::Validation(_)));
    }
}
