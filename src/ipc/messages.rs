//! Admin socket message types.
//!
//! JSON Lines (newline-delimited JSON) over a Unix stream socket. Field
//! names follow the familiar id/method/params/result/error shape but this is
//! not JSON-RPC 2.0.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskbotError;

/// Request sent by an admin client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRequest {
    /// Correlates the response.
    pub id: u64,
    /// Method name, e.g. "batch.start".
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl AdminRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn no_params(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, method, Value::Object(Default::default()))
    }
}

/// Response sent by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AdminError>,
}

impl AdminResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: AdminError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Human-readable outcome, used for acknowledgements
    pub fn message(&self) -> String {
        if let Some(error) = &self.error {
            return error.message.clone();
        }
        self.result
            .as_ref()
            .and_then(|r| r["message"].as_str())
            .unwrap_or("OK")
            .to_string()
    }
}

/// Error details in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminError {
    pub code: i32,
    pub message: String,
}

impl AdminError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Parse error (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    /// Method not found error (-32601).
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Unknown method: {}", method.into()))
    }

    /// Invalid params error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    /// Internal error (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_STATE, message)
    }
}

impl From<TaskbotError> for AdminError {
    fn from(err: TaskbotError) -> Self {
        match err {
            TaskbotError::Configuration(msg) => Self::new(ErrorCode::CONFIGURATION, msg),
            TaskbotError::Permission(msg) => Self::new(ErrorCode::PERMISSION, msg),
            TaskbotError::NotFound(msg) => Self::new(ErrorCode::NOT_FOUND, msg),
            TaskbotError::Transient(msg) => Self::new(ErrorCode::TRANSIENT, msg),
            TaskbotError::Validation(msg) => Self::new(ErrorCode::VALIDATION, msg),
            TaskbotError::InvalidState(msg) => Self::invalid_state(msg),
            other => Self::internal_error(other.to_string()),
        }
    }
}

/// Error codes.
pub struct ErrorCode;

impl ErrorCode {
    /// Invalid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal service error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Out-of-range administrative input.
    pub const VALIDATION: i32 = 1001;
    /// Operation not valid in the current state.
    pub const INVALID_STATE: i32 = 1002;
    /// Missing destination or credential.
    pub const CONFIGURATION: i32 = 1003;
    /// Platform refused the action.
    pub const PERMISSION: i32 = 1004;
    pub const NOT_FOUND: i32 = 1005;
    pub const TRANSIENT: i32 = 1006;
}

/// Known method names.
pub struct Methods;

impl Methods {
    pub const PING: &'static str = "ping";
    pub const STATUS: &'static str = "status";

    // Batch lifecycle
    pub const BATCH_START: &'static str = "batch.start";
    pub const BATCH_PAUSE: &'static str = "batch.pause";
    pub const BATCH_RESUME: &'static str = "batch.resume";
    pub const BATCH_STOP: &'static str = "batch.stop";

    pub const SETTINGS_CONFIGURE: &'static str = "settings.configure";
    pub const TASK_ASSIGN: &'static str = "task.assign";
    pub const IDENTITY_VERIFY: &'static str = "identity.verify";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_no_params() {
        let req = AdminRequest::no_params(42, Methods::PING);
        assert_eq!(req.id, 42);
        assert_eq!(req.method, "ping");
        assert!(req.params.is_object());
    }

    #[test]
    fn test_request_params_default_when_missing() {
        let req: AdminRequest = serde_json::from_str(r#"{"id":3,"method":"status"}"#).unwrap();
        assert_eq!(req.method, Methods::STATUS);
        assert!(req.params.is_null());
    }

    #[test]
    fn test_success_response_omits_error() {
        let resp = AdminResponse::success(1, json!({"message": "Task allocation paused."}));
        let line = serde_json::to_string(&resp).unwrap();
        assert!(!line.contains("error"));
        assert!(resp.is_success());
        assert_eq!(resp.message(), "Task allocation paused.");
    }

    #[test]
    fn test_error_response_message() {
        let resp = AdminResponse::error(1, AdminError::method_not_found("batch.explode"));
        assert!(!resp.is_success());
        assert_eq!(resp.message(), "Unknown method: batch.explode");
        let line = serde_json::to_string(&resp).unwrap();
        assert!(!line.contains("result"));
    }

    #[test]
    fn test_taskbot_error_mapping() {
        let err: AdminError = TaskbotError::Validation("Reaction time must be between 1-60 seconds.".to_string()).into();
        assert_eq!(err.code, ErrorCode::VALIDATION);
        assert_eq!(err.message, "Reaction time must be between 1-60 seconds.");

        let err: AdminError = TaskbotError::InvalidState("Task allocation is already paused.".to_string()).into();
        assert_eq!(err.code, ErrorCode::INVALID_STATE);
    }
}
