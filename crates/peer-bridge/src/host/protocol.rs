//! JSON-RPC 2.0 message types for the host stream.

use crate::domain::error::ApiError;
use crate::domain::operations::Capability;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Protocol version answered when the host does not ask for one
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`
pub const SERVER_NAME: &str = "peer-bridge";

/// JSON-RPC request ID type
///
/// Per JSON-RPC 2.0, an ID is a string or a number. A missing or null ID
/// marks a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    /// String ID
    String(String),
    /// Numeric ID (must fit in i64 for compatibility)
    Number(i64),
}

impl JsonRpcId {
    /// Validate the ID is acceptable
    ///
    /// Rejects empty strings and strings longer than 256 chars.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            JsonRpcId::String(s) => {
                if s.is_empty() {
                    Err("request ID cannot be empty string")
                } else if s.len() > 256 {
                    Err("request ID string too long (max 256 chars)")
                } else {
                    Ok(())
                }
            }
            JsonRpcId::Number(_) => Ok(()),
        }
    }
}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonRpcId::String(s) => write!(f, "\"{}\"", s),
            JsonRpcId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Request (or notification) read from the host
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<JsonRpcId>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Result or error half of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(ApiError),
}

/// Response written to the host. `id` is null when the request id was
/// unreadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<JsonRpcId>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: Option<JsonRpcId>, error: ApiError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    pub fn from_result(id: Option<JsonRpcId>, result: Result<Value, ApiError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::error(id, e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }
}

/// Server-initiated notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: None,
        }
    }

    /// `notifications/<capability>/list_changed`
    pub fn list_changed(capability: Capability) -> Self {
        Self::new(capability.list_changed_method())
    }
}

/// `initialize` result: echoes the host's protocol version and advertises
/// change notifications for all three capability lists.
pub fn initialize_result(params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "resources": { "listChanged": true },
            "prompts": { "listChanged": true },
            "tools": { "listChanged": true },
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_id_is_notification() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert_eq!(request.id, None);
        assert_eq!(request.params, Value::Null);
    }

    #[test]
    fn test_request_ids() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#).unwrap();
        assert_eq!(request.id, Some(JsonRpcId::String("abc".into())));

        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap();
        assert_eq!(request.id, Some(JsonRpcId::Number(7)));

        assert!(JsonRpcId::String(String::new()).validate().is_err());
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = JsonRpcResponse::success(Some(JsonRpcId::Number(1)), Value::Null);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": 1, "result": null})
        );

        let err = JsonRpcResponse::error(None, ApiError::parse_error("eof"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32700);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_notification_wire_shape() {
        let notification = JsonRpcNotification::list_changed(Capability::Tools);
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"})
        );
    }

    #[test]
    fn test_initialize_echoes_protocol_version() {
        let result = initialize_result(&json!({"protocolVersion": "2025-03-26"}));
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);

        let result = initialize_result(&Value::Null);
        assert_eq!(result["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
    }
}
