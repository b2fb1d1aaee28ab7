//! Bridge error types.
//!
//! [`ApiError`] is what the host sees (JSON-RPC 2.0 error object).
//! [`DispatchError`] covers one round trip to the peer. [`BridgeError`] is
//! the service-level failure type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Standard JSON-RPC 2.0 error codes
pub mod codes {
    // JSON-RPC 2.0 standard errors (-32700 to -32600)
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Server errors (-32000 to -32099)
    pub const SERVER_ERROR: i32 = -32000;
    pub const RESOURCE_UNAVAILABLE: i32 = -32002;
    pub const TIMEOUT: i32 = -32006;
}

/// Host-visible error with JSON-RPC code
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// JSON-RPC error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Optional additional data
    pub data: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Parse error - invalid JSON
    pub fn parse_error(details: impl Into<String>) -> Self {
        Self::new(
            codes::PARSE_ERROR,
            format!("Parse error: {}", details.into()),
        )
    }

    /// Invalid request - not a valid JSON-RPC request
    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_REQUEST,
            format!("Invalid request: {}", details.into()),
        )
    }

    /// Method not found
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    /// Invalid parameters
    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::new(
            codes::INVALID_PARAMS,
            format!("Invalid params: {}", details.into()),
        )
    }

    /// Internal error
    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(
            codes::INTERNAL_ERROR,
            format!("Internal error: {}", details.into()),
        )
    }

    /// Generic server error (peer-reported failures land here)
    pub fn server_error(details: impl Into<String>) -> Self {
        Self::new(codes::SERVER_ERROR, details.into())
    }

    /// Peer missing or went away
    pub fn resource_unavailable(details: impl Into<String>) -> Self {
        Self::new(
            codes::RESOURCE_UNAVAILABLE,
            format!("Resource unavailable: {}", details.into()),
        )
    }

    /// Request timeout
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::new(
            codes::TIMEOUT,
            format!("Request timeout: {}", operation.into()),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ApiError", 3)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref data) = self.data {
            state.serialize_field("data", data)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ApiError {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ErrorHelper {
            code: i32,
            message: String,
            data: Option<serde_json::Value>,
        }

        let helper = ErrorHelper::deserialize(deserializer)?;
        Ok(ApiError {
            code: helper.code,
            message: helper.message,
            data: helper.data,
        })
    }
}

/// Result type for host-facing operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure of a single round trip (or of waiting for a peer).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// No peer attached when the request was sent
    #[error("no peer connected")]
    NoPeer,

    /// No peer attached within the wait window
    #[error("no peer connected within {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    /// Peer attached but never answered this request
    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    RoundTripTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Peer answered with `success: false`
    #[error("peer reported failure: {0}")]
    PeerFailure(String),

    /// Envelope could not be encoded or handed to the socket writer
    #[error("transport error: {0}")]
    Transport(String),

    /// Pending entry vanished without a settlement (registry swept it)
    #[error("round trip cancelled")]
    Cancelled,
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NoPeer | DispatchError::ConnectionTimeout(_) => {
                ApiError::resource_unavailable(e.to_string())
            }
            DispatchError::RoundTripTimeout { .. } => ApiError::timeout(e.to_string()),
            DispatchError::PeerFailure(message) => ApiError::server_error(message),
            DispatchError::Transport(_) | DispatchError::Cancelled => {
                ApiError::internal(e.to_string())
            }
        }
    }
}

/// Service-level errors (startup, I/O), not JSON-RPC.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::domain::config::ConfigError),

    /// Peer listener could not bind
    #[error("server bind error: {0}")]
    Bind(String),

    /// Host stream read/write failure
    #[error("host I/O error: {0}")]
    HostIo(#[from] std::io::Error),

    /// Internal failure
    #[error("internal error: {0}")]
    Internal(String),
}
