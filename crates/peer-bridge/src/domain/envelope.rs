//! Peer wire envelopes.
//!
//! Inbound frames are decoded once, at the socket boundary, into the closed
//! [`InboundMessage`] enum. Everything the bridge sends is an
//! [`OutboundMessage`].

use crate::domain::correlation::CorrelationId;
use crate::domain::operations::PeerOperation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound `type` tags the bridge understands.
pub const KNOWN_INBOUND_KINDS: [&str; 3] = ["liveness-probe", "peer-announced-ready", "round-trip-reply"];

/// Message received from the peer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Keep-alive; answered with [`ControlMessage::LivenessAck`]
    LivenessProbe,
    /// Peer finished its own setup and its capability lists are current
    PeerAnnouncedReady,
    /// Answer to a [`RequestEnvelope`]
    RoundTripReply(RoundTripReply),
}

/// Correlated answer to an outbound request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoundTripReply {
    pub id: CorrelationId,
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl RoundTripReply {
    /// Split the reply into the data of a success or the peer's error text.
    pub fn into_outcome(self) -> Result<Value, String> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(peer_error_message(self.error))
        }
    }
}

/// Peers report errors as a bare string or as `{message: ...}`.
fn peer_error_message(error: Option<Value>) -> String {
    match error {
        Some(Value::String(message)) => message,
        Some(Value::Object(map)) => match map.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => Value::Object(map).to_string(),
        },
        Some(Value::Null) | None => "peer reported failure without details".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Not JSON, or a known kind with missing/invalid fields
    #[error("malformed peer message: {0}")]
    Malformed(String),
    /// Valid JSON carrying a `type` the bridge does not handle
    #[error("unrecognized peer message type: {0}")]
    Unrecognized(String),
    /// Frame exceeded the configured size limit
    #[error("peer message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

impl InboundMessage {
    /// Decode a text frame from the peer.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);

        serde_json::from_value(value).map_err(|e| match kind {
            Some(kind) if !KNOWN_INBOUND_KINDS.contains(&kind.as_str()) => {
                DecodeError::Unrecognized(kind)
            }
            _ => DecodeError::Malformed(e.to_string()),
        })
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::LivenessProbe => "liveness-probe",
            InboundMessage::PeerAnnouncedReady => "peer-announced-ready",
            InboundMessage::RoundTripReply(_) => "round-trip-reply",
        }
    }
}

/// Dispatcher-originated request: `{id, type, params}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestEnvelope {
    pub id: CorrelationId,
    #[serde(rename = "type")]
    pub operation: PeerOperation,
    pub params: Value,
}

/// Bridge-originated control frames (no correlation id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    LivenessAck,
}

/// Anything the bridge writes to the peer socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Request(RequestEnvelope),
    Control(ControlMessage),
}

impl OutboundMessage {
    /// Encode as a JSON text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<RequestEnvelope> for OutboundMessage {
    fn from(envelope: RequestEnvelope) -> Self {
        OutboundMessage::Request(envelope)
    }
}

impl From<ControlMessage> for OutboundMessage {
    fn from(message: ControlMessage) -> Self {
        OutboundMessage::Control(message)
    }
}
