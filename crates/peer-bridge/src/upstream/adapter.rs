//! Host-facing operations.
//!
//! Each operation takes the "no peer" path (fallback, never an error) or the
//! "peer attached" path (one round trip through the dispatcher, then result
//! shaping).

use crate::dispatch::RequestDispatcher;
use crate::domain::error::{ApiError, ApiResult, DispatchError};
use crate::domain::operations::PeerOperation;
use crate::upstream::fallback::{fallback, tool_error};
use crate::ws::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// `resources/read` parameters
#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

/// `prompts/get` and `tools/call` parameters
#[derive(Debug, Deserialize)]
struct NamedParams {
    name: String,
}

/// Translates host requests into peer round trips.
pub struct UpstreamAdapter {
    dispatcher: Arc<RequestDispatcher>,
    connections: Arc<ConnectionManager>,
}

impl UpstreamAdapter {
    pub fn new(dispatcher: Arc<RequestDispatcher>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            dispatcher,
            connections,
        }
    }

    /// Serve `operation` with the host's `params` (absent params are `null`).
    pub async fn handle(&self, operation: PeerOperation, params: Value) -> ApiResult<Value> {
        match operation {
            PeerOperation::ListResources => self.list_resources(params).await,
            PeerOperation::ListResourceTemplates => self.list_resource_templates(params).await,
            PeerOperation::ReadResource => self.read_resource(params).await,
            PeerOperation::ListPrompts => self.list_prompts(params).await,
            PeerOperation::CompletePrompt => self.get_prompt(params).await,
            PeerOperation::ListTools => self.list_tools(params).await,
            PeerOperation::CallTool => self.call_tool(params).await,
        }
    }

    /// resources/list
    #[instrument(skip(self, params))]
    pub async fn list_resources(&self, params: Value) -> ApiResult<Value> {
        self.list(PeerOperation::ListResources, "resources", params).await
    }

    /// resources/templates/list
    #[instrument(skip(self, params))]
    pub async fn list_resource_templates(&self, params: Value) -> ApiResult<Value> {
        self.list(PeerOperation::ListResourceTemplates, "resourceTemplates", params)
            .await
    }

    /// resources/read - requires a `uri`
    #[instrument(skip(self, params))]
    pub async fn read_resource(&self, params: Value) -> ApiResult<Value> {
        let ReadResourceParams { uri } = parse_params(&params)?;
        debug!(uri = %uri, "Reading resource");

        let data = match self.forward(PeerOperation::ReadResource, params).await? {
            Forwarded::Reply(data) => data,
            Forwarded::Fallback(value) => return Ok(value),
        };
        ensure_list(data, "contents", PeerOperation::ReadResource)
    }

    /// prompts/list
    #[instrument(skip(self, params))]
    pub async fn list_prompts(&self, params: Value) -> ApiResult<Value> {
        self.list(PeerOperation::ListPrompts, "prompts", params).await
    }

    /// prompts/get - requires a `name`; the peer's answer is passed through
    #[instrument(skip(self, params))]
    pub async fn get_prompt(&self, params: Value) -> ApiResult<Value> {
        let NamedParams { name } = parse_params(&params)?;
        debug!(prompt = %name, "Getting prompt");

        match self.forward(PeerOperation::CompletePrompt, params).await? {
            Forwarded::Reply(data) | Forwarded::Fallback(data) => Ok(data),
        }
    }

    /// tools/list
    #[instrument(skip(self, params))]
    pub async fn list_tools(&self, params: Value) -> ApiResult<Value> {
        self.list(PeerOperation::ListTools, "tools", params).await
    }

    /// tools/call - requires a `name`
    ///
    /// A failure reported by the peer is a tool result with `isError: true`,
    /// not a protocol error.
    #[instrument(skip(self, params))]
    pub async fn call_tool(&self, params: Value) -> ApiResult<Value> {
        let NamedParams { name } = parse_params(&params)?;
        debug!(tool = %name, "Calling tool");

        match self.forward(PeerOperation::CallTool, params).await {
            Ok(Forwarded::Reply(data)) => Ok(tool_result(data)),
            Ok(Forwarded::Fallback(value)) => Ok(value),
            Err(DispatchError::PeerFailure(message)) => {
                debug!(tool = %name, error = %message, "Tool reported failure");
                Ok(tool_error(&message))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, operation: PeerOperation, key: &str, params: Value) -> ApiResult<Value> {
        match self.forward(operation, params).await? {
            Forwarded::Reply(data) => ensure_list(data, key, operation),
            Forwarded::Fallback(value) => Ok(value),
        }
    }

    /// One round trip, or the fallback when there is no peer to ask.
    async fn forward(
        &self,
        operation: PeerOperation,
        params: Value,
    ) -> Result<Forwarded, DispatchError> {
        if !self.connections.is_attached() {
            debug!(operation = operation.as_str(), "No peer attached, using fallback");
            return Ok(Forwarded::Fallback(fallback(operation, &params)));
        }

        let fallback_value = fallback(operation, &params);
        match self.dispatcher.call(operation, params, None).await {
            Ok(data) => Ok(Forwarded::Reply(data)),
            // Peer went away between the check and the send
            Err(DispatchError::NoPeer) => {
                debug!(operation = operation.as_str(), "Peer detached before dispatch, using fallback");
                Ok(Forwarded::Fallback(fallback_value))
            }
            Err(e) => Err(e),
        }
    }
}

enum Forwarded {
    Reply(Value),
    Fallback(Value),
}

fn parse_params<T: DeserializeOwned>(params: &Value) -> ApiResult<T> {
    T::deserialize(params).map_err(|e| ApiError::invalid_params(e.to_string()))
}

/// Make sure a list-shaped reply carries `key`.
///
/// A bare array is wrapped, a missing key defaults to empty, anything else is
/// an internal error.
fn ensure_list(data: Value, key: &str, operation: PeerOperation) -> ApiResult<Value> {
    match data {
        Value::Object(mut map) => {
            map.entry(key.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            Ok(Value::Object(map))
        }
        Value::Array(items) => {
            let mut map = Map::new();
            map.insert(key.to_string(), Value::Array(items));
            Ok(Value::Object(map))
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert(key.to_string(), Value::Array(Vec::new()));
            Ok(Value::Object(map))
        }
        other => {
            warn!(
                operation = operation.as_str(),
                kind = value_kind(&other),
                "Unexpected peer result shape"
            );
            Err(ApiError::internal(format!(
                "unexpected {} result from peer for {}",
                value_kind(&other),
                operation
            )))
        }
    }
}

/// Tool output as a host tool result; plain values become text content.
fn tool_result(data: Value) -> Value {
    match data {
        Value::Object(map) if map.contains_key("content") => Value::Object(map),
        Value::String(text) => serde_json::json!({
            "content": [{ "type": "text", "text": text }],
        }),
        other => serde_json::json!({
            "content": [{ "type": "text", "text": other.to_string() }],
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::correlation::PeerId;
    use crate::domain::envelope::OutboundMessage;
    use crate::domain::error::codes;
    use crate::domain::pending::RoundTripRegistry;
    use crate::ports::NoopNotifier;
    use crate::upstream::fallback::UNAVAILABLE_NOTICE;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        adapter: Arc<UpstreamAdapter>,
        connections: Arc<ConnectionManager>,
        registry: Arc<RoundTripRegistry>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(RoundTripRegistry::new());
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&registry),
            Arc::new(NoopNotifier),
        ));
        let dispatcher = Arc::new(RequestDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&connections),
            Duration::from_secs(30),
        ));
        Fixture {
            adapter: Arc::new(UpstreamAdapter::new(dispatcher, Arc::clone(&connections))),
            connections,
            registry,
        }
    }

    /// Attach a scripted peer that answers every request with `reply(request)`.
    fn scripted_peer<F>(fx: &Fixture, reply: F)
    where
        F: Fn(&crate::domain::envelope::RequestEnvelope) -> Value + Send + 'static,
    {
        let peer = PeerId::new();
        let (tx, mut rx) = mpsc::channel(16);
        fx.connections.attach(peer, tx).unwrap();

        let connections = Arc::clone(&fx.connections);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let OutboundMessage::Request(request) = message {
                    let frame = reply(&request);
                    connections.handle_inbound(peer, &frame.to_string()).await;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_fallbacks_without_peer() {
        let fx = fixture();

        assert_eq!(fx.adapter.list_tools(Value::Null).await.unwrap(), json!({"tools": []}));
        let result = fx
            .adapter
            .call_tool(json!({"name": "search", "arguments": {}}))
            .await
            .unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], UNAVAILABLE_NOTICE);
        assert_eq!(fx.adapter.get_prompt(json!({"name": "p"})).await.unwrap(), Value::Null);

        assert_eq!(fx.registry.stats().snapshot().registered, 0);
    }

    #[tokio::test]
    async fn test_missing_required_params() {
        let fx = fixture();

        let err = fx.adapter.read_resource(json!({})).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        let err = fx.adapter.call_tool(Value::Null).await.unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_list_tools_through_peer() {
        let fx = fixture();
        scripted_peer(&fx, |request| {
            assert_eq!(request.operation, PeerOperation::ListTools);
            json!({
                "type": "round-trip-reply",
                "id": request.id,
                "success": true,
                "data": {"tools": [{"name": "t1"}]}
            })
        });

        assert_eq!(
            fx.adapter.handle(PeerOperation::ListTools, json!({})).await.unwrap(),
            json!({"tools": [{"name": "t1"}]})
        );
        assert_eq!(fx.registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_list_shapes_are_normalized() {
        let fx = fixture();
        scripted_peer(&fx, |request| {
            let data = match request.operation {
                PeerOperation::ListPrompts => json!([{"name": "p1"}]),
                PeerOperation::ListResources => json!({"nextCursor": "c"}),
                _ => json!(42),
            };
            json!({"type": "round-trip-reply", "id": request.id, "success": true, "data": data})
        });

        assert_eq!(
            fx.adapter.list_prompts(Value::Null).await.unwrap(),
            json!({"prompts": [{"name": "p1"}]})
        );
        assert_eq!(
            fx.adapter.list_resources(Value::Null).await.unwrap(),
            json!({"nextCursor": "c", "resources": []})
        );
        let err = fx.adapter.list_tools(Value::Null).await.unwrap_err();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_call_tool_peer_failure_is_result() {
        let fx = fixture();
        scripted_peer(&fx, |request| {
            json!({
                "type": "round-trip-reply",
                "id": request.id,
                "success": false,
                "error": {"message": "disk full"}
            })
        });

        let result = fx.adapter.call_tool(json!({"name": "write"})).await.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "disk full");
    }

    #[tokio::test]
    async fn test_other_peer_failure_is_protocol_error() {
        let fx = fixture();
        scripted_peer(&fx, |request| {
            json!({
                "type": "round-trip-reply",
                "id": request.id,
                "success": false,
                "error": "no such resource"
            })
        });

        let err = fx
            .adapter
            .read_resource(json!({"uri": "file:///missing"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SERVER_ERROR);
        assert_eq!(err.message, "no such resource");
    }

    #[tokio::test]
    async fn test_call_tool_plain_text_result() {
        let fx = fixture();
        scripted_peer(&fx, |request| {
            json!({"type": "round-trip-reply", "id": request.id, "success": true, "data": "done"})
        });

        let result = fx.adapter.call_tool(json!({"name": "run"})).await.unwrap();
        assert_eq!(result, json!({"content": [{"type": "text", "text": "done"}]}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_protocol_error() {
        let fx = fixture();
        let (tx, _rx) = mpsc::channel(16);
        fx.connections.attach(PeerId::new(), tx).unwrap();

        let err = fx.adapter.list_tools(Value::Null).await.unwrap_err();
        assert_eq!(err.code, codes::TIMEOUT);
        assert_eq!(fx.registry.pending_count(), 0);
    }
}
