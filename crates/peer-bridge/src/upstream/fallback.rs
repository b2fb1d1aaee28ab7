//! Answers given to the host while no peer is attached.

use crate::domain::operations::PeerOperation;
use serde_json::{json, Value};

/// Text returned in place of peer content when no peer is attached
pub const UNAVAILABLE_NOTICE: &str =
    "No client is connected to the bridge. Connect a client and try again.";

/// Safe answer for `operation` when there is no peer to ask.
///
/// Never an error: list operations come back empty, content operations
/// carry [`UNAVAILABLE_NOTICE`].
pub fn fallback(operation: PeerOperation, params: &Value) -> Value {
    match operation {
        PeerOperation::ListResources => json!({ "resources": [] }),
        PeerOperation::ListResourceTemplates => json!({ "resourceTemplates": [] }),
        PeerOperation::ReadResource => {
            let uri = params.get("uri").cloned().unwrap_or(Value::Null);
            json!({
                "contents": [{
                    "uri": uri,
                    "mimeType": "text/plain",
                    "text": UNAVAILABLE_NOTICE,
                }]
            })
        }
        PeerOperation::ListPrompts => json!({ "prompts": [] }),
        PeerOperation::CompletePrompt => Value::Null,
        PeerOperation::ListTools => json!({ "tools": [] }),
        PeerOperation::CallTool => tool_error(UNAVAILABLE_NOTICE),
    }
}

/// Tool result flagged as an error, carrying `text` as its only content
pub fn tool_error(text: &str) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_fallbacks_are_empty() {
        assert_eq!(fallback(PeerOperation::ListTools, &Value::Null), json!({"tools": []}));
        assert_eq!(
            fallback(PeerOperation::ListResources, &Value::Null),
            json!({"resources": []})
        );
        assert_eq!(
            fallback(PeerOperation::ListResourceTemplates, &Value::Null),
            json!({"resourceTemplates": []})
        );
        assert_eq!(fallback(PeerOperation::ListPrompts, &Value::Null), json!({"prompts": []}));
        assert_eq!(fallback(PeerOperation::CompletePrompt, &Value::Null), Value::Null);
    }

    #[test]
    fn test_read_resource_echoes_uri() {
        let result = fallback(PeerOperation::ReadResource, &json!({"uri": "file:///notes.md"}));
        let content = &result["contents"][0];
        assert_eq!(content["uri"], "file:///notes.md");
        assert_eq!(content["mimeType"], "text/plain");
        assert_eq!(content["text"], UNAVAILABLE_NOTICE);
    }

    #[test]
    fn test_call_tool_is_marked_as_error() {
        let result = fallback(PeerOperation::CallTool, &json!({"name": "search"}));
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], UNAVAILABLE_NOTICE);
    }
}
