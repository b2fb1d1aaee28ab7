//! Catalogue of forwarded operations.
//!
//! Each host-facing JSON-RPC method that reaches the peer maps to exactly one
//! peer type tag. Lifecycle methods (`initialize`, `ping`) never leave the
//! bridge and are not listed here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation forwarded to the peer, serialized as its wire type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerOperation {
    ListResources,
    ListResourceTemplates,
    ReadResource,
    ListPrompts,
    CompletePrompt,
    ListTools,
    CallTool,
}

impl PeerOperation {
    /// Every forwarded operation, in host-method order.
    pub const ALL: [PeerOperation; 7] = [
        PeerOperation::ListResources,
        PeerOperation::ListResourceTemplates,
        PeerOperation::ReadResource,
        PeerOperation::ListPrompts,
        PeerOperation::CompletePrompt,
        PeerOperation::ListTools,
        PeerOperation::CallTool,
    ];

    /// Wire type tag sent to the peer
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerOperation::ListResources => "list_resources",
            PeerOperation::ListResourceTemplates => "list_resource_templates",
            PeerOperation::ReadResource => "read_resource",
            PeerOperation::ListPrompts => "list_prompts",
            PeerOperation::CompletePrompt => "complete_prompt",
            PeerOperation::ListTools => "list_tools",
            PeerOperation::CallTool => "call_tool",
        }
    }

    /// Host JSON-RPC method that triggers this operation
    pub fn host_method(&self) -> &'static str {
        match self {
            PeerOperation::ListResources => "resources/list",
            PeerOperation::ListResourceTemplates => "resources/templates/list",
            PeerOperation::ReadResource => "resources/read",
            PeerOperation::ListPrompts => "prompts/list",
            PeerOperation::CompletePrompt => "prompts/get",
            PeerOperation::ListTools => "tools/list",
            PeerOperation::CallTool => "tools/call",
        }
    }

    /// Resolve a host method name to the operation it forwards.
    pub fn from_host_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.host_method() == method)
    }
}

impl fmt::Display for PeerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability lists the host is told to refresh when a peer appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Resources,
    Prompts,
    Tools,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Resources, Capability::Prompts, Capability::Tools];

    /// Host notification method announcing that this list changed
    pub fn list_changed_method(&self) -> &'static str {
        match self {
            Capability::Resources => "notifications/resources/list_changed",
            Capability::Prompts => "notifications/prompts/list_changed",
            Capability::Tools => "notifications/tools/list_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_matches_serde() {
        for op in PeerOperation::ALL {
            let json = serde_json::to_value(op).unwrap();
            assert_eq!(json, serde_json::json!(op.as_str()));
        }
    }

    #[test]
    fn test_host_method_lookup() {
        assert_eq!(
            PeerOperation::from_host_method("prompts/get"),
            Some(PeerOperation::CompletePrompt)
        );
        assert_eq!(
            PeerOperation::from_host_method("tools/call"),
            Some(PeerOperation::CallTool)
        );
        assert_eq!(PeerOperation::from_host_method("initialize"), None);
    }
}
