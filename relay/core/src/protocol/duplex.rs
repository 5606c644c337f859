//! Duplex socket messages
//!
//! JSON objects exchanged over the tool-invocation socket. Type tags are
//! snake_case; `seq` on server messages is assigned per connection.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Client message kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessageKind {
    /// Start a tool invocation
    InvokeTool,
    /// Cancel a pending invocation
    CancelTool,
    /// Acknowledge a server message
    Ack,
    /// Resume after reconnect
    Resume,
    /// Keep-alive
    Ping,
}

/// Message sent by a duplex client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: ClientMessageKind,
    /// Client-side sequence number
    #[serde(default)]
    pub seq: u64,
    /// Invocation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name (for `invoke_tool`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool arguments (for `invoke_tool`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

impl ClientMessage {
    fn bare(kind: ClientMessageKind) -> Self {
        Self {
            kind,
            seq: 0,
            id: None,
            tool: None,
            args: None,
        }
    }

    /// Build an `invoke_tool` message
    pub fn invoke(id: impl Into<String>, tool: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: Some(id.into()),
            tool: Some(tool.into()),
            args: Some(args),
            ..Self::bare(ClientMessageKind::InvokeTool)
        }
    }

    /// Build a `cancel_tool` message
    pub fn cancel(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::bare(ClientMessageKind::CancelTool)
        }
    }

    /// Build a `resume` message
    pub fn resume(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::bare(ClientMessageKind::Resume)
        }
    }

    /// Build an `ack` message
    #[must_use]
    pub fn ack(seq: u64) -> Self {
        Self {
            seq,
            ..Self::bare(ClientMessageKind::Ack)
        }
    }

    /// Keep-alive payload (`{"type":"ping"}`)
    #[must_use]
    pub fn ping_payload() -> Value {
        json!({ "type": "ping" })
    }
}

/// Server message kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageKind {
    /// Invocation or session status change
    ToolUpdate,
    /// Intermediate output
    PartialResult,
    /// Request could not be processed
    Error,
    /// Invocation finished
    Complete,
}

/// Message sent by the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    /// Per-connection sequence number, strictly increasing from 1
    pub seq: u64,
    /// Invocation (or session) id
    pub id: String,
    /// Kind-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ServerMessage {
    /// `payload.status`, if present
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.payload.as_ref()?.get("status")?.as_str()
    }

    /// `payload.output`, if present
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.payload.as_ref()?.get("output")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_message_type_tags() {
        let value = serde_json::to_value(ClientMessage::cancel("t1")).unwrap();
        assert_eq!(value, json!({"type": "cancel_tool", "seq": 0, "id": "t1"}));
    }

    #[test]
    fn test_client_message_minimal_fields() {
        let message: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(message.kind, ClientMessageKind::Ping);
        assert_eq!(message.seq, 0);
        assert!(message.id.is_none());
    }

    #[test]
    fn test_unknown_client_kind_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_server_message_accessors() {
        let message: ServerMessage = serde_json::from_value(json!({
            "type": "partial_result",
            "seq": 3,
            "id": "t1",
            "payload": {"output": "Running web-search", "status": "running"}
        }))
        .unwrap();

        assert_eq!(message.kind, ServerMessageKind::PartialResult);
        assert_eq!(message.output(), Some("Running web-search"));
        assert_eq!(message.status(), Some("running"));
    }
}
