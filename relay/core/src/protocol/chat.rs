//! Conversation data carried by the event stream
//!
//! Field names follow the wire format (`createdAt`, `toolCalls`), so these
//! types serialize directly into `message` frames and message endpoints.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a conversation message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human participant
    User,
    /// Model response
    Assistant,
    /// Tool output surfaced as a message
    Tool,
    /// System prompt or notice
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Lifecycle phase of a tool invocation
///
/// `Done` and `Error` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Accepted, not started
    Queued,
    /// In progress
    Running,
    /// Finished successfully
    Done,
    /// Finished with a failure
    Error,
}

impl ToolStatus {
    /// Whether no further transitions are expected
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A tracked tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Invocation id
    pub id: String,
    /// Tool name (registry id)
    pub name: String,
    /// Invocation arguments
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Current lifecycle phase
    pub status: ToolStatus,
    /// Output, once produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ToolCall {
    /// Create a tool call with no arguments and no output
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args: Map::new(),
            status,
            output: None,
        }
    }

    /// Attach an argument
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Attach output
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// One message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id
    pub id: String,
    /// Author
    pub role: Role,
    /// Text content
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Tool calls attached to this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    /// Create a message with a fresh id, stamped now
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            tool_calls: None,
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Override the id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach tool calls
    #[must_use]
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }

    /// Tool calls attached to this message (empty if none)
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_uses_wire_field_names() {
        let message = Message::assistant("hi")
            .with_id("m1")
            .with_tool_calls(vec![ToolCall::new("t1", "web-search", ToolStatus::Done)]);

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["toolCalls"][0]["status"], "done");
        assert!(value["toolCalls"][0].get("output").is_none());
    }

    #[test]
    fn test_tool_call_args_default_to_empty() {
        let call: ToolCall = serde_json::from_value(json!({
            "id": "t1",
            "name": "web-search",
            "status": "running"
        }))
        .unwrap();

        assert!(call.args.is_empty());
        assert_eq!(call.status, ToolStatus::Running);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ToolStatus::Done.is_terminal());
        assert!(ToolStatus::Error.is_terminal());
        assert!(!ToolStatus::Queued.is_terminal());
        assert!(!ToolStatus::Running.is_terminal());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result: Result<Message, _> = serde_json::from_value(json!({
            "id": "m1",
            "role": "narrator",
            "content": "",
            "createdAt": "2024-05-01T00:00:00Z"
        }));
        assert!(result.is_err());
    }
}
