//! Typed events carried by the event stream
//!
//! Each [`StreamEvent`] variant maps to one `event:` name on the wire.
//! Conversion to and from [`Frame`] is the only place event names are spelled.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chat::{Message, ToolStatus};
use crate::transport::frame::{Frame, FrameError};

/// Errors mapping frames to typed events, or validating requests
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame names an event this protocol does not define
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    /// Payload does not match the event's shape
    #[error("Invalid payload for {event}: {message}")]
    InvalidPayload {
        /// Event name
        event: EventType,
        /// Parser message
        message: String,
    },

    /// Encoding failed
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Event names of the stream protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Incremental assistant text
    Token,
    /// Complete message
    Message,
    /// Tool lifecycle update
    ToolStatus,
    /// Stream (or tool) finished
    Done,
    /// Stream failed
    Error,
}

impl EventType {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Message => "message",
            Self::ToolStatus => "tool-status",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Parse a wire name
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "token" => Some(Self::Token),
            "message" => Some(Self::Message),
            "tool-status" => Some(Self::ToolStatus),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `token` payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Token id (becomes the message id when it starts a message)
    pub id: String,
    /// Text fragment
    pub text: String,
}

/// `tool-status` payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolStatusPayload {
    /// Invocation id
    pub id: String,
    /// Tool name
    pub name: String,
    /// New status
    pub status: ToolStatus,
}

/// `done` payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DonePayload {
    /// Tool invocation finished by this event, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Final tool output, if supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// `error` payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code
    pub code: String,
    /// Human-readable description
    pub message: String,
}

/// One typed event of the stream protocol
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text
    Token(TokenPayload),
    /// Complete message, possibly with tool calls
    Message(Message),
    /// Tool lifecycle update
    ToolStatus(ToolStatusPayload),
    /// Stream terminator, optionally completing a tool call
    Done(DonePayload),
    /// Stream failure
    Error(ErrorPayload),
}

impl StreamEvent {
    /// Build a `token` event
    pub fn token(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Token(TokenPayload {
            id: id.into(),
            text: text.into(),
        })
    }

    /// Build a `tool-status` event
    pub fn tool_status(id: impl Into<String>, name: impl Into<String>, status: ToolStatus) -> Self {
        Self::ToolStatus(ToolStatusPayload {
            id: id.into(),
            name: name.into(),
            status,
        })
    }

    /// Build a bare `done` event
    #[must_use]
    pub fn done() -> Self {
        Self::Done(DonePayload::default())
    }

    /// Build a `done` event that completes a tool call
    pub fn tool_done(id: impl Into<String>, output: Option<String>) -> Self {
        Self::Done(DonePayload {
            id: Some(id.into()),
            output,
        })
    }

    /// Build an `error` event
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Event name
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Token(_) => EventType::Token,
            Self::Message(_) => EventType::Message,
            Self::ToolStatus(_) => EventType::ToolStatus,
            Self::Done(_) => EventType::Done,
            Self::Error(_) => EventType::Error,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let name = self.event_type().as_str();
        let bytes = match self {
            Self::Token(payload) => crate::transport::frame::encode(name, payload)?,
            Self::Message(message) => crate::transport::frame::encode(name, message)?,
            Self::ToolStatus(payload) => crate::transport::frame::encode(name, payload)?,
            Self::Done(payload) => crate::transport::frame::encode(name, payload)?,
            Self::Error(payload) => crate::transport::frame::encode(name, payload)?,
        };
        Ok(bytes)
    }
}

impl TryFrom<Frame> for StreamEvent {
    type Error = ProtocolError;

    fn try_from(frame: Frame) -> Result<Self, ProtocolError> {
        let event = EventType::from_wire(&frame.event_type)
            .ok_or_else(|| ProtocolError::UnknownEvent(frame.event_type.clone()))?;

        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            event,
            message: e.to_string(),
        };

        Ok(match event {
            EventType::Token => Self::Token(serde_json::from_value(frame.data).map_err(invalid)?),
            EventType::Message => {
                Self::Message(serde_json::from_value(frame.data).map_err(invalid)?)
            }
            EventType::ToolStatus => {
                Self::ToolStatus(serde_json::from_value(frame.data).map_err(invalid)?)
            }
            EventType::Done => Self::Done(serde_json::from_value(frame.data).map_err(invalid)?),
            EventType::Error => Self::Error(serde_json::from_value(frame.data).map_err(invalid)?),
        })
    }
}

/// Body of a stream request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// User prompt (non-empty)
    pub prompt: String,
    /// Optional extra context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Tools the caller selected
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
}

impl StreamRequest {
    /// Create a request for a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            tools: Vec::new(),
        }
    }

    /// Select tools
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Reject requests that cannot start a stream
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidRequest` if the prompt is empty.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.prompt.is_empty() {
            return Err(ProtocolError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::frame::FrameDecoder;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn roundtrip(event: &StreamEvent) -> StreamEvent {
        let bytes = event.encode().unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        let frame = decoder.decode().unwrap().unwrap();
        StreamEvent::try_from(frame).unwrap()
    }

    #[test]
    fn test_tool_status_wire_name() {
        let event = StreamEvent::tool_status("t1", "web-search", ToolStatus::Running);
        let text = String::from_utf8(event.encode().unwrap()).unwrap();
        assert!(text.starts_with("event: tool-status\n"));
        assert_eq!(roundtrip(&event), event);
    }

    #[test]
    fn test_message_event_roundtrip() {
        let event = StreamEvent::Message(Message::assistant("hello").with_id("m1"));
        assert_eq!(roundtrip(&event), event);
    }

    #[test]
    fn test_bare_done_has_empty_payload() {
        let text = String::from_utf8(StreamEvent::done().encode().unwrap()).unwrap();
        assert_eq!(text, "event: done\ndata: {}\n\n");
    }

    #[test]
    fn test_error_frame_maps_to_error_event() {
        let frame = Frame::new("error", json!({"code": "E1", "message": "boom"}));
        let event = StreamEvent::try_from(frame).unwrap();
        assert_eq!(
            event,
            StreamEvent::Error(ErrorPayload {
                code: "E1".to_string(),
                message: "boom".to_string(),
            })
        );
        assert_eq!(roundtrip(&event), event);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let frame = Frame::new("progress", json!({}));
        assert!(matches!(
            StreamEvent::try_from(frame),
            Err(ProtocolError::UnknownEvent(name)) if name == "progress"
        ));
    }

    #[test]
    fn test_payload_shape_mismatch_rejected() {
        let frame = Frame::new("token", json!({"id": 3}));
        assert!(matches!(
            StreamEvent::try_from(frame),
            Err(ProtocolError::InvalidPayload {
                event: EventType::Token,
                ..
            })
        ));
    }

    #[test]
    fn test_request_validation() {
        assert!(StreamRequest::new("weather").validate().is_ok());
        assert!(matches!(
            StreamRequest::new("").validate(),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_request_tools_default_empty() {
        let request: StreamRequest = serde_json::from_value(json!({"prompt": "hi"})).unwrap();
        assert!(request.tools.is_empty());
        assert!(request.context.is_none());
    }
}
