//! Protocol Types
//!
//! Conversation data, typed stream events, and duplex socket messages.

pub mod chat;
pub mod duplex;
pub mod events;

pub use chat::{Message, Role, ToolCall, ToolStatus};
pub use duplex::{ClientMessage, ClientMessageKind, ServerMessage, ServerMessageKind};
pub use events::{
    DonePayload, ErrorPayload, EventType, ProtocolError, StreamEvent, StreamRequest, TokenPayload,
    ToolStatusPayload,
};
