//! Conversation Reducer
//!
//! Folds stream events, in arrival order, into conversation state.
//!
//! # Design
//!
//! [`reduce`] is a pure function: it takes the previous state, one event, and
//! the arrival time, and returns the next state. It performs no I/O and keeps
//! no hidden clock, so replaying the same events yields the same state.
//! [`ConversationReducer`] wraps it for callers that hold state in place.
//!
//! | event | effect |
//! |---|---|
//! | `token` | extend the trailing assistant message, or start one; streaming on |
//! | `message` | append (unless the id exists); merge its tool calls; streaming off |
//! | `tool-status` | upsert the tool call, keeping known args and output |
//! | `done` | streaming off; a known tool id becomes `done` |
//! | `error` | streaming off |
//!
//! The message sequence never holds two messages with the same id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Map;

use crate::protocol::{
    DonePayload, Message, Role, StreamEvent, TokenPayload, ToolCall, ToolStatus,
    ToolStatusPayload,
};

/// Conversation snapshot
///
/// Only [`reduce`] and [`append_message`] produce new values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
    pending_tool_calls: BTreeMap<String, ToolCall>,
    streaming: bool,
}

impl ConversationState {
    /// Empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in arrival order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Tracked tool calls by id
    #[must_use]
    pub fn pending_tool_calls(&self) -> &BTreeMap<String, ToolCall> {
        &self.pending_tool_calls
    }

    /// Look up one tool call
    #[must_use]
    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.pending_tool_calls.get(id)
    }

    /// Whether an assistant message is mid-stream
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Most recent message
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    fn push_unique(&mut self, message: Message) {
        if !self.contains(&message.id) {
            self.messages.push(message);
        }
    }
}

/// Append a message unless one with the same id exists
#[must_use]
pub fn append_message(mut state: ConversationState, message: Message) -> ConversationState {
    state.push_unique(message);
    state
}

/// Fold one event into the state
///
/// `received_at` stamps assistant messages started by a `token` event.
#[must_use]
pub fn reduce(
    mut state: ConversationState,
    event: &StreamEvent,
    received_at: DateTime<Utc>,
) -> ConversationState {
    match event {
        StreamEvent::Token(TokenPayload { id, text }) => {
            match state.messages.last_mut() {
                Some(last) if last.role == Role::Assistant => last.content.push_str(text),
                _ => state.push_unique(Message {
                    id: id.clone(),
                    role: Role::Assistant,
                    content: text.clone(),
                    created_at: received_at,
                    tool_calls: None,
                }),
            }
            state.streaming = true;
        }
        StreamEvent::Message(message) => {
            for call in message.tool_calls() {
                state
                    .pending_tool_calls
                    .insert(call.id.clone(), call.clone());
            }
            state.push_unique(message.clone());
            state.streaming = false;
        }
        StreamEvent::ToolStatus(ToolStatusPayload { id, name, status }) => {
            let existing = state.pending_tool_calls.get(id);
            // Terminal calls stay terminal
            if existing.is_some_and(|call| call.status.is_terminal() && !status.is_terminal()) {
                return state;
            }
            let call = ToolCall {
                id: id.clone(),
                name: name.clone(),
                args: existing.map(|c| c.args.clone()).unwrap_or_else(Map::new),
                status: *status,
                output: existing.and_then(|c| c.output.clone()),
            };
            state.pending_tool_calls.insert(id.clone(), call);
        }
        StreamEvent::Done(DonePayload { id, output }) => {
            state.streaming = false;
            if let Some(call) = id.as_ref().and_then(|id| state.pending_tool_calls.get_mut(id)) {
                call.status = ToolStatus::Done;
                if let Some(output) = output {
                    call.output = Some(output.clone());
                }
            }
        }
        StreamEvent::Error(_) => {
            state.streaming = false;
        }
    }
    state
}

/// Owns a [`ConversationState`] and folds events into it
#[derive(Clone, Debug, Default)]
pub struct ConversationReducer {
    state: ConversationState,
}

impl ConversationReducer {
    /// Start from an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Fold an event received now
    pub fn apply(&mut self, event: &StreamEvent) {
        self.apply_at(event, Utc::now());
    }

    /// Fold an event received at `received_at`
    pub fn apply_at(&mut self, event: &StreamEvent, received_at: DateTime<Utc>) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, event, received_at);
    }

    /// Append a message (no-op for a known id)
    pub fn append(&mut self, message: Message) {
        let state = std::mem::take(&mut self.state);
        self.state = append_message(state, message);
    }

    /// Back to an empty conversation
    pub fn reset(&mut self) {
        self.state = ConversationState::default();
    }

    /// Take the state, leaving an empty one
    #[must_use]
    pub fn into_state(self) -> ConversationState {
        self.state
    }
}
