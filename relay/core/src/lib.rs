//! Relay Core - Realtime Event Streaming for Chat and Tool Runs
//!
//! This crate carries a chat conversation over two channels: a one-way
//! server event stream for model output, and a reconnecting duplex socket for
//! tool invocation. It is independent of any HTTP framework; the daemon crate
//! hosts it.
//!
//! # Architecture
//!
//! ```text
//!   StreamRequest ──► RateLimiter ──► StreamProducer ──► StreamSession
//!                                                            │ bytes
//!                                                            ▼
//!   ConversationReducer ◄── StreamEvent ◄── StreamConsumer (FrameDecoder)
//!
//!   ManagedDuplexClient ◄──── ClientMessage / ServerMessage ────► ToolSession
//!        (Backoff, heartbeat)                                  (staged replies)
//! ```
//!
//! # Key Types
//!
//! - [`FrameDecoder`] / [`encode`]: text event framing
//! - [`StreamEvent`]: typed event per wire `event:` name
//! - [`StreamProducer`]: scripted response with heartbeat and cancellation
//! - [`StreamConsumer`]: incremental client for the event stream
//! - [`ManagedDuplexClient`]: reconnecting duplex socket client
//! - [`ToolSession`]: server side of the duplex tool protocol
//! - [`RateLimiter`]: per-identity token bucket
//! - [`ConversationReducer`]: pure fold of events into conversation state
//! - [`Broadcaster`]: fan-out to live subscribers
//!
//! # Module Overview
//!
//! - [`protocol`]: messages, tool calls, stream events, duplex messages
//! - [`transport`]: framing, rate limiting, backoff, duplex client, tool session
//! - [`streaming`]: stream sessions, producer, consumer
//! - [`reducer`]: conversation state
//! - [`broadcast`]: subscriber fan-out
//! - [`services`]: message repository and tool registry
//! - [`config`]: TOML and environment configuration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod broadcast;
pub mod config;
pub mod protocol;
pub mod reducer;
pub mod services;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use broadcast::{BroadcastResult, Broadcaster, SubscriberId};
pub use protocol::{
    ClientMessage, ClientMessageKind, DonePayload, ErrorPayload, EventType, Message,
    ProtocolError, Role, ServerMessage, ServerMessageKind, StreamEvent, StreamRequest,
    TokenPayload, ToolCall, ToolStatus, ToolStatusPayload,
};
pub use reducer::{append_message, reduce, ConversationReducer, ConversationState};
pub use services::{
    page, CreateMessage, InMemoryMessageRepository, MessagePage, MessageRepository, ToolDescriptor,
    ToolRegistry, PAGE_SIZE,
};
pub use streaming::{
    consume, ConsumeOutcome, ConsumerError, ConsumerEvent, ProducerConfig, ProducerStream,
    StreamConsumer, StreamProducer, StreamSession,
};
pub use transport::{
    encode, encode_comment, Backoff, BackoffConfig, DuplexConfig, DuplexConnection,
    DuplexConnector, DuplexError, DuplexEvent, DuplexState, Frame, FrameDecoder, FrameError,
    InProcessAcceptor, InProcessConnector, InProcessPeer, ManagedDuplexClient, RateLimitConfig,
    RateLimitError, RateLimitResult, RateLimiter, ToolSession, ToolSessionConfig,
};
#[cfg(feature = "websocket")]
pub use transport::WebSocketConnector;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_overrides,
    ConfigError, ConfigOverrides,
    ConfigSource, RelayConfigFile, RelayToml,
};
