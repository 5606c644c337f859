//! Transport Layer
//!
//! Wire-level pieces shared by the event stream and the duplex socket:
//! - `frame`: text event framing (encode, incremental decode)
//! - `rate_limit`: per-client token-bucket admission
//! - `backoff`: reconnect delay calculation
//! - `duplex`: managed reconnecting client over pluggable connections
//! - `tool_session`: server side of the duplex tool protocol

pub mod backoff;
pub mod duplex;
pub mod frame;
pub mod rate_limit;
pub mod tool_session;

// Re-exports for convenience
pub use backoff::{Backoff, BackoffConfig};
pub use duplex::{
    DuplexConfig, DuplexConnection, DuplexConnector, DuplexError, DuplexEvent, DuplexState,
    InProcessAcceptor, InProcessConnector, InProcessPeer, ManagedDuplexClient,
};
#[cfg(feature = "websocket")]
pub use duplex::WebSocketConnector;
pub use frame::{encode, encode_comment, Frame, FrameDecoder, FrameError, MAX_FRAME_SIZE};
pub use rate_limit::{
    RateLimitConfig, RateLimitError, RateLimitMetrics, RateLimitResult, RateLimiter,
};
pub use tool_session::{ToolSession, ToolSessionConfig};
