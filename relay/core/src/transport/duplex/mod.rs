//! Managed Duplex Connections
//!
//! A persistent bidirectional JSON channel that reconnects on its own.
//!
//! # Design
//!
//! The socket sits behind two traits so the reconnect state machine can run
//! against anything that moves text frames:
//!
//! - [`DuplexConnector`] opens a fresh connection per attempt
//! - [`DuplexConnection`] moves text frames until either side hangs up
//!
//! [`ManagedDuplexClient`] drives a connector: it pings on an interval while
//! open, parses inbound JSON into a caller-chosen type, and reconnects with
//! exponential backoff until closed on purpose.
//!
//! Implementations:
//! - [`InProcessConnector`]: channel pair, for embedding and tests
//! - `WebSocketConnector`: tokio-tungstenite client (`websocket` feature)

pub mod client;
pub mod in_process;
#[cfg(feature = "websocket")]
pub mod websocket;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backoff::BackoffConfig;

pub use client::ManagedDuplexClient;
pub use in_process::{InProcessAcceptor, InProcessConnector, InProcessPeer};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

// =============================================================================
// Errors and State
// =============================================================================

/// Errors from duplex connections
#[derive(Debug, Error)]
pub enum DuplexError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Writing a frame failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading a frame failed
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Outbound message could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Send attempted while the connection is not open
    #[error("Connection is not open (state: {0})")]
    NotOpen(DuplexState),
}

/// Lifecycle state of a managed duplex client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplexState {
    /// Attempting to connect
    Connecting,
    /// Connected and ready to send
    Open,
    /// Intentional close in progress
    Closing,
    /// Waiting out a backoff delay
    Reconnecting,
    /// Closed on purpose; will not reconnect
    Closed,
}

impl DuplexState {
    /// Check if sends are accepted
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the client has stopped for good
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for DuplexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Lifecycle and message notifications, in order of occurrence
#[derive(Clone, Debug, PartialEq)]
pub enum DuplexEvent<M> {
    /// Connection established
    Opened,
    /// Inbound message parsed
    Message(M),
    /// Connection ended (or a connect attempt failed)
    Closed {
        /// What ended it
        reason: String,
    },
    /// Reconnect scheduled
    Reconnecting {
        /// Failed cycles since the last successful open
        attempt: u32,
        /// Wait before the next attempt
        delay: Duration,
    },
}

// =============================================================================
// Connection Traits
// =============================================================================

/// Opens connections for a managed client
#[async_trait]
pub trait DuplexConnector: Send + Sync {
    /// Open a new connection
    ///
    /// # Errors
    ///
    /// Returns `DuplexError::Connect` if the peer cannot be reached.
    async fn connect(&self) -> Result<Box<dyn DuplexConnection>, DuplexError>;
}

/// An established text-frame connection
#[async_trait]
pub trait DuplexConnection: Send {
    /// Send one text frame
    ///
    /// # Errors
    ///
    /// Returns `DuplexError::Send` if the frame cannot be written.
    async fn send_text(&mut self, text: String) -> Result<(), DuplexError>;

    /// Receive the next text frame; `None` once the peer has closed
    ///
    /// Must be cancel-safe.
    async fn recv_text(&mut self) -> Option<Result<String, DuplexError>>;

    /// Close the connection
    async fn close(&mut self);
}

// =============================================================================
// Configuration
// =============================================================================

/// Default interval between keep-alive pings (milliseconds)
pub const DEFAULT_HEARTBEAT_MS: u64 = 25_000;

/// Configuration for a managed duplex client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplexConfig {
    /// Reconnect delay bounds
    pub backoff: BackoffConfig,
    /// Interval between keep-alive pings (milliseconds)
    pub heartbeat_ms: u64,
    /// Whether keep-alive pings are sent
    pub heartbeat_enabled: bool,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            heartbeat_enabled: true,
        }
    }
}

impl DuplexConfig {
    /// Create a new config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backoff bounds
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = BackoffConfig {
            initial_ms: duration_ms(initial),
            max_ms: duration_ms(max),
        };
        self
    }

    /// Set the heartbeat interval
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_ms = duration_ms(interval);
        self
    }

    /// Create a config with heartbeat disabled
    #[must_use]
    pub fn without_heartbeat() -> Self {
        Self {
            heartbeat_enabled: false,
            ..Self::default()
        }
    }

    /// Heartbeat interval as a duration
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DuplexConfig::default();
        assert_eq!(config.backoff.initial_ms, 500);
        assert_eq!(config.backoff.max_ms, 4000);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(25));
        assert!(config.heartbeat_enabled);
    }

    #[test]
    fn test_state_predicates() {
        assert!(DuplexState::Open.is_open());
        assert!(!DuplexState::Reconnecting.is_open());
        assert!(DuplexState::Closed.is_terminal());
        assert!(!DuplexState::Closing.is_terminal());
    }
}
