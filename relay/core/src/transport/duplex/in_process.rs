//! In-Process Duplex Connector
//!
//! Channel-backed connections for embedded use and tests. Each successful
//! `connect` hands the far end to the paired [`InProcessAcceptor`].
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut acceptor) = InProcessConnector::new_pair();
//! let (client, events) = ManagedDuplexClient::<Value>::spawn(connector, config);
//!
//! let mut peer = acceptor.accept().await.unwrap();
//! peer.send(r#"{"type":"complete"}"#);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{DuplexConnection, DuplexConnector, DuplexError};

/// Connector whose connections terminate at an [`InProcessAcceptor`]
#[derive(Clone)]
pub struct InProcessConnector {
    accept_tx: mpsc::UnboundedSender<InProcessPeer>,
    refusing: Arc<AtomicBool>,
}

/// Far end of an [`InProcessConnector`]
pub struct InProcessAcceptor {
    accept_rx: mpsc::UnboundedReceiver<InProcessPeer>,
}

/// Far end of one in-process connection
///
/// Dropping the peer closes the connection from the client's point of view.
pub struct InProcessPeer {
    /// Frames sent by the client
    pub incoming: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the client
    pub outgoing: mpsc::UnboundedSender<String>,
}

impl InProcessConnector {
    /// Create a connector and its acceptor
    #[must_use]
    pub fn new_pair() -> (Self, InProcessAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refusing: Arc::new(AtomicBool::new(false)),
            },
            InProcessAcceptor { accept_rx },
        )
    }

    /// Make subsequent connection attempts fail (or succeed again)
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DuplexConnector for InProcessConnector {
    async fn connect(&self) -> Result<Box<dyn DuplexConnection>, DuplexError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(DuplexError::Connect("connection refused".to_string()));
        }

        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();

        self.accept_tx
            .send(InProcessPeer {
                incoming: peer_rx,
                outgoing: peer_tx,
            })
            .map_err(|_| DuplexError::Connect("acceptor dropped".to_string()))?;

        Ok(Box::new(InProcessConnection {
            tx: Some(client_tx),
            rx: client_rx,
        }))
    }
}

impl InProcessAcceptor {
    /// Wait for the next connection
    pub async fn accept(&mut self) -> Option<InProcessPeer> {
        self.accept_rx.recv().await
    }

    /// Take a pending connection without waiting
    pub fn try_accept(&mut self) -> Option<InProcessPeer> {
        self.accept_rx.try_recv().ok()
    }
}

impl InProcessPeer {
    /// Deliver a frame to the client; false if the client is gone
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outgoing.send(text.into()).is_ok()
    }

    /// Next frame from the client; `None` once it has closed
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }
}

struct InProcessConnection {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl DuplexConnection for InProcessConnection {
    async fn send_text(&mut self, text: String) -> Result<(), DuplexError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| DuplexError::Send("connection closed".to_string()))?;
        tx.send(text)
            .map_err(|_| DuplexError::Send("peer dropped".to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, DuplexError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx.take();
        self.rx.close();
    }
}
