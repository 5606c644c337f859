//! WebSocket Duplex Connector
//!
//! tokio-tungstenite client. Text frames pass through; binary frames are
//! accepted if they hold UTF-8; control frames are handled by the library.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{DuplexConnection, DuplexConnector, DuplexError};

/// Connects to a `ws://` or `wss://` URL
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DuplexConnector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn DuplexConnection>, DuplexError> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| DuplexError::Connect(e.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DuplexConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), DuplexError> {
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| DuplexError::Send(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, DuplexError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| DuplexError::Receive(e.to_string())),
                    );
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {}
                Err(e) => return Some(Err(DuplexError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}
