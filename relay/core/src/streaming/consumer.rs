//! Event stream consumer
//!
//! Reads a chunked byte stream, decodes frames across arbitrary chunk
//! boundaries, and hands typed events to a callback as they arrive.
//!
//! # Outcomes
//!
//! - End of stream: `Ok(ConsumeOutcome::Completed)`
//! - Caller cancelled: `Ok(ConsumeOutcome::Aborted)` (not an error)
//! - Transport failure or non-success status: `Err(ConsumerError)`
//!
//! Malformed frames are reported through the callback and skipped.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{ProtocolError, StreamEvent, StreamRequest};
use crate::transport::frame::FrameDecoder;

/// Errors that stop consumption
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Connection or read failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("Unexpected status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, if readable
        body: String,
    },
}

/// Delivered to the consumer callback, in arrival order
#[derive(Debug)]
pub enum ConsumerEvent {
    /// Response accepted; events follow
    Opened,
    /// A decoded event
    Event(StreamEvent),
    /// A frame that could not be decoded; consumption continues
    DecodeError(ProtocolError),
}

/// How consumption ended without error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Stream ended normally
    Completed,
    /// Caller cancelled
    Aborted,
}

/// Decode a byte stream until it ends, fails, or `cancel` fires
///
/// # Errors
///
/// Returns `ConsumerError::Transport` if the stream yields an error.
pub async fn consume<S, B, E, F>(
    stream: S,
    cancel: &CancellationToken,
    mut handler: F,
) -> Result<ConsumeOutcome, ConsumerError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(ConsumerEvent),
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = FrameDecoder::new();

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(buffered = decoder.available(), "Stream consumption aborted");
                return Ok(ConsumeOutcome::Aborted);
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                decoder.push(bytes.as_ref());
                drain(&mut decoder, &mut handler);
            }
            Some(Err(e)) => {
                warn!(error = %e, "Stream transport failed");
                return Err(ConsumerError::Transport(e.to_string()));
            }
            None => {
                if decoder.available() > 0 {
                    debug!(trailing = decoder.available(), "Stream ended mid-frame");
                }
                return Ok(ConsumeOutcome::Completed);
            }
        }
    }
}

fn drain<F: FnMut(ConsumerEvent)>(decoder: &mut FrameDecoder, handler: &mut F) {
    loop {
        match decoder.decode() {
            Ok(Some(frame)) => match StreamEvent::try_from(frame) {
                Ok(event) => handler(ConsumerEvent::Event(event)),
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable event");
                    handler(ConsumerEvent::DecodeError(e));
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                handler(ConsumerEvent::DecodeError(e.into()));
            }
        }
    }
}

/// HTTP client for the event stream endpoint
#[derive(Clone, Debug)]
pub struct StreamConsumer {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
}

impl StreamConsumer {
    /// Create a consumer for `url` with a default client
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a consumer sharing an existing client
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            bearer: None,
        }
    }

    /// Authenticate as `token`
    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// POST `request` and consume the response stream
    ///
    /// # Errors
    ///
    /// Returns `ConsumerError::Transport` if the request or a read fails, and
    /// `ConsumerError::Status` for a non-success response.
    pub async fn open<F>(
        &self,
        request: &StreamRequest,
        cancel: &CancellationToken,
        mut handler: F,
    ) -> Result<ConsumeOutcome, ConsumerError>
    where
        F: FnMut(ConsumerEvent),
    {
        let mut builder = self
            .client
            .post(&self.url)
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(ConsumeOutcome::Aborted),
            response = builder.send() => {
                response.map_err(|e| ConsumerError::Transport(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConsumerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(url = %self.url, "Stream opened");
        handler(ConsumerEvent::Opened);
        consume(response.bytes_stream(), cancel, handler).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use std::convert::Infallible;
    use std::time::Duration;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_reassembles_split_frames() {
        let parts: &[&'static [u8]] = &[
            b": stream-start\n\nevent: tok",
            b"en\ndata: {\"id\":\"a\",\"text\":\"hi\"}\n",
            b"\nevent: done\ndata: {}\n\n",
        ];
        let mut events = Vec::new();
        let outcome = consume(chunks(parts), &CancellationToken::new(), |e| events.push(e))
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Completed);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ConsumerEvent::Event(StreamEvent::Token(t)) if t.text == "hi"));
        assert!(matches!(&events[1], ConsumerEvent::Event(StreamEvent::Done(_))));
    }

    #[tokio::test]
    async fn test_decode_errors_do_not_stop_stream() {
        let parts: &[&'static [u8]] = &[
            b"event: token\ndata: {broken\n\n",
            b"event: progress\ndata: {}\n\n",
            b"event: done\ndata: {}\n\n",
        ];
        let mut errors = 0;
        let mut done = false;
        consume(chunks(parts), &CancellationToken::new(), |e| match e {
            ConsumerEvent::DecodeError(_) => errors += 1,
            ConsumerEvent::Event(StreamEvent::Done(_)) => done = true,
            _ => {}
        })
        .await
        .unwrap();

        assert_eq!(errors, 2);
        assert!(done);
    }

    #[tokio::test]
    async fn test_transport_error_is_reported() {
        let items: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"event: done\ndata: {}\n\n")),
            Err("connection reset".to_string()),
        ];
        let mut seen = 0;
        let result = consume(stream::iter(items), &CancellationToken::new(), |_| seen += 1).await;

        assert_eq!(seen, 1);
        assert!(matches!(result, Err(ConsumerError::Transport(m)) if m == "connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unblocks_pending_read() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let never = stream::pending::<Result<Bytes, Infallible>>();
        let outcome = consume(never, &cancel, |_| {}).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 429 Too Many Requests\r\ncontent-length: 4\r\nconnection: close\r\n\r\nslow")
                .await;
        });

        let consumer = StreamConsumer::new(format!("http://{addr}/api/realtime"));
        let result = consumer
            .open(&StreamRequest::new("weather"), &CancellationToken::new(), |_| {})
            .await;

        assert!(matches!(
            result,
            Err(ConsumerError::Status { status: 429, ref body }) if body == "slow"
        ));
    }
}
