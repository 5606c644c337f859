//! Scripted event stream producer
//!
//! Plays a fixed, time-staggered script into a [`StreamSession`]:
//!
//! ```text
//! t=0      token        "Thinking... "
//!          : stream-start
//! t=400ms  tool-status  web-search running
//! t=800ms  token        Analyzing "<prompt>"
//! t=1400ms message      assistant summary + completed tool call
//!          tool-status  web-search done
//!          done         {id, output}
//!          (close)
//! ```
//!
//! A `: ping` comment goes out every heartbeat interval until close.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::session::StreamSession;
use crate::protocol::{Message, ProtocolError, StreamEvent, StreamRequest, ToolCall, ToolStatus};

/// Default heartbeat interval (milliseconds)
pub const DEFAULT_HEARTBEAT_MS: u64 = 15_000;

/// Timing and naming for the scripted stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Interval between `: ping` comments (milliseconds)
    pub heartbeat_ms: u64,
    /// Delay before the running tool status (milliseconds)
    pub tool_status_delay_ms: u64,
    /// Delay before the follow-up token (milliseconds)
    pub analyze_delay_ms: u64,
    /// Delay before the final message and terminators (milliseconds)
    pub complete_delay_ms: u64,
    /// Tool reported by the script
    pub tool_name: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
            tool_status_delay_ms: 400,
            analyze_delay_ms: 800,
            complete_delay_ms: 1400,
            tool_name: "web-search".to_string(),
        }
    }
}

impl ProducerConfig {
    /// Set the heartbeat interval
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Heartbeat interval as a duration
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }
}

/// Starts scripted streams
#[derive(Clone, Debug, Default)]
pub struct StreamProducer {
    config: ProducerConfig,
}

impl StreamProducer {
    /// Create a producer
    #[must_use]
    pub fn new(config: ProducerConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Validate `request` and start its stream
    ///
    /// The stream ends on its own after the final `done`, or earlier if
    /// `cancel` fires or the returned [`ProducerStream`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidRequest` for an empty prompt; no
    /// session is created in that case.
    pub fn start(
        &self,
        request: &StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<ProducerStream, ProtocolError> {
        request.validate()?;

        let (session, receiver) = StreamSession::open(cancel);
        info!(session_id = %session.id(), tools = request.tools.len(), "Stream started");

        let prompt = request.prompt.clone();
        let tool_id = uuid::Uuid::new_v4().to_string();
        let tool_name = self.config.tool_name.clone();

        session.send(&StreamEvent::token(new_id(), "Thinking... "));
        session.comment("stream-start");

        {
            let (id, name) = (tool_id.clone(), tool_name.clone());
            session.schedule(ms(self.config.tool_status_delay_ms), move |s| {
                s.send(&StreamEvent::tool_status(id, name, ToolStatus::Running));
            });
        }

        {
            let text = format!("Analyzing \"{prompt}\" ");
            session.schedule(ms(self.config.analyze_delay_ms), move |s| {
                s.send(&StreamEvent::token(new_id(), text));
            });
        }

        {
            let tools = request.tools.clone();
            session.schedule(ms(self.config.complete_delay_ms), move |s| {
                let output = format!("Synthetic search results for \"{prompt}\"");
                let selected = if tools.is_empty() {
                    "none".to_string()
                } else {
                    tools.join(", ")
                };
                let call = ToolCall::new(tool_id.clone(), tool_name.clone(), ToolStatus::Done)
                    .with_arg("query", prompt.clone())
                    .with_output(output.clone());
                let message = Message::assistant(format!(
                    "Here is a streamed response summarizing \"{prompt}\". Tools selected: {selected}."
                ))
                .with_tool_calls(vec![call]);

                s.send(&StreamEvent::Message(message));
                s.send(&StreamEvent::tool_status(
                    tool_id.clone(),
                    tool_name,
                    ToolStatus::Done,
                ));
                s.send(&StreamEvent::tool_done(tool_id, Some(output)));
                s.close();
                info!(session_id = %s.id(), "Stream completed");
            });
        }

        session.start_heartbeat(self.config.heartbeat_interval());

        Ok(ProducerStream { session, receiver })
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Output side of a started stream
///
/// Dropping it closes the session.
pub struct ProducerStream {
    session: Arc<StreamSession>,
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl ProducerStream {
    /// The session writing into this stream
    #[must_use]
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Next chunk; `None` once the session has closed and drained
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Convert into a byte stream
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        UnboundedReceiverStream::new(self.receiver)
    }
}
