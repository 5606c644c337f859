//! Server side of the duplex tool-invocation protocol
//!
//! One [`ToolSession`] per socket. It numbers every outbound message, stages
//! replies to `invoke_tool` on timers, and cancels whatever is still pending
//! when the socket goes away.
//!
//! # Replies
//!
//! | inbound | outbound |
//! |---|---|
//! | (open) | `tool_update {status: connected}` |
//! | `invoke_tool` | `tool_update {status: queued}`, later `partial_result`, then `complete` |
//! | `cancel_tool` | `tool_update {status: cancelled}`; staged replies dropped |
//! | `resume` | `tool_update {status: resumed}` |
//! | `ack`, `ping` | nothing |
//! | malformed | one `error {message}` |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ClientMessageKind, ServerMessage, ServerMessageKind};

/// Delays for staged `invoke_tool` replies, measured from receipt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSessionConfig {
    /// Delay before `partial_result`
    pub partial_delay: Duration,
    /// Delay before `complete`
    pub complete_delay: Duration,
}

impl Default for ToolSessionConfig {
    fn default() -> Self {
        Self {
            partial_delay: Duration::from_millis(300),
            complete_delay: Duration::from_millis(900),
        }
    }
}

/// Numbers and delivers outbound messages
///
/// Sequence assignment and channel send happen under one lock, so the
/// receiver always observes strictly increasing `seq`.
struct Outbox {
    inner: Mutex<OutboxInner>,
}

struct OutboxInner {
    seq: u64,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Outbox {
    fn send(&self, kind: ServerMessageKind, id: &str, payload: Value) -> bool {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let message = ServerMessage {
            kind,
            seq: inner.seq,
            id: id.to_string(),
            payload: Some(payload),
        };
        inner.tx.send(message).is_ok()
    }
}

type Invocations = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// One duplex connection's protocol state
pub struct ToolSession {
    id: String,
    config: ToolSessionConfig,
    outbox: Arc<Outbox>,
    invocations: Invocations,
    cancel: CancellationToken,
}

impl ToolSession {
    /// Open a session and send the `connected` greeting
    ///
    /// Returns the session and the stream of outbound messages.
    #[must_use]
    pub fn open(config: ToolSessionConfig) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            outbox: Arc::new(Outbox {
                inner: Mutex::new(OutboxInner { seq: 0, tx }),
            }),
            invocations: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        };

        info!(session_id = %session.id, "Tool session opened");
        session.outbox.send(
            ServerMessageKind::ToolUpdate,
            &session.id,
            json!({ "status": "connected" }),
        );
        (session, rx)
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invocations with replies still staged
    #[must_use]
    pub fn pending_invocations(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Check if the session has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle one inbound text frame
    ///
    /// Must be called within a tokio runtime (staged replies are spawned).
    pub fn handle_text(&self, text: &str) {
        if self.is_closed() {
            return;
        }

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Malformed duplex message");
                self.outbox.send(
                    ServerMessageKind::Error,
                    &self.id,
                    json!({ "message": e.to_string() }),
                );
            }
        }
    }

    /// Handle one parsed client message
    pub fn handle(&self, message: ClientMessage) {
        if self.is_closed() {
            return;
        }

        match message.kind {
            ClientMessageKind::InvokeTool => match message.tool {
                Some(tool) => {
                    let id = message
                        .id
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    self.invoke(id, tool, message.args.unwrap_or_default());
                }
                None => debug!(session_id = %self.id, "invoke_tool without a tool ignored"),
            },
            ClientMessageKind::CancelTool => {
                let id = message.id.unwrap_or_else(|| self.id.clone());
                let cancelled = self.invocations.lock().remove(&id);
                if let Some(token) = &cancelled {
                    token.cancel();
                }
                debug!(session_id = %self.id, invocation = %id, pending = cancelled.is_some(), "Tool cancelled");
                self.outbox.send(
                    ServerMessageKind::ToolUpdate,
                    &id,
                    json!({ "status": "cancelled", "sessionId": self.id }),
                );
            }
            ClientMessageKind::Resume => {
                let id = message.id.unwrap_or_else(|| self.id.clone());
                self.outbox.send(
                    ServerMessageKind::ToolUpdate,
                    &id,
                    json!({ "status": "resumed", "sessionId": self.id }),
                );
            }
            ClientMessageKind::Ack | ClientMessageKind::Ping => {}
        }
    }

    fn invoke(&self, id: String, tool: String, args: Map<String, Value>) {
        debug!(session_id = %self.id, invocation = %id, tool = %tool, "Tool invoked");
        self.outbox.send(
            ServerMessageKind::ToolUpdate,
            &id,
            json!({ "status": "queued", "sessionId": self.id }),
        );

        let token = self.cancel.child_token();
        if let Some(previous) = self.invocations.lock().insert(id.clone(), token.clone()) {
            previous.cancel();
        }

        let outbox = Arc::clone(&self.outbox);
        let invocations = Arc::clone(&self.invocations);
        let session_id = self.id.clone();
        let partial_delay = self.config.partial_delay;
        let complete_delay = self.config.complete_delay.saturating_sub(partial_delay);

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(partial_delay) => {}
            }
            let args = Value::Object(args).to_string();
            outbox.send(
                ServerMessageKind::PartialResult,
                &id,
                json!({ "output": format!("Running {tool} with args {args}") }),
            );

            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(complete_delay) => {}
            }
            outbox.send(
                ServerMessageKind::Complete,
                &id,
                json!({ "output": format!("Tool {tool} finished"), "sessionId": session_id }),
            );

            // A replaced invocation has its token cancelled; leave the newer entry alone
            let mut invocations = invocations.lock();
            if !token.is_cancelled() {
                invocations.remove(&id);
            }
        });
    }

    /// Cancel every staged reply; true only on the first call
    pub fn close(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        let pending = {
            let mut invocations = self.invocations.lock();
            let pending = invocations.len();
            invocations.clear();
            pending
        };
        info!(session_id = %self.id, pending, "Tool session closed");
        true
    }
}

impl Drop for ToolSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn kinds(messages: &[ServerMessage]) -> Vec<(ServerMessageKind, u64)> {
        messages.iter().map(|m| (m.kind, m.seq)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_is_first() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());
        let greeting = rx.recv().await.unwrap();

        assert_eq!(greeting.kind, ServerMessageKind::ToolUpdate);
        assert_eq!(greeting.seq, 1);
        assert_eq!(greeting.id, session.id());
        assert_eq!(greeting.status(), Some("connected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_stages_replies() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());
        drain(&mut rx);

        session.handle_text(r#"{"type":"invoke_tool","seq":1,"id":"t1","tool":"web-search","args":{"q":"rust"}}"#);
        let queued = drain(&mut rx);
        assert_eq!(kinds(&queued), vec![(ServerMessageKind::ToolUpdate, 2)]);
        assert_eq!(queued[0].status(), Some("queued"));

        tokio::time::sleep(Duration::from_millis(350)).await;
        let partial = drain(&mut rx);
        assert_eq!(kinds(&partial), vec![(ServerMessageKind::PartialResult, 3)]);
        assert_eq!(
            partial[0].output(),
            Some(r#"Running web-search with args {"q":"rust"}"#)
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        let complete = drain(&mut rx);
        assert_eq!(kinds(&complete), vec![(ServerMessageKind::Complete, 4)]);
        assert_eq!(complete[0].id, "t1");
        assert_eq!(complete[0].output(), Some("Tool web-search finished"));
        assert_eq!(session.pending_invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_without_id_gets_one() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());
        drain(&mut rx);

        session.handle_text(r#"{"type":"invoke_tool","tool":"code-executor"}"#);
        let queued = drain(&mut rx);
        assert_eq!(queued.len(), 1);
        assert!(!queued[0].id.is_empty());
        assert_ne!(queued[0].id, session.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_yields_one_error_and_session_survives() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());
        drain(&mut rx);

        session.handle_text("{oops");
        let errors = drain(&mut rx);
        assert_eq!(kinds(&errors), vec![(ServerMessageKind::Error, 2)]);
        assert_eq!(errors[0].id, session.id());

        session.handle_text(r#"{"type":"resume","seq":2,"id":"t9"}"#);
        let resumed = drain(&mut rx);
        assert_eq!(kinds(&resumed), vec![(ServerMessageKind::ToolUpdate, 3)]);
        assert_eq!(resumed[0].status(), Some("resumed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_staged_replies() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());
        drain(&mut rx);

        session.handle_text(r#"{"type":"invoke_tool","id":"t1","tool":"web-search"}"#);
        session.handle_text(r#"{"type":"cancel_tool","id":"t1"}"#);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let messages = drain(&mut rx);
        let statuses: Vec<_> = messages.iter().map(|m| m.status()).collect();
        assert_eq!(statuses, vec![Some("queued"), Some("cancelled")]);
        assert_eq!(session.pending_invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_and_ping_are_silent() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());
        drain(&mut rx);

        session.handle_text(r#"{"type":"ack","seq":1}"#);
        session.handle_text(r#"{"type":"ping"}"#);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_once() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());
        drain(&mut rx);

        session.handle_text(r#"{"type":"invoke_tool","id":"a","tool":"web-search"}"#);
        session.handle_text(r#"{"type":"invoke_tool","id":"b","tool":"web-search"}"#);
        assert_eq!(session.pending_invocations(), 2);

        assert!(session.close());
        assert!(!session.close());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain(&mut rx).len(), 2);
        session.handle_text(r#"{"type":"resume","id":"a"}"#);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seq_strictly_increases_across_interleaved_invocations() {
        let (session, mut rx) = ToolSession::open(ToolSessionConfig::default());

        for i in 0..3 {
            session.handle_text(&format!(r#"{{"type":"invoke_tool","id":"t{i}","tool":"web-search"}}"#));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let seqs: Vec<u64> = drain(&mut rx).iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    }
}
