//! Stream session lifecycle
//!
//! A [`StreamSession`] owns one outbound byte channel plus every timer that
//! writes into it. Closing the session drops the channel and aborts the
//! timers as a unit, exactly once.
//!
//! The session closes when any of these happens:
//! - [`StreamSession::close`] is called (normally by the last scripted step)
//! - the external cancellation token fires
//! - the receiving end of the channel is dropped
//!
//! Writes after close are dropped silently: a timer that lost the race with
//! close gets `false` back, not an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::protocol::StreamEvent;
use crate::transport::frame::encode_comment;

struct SessionInner {
    closed: bool,
    sink: Option<mpsc::UnboundedSender<Bytes>>,
    tasks: HashMap<u64, AbortHandle>,
    heartbeat: Option<AbortHandle>,
    next_task: u64,
}

/// One server-side event stream
pub struct StreamSession {
    id: String,
    inner: Mutex<SessionInner>,
    token: CancellationToken,
}

impl StreamSession {
    /// Open a session tied to `cancel`
    ///
    /// Returns the session and the receiving end of its byte channel. Must be
    /// called within a tokio runtime.
    #[must_use]
    pub fn open(cancel: &CancellationToken) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch_tx = tx.clone();

        let session = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            inner: Mutex::new(SessionInner {
                closed: false,
                sink: Some(tx),
                tasks: HashMap::new(),
                heartbeat: None,
                next_task: 0,
            }),
            token: cancel.child_token(),
        });

        let watcher = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::select! {
                () = watcher.token.cancelled() => {}
                () = watch_tx.closed() => {
                    debug!(session_id = %watcher.id, "Stream receiver dropped");
                }
            }
            drop(watch_tx);
            watcher.close();
        });

        debug!(session_id = %session.id, "Stream session opened");
        (session, rx)
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if the session has closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Scheduled tasks that have neither run nor been cancelled
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Resolves once the session has closed or its token was cancelled
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }

    /// Write raw bytes; false if the session is (or just became) closed
    pub fn enqueue(&self, bytes: impl Into<Bytes>) -> bool {
        let sent = {
            let inner = self.inner.lock();
            if inner.closed {
                trace!(session_id = %self.id, "Dropping write after close");
                return false;
            }
            inner
                .sink
                .as_ref()
                .is_some_and(|sink| sink.send(bytes.into()).is_ok())
        };

        if !sent {
            debug!(session_id = %self.id, "Stream receiver gone, closing");
            self.close();
        }
        sent
    }

    /// Encode and write a typed event
    pub fn send(&self, event: &StreamEvent) -> bool {
        match event.encode() {
            Ok(bytes) => self.enqueue(bytes),
            Err(e) => {
                warn!(session_id = %self.id, event = %event.event_type(), error = %e, "Failed to encode event");
                false
            }
        }
    }

    /// Write a comment frame
    pub fn comment(&self, text: &str) -> bool {
        self.enqueue(encode_comment(text))
    }

    /// Run `step` after `delay` unless the session closes first
    ///
    /// Returns false (and schedules nothing) if already closed.
    pub fn schedule<F>(self: &Arc<Self>, delay: Duration, step: F) -> bool
    where
        F: FnOnce(&StreamSession) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }

        let task_id = inner.next_task;
        inner.next_task += 1;

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = session.inner.lock();
                inner.tasks.remove(&task_id);
                if inner.closed {
                    return;
                }
            }
            step(&session);
        });
        inner.tasks.insert(task_id, handle.abort_handle());
        true
    }

    /// Write `: ping` every `interval` until close
    ///
    /// Replaces any heartbeat already running.
    pub fn start_heartbeat(self: &Arc<Self>, interval: Duration) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if !session.comment("ping") {
                    break;
                }
            }
        });

        if let Some(previous) = inner.heartbeat.replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Close the session; true only for the call that closed it
    ///
    /// Drops the byte channel, aborts the heartbeat and every pending
    /// scheduled task, and cancels the session token.
    pub fn close(&self) -> bool {
        let (tasks, heartbeat) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            inner.closed = true;
            inner.sink = None;
            let tasks: Vec<AbortHandle> = inner.tasks.drain().map(|(_, handle)| handle).collect();
            (tasks, inner.heartbeat.take())
        };

        let cancelled = tasks.len();
        for task in tasks {
            task.abort();
        }
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        self.token.cancel();

        debug!(session_id = %self.id, cancelled_tasks = cancelled, "Stream session closed");
        true
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            out.push(String::from_utf8(bytes.to_vec()).unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_cancels_tasks() {
        let (session, mut rx) = StreamSession::open(&CancellationToken::new());
        let ran = Arc::new(AtomicUsize::new(0));

        for delay in [100, 200, 300] {
            let ran = Arc::clone(&ran);
            session.schedule(Duration::from_millis(delay), move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(session.pending_tasks(), 3);

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.pending_tasks(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_close_is_dropped() {
        let (session, mut rx) = StreamSession::open(&CancellationToken::new());
        assert!(session.comment("first"));
        session.close();

        assert!(!session.comment("late"));
        assert!(!session.schedule(Duration::ZERO, |_| {}));
        assert_eq!(drain(&mut rx), vec![": first\n\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_step_runs_and_leaves_set() {
        let (session, mut rx) = StreamSession::open(&CancellationToken::new());
        session.schedule(Duration::from_millis(50), |s| {
            s.comment("step");
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(session.pending_tasks(), 0);
        assert_eq!(drain(&mut rx), vec![": step\n\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ticks_until_close() {
        let (session, mut rx) = StreamSession::open(&CancellationToken::new());
        session.start_heartbeat(Duration::from_secs(15));

        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(drain(&mut rx).len(), 2);

        session.close();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_closes() {
        let cancel = CancellationToken::new();
        let (session, _rx) = StreamSession::open(&cancel);
        session.schedule(Duration::from_secs(5), |_| {});

        cancel.cancel();
        while !session.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(session.is_closed());
        assert_eq!(session.pending_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_resolves_only_after_close() {
        let (session, _rx) = StreamSession::open(&CancellationToken::new());
        let mut closed = tokio_test::task::spawn(session.closed());

        tokio_test::assert_pending!(closed.poll());
        session.close();
        assert!(closed.is_woken());
        tokio_test::assert_ready!(closed.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_closes() {
        let (session, rx) = StreamSession::open(&CancellationToken::new());
        session.start_heartbeat(Duration::from_secs(15));
        drop(rx);

        session.closed().await;
        assert!(session.is_closed());
    }
}
