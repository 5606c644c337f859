//! Managed duplex client with reconnect and heartbeat
//!
//! A background driver task owns the connection. The handle only flips state,
//! queues outbound frames for the current connection, and requests shutdown.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DuplexConfig, DuplexConnection, DuplexConnector, DuplexError, DuplexEvent, DuplexState};
use crate::protocol::ClientMessage;
use crate::transport::backoff::Backoff;

const CLIENT_CLOSE_REASON: &str = "closed by client";
const PEER_CLOSE_REASON: &str = "connection closed by peer";

struct Shared {
    state: watch::Sender<DuplexState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown: CancellationToken,
    attempts: AtomicU32,
}

impl Shared {
    /// Apply a transition; nothing leaves Closing/Closed except into Closed
    fn transition(&self, next: DuplexState) {
        self.state.send_if_modified(|current| {
            let locked = matches!(*current, DuplexState::Closing | DuplexState::Closed);
            if *current == next || (locked && next != DuplexState::Closed) {
                return false;
            }
            debug!(from = %current, to = %next, "Duplex state change");
            *current = next;
            true
        });
    }
}

/// Persistent duplex connection that reconnects until closed
///
/// `M` is the type inbound JSON frames are parsed into. Frames that fail to
/// parse are logged and dropped; the connection stays up.
pub struct ManagedDuplexClient<M> {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
    _message: PhantomData<fn() -> M>,
}

impl<M> ManagedDuplexClient<M>
where
    M: DeserializeOwned + Send + 'static,
{
    /// Start the driver task
    ///
    /// Returns the handle and the ordered event stream. The stream ends once
    /// the client has closed. Must be called within a tokio runtime.
    pub fn spawn<C>(connector: C, config: DuplexConfig) -> (Self, mpsc::UnboundedReceiver<DuplexEvent<M>>)
    where
        C: DuplexConnector + 'static,
    {
        let (state, _) = watch::channel(DuplexState::Connecting);
        let shared = Arc::new(Shared {
            state,
            outbound: Mutex::new(None),
            shutdown: CancellationToken::new(),
            attempts: AtomicU32::new(0),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let driver = tokio::spawn(drive(connector, config, Arc::clone(&shared), events_tx));

        (
            Self {
                shared,
                driver: Mutex::new(Some(driver)),
                _message: PhantomData,
            },
            events_rx,
        )
    }
}

impl<M> ManagedDuplexClient<M> {
    /// Current state
    #[must_use]
    pub fn state(&self) -> DuplexState {
        *self.shared.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<DuplexState> {
        self.shared.state.subscribe()
    }

    /// Failed cycles since the last successful open
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Serialize and send a message on the current connection
    ///
    /// # Errors
    ///
    /// Returns `DuplexError::NotOpen` unless the connection is open. Nothing
    /// is buffered for a later connection.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), DuplexError> {
        let text =
            serde_json::to_string(message).map_err(|e| DuplexError::Serialization(e.to_string()))?;
        self.send_text(text)
    }

    /// Send a raw text frame on the current connection
    ///
    /// # Errors
    ///
    /// Returns `DuplexError::NotOpen` unless the connection is open.
    pub fn send_text(&self, text: String) -> Result<(), DuplexError> {
        let state = self.state();
        if !state.is_open() {
            return Err(DuplexError::NotOpen(state));
        }

        let outbound = self.shared.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.send(text).map_err(|_| DuplexError::NotOpen(state)),
            None => Err(DuplexError::NotOpen(state)),
        }
    }

    /// Close on purpose; suppresses any further reconnection
    ///
    /// Idempotent. The driver finishes asynchronously; use
    /// [`ManagedDuplexClient::shutdown`] to wait for it.
    pub fn close(&self) {
        if matches!(self.state(), DuplexState::Closing | DuplexState::Closed) {
            return;
        }
        info!("Closing duplex client");
        self.shared.transition(DuplexState::Closing);
        self.shared.shutdown.cancel();
    }

    /// Close and wait for the driver to exit
    pub async fn shutdown(&self) {
        self.close();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!(error = %e, "Duplex driver task failed");
            }
        }
    }
}

impl<M> Drop for ManagedDuplexClient<M> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl<M> std::fmt::Debug for ManagedDuplexClient<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedDuplexClient")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

// =============================================================================
// Driver
// =============================================================================

async fn drive<C, M>(
    connector: C,
    config: DuplexConfig,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<DuplexEvent<M>>,
) where
    C: DuplexConnector,
    M: DeserializeOwned,
{
    let mut backoff = Backoff::from(&config.backoff);

    loop {
        shared.transition(DuplexState::Connecting);

        let attempt = tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            attempt = connector.connect() => attempt,
        };

        let reason = match attempt {
            Ok(connection) => {
                backoff.reset();
                shared.attempts.store(0, Ordering::SeqCst);

                let (tx, rx) = mpsc::unbounded_channel();
                *shared.outbound.lock() = Some(tx);
                shared.transition(DuplexState::Open);
                info!("Duplex connection open");
                let _ = events.send(DuplexEvent::Opened);

                let reason = run_connection(connection, rx, &config, &shared.shutdown, &events).await;
                shared.outbound.lock().take();
                reason
            }
            Err(e) => {
                warn!(error = %e, "Duplex connect failed");
                e.to_string()
            }
        };

        if shared.shutdown.is_cancelled() {
            let _ = events.send(DuplexEvent::Closed { reason });
            break;
        }

        // Heartbeat was dropped with the connection; nothing ticks from here on
        shared.transition(DuplexState::Reconnecting);
        let _ = events.send(DuplexEvent::Closed { reason });

        let delay = backoff.next_delay();
        let attempt = backoff.attempts();
        shared.attempts.store(attempt, Ordering::SeqCst);
        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling duplex reconnect");
        let _ = events.send(DuplexEvent::Reconnecting { attempt, delay });

        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    shared.outbound.lock().take();
    shared.transition(DuplexState::Closed);
    debug!("Duplex driver stopped");
}

/// Pump one connection until it ends; returns the close reason
async fn run_connection<M: DeserializeOwned>(
    mut connection: Box<dyn DuplexConnection>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    config: &DuplexConfig,
    shutdown: &CancellationToken,
    events: &mpsc::UnboundedSender<DuplexEvent<M>>,
) -> String {
    let period = config.heartbeat_interval();
    let mut heartbeat = config
        .heartbeat_enabled
        .then(|| tokio::time::interval_at(Instant::now() + period, period));
    let ping = ClientMessage::ping_payload().to_string();

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                connection.close().await;
                return CLIENT_CLOSE_REASON.to_string();
            }
            inbound = connection.recv_text() => match inbound {
                Some(Ok(text)) => match serde_json::from_str::<M>(&text) {
                    Ok(message) => {
                        let _ = events.send(DuplexEvent::Message(message));
                    }
                    Err(e) => {
                        warn!(error = %e, len = text.len(), "Dropping malformed duplex message");
                    }
                },
                Some(Err(e)) => {
                    warn!(error = %e, "Duplex receive failed");
                    return e.to_string();
                }
                None => return PEER_CLOSE_REASON.to_string(),
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = connection.send_text(text).await {
                    warn!(error = %e, "Duplex send failed");
                    return e.to_string();
                }
            }
            () = tick(&mut heartbeat) => {
                if let Err(e) = connection.send_text(ping.clone()).await {
                    warn!(error = %e, "Duplex heartbeat failed");
                    return e.to_string();
                }
            }
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
