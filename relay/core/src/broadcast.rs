//! Fan-out of one payload stream to many subscribers
//!
//! Each subscriber gets its own unbounded queue, so a slow reader never
//! blocks the publisher or other readers. Subscribers whose receiver has been
//! dropped are pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

/// Handle identifying one subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Delivery report for one publish
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Subscribers that received the payload
    pub delivered: usize,
    /// Subscribers removed because their receiver was gone
    pub pruned: usize,
}

/// Generic broadcaster
pub struct Broadcaster<T> {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::UnboundedSender<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Broadcaster<T> {
    /// Create a broadcaster with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a subscriber
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<T>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().insert(id, tx);
        debug!(subscriber = %id, "Subscriber added");
        (id, rx)
    }

    /// Remove a subscriber; false if it was not registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Subscriber removed");
        }
        removed
    }

    /// Deliver `payload` to every live subscriber
    pub fn publish(&self, payload: &T) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        let mut dead = Vec::new();

        for (id, tx) in self.subscribers.read().iter() {
            if tx.send(payload.clone()).is_ok() {
                result.delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &dead {
                subscribers.remove(id);
            }
            result.pruned = dead.len();
            debug!(pruned = result.pruned, "Pruned closed subscribers");
        }
        result
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
