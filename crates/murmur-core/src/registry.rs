//! Registry of live subscriber channels.
//!
//! Every open event stream owns one unbounded channel. The registry holds the
//! sending halves while the stream is registered; broadcasts work on a
//! copied-out snapshot so the lock is never held while delivering.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Identity of one subscriber channel.
///
/// Ids are never reused within a process, so two subscribers are distinct even
/// when their state is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Delivery to a subscriber channel failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The receiving session is gone.
    #[error("Subscriber channel closed: {0}")]
    Closed(SubscriberId),
}

/// The receiving half of a registered channel.
///
/// Owned by exactly one streaming session.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl Subscription {
    /// The channel identity.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next payload.
    ///
    /// Returns `None` once the registry has dropped its sending half. The
    /// future is cancel safe.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Take a payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}

/// The sending half of a channel, as captured by a snapshot.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl SubscriberHandle {
    /// The channel identity.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Enqueue a payload. Never waits.
    ///
    /// # Errors
    ///
    /// Returns an error if the receiving session has already gone away.
    pub fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
        self.sender
            .send(payload)
            .map_err(|_| DeliveryError::Closed(self.id))
    }
}

/// The set of active subscriber channels.
///
/// Register, deregister and snapshot are serialized by a single mutex.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    channels: Mutex<BTreeMap<SubscriberId, mpsc::UnboundedSender<Bytes>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // The map is left consistent by every critical section, so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriberId, mpsc::UnboundedSender<Bytes>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new channel and add it to the set.
    ///
    /// A channel whose `Subscription` is dropped without deregistering is
    /// removed by the next publish that reaches it.
    pub fn register(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();

        let size = {
            let mut channels = self.lock();
            channels.insert(id, sender);
            channels.len()
        };

        debug!(subscriber = %id, subscribers = size, "Subscriber registered");
        Subscription { id, receiver }
    }

    /// Remove a channel from the set.
    ///
    /// Returns `true` if it was registered; removing an unknown or already
    /// removed id is a no-op.
    pub fn deregister(&self, id: SubscriberId) -> bool {
        let (removed, size) = {
            let mut channels = self.lock();
            let removed = channels.remove(&id).is_some();
            (removed, channels.len())
        };

        if removed {
            debug!(subscriber = %id, subscribers = size, "Subscriber deregistered");
        }
        removed
    }

    /// Copy out the current members in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriberHandle> {
        self.lock()
            .iter()
            .map(|(id, sender)| SubscriberHandle {
                id: *id,
                sender: sender.clone(),
            })
            .collect()
    }

    /// Drop every registered channel.
    ///
    /// Sessions blocked on their channel observe the close and end. Returns
    /// the number of channels removed.
    pub fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.lock());
        if !drained.is_empty() {
            info!(subscribers = drained.len(), "Closed all subscriber channels");
        }
        drained.len()
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a channel is currently registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().contains_key(&id)
    }
}
